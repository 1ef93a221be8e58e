//! Power sampling via an external telemetry subprocess.
//!
//! The sampler wraps `powermetrics`: it is started for the duration of one
//! generation call with its textual output streamed to a log artifact, then
//! terminated and the log parsed into per-component watt aggregates.
//!
//! Which sampler combinations the tool accepts varies by OS release and by
//! caller privilege, so [`PowerCapabilities::probe`] tries a prioritized
//! list and records the first one that launches; when every combination
//! fails the run proceeds with power telemetry disabled.

use bench_core::{BenchError, BenchResult, ComponentStats, PowerComponent, PowerSample, PowerSummary};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// The external telemetry tool.
const POWER_TOOL: &str = "powermetrics";

/// Sampler combinations in preference order, richest first. Later entries
/// survive older OS releases and reduced privilege.
const SAMPLER_COMBOS: [&str; 6] = [
    "cpu_power,gpu_power,ane_power",
    "cpu_power,gpu_power",
    "cpu_energy,gpu_energy",
    "cpu_power",
    "gpu_power",
    "all",
];

/// Number of samples used when probing a combination.
const PROBE_SAMPLES: u32 = 3;

static ANSI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1B\[[0-?]*[ -/]*[@-~]").expect("valid ANSI pattern"));
static SECTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(CPU|GPU|ANE)\b").expect("valid section pattern"));
static POWER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(CPU|GPU|ANE)\b.*?Power:\s*([0-9.]+)\s*(mW|W)\b").expect("valid power pattern")
});
static AVG_POWER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Average power:\s*([0-9.]+)\s*(mW|W)\b").expect("valid average pattern")
});
static BLOCK_TS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\*\*\* Sampled system activity \(([^)]+)\)").expect("valid timestamp pattern")
});

/// Outcome of probing the telemetry tool, carried explicitly through the
/// run instead of hiding behind global state.
#[derive(Debug, Clone, Default)]
pub struct PowerCapabilities {
    /// The first sampler combination that launched successfully, or `None`
    /// when power telemetry is unavailable on this host.
    pub combo: Option<String>,
}

impl PowerCapabilities {
    /// Probe the default telemetry tool.
    pub async fn probe(interval: Duration) -> Self {
        Self::probe_tool(POWER_TOOL, interval).await
    }

    /// Probe a specific tool binary. Split out so tests can exercise the
    /// probing logic without `powermetrics` on the host.
    pub async fn probe_tool(tool: &str, interval: Duration) -> Self {
        for combo in SAMPLER_COMBOS {
            let output = Command::new(tool)
                .args(["--samplers", combo])
                .args(["-n", &PROBE_SAMPLES.to_string()])
                .args(["-i", &interval.as_millis().to_string()])
                .stdin(Stdio::null())
                .output()
                .await;

            match output {
                Ok(out) if out.status.success() && !out.stdout.is_empty() => {
                    debug!(combo, "power sampler combination accepted");
                    return Self {
                        combo: Some(combo.to_string()),
                    };
                }
                Ok(out) => {
                    debug!(combo, status = %out.status, "power sampler combination rejected");
                }
                Err(e) => {
                    debug!(combo, error = %e, "power tool not invocable");
                    // The tool itself is missing; trying more combinations
                    // cannot succeed.
                    break;
                }
            }
        }
        warn!("power telemetry unavailable; proceeding without power data");
        Self { combo: None }
    }

    /// Whether a usable combination was found.
    pub fn is_available(&self) -> bool {
        self.combo.is_some()
    }
}

/// Handle on one power-telemetry subprocess.
///
/// `start()` launches the tool with output streamed to the log file;
/// `stop()` terminates it. Stopping is idempotent and a no-op when start
/// never launched a child.
#[derive(Debug)]
pub struct PowerSampler {
    log_path: PathBuf,
    combo: String,
    interval: Duration,
    child: Option<Child>,
}

impl PowerSampler {
    /// Create a sampler writing to `log_path` with the probed combination.
    pub fn new(log_path: impl Into<PathBuf>, combo: impl Into<String>, interval: Duration) -> Self {
        Self {
            log_path: log_path.into(),
            combo: combo.into(),
            interval,
            child: None,
        }
    }

    /// Path of the log artifact this sampler writes.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Launch the telemetry subprocess.
    ///
    /// No sample count is passed; the child runs until [`Self::stop`].
    pub async fn start(&mut self) -> BenchResult<()> {
        if self.child.is_some() {
            return Ok(());
        }
        let log = std::fs::File::create(&self.log_path)
            .map_err(|e| BenchError::artifact_write(&self.log_path, e))?;
        let err_log = log
            .try_clone()
            .map_err(|e| BenchError::artifact_write(&self.log_path, e))?;

        let child = Command::new(POWER_TOOL)
            .args(["--samplers", &self.combo])
            .args(["-i", &self.interval.as_millis().to_string()])
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(err_log))
            .spawn()
            .map_err(|e| BenchError::SamplerUnavailable(format!("{POWER_TOOL}: {e}")))?;

        debug!(combo = %self.combo, log = %self.log_path.display(), "power sampler started");
        self.child = Some(child);
        Ok(())
    }

    /// Terminate the subprocess if one is running.
    ///
    /// Safe to call multiple times and safe when `start()` failed or was
    /// never called.
    pub async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Err(e) = child.start_kill() {
            warn!(error = %e, "failed to signal power sampler");
        }
        match tokio::time::timeout(Duration::from_secs(3), child.wait()).await {
            Ok(Ok(status)) => debug!(%status, "power sampler exited"),
            Ok(Err(e)) => warn!(error = %e, "failed to reap power sampler"),
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill power sampler");
                }
            }
        }
    }

    /// Read back the log this sampler produced and aggregate it.
    pub async fn parse_log(&self, combo: Option<String>) -> PowerSummary {
        let text = match tokio::fs::read_to_string(&self.log_path).await {
            Ok(text) => text,
            Err(e) => {
                warn!(log = %self.log_path.display(), error = %e, "power log unreadable");
                return PowerSummary::default();
            }
        };
        let mut summary = summarize_samples(&parse_power_log(&text));
        summary.samplers = combo;
        summary
    }
}

/// Parse streamed telemetry output into watt readings.
///
/// Tolerates partial and interleaved lines: anything that does not match a
/// known shape is skipped. Accepts both direct readings (`CPU Power: 12.3 W`)
/// and sectioned averages (`Average power: 850 mW` under a `GPU ...` header),
/// normalizing milliwatts to watts.
pub fn parse_power_log(text: &str) -> Vec<PowerSample> {
    let mut samples = Vec::new();
    let mut current_section: Option<PowerComponent> = None;
    let mut block_timestamp: Option<DateTime<Utc>> = None;

    for raw in text.lines() {
        let line = ANSI_RE.replace_all(raw.trim(), "");

        if let Some(caps) = BLOCK_TS_RE.captures(&line) {
            block_timestamp = parse_block_timestamp(&caps[1]);
        }

        if let Some(caps) = SECTION_RE.captures(&line) {
            current_section = component_from_label(&caps[1]);
        }

        if let Some(caps) = POWER_RE.captures(&line) {
            if let (Some(component), Some(watts)) = (
                component_from_label(&caps[1]),
                parse_watts(&caps[2], &caps[3]),
            ) {
                samples.push(PowerSample {
                    timestamp: block_timestamp,
                    component,
                    watts,
                });
                continue;
            }
        }

        if let Some(caps) = AVG_POWER_RE.captures(&line) {
            if let (Some(component), Some(watts)) =
                (current_section, parse_watts(&caps[1], &caps[2]))
            {
                samples.push(PowerSample {
                    timestamp: block_timestamp,
                    component,
                    watts,
                });
            }
        }
    }
    samples
}

/// Aggregate parsed samples into per-component statistics.
pub fn summarize_samples(samples: &[PowerSample]) -> PowerSummary {
    let watts_for = |component: PowerComponent| -> Vec<f64> {
        samples
            .iter()
            .filter(|s| s.component == component)
            .map(|s| s.watts)
            .collect()
    };
    PowerSummary {
        cpu: ComponentStats::from_watts(&watts_for(PowerComponent::Cpu)),
        gpu: ComponentStats::from_watts(&watts_for(PowerComponent::Gpu)),
        ane: ComponentStats::from_watts(&watts_for(PowerComponent::Ane)),
        samplers: None,
    }
}

fn component_from_label(label: &str) -> Option<PowerComponent> {
    match label.to_ascii_uppercase().as_str() {
        "CPU" => Some(PowerComponent::Cpu),
        "GPU" => Some(PowerComponent::Gpu),
        "ANE" => Some(PowerComponent::Ane),
        _ => None,
    }
}

fn parse_watts(value: &str, unit: &str) -> Option<f64> {
    let value: f64 = value.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    if unit.eq_ignore_ascii_case("mw") {
        Some(value / 1000.0)
    } else {
        Some(value)
    }
}

fn parse_block_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    // e.g. "Tue Aug  5 12:00:00 2025 +0200"
    DateTime::parse_from_str(raw.trim(), "%a %b %e %H:%M:%S %Y %z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
