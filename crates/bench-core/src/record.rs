//! Per-model metrics records and the run-level index.
//!
//! A [`ModelRecord`] is produced for every model attempted, whether or not
//! generation succeeded: failure is encoded as a status and message, never
//! as a missing record. The [`RunIndex`] collects records as they commit and
//! is the sole interface the external report builder consumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::BackendMode;

/// Run-level index document, rewritten after every committed record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunIndex {
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Which backend this run benchmarked.
    pub backend: BackendMode,
    /// Records committed so far, in commit order.
    pub records: Vec<ModelRecord>,
}

impl RunIndex {
    /// Create an empty index for a new run.
    pub fn new(backend: BackendMode) -> Self {
        Self {
            started_at: Utc::now(),
            backend,
            records: Vec::new(),
        }
    }
}

/// Metrics record for one benchmarked model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    /// API-facing model identifier.
    pub model_id: String,
    /// Load-facing key the resolver chose (local backend only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_key: Option<String>,
    /// When this model's pipeline started.
    pub benched_at: DateTime<Utc>,
    /// Wall-clock time the load call took (local backend only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_time_seconds: Option<f64>,
    /// Outcome of the single generation call.
    pub generation: GenerationResult,
    /// Power aggregates, when a sampler produced data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power: Option<PowerSummary>,
    /// Memory snapshots and high-water marks, when sampled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemorySummary>,
    /// Files produced for this model.
    pub artifacts: ArtifactSet,
    /// Failure description when the pipeline did not complete cleanly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ModelRecord {
    /// Create a record shell for a model before its pipeline runs.
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            resolved_key: None,
            benched_at: Utc::now(),
            load_time_seconds: None,
            generation: GenerationResult::default(),
            power: None,
            memory: None,
            artifacts: ArtifactSet::default(),
            error: None,
        }
    }
}

/// Terminal status of a generation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    /// The endpoint returned a usable response.
    Ok,
    /// The call exceeded its read timeout.
    Timeout,
    /// The endpoint (and fallback, where eligible) failed.
    EndpointError,
}

impl Default for GenerationStatus {
    fn default() -> Self {
        Self::EndpointError
    }
}

/// Outcome of the single generation request for a model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationResult {
    /// Terminal status of the request.
    pub status: GenerationStatus,
    /// Wall-clock generation time, absent when the call never completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_time_seconds: Option<f64>,
    /// Token usage reported by the backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageStats>,
    /// Rich per-request statistics passed through verbatim (tokens/sec,
    /// time-to-first-token, ...) when the primary endpoint supplies them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_stats: Option<serde_json::Value>,
}

impl GenerationResult {
    /// Tokens per second for this generation.
    ///
    /// Prefers the backend-reported figure from `server_stats`; otherwise
    /// derives `completion_tokens / generation_time_seconds`. Absent when
    /// neither source is available.
    pub fn tokens_per_second(&self) -> Option<f64> {
        if let Some(reported) = self
            .server_stats
            .as_ref()
            .and_then(|s| s.get("tokens_per_second"))
            .and_then(serde_json::Value::as_f64)
        {
            return Some(reported);
        }
        let completion = self.usage.as_ref()?.completion_tokens? as f64;
        let secs = self.generation_time_seconds?;
        if secs > 0.0 && completion > 0.0 {
            Some(completion / secs)
        } else {
            None
        }
    }
}

/// Token usage payload, backend-dependent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageStats {
    /// Tokens in the prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    /// Tokens generated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    /// Prompt plus completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    /// Per-request cost in account currency (remote backend only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

/// Hardware component a power reading is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerComponent {
    /// CPU package power.
    Cpu,
    /// GPU power.
    Gpu,
    /// Neural-accelerator power.
    Ane,
}

/// One parsed power reading.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerSample {
    /// Timestamp of the sample block this reading came from, when the
    /// telemetry tool emitted one that could be parsed.
    pub timestamp: Option<DateTime<Utc>>,
    /// Component the reading belongs to.
    pub component: PowerComponent,
    /// Reading normalized to watts.
    pub watts: f64,
}

/// Aggregate statistics for one power component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentStats {
    /// Mean watts over all samples.
    pub avg_watts: f64,
    /// Minimum observed watts.
    pub min_watts: f64,
    /// Maximum observed watts.
    pub max_watts: f64,
    /// Number of samples aggregated.
    pub samples: usize,
}

impl ComponentStats {
    /// Aggregate a slice of watt readings. Returns `None` for an empty slice.
    pub fn from_watts(watts: &[f64]) -> Option<Self> {
        if watts.is_empty() {
            return None;
        }
        let sum: f64 = watts.iter().sum();
        let min = watts.iter().copied().fold(f64::INFINITY, f64::min);
        let max = watts.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(Self {
            avg_watts: sum / watts.len() as f64,
            min_watts: min,
            max_watts: max,
            samples: watts.len(),
        })
    }
}

/// Power aggregates for one generation window.
///
/// Components the sampler produced no data for are omitted; an entirely
/// empty summary means the sampler ran but parsed nothing usable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PowerSummary {
    /// CPU power statistics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<ComponentStats>,
    /// GPU power statistics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu: Option<ComponentStats>,
    /// Neural-accelerator power statistics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ane: Option<ComponentStats>,
    /// The sampler combination that produced the data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub samplers: Option<String>,
}

impl PowerSummary {
    /// Whether no component produced any samples.
    pub fn is_empty(&self) -> bool {
        self.cpu.is_none() && self.gpu.is_none() && self.ane.is_none()
    }
}

/// Point-in-time memory reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
    /// System-wide used memory (total minus available), in bytes.
    pub system_used_bytes: u64,
    /// Summed resident memory of all matching backend processes, in bytes.
    pub process_rss_bytes: u64,
}

/// Memory snapshots around the pipeline plus polling high-water marks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySummary {
    /// Before the model was loaded.
    pub baseline: MemorySnapshot,
    /// After the load call returned.
    pub after_load: MemorySnapshot,
    /// After generation finished (or failed).
    pub after_generation: MemorySnapshot,
    /// Highest system-used reading observed while polling during generation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_used_hwm_bytes: Option<u64>,
    /// Highest process-aggregate RSS observed while polling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_rss_hwm_bytes: Option<u64>,
}

/// Files produced for one model, in production order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactSet {
    /// Extracted-markup artifact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<PathBuf>,
    /// Raw response text, preserved verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<PathBuf>,
    /// Power telemetry log (local backend only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telemetry_log: Option<PathBuf>,
    /// The serialized record itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<PathBuf>,
}
