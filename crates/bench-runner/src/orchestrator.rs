//! Run orchestration.
//!
//! Drives the strict per-model pipeline: `Unloading → Loading → Sampling →
//! Generating → Finalizing` for the local backend, `Generating → Finalizing`
//! for the remote one. No stage is skipped and every failure path reaches
//! `Finalizing`, so exactly one record is committed per attempted model;
//! failure is a field in the record, never a missing file.
//!
//! Local runs are strictly sequential: power and memory sampling are
//! system-wide and would be meaningless with overlapping models. Remote
//! runs fan out through a semaphore-bounded worker pool; workers share
//! nothing but the aggregator, whose index lock serializes their commits.

use crate::aggregator::Aggregator;
use bench_backends::{extract, resolve_load_key, ChatOutcome, InstalledModel, LocalBackend, RemoteBackend};
use bench_core::{BenchResult, MemorySummary, ModelRecord, RunConfig};
use bench_telemetry::{MemoryPoller, MemoryProbe, PowerCapabilities, PowerSampler};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Pipeline stage, logged on every transition.
#[derive(Debug, Clone, Copy)]
enum Stage {
    Unloading,
    Loading,
    Sampling,
    Generating,
    Finalizing,
}

fn enter(model: &str, stage: Stage) {
    debug!(model, stage = ?stage, "pipeline stage");
}

/// Totals for one finished run.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Models the pipeline ran for.
    pub attempted: usize,
    /// Models whose generation completed with `Ok`.
    pub succeeded: usize,
    /// Models skipped because their record already existed.
    pub skipped: usize,
    /// Artifact/index write failures, one message per failed write. Any
    /// entry here means the run's storage is suspect and the process
    /// should exit non-zero.
    pub write_failures: Vec<String>,
}

impl RunSummary {
    /// Whether any artifact or index write failed.
    pub fn has_write_failures(&self) -> bool {
        !self.write_failures.is_empty()
    }

    fn absorb(&mut self, report: ModelRunReport) {
        self.attempted += 1;
        if report.generation_ok {
            self.succeeded += 1;
        }
        self.write_failures.extend(report.write_failures);
    }
}

/// Per-model outcome handed back to the run loop.
#[derive(Debug, Default)]
struct ModelRunReport {
    generation_ok: bool,
    write_failures: Vec<String>,
}

/// Sequences per-model pipelines and owns run-wide wiring.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: Arc<RunConfig>,
    aggregator: Arc<Aggregator>,
}

impl Orchestrator {
    /// Create an orchestrator and initialize the run directory.
    pub fn new(config: RunConfig) -> BenchResult<Self> {
        let aggregator = Aggregator::new(&config.out_dir, config.backend)?;
        Ok(Self {
            config: Arc::new(config),
            aggregator: Arc::new(aggregator),
        })
    }

    /// The aggregator owning this run's directory and index.
    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    /// Benchmark every model sequentially against the local backend.
    pub async fn run_local(&self, backend: &LocalBackend, models: &[String]) -> RunSummary {
        let capabilities = PowerCapabilities::probe(self.config.power_interval).await;
        if let Some(combo) = &capabilities.combo {
            info!(combo = %combo, "power telemetry enabled");
        }

        let catalog = match backend.installed_catalog().await {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!(error = %e, "installed-model catalog unavailable; load keys fall back to raw identifiers");
                Vec::new()
            }
        };

        let mut summary = RunSummary::default();
        for model_id in models {
            info!(model = %model_id, "benchmarking");
            let report = self
                .bench_local_model(backend, &capabilities, &catalog, model_id)
                .await;
            summary.absorb(report);
        }
        summary
    }

    /// One local pipeline: unload, load, sample, generate, finalize.
    async fn bench_local_model(
        &self,
        backend: &LocalBackend,
        capabilities: &PowerCapabilities,
        catalog: &[InstalledModel],
        model_id: &str,
    ) -> ModelRunReport {
        let stem = Aggregator::safe_file_stem(model_id);
        let mut record = ModelRecord::new(model_id);
        let mut report = ModelRunReport::default();

        enter(model_id, Stage::Unloading);
        backend.cli().unload_all().await;

        let mut probe = MemoryProbe::new(bench_backends::lmstudio::PROCESS_MATCHERS);
        let baseline = probe.snapshot();

        enter(model_id, Stage::Loading);
        let key = resolve_load_key(model_id, catalog);
        record.resolved_key = Some(key.clone());
        match backend.cli().load(&key).await {
            Ok(load_secs) => {
                info!(model = %model_id, key = %key, load_seconds = load_secs, "model loaded");
                record.load_time_seconds = Some(load_secs);
            }
            Err(e) => {
                // Straight to Finalizing: the record is written with the
                // failure encoded and no generation attempted.
                warn!(model = %model_id, error = %e, "load failed");
                record.error = Some(e.to_string());
                enter(model_id, Stage::Finalizing);
                self.commit(record, &mut report).await;
                backend.cli().unload_all().await;
                return report;
            }
        }
        let after_load = probe.snapshot();

        enter(model_id, Stage::Sampling);
        let mut power_sampler = None;
        if let Some(combo) = &capabilities.combo {
            let log_path = self.aggregator.artifact_path(&stem, "_power.log");
            let mut sampler =
                PowerSampler::new(&log_path, combo.clone(), self.config.power_interval);
            match sampler.start().await {
                Ok(()) => {
                    record.artifacts.telemetry_log = Some(log_path);
                    power_sampler = Some(sampler);
                }
                Err(e) => warn!(error = %e, "power sampler failed to start; power fields stay empty"),
            }
        }
        let mut poller = MemoryPoller::start(
            bench_backends::lmstudio::PROCESS_MATCHERS,
            self.config.memory_poll_interval,
        );

        enter(model_id, Stage::Generating);
        let heartbeat = self.spawn_heartbeat(model_id.to_string());
        let outcome = backend
            .generate(model_id, &self.config.prompt, &self.config.params)
            .await;
        heartbeat.abort();

        enter(model_id, Stage::Finalizing);
        // Stop order is arbitrary; both stops are safe even if the matching
        // start failed.
        let after_generation = probe.snapshot();
        let high_water = poller.stop().await;
        if let Some(mut sampler) = power_sampler {
            sampler.stop().await;
            let power = sampler.parse_log(capabilities.combo.clone()).await;
            record.power = Some(power);
        }

        // The polling HWM can trail the closing snapshot when the last poll
        // fired early; the summary's high-water mark is their maximum so it
        // never reads below the state we directly observed.
        record.memory = Some(MemorySummary {
            baseline,
            after_load,
            after_generation,
            system_used_hwm_bytes: Some(
                high_water
                    .map(|h| h.system_used_bytes)
                    .unwrap_or_default()
                    .max(after_generation.system_used_bytes),
            ),
            process_rss_hwm_bytes: Some(
                high_water
                    .map(|h| h.process_rss_bytes)
                    .unwrap_or_default()
                    .max(after_generation.process_rss_bytes),
            ),
        });

        report.generation_ok = outcome.status == bench_core::GenerationStatus::Ok;
        self.apply_outcome(&mut record, &stem, outcome, &mut report);
        self.commit(record, &mut report).await;

        backend.cli().unload_all().await;
        report
    }

    /// Benchmark models against the remote backend through a worker pool of
    /// the configured width. At no instant are more than `concurrency`
    /// generation calls in flight.
    pub async fn run_remote(&self, backend: Arc<RemoteBackend>, models: &[String]) -> RunSummary {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut workers = JoinSet::new();
        let mut summary = RunSummary::default();

        for model_id in models {
            if self.config.skip_existing && self.aggregator.record_exists(model_id) {
                info!(model = %model_id, "record exists, skipping");
                summary.skipped += 1;
                continue;
            }
            let orchestrator = self.clone();
            let backend = Arc::clone(&backend);
            let semaphore = Arc::clone(&semaphore);
            let model_id = model_id.clone();
            workers.spawn(async move {
                // Closed only if the semaphore is dropped, which cannot
                // happen while this task holds a clone.
                let Ok(_permit) = semaphore.acquire().await else {
                    return ModelRunReport::default();
                };
                orchestrator.bench_remote_model(&backend, &model_id).await
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(report) => summary.absorb(report),
                Err(e) => warn!(error = %e, "remote worker panicked"),
            }
        }
        summary
    }

    /// One remote pipeline: generate, finalize.
    async fn bench_remote_model(&self, backend: &RemoteBackend, model_id: &str) -> ModelRunReport {
        let stem = Aggregator::safe_file_stem(model_id);
        let mut record = ModelRecord::new(model_id);
        let mut report = ModelRunReport::default();

        info!(model = %model_id, "benchmarking");
        enter(model_id, Stage::Generating);
        let heartbeat = self.spawn_heartbeat(model_id.to_string());
        let outcome = backend
            .generate(model_id, &self.config.prompt, &self.config.params)
            .await;
        heartbeat.abort();

        enter(model_id, Stage::Finalizing);
        report.generation_ok = outcome.status == bench_core::GenerationStatus::Ok;
        self.apply_outcome(&mut record, &stem, outcome, &mut report);
        self.commit(record, &mut report).await;
        report
    }

    /// Fold a generation outcome into the record and write its text
    /// artifacts. Artifact write failures are collected, not fatal.
    fn apply_outcome(
        &self,
        record: &mut ModelRecord,
        stem: &str,
        outcome: ChatOutcome,
        report: &mut ModelRunReport,
    ) {
        record.generation.status = outcome.status;
        record.generation.generation_time_seconds = Some(outcome.generation_time_seconds);
        if let Some(message) = outcome.error {
            record.error = Some(message);
        }

        let Some(response) = outcome.response else {
            return;
        };
        record.generation.usage = response.usage.clone().map(Into::into);
        record.generation.server_stats = response.stats.clone();

        let Some(text) = response.content() else {
            return;
        };

        let raw_path = self.aggregator.artifact_path(stem, ".txt");
        match self.aggregator.write_text_artifact(&raw_path, text) {
            Ok(()) => record.artifacts.raw_text = Some(raw_path),
            Err(e) => report.write_failures.push(e.to_string()),
        }

        let html_path = self.aggregator.artifact_path(stem, ".html");
        match self
            .aggregator
            .write_text_artifact(&html_path, &extract::extract_markup(text))
        {
            Ok(()) => record.artifacts.html = Some(html_path),
            Err(e) => report.write_failures.push(e.to_string()),
        }
    }

    /// Commit the record; a failed commit is a write failure, surfaced at
    /// run end.
    async fn commit(&self, record: ModelRecord, report: &mut ModelRunReport) {
        let model_id = record.model_id.clone();
        if let Err(e) = self.aggregator.commit(record).await {
            warn!(model = %model_id, error = %e, "failed to commit record");
            report.write_failures.push(format!("{model_id}: {e}"));
        }
    }

    /// Periodic elapsed-time log line while a generation is in flight.
    fn spawn_heartbeat(&self, model_id: String) -> tokio::task::JoinHandle<()> {
        let period = self.config.progress_interval;
        tokio::spawn(async move {
            let started = Instant::now();
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                info!(model = %model_id, elapsed_s = started.elapsed().as_secs(), "generating");
            }
        })
    }
}
