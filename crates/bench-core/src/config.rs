//! Immutable run configuration.
//!
//! Constructed once per run from CLI arguments and environment, then passed
//! by reference into every component. Optional generation parameters are
//! modeled as `Option<T>` so an unset parameter is omitted from the request
//! body and server/model defaults apply.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Which backend a run benchmarks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    /// Local inference server driven by a companion CLI; strictly
    /// sequential, with power and memory sampling.
    Local,
    /// Remote API aggregator; concurrent worker pool, no local telemetry.
    Remote,
}

/// Sampling parameters forwarded to the generation endpoint.
///
/// Every field is optional: an unset parameter is not serialized into the
/// request, so the server's defaults apply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Nucleus-sampling threshold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Maximum tokens to generate (`-1` lets some servers mean unlimited).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
    /// Reasoning-effort hint for models that accept one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
    /// Context length override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_length: Option<u32>,
}

/// Prompt pair sent with every generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    /// System message.
    pub system: String,
    /// User message (the benchmark task).
    pub user: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system: "You are a careful front-end engineer.".to_string(),
            user: DEFAULT_PROMPT.to_string(),
        }
    }
}

/// Default benchmark task: a self-contained single-file web application,
/// demanding enough to produce a long generation on any model.
pub const DEFAULT_PROMPT: &str = "\
Create a fully functional Kanban board in a single HTML file using vanilla \
JavaScript (no frameworks).

Requirements:
- Columns: Backlog, In Progress, Review, Done.
- Cards must be draggable across columns, editable in place, persisted in \
localStorage, and deletable with a confirmation prompt.
- Each column provides an \"Add card\" action.
- Style with Tailwind via CDN and add subtle CSS transitions.
- Thoroughly comment the code.
- If there are no cards yet, create some dummy cards.

As answer return the plain HTML of the working application (script and \
styles included).";

/// Immutable configuration for one benchmark run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Backend under test.
    pub backend: BackendMode,
    /// Directory all artifacts and the index are written into.
    pub out_dir: PathBuf,
    /// Prompt pair sent to every model.
    pub prompt: PromptConfig,
    /// Optional sampling parameters.
    pub params: GenerationParams,
    /// TCP connect timeout, short and fixed.
    pub connect_timeout: Duration,
    /// Read/generation timeout, the hard wall-clock budget per request.
    pub generation_timeout: Duration,
    /// Power sampler subprocess interval.
    pub power_interval: Duration,
    /// Memory poller interval.
    pub memory_poll_interval: Duration,
    /// Interval between elapsed-time heartbeat log lines during generation.
    pub progress_interval: Duration,
    /// Worker-pool width for the remote backend.
    pub concurrency: usize,
    /// GPU offload setting passed to the local load command.
    pub gpu_offload: String,
    /// Skip models whose record JSON already exists (remote re-runs).
    pub skip_existing: bool,
}

impl RunConfig {
    /// Configuration with the defaults used by a local-backend run.
    pub fn local(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendMode::Local,
            out_dir: out_dir.into(),
            prompt: PromptConfig::default(),
            params: GenerationParams::default(),
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            generation_timeout: Self::DEFAULT_GENERATION_TIMEOUT,
            power_interval: Self::DEFAULT_POWER_INTERVAL,
            memory_poll_interval: Self::DEFAULT_MEMORY_POLL_INTERVAL,
            progress_interval: Self::DEFAULT_PROGRESS_INTERVAL,
            concurrency: 1,
            gpu_offload: "max".to_string(),
            skip_existing: false,
        }
    }

    /// Configuration with the defaults used by a remote-backend run.
    pub fn remote(out_dir: impl Into<PathBuf>, concurrency: usize) -> Self {
        Self {
            backend: BackendMode::Remote,
            concurrency: concurrency.max(1),
            skip_existing: true,
            ..Self::local(out_dir)
        }
    }

    /// Default TCP connect timeout.
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    /// Default generation (read) timeout.
    pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(600);
    /// Default power sampling interval.
    pub const DEFAULT_POWER_INTERVAL: Duration = Duration::from_millis(1000);
    /// Default memory polling interval.
    pub const DEFAULT_MEMORY_POLL_INTERVAL: Duration = Duration::from_secs(1);
    /// Default heartbeat interval.
    pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

    /// Set the generation timeout.
    #[must_use]
    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    /// Set the sampling parameters.
    #[must_use]
    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    /// Replace the user prompt.
    #[must_use]
    pub fn with_user_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt.user = prompt.into();
        self
    }
}
