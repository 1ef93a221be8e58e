//! Error types for the benchmark harness.
//!
//! Every failure is scoped to the model being benchmarked; the orchestrator
//! records it and moves on. The one exception is [`BenchError::ArtifactWrite`],
//! which indicates an integrity problem with the run's storage and is
//! summarized to the operator at run end.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias using [`BenchError`].
pub type BenchResult<T> = Result<T, BenchError>;

/// Errors produced while benchmarking a single model.
#[derive(Debug, Error)]
pub enum BenchError {
    /// The control CLI failed to load the model. Fatal for that model only;
    /// a record is still written with no generation data.
    #[error("failed to load model '{model}': {message}")]
    LoadFailure {
        /// The load key passed to the control CLI.
        model: String,
        /// Stderr or exit status reported by the CLI.
        message: String,
    },

    /// A telemetry sampler could not be started. Non-fatal; the
    /// corresponding summary is left empty.
    #[error("sampler unavailable: {0}")]
    SamplerUnavailable(String),

    /// The generation call exceeded its wall-clock budget. Terminal for
    /// that request; there is no retry.
    #[error("generation timed out after {seconds:.1}s")]
    GenerationTimeout {
        /// The configured read timeout, in seconds.
        seconds: f64,
    },

    /// Both the primary endpoint and (where eligible) the fallback failed.
    #[error("endpoint unavailable: {0}")]
    EndpointUnavailable(String),

    /// An artifact or index write failed. Surfaced to the operator because
    /// it indicates a problem with the run's storage, not the model.
    #[error("failed to write artifact {path}: {source}")]
    ArtifactWrite {
        /// Destination path of the failed write.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The external control CLI could not be invoked or returned garbage.
    #[error("control CLI error: {0}")]
    ControlCli(String),

    /// Invalid run setup: bad base URL, missing credential, unwritable
    /// output directory.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A response or catalog entry failed to deserialize.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// General I/O failure outside artifact writes.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl BenchError {
    /// Create an [`BenchError::ArtifactWrite`] for the given path.
    pub fn artifact_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ArtifactWrite {
            path: path.into(),
            source,
        }
    }

    /// Whether this error leaves the model without any generation output.
    pub fn is_generation_failure(&self) -> bool {
        matches!(
            self,
            Self::GenerationTimeout { .. } | Self::EndpointUnavailable(_) | Self::LoadFailure { .. }
        )
    }
}
