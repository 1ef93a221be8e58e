//! CLI command implementations.

pub mod local;
pub mod models;
pub mod remote;
pub mod results;

use anyhow::Result;
use bench_core::GenerationParams;
use bench_runner::RunSummary;
use std::path::Path;

/// Shared sampling-parameter flags for the benchmarking commands.
#[derive(clap::Args, Debug, Clone)]
pub struct ParamArgs {
    /// Sampling temperature (unset: server default)
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Nucleus-sampling threshold (unset: server default)
    #[arg(long)]
    pub top_p: Option<f32>,

    /// Maximum tokens to generate (unset: server default)
    #[arg(long)]
    pub max_tokens: Option<i64>,

    /// Reasoning-effort hint (unset: not sent)
    #[arg(long)]
    pub reasoning_effort: Option<String>,

    /// Context length override (unset: not sent)
    #[arg(long)]
    pub context_length: Option<u32>,
}

impl From<ParamArgs> for GenerationParams {
    fn from(args: ParamArgs) -> Self {
        Self {
            temperature: args.temperature,
            top_p: args.top_p,
            max_tokens: args.max_tokens,
            reasoning_effort: args.reasoning_effort,
            context_length: args.context_length,
        }
    }
}

/// Read an overriding user prompt from a file, if one was given.
pub fn load_prompt(path: Option<&Path>) -> Result<Option<String>> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("cannot read prompt file {}: {e}", path.display()))?;
            Ok(Some(text))
        }
        None => Ok(None),
    }
}

/// Print the run summary and fail the process when any artifact write
/// failed: that is a storage-integrity problem, not a model failure.
pub fn finish_run(summary: &RunSummary) -> Result<()> {
    tracing::info!(
        attempted = summary.attempted,
        succeeded = summary.succeeded,
        skipped = summary.skipped,
        "run finished"
    );
    if summary.has_write_failures() {
        for failure in &summary.write_failures {
            tracing::error!(%failure, "artifact write failed");
        }
        anyhow::bail!(
            "{} artifact write(s) failed; the run directory is incomplete",
            summary.write_failures.len()
        );
    }
    Ok(())
}
