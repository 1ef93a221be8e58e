//! Benchmark a list of models against the remote API aggregator.

use anyhow::{Context, Result};
use bench_backends::RemoteBackend;
use bench_core::RunConfig;
use bench_runner::Orchestrator;
use clap::Args;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::{finish_run, load_prompt, ParamArgs};

/// Arguments for the remote benchmark command.
#[derive(Args, Debug)]
pub struct RemoteArgs {
    /// File listing model identifiers to benchmark, one per line
    #[arg(long, default_value = "openrouter_models.txt")]
    pub models_file: PathBuf,

    /// Number of models benchmarked concurrently
    #[arg(short, long, default_value_t = 8)]
    pub concurrency: usize,

    /// Generation (read) timeout in seconds
    #[arg(long, default_value_t = 300)]
    pub timeout: u64,

    /// Output directory (default: reports/openrouter-bench-<settings-hash>)
    #[arg(short, long)]
    pub out_dir: Option<PathBuf>,

    /// File containing the user prompt (default: built-in benchmark task)
    #[arg(long)]
    pub prompt_file: Option<PathBuf>,

    /// Re-benchmark models whose record already exists
    #[arg(long)]
    pub force: bool,

    #[command(flatten)]
    pub params: ParamArgs,
}

/// Execute the remote benchmark command.
pub async fn execute(args: RemoteArgs) -> Result<()> {
    let models = read_models_file(&args.models_file)?;
    if models.is_empty() {
        anyhow::bail!("no models found in '{}'", args.models_file.display());
    }

    let mut config = RunConfig::remote("reports", args.concurrency)
        .with_generation_timeout(Duration::from_secs(args.timeout))
        .with_params(args.params.into());
    if let Some(prompt) = load_prompt(args.prompt_file.as_deref())? {
        config = config.with_user_prompt(prompt);
    }
    config.skip_existing = !args.force;
    // A settings-derived directory keeps re-runs of the same configuration
    // in one place, which is what makes skip-if-exists useful.
    let out_dir = args
        .out_dir
        .unwrap_or_else(|| PathBuf::from("reports").join(settings_dir_name(&config)));
    config.out_dir = out_dir;

    tracing::info!(
        count = models.len(),
        concurrency = config.concurrency,
        "benchmarking remote models"
    );

    let backend =
        Arc::new(RemoteBackend::from_env(&config).context("configuring remote backend")?);
    let orchestrator = Orchestrator::new(config).context("initializing run directory")?;
    let summary = orchestrator.run_remote(backend, &models).await;

    println!(
        "Run complete. Index: {}",
        orchestrator
            .aggregator()
            .out_dir()
            .join(bench_runner::aggregator::INDEX_FILE)
            .display()
    );
    finish_run(&summary)
}

/// Read one model identifier per non-empty line.
fn read_models_file(path: &std::path::Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read models file '{}'", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect())
}

/// Deterministic directory name derived from the settings that change a
/// run's results.
fn settings_dir_name(config: &RunConfig) -> String {
    let mut hasher = Sha256::new();
    hasher.update(config.prompt.user.as_bytes());
    hasher.update(format!(
        "{:?}{:?}{:?}",
        config.params.temperature, config.params.top_p, config.params.max_tokens
    ));
    let digest = hex::encode(hasher.finalize());
    format!("openrouter-bench-{}", &digest[..10])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_dir_name_is_stable_per_configuration() {
        let a = RunConfig::remote("reports", 4);
        let b = RunConfig::remote("elsewhere", 8);
        // Same prompt and params: same directory, regardless of other knobs.
        assert_eq!(settings_dir_name(&a), settings_dir_name(&b));

        let c = RunConfig::remote("reports", 4).with_user_prompt("different");
        assert_ne!(settings_dir_name(&a), settings_dir_name(&c));
    }

    #[test]
    fn models_file_skips_blanks_and_comments() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("models.txt");
        std::fs::write(&path, "vendor/a\n\n# comment\n  vendor/b  \n").expect("write");
        let models = read_models_file(&path).expect("read");
        assert_eq!(models, vec!["vendor/a".to_string(), "vendor/b".to_string()]);
    }
}
