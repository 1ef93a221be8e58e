//! Benchmark every installed model on the local inference server.

use anyhow::{Context, Result};
use bench_backends::LocalBackend;
use bench_core::RunConfig;
use bench_runner::Orchestrator;
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

use super::{finish_run, load_prompt, ParamArgs};

/// Arguments for the local benchmark command.
#[derive(Args, Debug)]
pub struct LocalArgs {
    /// Output directory (default: timestamped directory in the cwd)
    #[arg(short, long)]
    pub out_dir: Option<PathBuf>,

    /// Generation (read) timeout in seconds
    #[arg(long, default_value_t = 600)]
    pub timeout: u64,

    /// Benchmark only these model identifiers instead of every installed one
    #[arg(long)]
    pub model: Vec<String>,

    /// File containing the user prompt (default: built-in benchmark task)
    #[arg(long)]
    pub prompt_file: Option<PathBuf>,

    /// GPU offload setting passed to the load command
    #[arg(long, default_value = "max")]
    pub gpu: String,

    /// Power sampling interval in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub power_interval_ms: u64,

    #[command(flatten)]
    pub params: ParamArgs,
}

/// Execute the local benchmark command.
pub async fn execute(args: LocalArgs) -> Result<()> {
    let out_dir = args.out_dir.unwrap_or_else(|| {
        PathBuf::from(format!(
            "llm-bench-{}",
            chrono::Local::now().format("%Y%m%d-%H%M%S")
        ))
    });

    let mut config = RunConfig::local(out_dir)
        .with_generation_timeout(Duration::from_secs(args.timeout))
        .with_params(args.params.into());
    config.gpu_offload = args.gpu;
    config.power_interval = Duration::from_millis(args.power_interval_ms.max(100));
    if let Some(prompt) = load_prompt(args.prompt_file.as_deref())? {
        config = config.with_user_prompt(prompt);
    }

    let backend = LocalBackend::from_env(&config).context("configuring local backend")?;
    backend
        .ensure_server()
        .await
        .context("local inference server is not reachable")?;

    let models = if args.model.is_empty() {
        backend
            .list_model_ids()
            .await
            .context("listing installed models")?
    } else {
        args.model
    };
    if models.is_empty() {
        anyhow::bail!("no local models found; download models in the server UI first");
    }
    tracing::info!(count = models.len(), "benchmarking local models");

    let orchestrator = Orchestrator::new(config).context("initializing run directory")?;
    let summary = orchestrator.run_local(&backend, &models).await;

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
