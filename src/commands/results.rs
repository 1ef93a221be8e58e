//! Show records from a previous run's index.

use anyhow::{Context, Result};
use bench_core::{GenerationStatus, ModelRecord, RunIndex};
use bench_runner::aggregator::INDEX_FILE;
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use tabled::{Table, Tabled};

/// Arguments for the results command.
#[derive(Args, Debug)]
pub struct ResultsArgs {
    /// Run directory containing index.json
    #[arg(short, long)]
    pub dir: PathBuf,
}

/// Table row for one model record.
#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Load (s)")]
    load: String,
    #[tabled(rename = "Gen (s)")]
    generation: String,
    #[tabled(rename = "Tok/s")]
    tokens_per_second: String,
    #[tabled(rename = "CPU W")]
    cpu_watts: String,
    #[tabled(rename = "GPU W")]
    gpu_watts: String,
    #[tabled(rename = "RAM HWM (GiB)")]
    ram_hwm: String,
    #[tabled(rename = "Cost")]
    cost: String,
}

/// Execute the results command.
pub fn execute(args: ResultsArgs, json: bool) -> Result<()> {
    let index_path = args.dir.join(INDEX_FILE);
    let text = std::fs::read_to_string(&index_path)
        .with_context(|| format!("cannot read {}", index_path.display()))?;
    let index: RunIndex =
        serde_json::from_str(&text).with_context(|| format!("cannot parse {}", index_path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&index)?);
        return Ok(());
    }

    if index.records.is_empty() {
        println!("{}", "No records in this run yet.".yellow());
        return Ok(());
    }

    let rows: Vec<RecordRow> = index.records.iter().map(record_row).collect();
    println!("{}", Table::new(rows));

    let total = index.records.len();
    let ok = index
        .records
        .iter()
        .filter(|r| r.generation.status == GenerationStatus::Ok)
        .count();
    println!();
    println!(
        "Total: {} | {} | {}",
        total.to_string().cyan(),
        format!("Ok: {ok}").green(),
        format!("Failed: {}", total - ok)
    );
    Ok(())
}

fn record_row(record: &ModelRecord) -> RecordRow {
    let fmt_f64 = |value: Option<f64>| {
        value
            .map(|v| format!("{v:.2}"))
            .unwrap_or_else(|| "-".to_string())
    };

    let status = match record.generation.status {
        GenerationStatus::Ok => "ok".green().to_string(),
        GenerationStatus::Timeout => "timeout".yellow().to_string(),
        GenerationStatus::EndpointError => "error".red().to_string(),
    };

    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
    RecordRow {
        model: record.model_id.clone(),
        status,
        load: fmt_f64(record.load_time_seconds),
        generation: fmt_f64(record.generation.generation_time_seconds),
        tokens_per_second: fmt_f64(record.generation.tokens_per_second()),
        cpu_watts: fmt_f64(
            record
                .power
                .as_ref()
                .and_then(|p| p.cpu.as_ref())
                .map(|c| c.avg_watts),
        ),
        gpu_watts: fmt_f64(
            record
                .power
                .as_ref()
                .and_then(|p| p.gpu.as_ref())
                .map(|c| c.avg_watts),
        ),
        ram_hwm: fmt_f64(
            record
                .memory
                .as_ref()
                .and_then(|m| m.process_rss_hwm_bytes)
                .map(|b| b as f64 / GIB),
        ),
        cost: record
            .generation
            .usage
            .as_ref()
            .and_then(|u| u.cost)
            .map(|c| format!("{c:.4}"))
            .unwrap_or_else(|| "-".to_string()),
    }
}
