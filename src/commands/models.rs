//! List models installed on the local inference server.

use anyhow::{Context, Result};
use bench_backends::LocalBackend;
use bench_core::RunConfig;
use clap::Args;
use tabled::{Table, Tabled};

/// Arguments for the models command.
#[derive(Args, Debug)]
pub struct ModelsArgs {}

/// Table row for an installed model.
#[derive(Tabled)]
struct ModelRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Quantization")]
    quantization: String,
}

/// Execute the models command.
pub async fn execute(_args: ModelsArgs, json: bool) -> Result<()> {
    let config = RunConfig::local(".");
    let backend = LocalBackend::from_env(&config).context("configuring local backend")?;
    backend
        .ensure_server()
        .await
        .context("local inference server is not reachable")?;

    let catalog = backend
        .installed_catalog()
        .await
        .context("listing installed models")?;

    if json {
        let entries: Vec<serde_json::Value> = catalog
            .iter()
            .map(|m| {
                serde_json::json!({
                    "key": m.key,
                    "size_bytes": m.size_bytes,
                    "quantization": m.quantization,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if catalog.is_empty() {
        println!("No local models installed.");
        return Ok(());
    }

    let rows: Vec<ModelRow> = catalog
        .iter()
        .map(|m| ModelRow {
            key: m.key.clone(),
            size: m
                .size_bytes
                .map(format_size)
                .unwrap_or_else(|| "-".to_string()),
            quantization: m.quantization.clone().unwrap_or_else(|| "-".to_string()),
        })
        .collect();
    println!("{}", Table::new(rows));
    Ok(())
}

fn format_size(bytes: u64) -> String {
    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
    format!("{:.2} GiB", bytes as f64 / GIB)
}
