//! CLI argument definitions using clap.

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands;

/// LLM benchmark harness: performance, cost, and power metrics per model
#[derive(Parser, Debug)]
#[command(name = "llm-bench")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase output verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Benchmark every installed model on the local inference server
    Local(commands::local::LocalArgs),

    /// Benchmark a list of models against the remote API aggregator
    Remote(commands::remote::RemoteArgs),

    /// List models installed on the local inference server
    Models(commands::models::ModelsArgs),

    /// Show records from a previous run's index
    Results(commands::results::ResultsArgs),
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Local(args) => commands::local::execute(args).await,
            Commands::Remote(args) => commands::remote::execute(args).await,
            Commands::Models(args) => commands::models::execute(args, self.json).await,
            Commands::Results(args) => commands::results::execute(args, self.json),
        }
    }
}
