//! # Bench Runner
//!
//! The run orchestrator and the metrics aggregator:
//!
//! - [`orchestrator`]: drives the per-model pipeline, sequentially for the
//!   local backend and through a bounded worker pool for the remote one,
//!   guaranteeing one committed record per attempted model
//! - [`aggregator`]: owns the run directory and the run-level index;
//!   every write is atomic and index updates are serialized

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregator;
pub mod orchestrator;

pub use aggregator::Aggregator;
pub use orchestrator::{Orchestrator, RunSummary};
