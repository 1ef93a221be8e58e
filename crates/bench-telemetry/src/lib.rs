//! # Bench Telemetry
//!
//! Background data collectors sampled around a single generation call:
//!
//! - [`power`]: an external power-telemetry subprocess with capability
//!   probing and a tolerant log parser
//! - [`memory`]: point-in-time memory snapshots plus a high-water-mark
//!   poller
//!
//! Both samplers degrade gracefully: a sampler that cannot start leaves its
//! summary empty, and `stop()` is always safe to call, including when the
//! matching `start()` never succeeded.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod memory;
pub mod power;

pub use memory::{MemoryHighWater, MemoryPoller, MemoryProbe};
pub use power::{parse_power_log, summarize_samples, PowerCapabilities, PowerSampler};
