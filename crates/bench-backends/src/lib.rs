//! # Bench Backends
//!
//! Everything that talks to a model backend:
//!
//! - [`client`]: the chat endpoint client with primary/fallback routing
//!   and strict timeout classification
//! - [`resolver`]: maps API-facing model identifiers to load keys
//! - [`lmstudio`]: local inference server: control CLI, inventory,
//!   rich-stats endpoint pair
//! - [`openrouter`]: remote API aggregator with bearer credential and
//!   per-request cost
//! - [`extract`]: reasoning-block stripping and markup extraction from
//!   raw response text

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod extract;
pub mod lmstudio;
pub mod openrouter;
pub mod resolver;

pub use client::{ChatMessage, ChatOutcome, ChatResponse, EndpointClient};
pub use lmstudio::LocalBackend;
pub use openrouter::RemoteBackend;
pub use resolver::{resolve_load_key, InstalledModel};
