//! Test helpers shared across mnemo crates.

pub mod config;
pub mod embedder;
pub mod provider;

pub use config::{all_backends, memory_config};
pub use embedder::FailingEmbedder;
pub use provider::{StubBehavior, StubWorkingMemory};
