//! Mnemo router - tier routing and admission control for memory operations
//!
//! Decides which memory tier (working, episodic, semantic, shared) should
//! serve an operation by combining content analysis, policy rules and
//! weighted scoring, then bounds execution with per-tier and per-operation
//! admission and replays duplicate mutations from an idempotency cache.

pub mod admission;
pub mod analysis;
pub mod config;
pub mod error;
pub mod idempotency;
pub mod memory;
pub mod orchestrator;
pub mod policy;
pub mod router;
pub mod scoring;
pub mod store;
pub mod telemetry;
pub mod testing;

pub use error::{MnemoError, Result};
pub use orchestrator::MemoryOrchestrator;
