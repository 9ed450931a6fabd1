//! Generation orchestration and resilience layer.
//!
//! Turns a natural-language description into a multi-file project by
//! repeatedly querying a completion gateway, without blocking the caller:
//!
//! - [`ledger`] - pollable task table with watchdog and retention sweep
//! - [`executor`] - continuation engine that stitches truncated completions
//! - [`validator`] - extraction, structural repair and completeness checks
//! - [`fallback`] - deterministic, always-valid substitute projects
//! - [`orchestrator`] - the generate and modify workflows

pub mod config;
pub mod executor;
pub mod fallback;
pub mod ledger;
pub mod orchestrator;
pub mod project;
pub mod task;
pub mod validator;

use thiserror::Error;

pub use config::{GeneratorConfig, LedgerConfig};
pub use executor::{ContinuationConfig, ContinuationEngine, ContinuationOutput, StopReason};
pub use fallback::FallbackSynthesizer;
pub use ledger::{SweepReport, TaskLedger};
pub use orchestrator::{GenerationRequest, Orchestrator};
pub use project::{FileMap, GenerationResult, Provenance};
pub use task::{Task, TaskKind, TaskPatch, TaskSnapshot, TaskStatus};
pub use validator::{CodeValidator, ValidationOutcome};

/// Errors raised by the generation layer.
///
/// Most of these never reach a caller of the orchestrator: gateway and
/// validation failures are absorbed into fallback payloads.
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// The completion gateway rejected or broke off a call
    #[error("Gateway error: {0}")]
    Gateway(#[from] llm::LlmError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Content could not be turned into a file map
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Task not found
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for generation operations
pub type Result<T> = std::result::Result<T, GeneratorError>;

/// Get version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
