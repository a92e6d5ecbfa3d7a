//! Error types for the Mnemo router

use thiserror::Error;

/// Main error type for routing and admission operations
#[derive(Error, Debug)]
pub enum MnemoError {
    /// Invalid or inconsistent configuration (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal routing failures (scoring, analysis)
    #[error("Routing error: {0}")]
    Routing(String),

    /// Policy evaluation errors
    #[error("Policy error: {0}")]
    Policy(String),

    /// Admission control errors (timeouts are retryable)
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    /// Tier store errors, passed through uninterpreted
    #[error("Store error: {0}")]
    Store(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// General errors
    #[error("{0}")]
    General(String),
}

impl MnemoError {
    /// Whether the caller may retry the failed call after backing off
    pub fn is_retryable(&self) -> bool {
        matches!(self, MnemoError::Admission(e) if e.is_retryable())
    }
}

impl From<serde_json::Error> for MnemoError {
    fn from(e: serde_json::Error) -> Self {
        MnemoError::Serialization(e.to_string())
    }
}

/// Errors raised by the admission controller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// No permit became available before the acquisition timeout elapsed
    #[error("Timed out after {waited_ms}ms waiting for a permit on '{resource}'")]
    Timeout { resource: String, waited_ms: u64 },

    /// The semaphore was closed by shutdown while waiting
    #[error("Admission for '{resource}' is closed")]
    Closed { resource: String },

    /// A permit was released more than once
    #[error("Permit was already released")]
    AlreadyReleased,

    /// No semaphore is configured for the requested resource
    #[error("No concurrency limit configured for '{0}'")]
    UnknownResource(String),
}

impl AdmissionError {
    /// Only timeouts are transient; everything else is a programming or lifecycle error
    pub fn is_retryable(&self) -> bool {
        matches!(self, AdmissionError::Timeout { .. })
    }
}

/// Result type alias for Mnemo router operations
pub type Result<T> = std::result::Result<T, MnemoError>;
