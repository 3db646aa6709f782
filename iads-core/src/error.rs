//! Error types for the detection core

use thiserror::Error;

/// Result type for IADS operations
pub type Result<T> = std::result::Result<T, IadsError>;

/// Errors that can occur in the detection core
#[derive(Error, Debug)]
pub enum IadsError {
    /// Entity state manager error
    #[error("State error: {0}")]
    State(String),

    /// Uncertainty quantifier error
    #[error("Uncertainty error: {0}")]
    Uncertainty(String),

    /// Scheduler (APS) error
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Event manager error
    #[error("Event error: {0}")]
    Event(String),

    /// Result fusion error
    #[error("Fusion error: {0}")]
    Fusion(String),

    /// Probe execution error
    #[error("Probe error: {0}")]
    Probe(String),

    /// Configuration error (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("IADS error: {0}")]
    Other(#[from] anyhow::Error),
}
