//! Error types shared across the agent.

use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to load env file: {0}")]
    EnvFile(#[from] dotenvy::Error),

    #[error("Subscription failed: {0}")]
    Subscription(String),

    #[error("Time-series store error: {0}")]
    Store(String),

    #[error("Reference value unavailable for id {id}: {reason}")]
    Reference { id: u64, reason: String },

    #[error("Worker pool error: {0}")]
    Pool(String),
}
