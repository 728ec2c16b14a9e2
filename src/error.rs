// src/error.rs
use thiserror::Error;

// Re-export anyhow's Result type
pub use anyhow::Result;

/// Custom Error type for the bulk-reporter library
#[derive(Error, Debug)]
pub enum ReporterError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Bulk error: {0}")]
    Bulk(String),

    #[error("Retry error: {0}")]
    Retry(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ReporterError {
    /// Build the error reported when a retried operation gives up
    pub fn retry(context: &str, attempts: usize, err: impl std::fmt::Display) -> Self {
        ReporterError::Retry(format!(
            "{} failed after {} attempts: {}",
            context, attempts, err
        ))
    }

    /// Error for a poisoned lock guarding shared state
    pub(crate) fn poisoned(what: &str) -> Self {
        ReporterError::Registry(format!("{} lock poisoned", what))
    }
}
