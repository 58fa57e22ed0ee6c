//! Error types for the Tessera agent

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors that can occur in the agent
#[derive(Debug, Error)]
pub enum AgentError {
    /// Core library error
    #[error("Core error: {0}")]
    Core(#[from] tessera_core::Error),

    /// The coordinator rejected a message or query
    #[error("Coordinator error: {0}")]
    Tss(#[from] tessera_coordinator::TssError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Transport failure talking to the chain
    #[error("Relay error: {0}")]
    Relay(String),

    /// Transaction was included but failed
    #[error("Transaction {tx_hash} failed with code {code}: {log}")]
    TxFailed { tx_hash: String, code: u32, log: String },

    /// Local record missing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Store error
    #[error("Store error: {0}")]
    Store(String),

    /// Timeout
    #[error("Operation timed out")]
    Timeout,

    /// Operation cancelled
    #[error("Operation cancelled")]
    Cancelled,
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::Serialization(e.to_string())
    }
}

impl From<hex::FromHexError> for AgentError {
    fn from(e: hex::FromHexError) -> Self {
        AgentError::Serialization(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for AgentError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        AgentError::Timeout
    }
}
