//! Error types for the pool session.

use thiserror::Error;

/// Session and protocol errors.
#[derive(Error, Debug)]
pub enum StratumError {
    /// Network I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error on the outbound path
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid message received from the pool (recoverable per line)
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Pool answered a request with an error response
    #[error("Pool error: {0}")]
    PoolError(String),

    /// Connection could not be established
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The subscribe handshake failed
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    /// Connection lost
    #[error("Connection lost")]
    Disconnected,

    /// Timeout waiting for a response; the pending call is evicted
    #[error("Timeout waiting for response")]
    Timeout,
}

/// Convenient Result type for session operations.
pub type StratumResult<T> = Result<T, StratumError>;
