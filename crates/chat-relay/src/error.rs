//! Relay error types.

use thiserror::Error;

/// Relay error type.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The stored credential is missing, malformed, or expired.
    ///
    /// Not retried: the credential is cleared and the UI must redirect to
    /// login.
    #[error("credential expired or invalid: {0}")]
    AuthExpired(String),

    /// The server rejected the handshake.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Transport-level failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// An operation required an authenticated channel.
    #[error("not connected to chat channel")]
    NotConnected,

    /// Reconnection gave up after the configured attempt budget.
    #[error("reconnection exhausted after {0} attempts")]
    ReconnectExhausted(u32),

    /// Handshake or acknowledgement wait timed out.
    #[error("operation timed out")]
    Timeout,

    /// Settings storage failure.
    #[error("storage error: {0}")]
    Store(#[from] chat_store::StoreError),

    /// Frame (de)serialization failure.
    #[error("frame codec error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using RelayError.
pub type RelayResult<T> = Result<T, RelayError>;
