//! Engine-level error taxonomy.

use chat_types::FaultKind;
use thiserror::Error;

/// Engine operation error.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Message content failed local validation; never sent, never retried.
    #[error("invalid message: {0}")]
    Validation(String),

    /// The server did not acknowledge a send in time.
    #[error("send {temp_id} was not acknowledged in time")]
    SendTimeout { temp_id: String },

    /// The server rejected a send.
    #[error("send {temp_id} rejected: {reason}")]
    SendRejected { temp_id: String, reason: String },

    /// Party-to-company resolution failed.
    #[error(transparent)]
    Mapping(#[from] party_mapping::MappingError),

    /// Connection layer failure.
    #[error(transparent)]
    Relay(#[from] chat_relay::RelayError),

    /// Settings storage failure.
    #[error(transparent)]
    Store(#[from] chat_store::StoreError),

    /// Request surface failure.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EngineError {
    /// Classification used when surfacing this error on the event bus.
    pub fn fault_kind(&self) -> FaultKind {
        match self {
            EngineError::Validation(_) => FaultKind::Validation,
            EngineError::SendTimeout { .. } | EngineError::SendRejected { .. } => FaultKind::Send,
            EngineError::Mapping(_) => FaultKind::Mapping,
            EngineError::Relay(chat_relay::RelayError::AuthExpired(_)) => FaultKind::AuthExpired,
            EngineError::Relay(_) | EngineError::Http(_) => FaultKind::Connection,
            EngineError::Store(_) | EngineError::Config(_) => FaultKind::Connection,
        }
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
