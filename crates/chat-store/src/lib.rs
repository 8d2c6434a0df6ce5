//! External key-value settings storage, as consumed by the chat engine.
//!
//! The engine does not own persistent state. It reads the previously selected
//! tenant and the auth credential from a host-provided store, and persists the
//! user's notification preferences there. The credential is read-only from the
//! engine's point of view, with one exception: it is cleared on terminal
//! authentication failure so the host can prompt for a fresh login.

pub mod keys;
mod memory;
mod store;
mod traits;

pub use memory::MemoryStore;
pub use store::{EngineStore, NotificationSettings, SelectedTenant};
pub use traits::SettingsStore;

use thiserror::Error;

/// Settings storage error.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying backend failure.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Stored value could not be decoded.
    #[error("stored value for {key} is malformed: {source}")]
    Malformed {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;
