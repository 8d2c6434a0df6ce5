//! The Shoptalk chat engine.
//!
//! Client-side messaging subsystem for the multi-tenant shop app: it turns a
//! bare duplex frame channel into a reliable, deduplicated, reconnect-safe
//! chat session between two tenants. The host supplies a transport, a
//! settings store and an alert sink; everything else fans out through the
//! event bus.

mod caches;
mod config;
mod dispatch;
mod engine;
mod error;
mod logging;
mod notify;
mod rest;

pub use caches::{spawn_sweeper, ChatCaches, HistoryKey};
pub use config::EngineConfig;
pub use dispatch::{DispatchConfig, MessageDispatcher};
pub use engine::ChatEngine;
pub use error::{EngineError, EngineResult};
pub use logging::init_logging;
pub use notify::{AlertSink, NoopAlerts, NotificationAggregator};
pub use rest::{ChatApi, NotificationItem};

// Re-exports so a host can depend on this crate alone.
pub use chat_relay::{
    ConnectionHealth, ConnectionState, InMemoryTransport, RelayConfig, Session, Transport,
    WsTransport,
};
pub use chat_store::{MemoryStore, NotificationSettings, SettingsStore};
pub use chat_types::{
    ChatMessage, Conversation, EngineEvent, EventBus, FaultKind, MessageStatus,
    NotificationSummary, TenantId,
};
pub use party_mapping::{CompanyMapping, MappingError, Party, ResolverOptions, Strategy};
