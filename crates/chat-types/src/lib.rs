//! Shared types for the Shoptalk chat engine.
//!
//! This crate provides:
//! - Validated tenant identifiers
//! - The chat message model and status lifecycle
//! - Typed wire frames exchanged with the chat channel
//! - Engine events and the broadcast-backed event bus

mod bus;
mod event;
mod ids;
mod message;
mod wire;

pub use bus::EventBus;
pub use event::{EngineEvent, FaultKind};
pub use ids::{IdError, TenantId};
pub use message::{ChatMessage, Conversation, MessageStatus, NotificationSummary};
pub use wire::{ClientFrame, ServerFrame, WireMessage};
