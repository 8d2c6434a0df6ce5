//! Unread tracking and user-facing alerts.

use chat_store::EngineStore;
use chat_types::{ChatMessage, EngineEvent, EventBus, TenantId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Host-provided alert primitives.
///
/// The engine decides *whether* to alert; the host decides *how*.
pub trait AlertSink: Send + Sync {
    fn play_tone(&self);
    fn show_desktop(&self, title: &str, body: &str);
}

/// Sink that swallows every alert, for headless hosts and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAlerts;

impl AlertSink for NoopAlerts {
    fn play_tone(&self) {}
    fn show_desktop(&self, _title: &str, _body: &str) {}
}

#[derive(Default)]
struct NotifyState {
    unread: HashMap<TenantId, u32>,
    focused: Option<TenantId>,
}

/// Per-conversation unread counts, focus tracking, and alert dispatch.
pub struct NotificationAggregator {
    store: Arc<EngineStore>,
    bus: EventBus,
    sink: Box<dyn AlertSink>,
    state: Mutex<NotifyState>,
}

impl NotificationAggregator {
    pub fn new(store: Arc<EngineStore>, bus: EventBus, sink: Box<dyn AlertSink>) -> Self {
        Self {
            store,
            bus,
            sink,
            state: Mutex::new(NotifyState::default()),
        }
    }

    /// The currently focused conversation, if any.
    pub fn focused(&self) -> Option<TenantId> {
        self.state.lock().unwrap().focused.clone()
    }

    /// Focus a conversation (or none). Gaining focus marks it read.
    pub fn focus(&self, tenant_id: Option<TenantId>) {
        self.state.lock().unwrap().focused = tenant_id.clone();
        if let Some(tenant_id) = tenant_id {
            self.mark_conversation_read(&tenant_id);
        }
    }

    /// Unread count for one conversation.
    pub fn unread(&self, tenant_id: &TenantId) -> u32 {
        self.state
            .lock()
            .unwrap()
            .unread
            .get(tenant_id)
            .copied()
            .unwrap_or(0)
    }

    /// Unread count across all conversations.
    pub fn total_unread(&self) -> u32 {
        self.state.lock().unwrap().unread.values().sum()
    }

    /// Seed a conversation's unread count from the request surface.
    pub fn set_unread(&self, tenant_id: &TenantId, unread: u32) {
        let changed = {
            let mut state = self.state.lock().unwrap();
            let slot = state.unread.entry(tenant_id.clone()).or_default();
            let changed = *slot != unread;
            *slot = unread;
            changed
        };
        if changed {
            self.bus.publish(EngineEvent::UnreadChanged {
                tenant_id: tenant_id.clone(),
                unread,
            });
        }
    }

    /// Account for a genuine inbound message.
    ///
    /// A message in the focused conversation is being read right now and never
    /// counts as unread. Otherwise the count goes up regardless of settings;
    /// settings only gate the tone and the desktop alert.
    pub fn record_inbound(&self, message: &ChatMessage, my: &TenantId) {
        let conversation = message.counterpart(my);
        let unread = {
            let mut state = self.state.lock().unwrap();
            if state.focused.as_ref() == Some(&conversation) {
                debug!(tenant_id = %conversation, "message in focused conversation");
                return;
            }
            let slot = state.unread.entry(conversation.clone()).or_default();
            *slot += 1;
            *slot
        };

        self.bus.publish(EngineEvent::UnreadChanged {
            tenant_id: conversation.clone(),
            unread,
        });

        let settings = match self.store.notification_settings() {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "could not read notification settings, skipping alerts");
                return;
            }
        };
        if !settings.enabled {
            return;
        }
        if settings.sound {
            self.sink.play_tone();
        }
        if settings.desktop {
            self.sink.show_desktop("New message", &message.content);
        }
    }

    /// Zero a conversation's unread count.
    pub fn mark_conversation_read(&self, tenant_id: &TenantId) {
        let changed = {
            let mut state = self.state.lock().unwrap();
            match state.unread.get_mut(tenant_id) {
                Some(count) if *count > 0 => {
                    *count = 0;
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.bus.publish(EngineEvent::UnreadChanged {
                tenant_id: tenant_id.clone(),
                unread: 0,
            });
        }
    }
}
