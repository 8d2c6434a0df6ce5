//! Cache namespaces owned by the engine, plus the periodic sweeper.

use crate::EngineConfig;
use chat_cache::TtlCache;
use chat_types::{ChatMessage, Conversation, NotificationSummary, TenantId};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Composite key for one page of conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HistoryKey {
    pub tenant_id: TenantId,
    pub page: u32,
    pub limit: u32,
}

/// The engine's three cache namespaces.
///
/// TTLs are a safety net; mutating actions (send, receive, mark-read)
/// invalidate explicitly so readers never see a stale page they just changed.
pub struct ChatCaches {
    pub history: TtlCache<HistoryKey, Vec<ChatMessage>>,
    pub conversations: TtlCache<(), Vec<Conversation>>,
    pub notifications: TtlCache<(), NotificationSummary>,
}

impl ChatCaches {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            history: TtlCache::new("history", config.history_ttl),
            conversations: TtlCache::new("conversations", config.conversations_ttl),
            notifications: TtlCache::new("notifications", config.notifications_ttl),
        }
    }

    /// Invalidation hook for a message landing in `tenant_id`'s conversation:
    /// every cached history page of that conversation, the conversation list,
    /// and the notification summary.
    pub fn invalidate_conversation(&self, tenant_id: &TenantId) {
        let pages = self
            .history
            .invalidate_where(|key| &key.tenant_id == tenant_id);
        self.conversations.clear();
        self.notifications.clear();
        debug!(tenant_id = %tenant_id, pages, "invalidated conversation caches");
    }

    /// Drop everything, e.g. on disconnect.
    pub fn clear_all(&self) {
        self.history.clear();
        self.conversations.clear();
        self.notifications.clear();
    }

    /// Purge entries older than `max_age` across all namespaces.
    pub fn sweep(&self, max_age: Duration) -> usize {
        self.history.purge_older_than(max_age)
            + self.conversations.purge_older_than(max_age)
            + self.notifications.purge_older_than(max_age)
    }
}

/// Spawn the low-frequency sweep task. Aborted on engine shutdown.
pub fn spawn_sweeper(
    caches: Arc<ChatCaches>,
    interval: Duration,
    max_age: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // immediate first tick
        loop {
            ticker.tick().await;
            let purged = caches.sweep(max_age);
            if purged > 0 {
                debug!(purged, "cache sweep complete");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_types::MessageStatus;
    use chrono::Utc;

    fn tenant(c: char) -> TenantId {
        TenantId::new(&c.to_string().repeat(24)).unwrap()
    }

    fn message(to: &TenantId) -> ChatMessage {
        ChatMessage {
            id: Some("m-1".to_string()),
            temp_id: "t-1".to_string(),
            content: "hi".to_string(),
            sender_tenant_id: tenant('e'),
            receiver_tenant_id: to.clone(),
            status: MessageStatus::Delivered,
            created_at: Utc::now(),
        }
    }

    fn key(tenant_id: &TenantId, page: u32) -> HistoryKey {
        HistoryKey {
            tenant_id: tenant_id.clone(),
            page,
            limit: 50,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_conversation_targets_one_tenant() {
        let caches = ChatCaches::new(&EngineConfig::default());
        let a = tenant('a');
        let b = tenant('b');
        caches.history.set(key(&a, 0), vec![message(&a)]);
        caches.history.set(key(&a, 1), vec![]);
        caches.history.set(key(&b, 0), vec![message(&b)]);
        caches.conversations.set((), vec![]);

        caches.invalidate_conversation(&a);

        assert!(caches.history.get(&key(&a, 0)).is_none());
        assert!(caches.history.get(&key(&a, 1)).is_none());
        assert!(caches.history.get(&key(&b, 0)).is_some());
        assert!(caches.conversations.get(&()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_purges_old_entries() {
        let caches = Arc::new(ChatCaches::new(&EngineConfig::default()));
        let a = tenant('a');
        caches.history.set(key(&a, 0), vec![]);
        caches.notifications.set((), NotificationSummary::default());

        let sweeper = spawn_sweeper(
            Arc::clone(&caches),
            Duration::from_secs(300),
            Duration::from_secs(900),
        );

        // Under the max age: survives the sweep (though stale by TTL).
        tokio::time::advance(Duration::from_secs(600)).await;
        tokio::task::yield_now().await;
        assert_eq!(caches.history.len(), 1);

        // Past the max age: the sweep drops it without a read.
        tokio::time::advance(Duration::from_secs(600)).await;
        tokio::task::yield_now().await;
        assert_eq!(caches.history.len(), 0);
        assert_eq!(caches.notifications.len(), 0);

        sweeper.abort();
    }
}
