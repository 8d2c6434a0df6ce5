//! The engine facade wiring all components together.

use crate::caches::{spawn_sweeper, ChatCaches, HistoryKey};
use crate::dispatch::MessageDispatcher;
use crate::notify::{AlertSink, NotificationAggregator};
use crate::rest::{ChatApi, NotificationItem};
use crate::{EngineConfig, EngineError, EngineResult};
use chat_relay::{
    ConnectionManager, ConnectionHealth, FrameLink, RelayError, Session, Transport,
};
use chat_store::{EngineStore, NotificationSettings, SettingsStore};
use chat_types::{
    ChatMessage, ClientFrame, Conversation, EngineEvent, EventBus, NotificationSummary,
    ServerFrame, TenantId,
};
use party_mapping::{resolve, CompanyMapping, CompanyRef, Party};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The chat engine.
///
/// Explicitly constructed and owned by the host; there is no global instance.
/// All state fans out through the event bus, so any number of UI surfaces can
/// subscribe independently.
pub struct ChatEngine<T: Transport> {
    config: EngineConfig,
    bus: EventBus,
    store: Arc<EngineStore>,
    manager: ConnectionManager<T>,
    dispatcher: Arc<MessageDispatcher<ConnectionManager<T>>>,
    caches: Arc<ChatCaches>,
    notifier: Arc<NotificationAggregator>,
    api: ChatApi,
    companies: Mutex<Vec<CompanyRef>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Transport> ChatEngine<T> {
    /// Assemble an engine over the given transport, storage backend and alert
    /// sink.
    pub fn new(
        config: EngineConfig,
        transport: T,
        backend: Box<dyn SettingsStore>,
        sink: Box<dyn AlertSink>,
    ) -> EngineResult<Self> {
        let store = Arc::new(EngineStore::new(backend));
        let bus = EventBus::default();
        let manager = ConnectionManager::new(
            config.relay.clone(),
            transport,
            Arc::clone(&store),
            bus.clone(),
        );
        let dispatcher = Arc::new(MessageDispatcher::new(
            manager.clone(),
            bus.clone(),
            (&config).into(),
        ));
        let caches = Arc::new(ChatCaches::new(&config));
        let notifier = Arc::new(NotificationAggregator::new(
            Arc::clone(&store),
            bus.clone(),
            sink,
        ));
        let api = ChatApi::new(
            config.api_base_url.clone(),
            config.http_timeout,
            store.auth_token()?,
        )?;

        Ok(Self {
            config,
            bus,
            store,
            manager,
            dispatcher,
            caches,
            notifier,
            api,
            companies: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Subscribe to engine events.
    pub fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.bus.subscribe()
    }

    /// Snapshot of the connection session.
    pub fn session(&self) -> Session {
        self.manager.session()
    }

    /// Coarse connection health.
    pub fn health(&self) -> ConnectionHealth {
        self.manager.health()
    }

    /// Snapshot of one conversation's timeline.
    pub fn timeline(&self, tenant_id: &TenantId) -> Vec<ChatMessage> {
        self.dispatcher.timeline(tenant_id)
    }

    /// Unread count for one conversation.
    pub fn unread(&self, tenant_id: &TenantId) -> u32 {
        self.notifier.unread(tenant_id)
    }

    /// Unread count across all conversations.
    pub fn total_unread(&self) -> u32 {
        self.notifier.total_unread()
    }

    /// Connect, then spawn the frame router and the cache sweeper.
    pub async fn start(&self) -> EngineResult<()> {
        self.manager.connect().await?;

        let mut frames = self.manager.subscribe_frames();
        let manager = self.manager.clone();
        let dispatcher = Arc::clone(&self.dispatcher);
        let notifier = Arc::clone(&self.notifier);
        let caches = Arc::clone(&self.caches);
        let bus = self.bus.clone();
        let router = tokio::spawn(async move {
            loop {
                match frames.recv().await {
                    Ok(frame) => {
                        route_frame(frame, &manager, &dispatcher, &notifier, &caches, &bus)
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "frame router lagged behind the channel");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        let sweeper = spawn_sweeper(
            Arc::clone(&self.caches),
            self.config.sweep_interval,
            self.config.sweep_max_age,
        );
        self.tasks.lock().unwrap().extend([router, sweeper]);

        // The company list powers the resolver's heuristic strategies; a
        // failed refresh only degrades those, so it is not fatal.
        match self.api.companies().await {
            Ok(list) => {
                info!(companies = list.len(), "refreshed company list");
                *self.companies.lock().unwrap() = list;
            }
            Err(e) => warn!(error = %e, "could not refresh company list"),
        }

        Ok(())
    }

    /// Open a chat with the company behind `party`.
    ///
    /// Resolves the mapping, ensures the connection, joins the conversation,
    /// loads history through the cache, and focuses the conversation.
    pub async fn open_chat(&self, party: &Party) -> EngineResult<CompanyMapping> {
        let my = match self.manager.my_tenant() {
            Some(my) => my,
            None => return Err(self.fault(EngineError::Relay(RelayError::NotConnected))),
        };
        let available = self.companies.lock().unwrap().clone();
        let mapping = match resolve(party, &my, &available, &self.config.resolver) {
            Ok(mapping) => mapping,
            Err(e) => return Err(self.fault(e.into())),
        };
        let target = mapping.target_company_id.clone();
        info!(
            party_id = %mapping.party_id,
            target = %target,
            strategy = ?mapping.strategy,
            "opening chat"
        );

        self.manager.connect().await?;

        let mut frames = self.manager.subscribe_frames();
        self.manager
            .send_frame(ClientFrame::Join {
                tenant_id: target.clone(),
            })
            .await?;
        let joined = tokio::time::timeout(self.config.ack_timeout, async {
            loop {
                match frames.recv().await {
                    Ok(ServerFrame::Joined { tenant_id }) if tenant_id == target => return true,
                    Ok(_) => {}
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => return false,
                }
            }
        })
        .await
        .unwrap_or(false);
        if !joined {
            warn!(tenant_id = %target, "no join confirmation, continuing anyway");
        }

        match self
            .history(&target, 0, self.config.history_page_limit)
            .await
        {
            Ok(history) => self.dispatcher.seed_history(&target, history),
            Err(e) => warn!(error = %e, "history unavailable, starting empty"),
        }

        self.notifier.focus(Some(target.clone()));
        if let Err(e) = self.api.mark_read(&target).await {
            debug!(error = %e, "server-side mark-read failed");
        }
        self.caches.conversations.clear();
        self.caches.notifications.clear();

        self.bus.publish(EngineEvent::ConversationOpened {
            tenant_id: target,
        });
        Ok(mapping)
    }

    /// Leave a conversation and drop focus.
    pub async fn close_chat(&self, tenant_id: &TenantId) {
        if let Err(e) = self
            .manager
            .send_frame(ClientFrame::Leave {
                tenant_id: tenant_id.clone(),
            })
            .await
        {
            debug!(error = %e, "leave frame not sent");
        }
        if self.notifier.focused().as_ref() == Some(tenant_id) {
            self.notifier.focus(None);
        }
    }

    /// Send a message in the currently mapped conversation.
    pub async fn send_message(
        &self,
        receiver: &TenantId,
        content: &str,
    ) -> EngineResult<ChatMessage> {
        let message = self.dispatcher.send(receiver.clone(), content).await?;
        self.caches.invalidate_conversation(receiver);
        Ok(message)
    }

    /// One page of history, cache-first.
    pub async fn history(
        &self,
        tenant_id: &TenantId,
        page: u32,
        limit: u32,
    ) -> EngineResult<Vec<ChatMessage>> {
        let key = HistoryKey {
            tenant_id: tenant_id.clone(),
            page,
            limit,
        };
        if let Some(hit) = self.caches.history.get(&key) {
            return Ok(hit);
        }
        let fetched = self.api.history(tenant_id, page, limit).await?;
        self.caches.history.set(key, fetched.clone());
        Ok(fetched)
    }

    /// The conversation list, cache-first. Seeds per-conversation unread
    /// counts as a side effect.
    pub async fn conversations(&self) -> EngineResult<Vec<Conversation>> {
        if let Some(hit) = self.caches.conversations.get(&()) {
            return Ok(hit);
        }
        let fetched = self.api.conversations().await?;
        for conversation in &fetched {
            self.notifier
                .set_unread(&conversation.tenant_id, conversation.unread);
        }
        self.caches.conversations.set((), fetched.clone());
        Ok(fetched)
    }

    /// Aggregate unread counters, cache-first.
    pub async fn notification_summary(&self) -> EngineResult<NotificationSummary> {
        if let Some(hit) = self.caches.notifications.get(&()) {
            return Ok(hit);
        }
        let fetched = self.api.notification_summary().await?;
        self.caches.notifications.set((), fetched.clone());
        Ok(fetched)
    }

    /// Full notification rows, uncached.
    pub async fn notification_details(&self) -> EngineResult<Vec<NotificationItem>> {
        self.api.notification_details().await
    }

    /// Mark notifications read by id (empty list marks all).
    pub async fn mark_notifications_read(&self, ids: &[String]) -> EngineResult<()> {
        self.api.mark_notifications_read(ids).await?;
        self.caches.notifications.clear();
        Ok(())
    }

    /// Current notification preferences.
    pub fn notification_settings(&self) -> EngineResult<NotificationSettings> {
        Ok(self.store.notification_settings()?)
    }

    /// Persist notification preferences.
    pub fn set_notification_settings(&self, settings: &NotificationSettings) -> EngineResult<()> {
        Ok(self.store.set_notification_settings(settings)?)
    }

    /// Abort recurring work and tear down the connection.
    pub fn shutdown(&self) {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        self.manager.disconnect();
        self.caches.clear_all();
        info!("chat engine shut down");
    }

    fn fault(&self, error: EngineError) -> EngineError {
        self.bus.publish(EngineEvent::Fault {
            kind: error.fault_kind(),
            message: error.to_string(),
        });
        error
    }
}

/// Dispatch one pushed frame to the component that owns it.
fn route_frame<T: Transport>(
    frame: ServerFrame,
    manager: &ConnectionManager<T>,
    dispatcher: &MessageDispatcher<ConnectionManager<T>>,
    notifier: &NotificationAggregator,
    caches: &ChatCaches,
    bus: &EventBus,
) {
    match frame {
        ServerFrame::NewMessage { message } => {
            let Some(my) = manager.my_tenant() else {
                return;
            };
            if let Some(inbound) = dispatcher.handle_inbound(&my, message) {
                let conversation = inbound.counterpart(&my);
                caches.invalidate_conversation(&conversation);
                notifier.record_inbound(&inbound, &my);
            }
        }
        ServerFrame::Receipt { id, status } => dispatcher.apply_receipt(&id, status),
        ServerFrame::Typing { tenant_id, started } => {
            bus.publish(EngineEvent::Typing { tenant_id, started });
        }
        ServerFrame::Notification { kind, body } => {
            caches.notifications.clear();
            bus.publish(EngineEvent::Notification { kind, body });
        }
        ServerFrame::Joined { tenant_id } => {
            debug!(tenant_id = %tenant_id, "joined conversation");
        }
        ServerFrame::Left { tenant_id } => {
            debug!(tenant_id = %tenant_id, "left conversation");
        }
        // Handshake and send acknowledgements are consumed where awaited.
        ServerFrame::AuthOk { .. }
        | ServerFrame::AuthErr { .. }
        | ServerFrame::MessageAck { .. }
        | ServerFrame::MessageErr { .. } => {}
    }
}
