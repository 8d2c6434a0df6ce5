//! Message dispatch: optimistic sends, acknowledgements, dedup and
//! reconciliation.

use crate::{EngineConfig, EngineError, EngineResult};
use chat_relay::{FrameLink, RelayError};
use chat_types::{
    ChatMessage, ClientFrame, EngineEvent, EventBus, MessageStatus, ServerFrame, TenantId,
    WireMessage,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use uuid::Uuid;

/// Dispatcher tuning, extracted from the engine config.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub max_message_len: usize,
    pub ack_timeout: Duration,
    pub dedup_capacity: usize,
    pub reconcile_window: Duration,
}

impl From<&EngineConfig> for DispatchConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_message_len: config.max_message_len,
            ack_timeout: config.ack_timeout,
            dedup_capacity: config.dedup_capacity,
            reconcile_window: config.reconcile_window,
        }
    }
}

/// Bounded FIFO window of recently seen composite keys.
struct DedupWindow {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl DedupWindow {
    fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a key; `false` means it was already in the window.
    fn insert(&mut self, key: String) -> bool {
        if !self.seen.insert(key.clone()) {
            return false;
        }
        self.order.push_back(key);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }
}

fn is_recent(created_at: DateTime<Utc>, window: Duration) -> bool {
    match Utc::now().signed_duration_since(created_at).to_std() {
        Ok(age) => age <= window,
        // A future timestamp (clock skew) counts as recent.
        Err(_) => true,
    }
}

/// Owns the per-conversation timelines and the send/receive protocol.
pub struct MessageDispatcher<L: FrameLink> {
    link: L,
    bus: EventBus,
    config: DispatchConfig,
    timelines: Mutex<HashMap<TenantId, Vec<ChatMessage>>>,
    dedup: Mutex<DedupWindow>,
}

impl<L: FrameLink> MessageDispatcher<L> {
    pub fn new(link: L, bus: EventBus, config: DispatchConfig) -> Self {
        let dedup = DedupWindow::new(config.dedup_capacity);
        Self {
            link,
            bus,
            config,
            timelines: Mutex::new(HashMap::new()),
            dedup: Mutex::new(dedup),
        }
    }

    /// Snapshot of one conversation's timeline.
    pub fn timeline(&self, tenant_id: &TenantId) -> Vec<ChatMessage> {
        self.timelines
            .lock()
            .unwrap()
            .get(tenant_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Send a message to `receiver`.
    ///
    /// Appends an optimistic `Sending` entry immediately, then awaits the
    /// acknowledgement. Rejection or timeout flips the entry to `Failed`;
    /// there is no automatic retry.
    pub async fn send(&self, receiver: TenantId, content: &str) -> EngineResult<ChatMessage> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(self.fault(EngineError::Validation("message is empty".to_string())));
        }
        if trimmed.chars().count() > self.config.max_message_len {
            return Err(self.fault(EngineError::Validation(format!(
                "message exceeds {} characters",
                self.config.max_message_len
            ))));
        }
        let my = match self.link.my_tenant() {
            Some(my) => my,
            None => return Err(self.fault(EngineError::Relay(RelayError::NotConnected))),
        };

        let temp_id = Uuid::new_v4().to_string();
        let message = ChatMessage {
            id: None,
            temp_id: temp_id.clone(),
            content: trimmed.to_string(),
            sender_tenant_id: my,
            receiver_tenant_id: receiver.clone(),
            status: MessageStatus::Sending,
            created_at: Utc::now(),
        };
        self.append(&receiver, message.clone());
        self.bus.publish(EngineEvent::MessageUpdated(message.clone()));

        // Subscribe before the frame leaves so the ack cannot slip past.
        let mut frames = self.link.subscribe_frames();
        if let Err(e) = self
            .link
            .send_frame(ClientFrame::SendMessage {
                temp_id: temp_id.clone(),
                receiver_tenant_id: receiver.clone(),
                content: trimmed.to_string(),
            })
            .await
        {
            self.mark_failed(&receiver, &temp_id);
            return Err(self.fault(EngineError::Relay(e)));
        }

        let outcome = tokio::time::timeout(self.config.ack_timeout, async {
            loop {
                match frames.recv().await {
                    Ok(ServerFrame::MessageAck { temp_id: t, id }) if t == temp_id => {
                        return Ok(id)
                    }
                    Ok(ServerFrame::MessageErr { temp_id: t, reason }) if t == temp_id => {
                        return Err(reason)
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "frame fan-out lagged while awaiting ack");
                    }
                    Err(RecvError::Closed) => return Err("channel closed".to_string()),
                }
            }
        })
        .await;

        match outcome {
            Ok(Ok(id)) => {
                debug!(temp_id = %temp_id, id = %id, "send acknowledged");
                Ok(self.confirm(message, &id))
            }
            Ok(Err(reason)) => {
                self.mark_failed(&receiver, &temp_id);
                Err(self.fault(EngineError::SendRejected { temp_id, reason }))
            }
            Err(_) => {
                self.mark_failed(&receiver, &temp_id);
                Err(self.fault(EngineError::SendTimeout { temp_id }))
            }
        }
    }

    /// Route an inbound wire message.
    ///
    /// Returns the message when it is a genuine remote inbound that was
    /// appended, so the caller can feed the notification aggregator. Echoes of
    /// our own sends reconcile the optimistic placeholder instead.
    pub fn handle_inbound(&self, my: &TenantId, wire: WireMessage) -> Option<ChatMessage> {
        let message = wire.into_message();
        if !self.dedup.lock().unwrap().insert(message.dedup_key()) {
            debug!(id = ?message.id, "dropping duplicate inbound message");
            return None;
        }

        let conversation = message.counterpart(my);
        if &message.sender_tenant_id == my {
            self.reconcile_echo(&conversation, message);
            return None;
        }

        self.append(&conversation, message.clone());
        self.bus.publish(EngineEvent::MessageReceived(message.clone()));
        Some(message)
    }

    /// Advance a message's status per a delivery/read receipt.
    ///
    /// Status only moves forward; a stale or out-of-order receipt is ignored.
    pub fn apply_receipt(&self, id: &str, status: MessageStatus) {
        let updated = {
            let mut timelines = self.timelines.lock().unwrap();
            let mut updated = None;
            'timelines: for timeline in timelines.values_mut() {
                for message in timeline.iter_mut() {
                    if message.id.as_deref() == Some(id) {
                        if message.status.can_advance_to(status) {
                            message.status = status;
                            updated = Some(message.clone());
                        } else {
                            debug!(id, from = ?message.status, to = ?status, "ignoring receipt");
                        }
                        break 'timelines;
                    }
                }
            }
            updated
        };
        if let Some(message) = updated {
            self.bus.publish(EngineEvent::MessageUpdated(message));
        }
    }

    /// Merge a fetched history page into the timeline, keeping local entries
    /// (pending optimistic sends) the server page does not know about.
    pub fn seed_history(&self, tenant_id: &TenantId, history: Vec<ChatMessage>) {
        {
            let mut dedup = self.dedup.lock().unwrap();
            for message in &history {
                dedup.insert(message.dedup_key());
            }
        }

        let mut timelines = self.timelines.lock().unwrap();
        let timeline = timelines.entry(tenant_id.clone()).or_default();
        let mut merged = history;
        for local in timeline.drain(..) {
            let known = merged.iter().any(|m| {
                m.temp_id == local.temp_id || (m.id.is_some() && m.id == local.id)
            });
            if !known {
                merged.push(local);
            }
        }
        merged.sort_by_key(|m| m.created_at);
        *timeline = merged;
    }

    fn append(&self, tenant_id: &TenantId, message: ChatMessage) {
        self.timelines
            .lock()
            .unwrap()
            .entry(tenant_id.clone())
            .or_default()
            .push(message);
    }

    /// Attach the server id to the optimistic placeholder and advance it to
    /// `Sent`. Advance-only: an echo may already have moved it further.
    fn confirm(&self, mut base: ChatMessage, id: &str) -> ChatMessage {
        base.id = Some(id.to_string());
        base.status = MessageStatus::Sent;
        let conversation = base.receiver_tenant_id.clone();
        let confirmed = {
            let mut timelines = self.timelines.lock().unwrap();
            let timeline = timelines.entry(conversation).or_default();
            let slot = timeline
                .iter()
                .rposition(|m| m.temp_id == base.temp_id)
                // tempId lookup can miss after a history reload; fall back to
                // the most recent pending send with the same content.
                .or_else(|| {
                    timeline.iter().rposition(|m| {
                        m.id.is_none()
                            && m.status == MessageStatus::Sending
                            && m.content == base.content
                            && is_recent(m.created_at, self.config.reconcile_window)
                    })
                });
            match slot {
                Some(i) => {
                    let message = &mut timeline[i];
                    message.id = Some(id.to_string());
                    if message.status.can_advance_to(MessageStatus::Sent) {
                        message.status = MessageStatus::Sent;
                    }
                    message.clone()
                }
                None => {
                    timeline.push(base.clone());
                    base
                }
            }
        };
        self.bus
            .publish(EngineEvent::MessageUpdated(confirmed.clone()));
        confirmed
    }

    /// A server echo of our own send: upgrade the placeholder to `Delivered`
    /// rather than appending a duplicate bubble.
    fn reconcile_echo(&self, conversation: &TenantId, echo: ChatMessage) {
        let updated = {
            let mut timelines = self.timelines.lock().unwrap();
            let timeline = timelines.entry(conversation.clone()).or_default();
            let slot = echo
                .id
                .as_deref()
                .and_then(|id| timeline.iter().rposition(|m| m.id.as_deref() == Some(id)))
                .or_else(|| {
                    timeline.iter().rposition(|m| {
                        matches!(m.status, MessageStatus::Sending | MessageStatus::Sent)
                            && m.content == echo.content
                            && is_recent(m.created_at, self.config.reconcile_window)
                    })
                });
            match slot {
                Some(i) => {
                    let message = &mut timeline[i];
                    if message.id.is_none() {
                        message.id = echo.id.clone();
                    }
                    if message.status.can_advance_to(MessageStatus::Delivered) {
                        message.status = MessageStatus::Delivered;
                    }
                    message.clone()
                }
                None => {
                    // Our own message sent from another device.
                    timeline.push(echo.clone());
                    echo
                }
            }
        };
        self.bus.publish(EngineEvent::MessageUpdated(updated));
    }

    fn mark_failed(&self, conversation: &TenantId, temp_id: &str) {
        let updated = {
            let mut timelines = self.timelines.lock().unwrap();
            let timeline = timelines.entry(conversation.clone()).or_default();
            timeline
                .iter_mut()
                .rfind(|m| m.temp_id == temp_id)
                .and_then(|message| {
                    message
                        .status
                        .can_advance_to(MessageStatus::Failed)
                        .then(|| {
                            message.status = MessageStatus::Failed;
                            message.clone()
                        })
                })
        };
        if let Some(message) = updated {
            self.bus.publish(EngineEvent::MessageUpdated(message));
        }
    }

    /// Publish a terminal error on the bus before returning it.
    fn fault(&self, error: EngineError) -> EngineError {
        self.bus.publish(EngineEvent::Fault {
            kind: error.fault_kind(),
            message: error.to_string(),
        });
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_relay::RelayResult;
    use chat_types::FaultKind;
    use std::future::Future;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::broadcast;

    struct MockInner {
        tenant: TenantId,
        authenticated: AtomicBool,
        sent: Mutex<Vec<ClientFrame>>,
        frames: broadcast::Sender<ServerFrame>,
    }

    #[derive(Clone)]
    struct MockLink {
        inner: Arc<MockInner>,
    }

    impl MockLink {
        fn new(tenant: TenantId) -> Self {
            let (frames, _) = broadcast::channel(64);
            Self {
                inner: Arc::new(MockInner {
                    tenant,
                    authenticated: AtomicBool::new(true),
                    sent: Mutex::new(Vec::new()),
                    frames,
                }),
            }
        }

        fn last_sent(&self) -> Option<ClientFrame> {
            self.inner.sent.lock().unwrap().last().cloned()
        }

        fn push(&self, frame: ServerFrame) {
            let _ = self.inner.frames.send(frame);
        }
    }

    impl FrameLink for MockLink {
        fn is_authenticated(&self) -> bool {
            self.inner.authenticated.load(Ordering::SeqCst)
        }

        fn my_tenant(&self) -> Option<TenantId> {
            self.is_authenticated().then(|| self.inner.tenant.clone())
        }

        fn send_frame(&self, frame: ClientFrame) -> impl Future<Output = RelayResult<()>> + Send {
            let inner = Arc::clone(&self.inner);
            async move {
                if !inner.authenticated.load(Ordering::SeqCst) {
                    return Err(RelayError::NotConnected);
                }
                inner.sent.lock().unwrap().push(frame);
                Ok(())
            }
        }

        fn subscribe_frames(&self) -> broadcast::Receiver<ServerFrame> {
            self.inner.frames.subscribe()
        }
    }

    fn tenant(c: char) -> TenantId {
        TenantId::new(&c.to_string().repeat(24)).unwrap()
    }

    fn config() -> DispatchConfig {
        DispatchConfig {
            max_message_len: 5000,
            ack_timeout: Duration::from_millis(200),
            dedup_capacity: 512,
            reconcile_window: Duration::from_secs(30),
        }
    }

    fn dispatcher() -> (MockLink, EventBus, Arc<MessageDispatcher<MockLink>>) {
        let link = MockLink::new(tenant('a'));
        let bus = EventBus::default();
        let dispatcher = Arc::new(MessageDispatcher::new(link.clone(), bus.clone(), config()));
        (link, bus, dispatcher)
    }

    /// Ack the next `SendMessage` frame with the given server id.
    fn spawn_acker(link: MockLink, id: &str) -> tokio::task::JoinHandle<()> {
        let id = id.to_string();
        tokio::spawn(async move {
            loop {
                if let Some(ClientFrame::SendMessage { temp_id, .. }) = link.last_sent() {
                    link.push(ServerFrame::MessageAck { temp_id, id });
                    return;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
    }

    fn wire(id: &str, from: &TenantId, to: &TenantId, content: &str) -> WireMessage {
        WireMessage {
            id: id.to_string(),
            sender_tenant_id: from.clone(),
            receiver_tenant_id: to.clone(),
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn acknowledged_send_lands_as_sent_with_server_id() {
        let (link, _bus, dispatcher) = dispatcher();
        let them = tenant('b');

        let acker = spawn_acker(link.clone(), "m-1");
        let message = dispatcher.send(them.clone(), "hello").await.unwrap();
        acker.await.unwrap();

        assert_eq!(message.id.as_deref(), Some("m-1"));
        assert_eq!(message.status, MessageStatus::Sent);

        let timeline = dispatcher.timeline(&them);
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn unacknowledged_send_times_out_as_failed() {
        let (_link, bus, dispatcher) = dispatcher();
        let them = tenant('b');
        let mut events = bus.subscribe();

        let result = dispatcher.send(them.clone(), "hello").await;
        assert!(matches!(result, Err(EngineError::SendTimeout { .. })));

        let timeline = dispatcher.timeline(&them);
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].status, MessageStatus::Failed);

        let mut saw_fault = false;
        while let Ok(event) = events.try_recv() {
            if matches!(
                event,
                EngineEvent::Fault {
                    kind: FaultKind::Send,
                    ..
                }
            ) {
                saw_fault = true;
            }
        }
        assert!(saw_fault);
    }

    #[tokio::test]
    async fn rejected_send_is_failed_and_not_retried() {
        let (link, _bus, dispatcher) = dispatcher();
        let them = tenant('b');

        let rejecter = {
            let link = link.clone();
            tokio::spawn(async move {
                loop {
                    if let Some(ClientFrame::SendMessage { temp_id, .. }) = link.last_sent() {
                        link.push(ServerFrame::MessageErr {
                            temp_id,
                            reason: "blocked".to_string(),
                        });
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
            })
        };

        let result = dispatcher.send(them.clone(), "hello").await;
        rejecter.await.unwrap();
        assert!(matches!(result, Err(EngineError::SendRejected { .. })));
        assert_eq!(dispatcher.timeline(&them)[0].status, MessageStatus::Failed);
        // One send frame, no retry.
        assert_eq!(link.inner.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_and_oversized_messages_never_reach_the_wire() {
        let (link, _bus, dispatcher) = dispatcher();
        let them = tenant('b');

        assert!(matches!(
            dispatcher.send(them.clone(), "   ").await,
            Err(EngineError::Validation(_))
        ));
        let oversized = "x".repeat(5001);
        assert!(matches!(
            dispatcher.send(them.clone(), &oversized).await,
            Err(EngineError::Validation(_))
        ));
        assert!(link.inner.sent.lock().unwrap().is_empty());
        assert!(dispatcher.timeline(&them).is_empty());
    }

    #[tokio::test]
    async fn send_fails_fast_when_link_is_down() {
        let (link, _bus, dispatcher) = dispatcher();
        link.inner.authenticated.store(false, Ordering::SeqCst);

        let result = dispatcher.send(tenant('b'), "hello").await;
        assert!(matches!(
            result,
            Err(EngineError::Relay(RelayError::NotConnected))
        ));
    }

    #[tokio::test]
    async fn duplicate_inbound_is_dropped() {
        let (_link, _bus, dispatcher) = dispatcher();
        let (me, them) = (tenant('a'), tenant('b'));
        let wire_msg = wire("m-7", &them, &me, "hi");

        assert!(dispatcher.handle_inbound(&me, wire_msg.clone()).is_some());
        assert!(dispatcher.handle_inbound(&me, wire_msg).is_none());
        assert_eq!(dispatcher.timeline(&them).len(), 1);
    }

    #[tokio::test]
    async fn own_echo_reconciles_instead_of_duplicating() {
        let (link, _bus, dispatcher) = dispatcher();
        let (me, them) = (tenant('a'), tenant('b'));

        let acker = spawn_acker(link.clone(), "m-1");
        dispatcher.send(them.clone(), "hello").await.unwrap();
        acker.await.unwrap();

        // The channel echoes our own message back.
        let echoed = dispatcher.handle_inbound(&me, wire("m-1", &me, &them, "hello"));
        assert!(echoed.is_none());

        let timeline = dispatcher.timeline(&them);
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].status, MessageStatus::Delivered);
        assert_eq!(timeline[0].id.as_deref(), Some("m-1"));

        // A redelivered echo changes nothing.
        assert!(dispatcher
            .handle_inbound(&me, wire("m-1", &me, &them, "hello"))
            .is_none());
        assert_eq!(dispatcher.timeline(&them).len(), 1);
    }

    #[tokio::test]
    async fn receipts_advance_status_monotonically() {
        let (link, _bus, dispatcher) = dispatcher();
        let them = tenant('b');

        let acker = spawn_acker(link.clone(), "m-1");
        dispatcher.send(them.clone(), "hello").await.unwrap();
        acker.await.unwrap();

        dispatcher.apply_receipt("m-1", MessageStatus::Read);
        assert_eq!(dispatcher.timeline(&them)[0].status, MessageStatus::Read);

        // A late Delivered receipt cannot roll Read back.
        dispatcher.apply_receipt("m-1", MessageStatus::Delivered);
        assert_eq!(dispatcher.timeline(&them)[0].status, MessageStatus::Read);
    }

    #[tokio::test]
    async fn seed_history_keeps_pending_local_sends() {
        let (_link, _bus, dispatcher) = dispatcher();
        let (me, them) = (tenant('a'), tenant('b'));

        let pending = ChatMessage {
            id: None,
            temp_id: "t-pending".to_string(),
            content: "on its way".to_string(),
            sender_tenant_id: me.clone(),
            receiver_tenant_id: them.clone(),
            status: MessageStatus::Sending,
            created_at: Utc::now(),
        };
        dispatcher.append(&them, pending);

        let from_server = wire("m-1", &them, &me, "earlier");
        dispatcher.seed_history(&them, vec![from_server.clone().into_message()]);

        let timeline = dispatcher.timeline(&them);
        assert_eq!(timeline.len(), 2);
        assert!(timeline.iter().any(|m| m.temp_id == "t-pending"));

        // History entries entered the dedup window: redelivery is a no-op.
        assert!(dispatcher.handle_inbound(&me, from_server).is_none());
    }

    #[test]
    fn dedup_window_evicts_oldest_first() {
        let mut window = DedupWindow::new(2);
        assert!(window.insert("a".to_string()));
        assert!(window.insert("b".to_string()));
        assert!(!window.insert("a".to_string()));

        // Inserting a third key evicts "a".
        assert!(window.insert("c".to_string()));
        assert!(window.insert("a".to_string()));
    }
}
