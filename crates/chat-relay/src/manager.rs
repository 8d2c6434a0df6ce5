//! Connection manager: handshake, frame pump, bounded reconnection.

use crate::credential::validate_token;
use crate::session::{ConnectionHealth, ConnectionState, Session};
use crate::transport::Transport;
use crate::{RelayConfig, RelayError, RelayResult};
use chat_store::EngineStore;
use chat_types::{ClientFrame, EngineEvent, EventBus, FaultKind, ServerFrame, TenantId};
use chrono::Utc;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the inbound frame fan-out.
const FRAME_FANOUT_CAPACITY: usize = 256;

/// Exponential backoff delay for the given number of prior failures.
///
/// `delay = min(base * 2^failures, cap)`; non-decreasing in `failures`.
pub fn backoff_delay(config: &RelayConfig, failures: u32) -> Duration {
    let factor = 2u64.saturating_pow(failures.min(16));
    let base_ms = config.reconnect_base_delay.as_millis() as u64;
    Duration::from_millis(base_ms.saturating_mul(factor)).min(config.reconnect_max_delay)
}

/// The slice of the connection manager the message dispatcher consumes.
pub trait FrameLink: Send + Sync {
    /// Whether the channel is authenticated right now.
    fn is_authenticated(&self) -> bool;

    /// The authenticated local tenant, if any.
    fn my_tenant(&self) -> Option<TenantId>;

    /// Send a frame; fails fast when not authenticated.
    fn send_frame(&self, frame: ClientFrame) -> impl Future<Output = RelayResult<()>> + Send;

    /// Subscribe to the inbound frame fan-out.
    fn subscribe_frames(&self) -> broadcast::Receiver<ServerFrame>;
}

struct Inner<T> {
    config: RelayConfig,
    transport: T,
    store: Arc<EngineStore>,
    bus: EventBus,
    session: RwLock<Session>,
    outbound: Mutex<Option<mpsc::Sender<ClientFrame>>>,
    frames: broadcast::Sender<ServerFrame>,
    shutdown: AtomicBool,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl<T> Inner<T> {
    fn set_state(&self, state: ConnectionState) {
        self.session.write().unwrap().state = state;
    }

    fn state(&self) -> ConnectionState {
        self.session.read().unwrap().state
    }
}

/// Owns the transport, the session state machine, and the reconnect policy.
pub struct ConnectionManager<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for ConnectionManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> ConnectionManager<T> {
    /// Create a manager over the given transport, store and event bus.
    pub fn new(config: RelayConfig, transport: T, store: Arc<EngineStore>, bus: EventBus) -> Self {
        let (frames, _) = broadcast::channel(FRAME_FANOUT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                store,
                bus,
                session: RwLock::new(Session::new()),
                outbound: Mutex::new(None),
                frames,
                shutdown: AtomicBool::new(false),
                pump: Mutex::new(None),
            }),
        }
    }

    /// Snapshot of the current session.
    pub fn session(&self) -> Session {
        self.inner.session.read().unwrap().clone()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Current health classification.
    pub fn health(&self) -> ConnectionHealth {
        self.inner.state().health()
    }

    /// Establish an authenticated channel, reusing one if already up.
    ///
    /// Retries transport failures with exponential backoff up to the attempt
    /// budget; a manual call after `Failed` resets the counter and starts
    /// fresh. Returns once the handshake completes (or terminally fails) and
    /// leaves a background pump running.
    pub async fn connect(&self) -> RelayResult<()> {
        match self.inner.state() {
            ConnectionState::Connecting
            | ConnectionState::Authenticating
            | ConnectionState::Authenticated
            | ConnectionState::Reconnecting => {
                debug!("already connecting or connected");
                return Ok(());
            }
            ConnectionState::Disconnected | ConnectionState::Failed => {}
        }

        self.inner.shutdown.store(false, Ordering::SeqCst);
        self.inner.session.write().unwrap().reconnect_attempts = 0;
        if let Some(stale) = self.inner.pump.lock().unwrap().take() {
            stale.abort();
        }

        let inbound = Self::connect_loop(&self.inner).await?;

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(Self::session_loop(inner, inbound));
        *self.inner.pump.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Tear down the channel and cancel all recurring work.
    pub fn disconnect(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        if let Some(pump) = self.inner.pump.lock().unwrap().take() {
            pump.abort();
        }
        *self.inner.outbound.lock().unwrap() = None;
        *self.inner.session.write().unwrap() = Session::new();

        info!("disconnected from chat channel");
        self.inner.bus.publish(EngineEvent::Disconnected {
            reason: Some("user disconnect".to_string()),
        });
    }

    /// Bounded-retry connect shared by cold connects and reconnects.
    async fn connect_loop(inner: &Arc<Inner<T>>) -> RelayResult<mpsc::Receiver<ServerFrame>> {
        loop {
            let attempt = {
                let mut session = inner.session.write().unwrap();
                session.reconnect_attempts += 1;
                session.reconnect_attempts
            };

            if attempt > inner.config.max_reconnect_attempts {
                let attempts = inner.config.max_reconnect_attempts;
                warn!(attempts, "reconnect attempts exhausted");
                inner.set_state(ConnectionState::Failed);
                inner
                    .bus
                    .publish(EngineEvent::ReconnectExhausted { attempts });
                return Err(RelayError::ReconnectExhausted(attempts));
            }

            if attempt > 1 {
                inner.set_state(ConnectionState::Reconnecting);
                let delay = backoff_delay(&inner.config, attempt - 1);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying connect");
                tokio::time::sleep(delay).await;
                if inner.shutdown.load(Ordering::SeqCst) {
                    return Err(RelayError::NotConnected);
                }
            }

            match Self::establish(inner).await {
                Ok(inbound) => {
                    inner.session.write().unwrap().reconnect_attempts = 0;
                    return Ok(inbound);
                }
                Err(
                    e @ (RelayError::AuthExpired(_)
                    | RelayError::Authentication(_)
                    | RelayError::Store(_)),
                ) => return Err(e),
                Err(e) => {
                    warn!(attempt, error = %e, "connect attempt failed");
                }
            }
        }
    }

    /// One transport connection plus auth handshake.
    async fn establish(inner: &Arc<Inner<T>>) -> RelayResult<mpsc::Receiver<ServerFrame>> {
        inner.set_state(ConnectionState::Connecting);

        // Cheap local precheck: a credential that cannot possibly
        // authenticate never reaches the network, and retrying it cannot
        // succeed.
        let token = match inner.store.auth_token()? {
            Some(token) => token,
            None => {
                return Err(Self::terminal_auth_failure(
                    inner,
                    "no stored credential".to_string(),
                ));
            }
        };
        if let Err(e) = validate_token(&token, Utc::now().timestamp()) {
            return Err(Self::terminal_auth_failure(inner, e.to_string()));
        }

        info!(url = %inner.config.url, "connecting to chat channel");
        let channel = inner.transport.connect(&inner.config.url).await?;
        inner.bus.publish(EngineEvent::Connected);
        inner.set_state(ConnectionState::Authenticating);

        channel
            .outbound
            .send(ClientFrame::Auth { token })
            .await
            .map_err(|_| RelayError::Connection("channel closed before handshake".to_string()))?;

        let mut inbound = channel.inbound;
        let handshake = tokio::time::timeout(inner.config.handshake_timeout, async {
            while let Some(frame) = inbound.recv().await {
                match frame {
                    ServerFrame::AuthOk { .. } => return Ok(frame),
                    ServerFrame::AuthErr { reason } => {
                        return Err(RelayError::Authentication(reason))
                    }
                    other => debug!(frame = ?other, "ignoring pre-auth frame"),
                }
            }
            Err(RelayError::Connection(
                "channel closed during handshake".to_string(),
            ))
        })
        .await
        .map_err(|_| RelayError::Timeout)?;

        let confirmed = match handshake {
            Ok(frame) => frame,
            Err(RelayError::Authentication(reason)) => {
                warn!(reason = %reason, "server rejected credential");
                inner.set_state(ConnectionState::Disconnected);
                inner.bus.publish(EngineEvent::AuthFailed {
                    reason: reason.clone(),
                });
                return Err(RelayError::Authentication(reason));
            }
            Err(e) => return Err(e),
        };

        let ServerFrame::AuthOk {
            tenant_id,
            tenant_name,
            user_id,
            user_name,
            socket_id,
        } = confirmed
        else {
            return Err(RelayError::Connection("unexpected handshake frame".to_string()));
        };

        {
            let mut session = inner.session.write().unwrap();
            session.state = ConnectionState::Authenticated;
            session.tenant_id = Some(tenant_id.clone());
            session.tenant_name = Some(tenant_name);
            session.user_id = Some(user_id.clone());
            session.user_name = Some(user_name);
            session.socket_id = Some(socket_id);
            session.last_auth_at = Some(Utc::now());
        }
        *inner.outbound.lock().unwrap() = Some(channel.outbound);

        info!(tenant_id = %tenant_id, user_id = %user_id, "authenticated with chat channel");
        inner
            .bus
            .publish(EngineEvent::Authenticated { tenant_id, user_id });

        Ok(inbound)
    }

    /// Terminal local credential failure: clear it, fail, surface.
    fn terminal_auth_failure(inner: &Arc<Inner<T>>, message: String) -> RelayError {
        warn!(reason = %message, "credential precheck failed");
        if let Err(e) = inner.store.clear_auth_token() {
            warn!(error = %e, "failed to clear stored credential");
        }
        inner.set_state(ConnectionState::Failed);
        inner.bus.publish(EngineEvent::Fault {
            kind: FaultKind::AuthExpired,
            message: message.clone(),
        });
        RelayError::AuthExpired(message)
    }

    /// Pump inbound frames into the fan-out; reconnect on transport drop.
    async fn session_loop(inner: Arc<Inner<T>>, mut inbound: mpsc::Receiver<ServerFrame>) {
        loop {
            while let Some(frame) = inbound.recv().await {
                let _ = inner.frames.send(frame);
            }

            *inner.outbound.lock().unwrap() = None;
            if inner.shutdown.load(Ordering::SeqCst) {
                break;
            }

            warn!("chat channel dropped, reconnecting");
            inner.set_state(ConnectionState::Reconnecting);
            inner.bus.publish(EngineEvent::Disconnected {
                reason: Some("transport dropped".to_string()),
            });

            match Self::connect_loop(&inner).await {
                Ok(rx) => inbound = rx,
                Err(e) => {
                    debug!(error = %e, "reconnection gave up");
                    break;
                }
            }
        }
    }
}

impl<T: Transport> FrameLink for ConnectionManager<T> {
    fn is_authenticated(&self) -> bool {
        self.inner.state() == ConnectionState::Authenticated
    }

    fn my_tenant(&self) -> Option<TenantId> {
        self.inner.session.read().unwrap().tenant_id.clone()
    }

    fn send_frame(&self, frame: ClientFrame) -> impl Future<Output = RelayResult<()>> + Send {
        let sender = if self.is_authenticated() {
            self.inner.outbound.lock().unwrap().clone()
        } else {
            None
        };
        async move {
            let sender = sender.ok_or(RelayError::NotConnected)?;
            sender
                .send(frame)
                .await
                .map_err(|_| RelayError::NotConnected)
        }
    }

    fn subscribe_frames(&self) -> broadcast::Receiver<ServerFrame> {
        self.inner.frames.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{InMemoryTransport, ServerSide};
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use chat_store::{keys, MemoryStore, SettingsStore};

    const TENANT: &str = "aaaaaaaaaaaaaaaaaaaaaaaa";

    fn tenant() -> TenantId {
        TenantId::new(TENANT).unwrap()
    }

    fn fake_token(ttl_secs: i64) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let exp = Utc::now().timestamp() + ttl_secs;
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"u-1","exp":{exp}}}"#));
        format!("{header}.{payload}.sig")
    }

    fn fast_config() -> RelayConfig {
        RelayConfig {
            url: "mem://chat".to_string(),
            handshake_timeout: Duration::from_secs(1),
            reconnect_base_delay: Duration::from_millis(1),
            reconnect_max_delay: Duration::from_millis(5),
            max_reconnect_attempts: 10,
        }
    }

    fn seeded_store(ttl_secs: i64) -> (MemoryStore, Arc<EngineStore>) {
        let mem = MemoryStore::new();
        mem.set(keys::AUTH_TOKEN, &fake_token(ttl_secs)).unwrap();
        let store = Arc::new(EngineStore::new(Box::new(mem.clone())));
        (mem, store)
    }

    /// Answer the auth handshake and return the live server side.
    async fn accept_and_auth(accept: &mut mpsc::UnboundedReceiver<ServerSide>) -> ServerSide {
        let mut side = accept.recv().await.expect("no connection accepted");
        match side.from_client.recv().await {
            Some(ClientFrame::Auth { .. }) => {}
            other => panic!("expected auth frame, got {other:?}"),
        }
        side.to_client
            .send(ServerFrame::AuthOk {
                tenant_id: tenant(),
                tenant_name: "Acme Traders".to_string(),
                user_id: "u-1".to_string(),
                user_name: "Pat".to_string(),
                socket_id: "sock-1".to_string(),
            })
            .await
            .unwrap();
        side
    }

    async fn wait_for_state<T: Transport>(manager: &ConnectionManager<T>, state: ConnectionState) {
        for _ in 0..200 {
            if manager.state() == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("never reached state {state:?}, stuck at {:?}", manager.state());
    }

    #[tokio::test]
    async fn connect_authenticates_and_fills_session() {
        let (transport, mut accept) = InMemoryTransport::new();
        let (_mem, store) = seeded_store(3600);
        let bus = EventBus::default();
        let mut events = bus.subscribe();
        let manager = ConnectionManager::new(fast_config(), transport, store, bus);

        let server = tokio::spawn(async move { accept_and_auth(&mut accept).await });
        manager.connect().await.unwrap();
        let _side = server.await.unwrap();

        let session = manager.session();
        assert_eq!(session.state, ConnectionState::Authenticated);
        assert_eq!(session.tenant_id, Some(tenant()));
        assert_eq!(session.user_id.as_deref(), Some("u-1"));
        assert_eq!(session.socket_id.as_deref(), Some("sock-1"));
        assert!(session.last_auth_at.is_some());
        assert_eq!(manager.health(), ConnectionHealth::Healthy);

        assert_eq!(events.recv().await.unwrap(), EngineEvent::Connected);
        assert!(matches!(
            events.recv().await.unwrap(),
            EngineEvent::Authenticated { .. }
        ));
    }

    #[tokio::test]
    async fn send_fails_fast_when_not_authenticated() {
        let (transport, _accept) = InMemoryTransport::new();
        let (_mem, store) = seeded_store(3600);
        let manager =
            ConnectionManager::new(fast_config(), transport, store, EventBus::default());

        let result = manager
            .send_frame(ClientFrame::Typing {
                tenant_id: tenant(),
                started: true,
            })
            .await;
        assert!(matches!(result, Err(RelayError::NotConnected)));
    }

    #[tokio::test]
    async fn expired_credential_short_circuits_and_clears_it() {
        let (transport, mut accept) = InMemoryTransport::new();
        let (mem, store) = seeded_store(-3600);
        let bus = EventBus::default();
        let mut events = bus.subscribe();
        let manager = ConnectionManager::new(fast_config(), transport, store, bus);

        let result = manager.connect().await;
        assert!(matches!(result, Err(RelayError::AuthExpired(_))));
        assert_eq!(manager.state(), ConnectionState::Failed);

        // Credential was cleared and no transport connect was attempted.
        assert_eq!(mem.get(keys::AUTH_TOKEN).unwrap(), None);
        assert!(accept.try_recv().is_err());
        assert!(matches!(
            events.recv().await.unwrap(),
            EngineEvent::Fault {
                kind: FaultKind::AuthExpired,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn server_rejection_is_not_retried() {
        let (transport, mut accept) = InMemoryTransport::new();
        let (_mem, store) = seeded_store(3600);
        let bus = EventBus::default();
        let manager = ConnectionManager::new(fast_config(), transport, store, bus.clone());

        let server = tokio::spawn(async move {
            let mut side = accept.recv().await.unwrap();
            let _ = side.from_client.recv().await;
            side.to_client
                .send(ServerFrame::AuthErr {
                    reason: "bad token".to_string(),
                })
                .await
                .unwrap();
            accept
        });

        let mut events = bus.subscribe();
        let result = manager.connect().await;
        assert!(matches!(result, Err(RelayError::Authentication(_))));
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        // Only one connection ever arrived: a server rejection is terminal.
        let mut accept = server.await.unwrap();
        assert!(accept.try_recv().is_err());

        let mut saw_auth_failed = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, EngineEvent::AuthFailed { .. }) {
                saw_auth_failed = true;
            }
        }
        assert!(saw_auth_failed);
    }

    #[tokio::test]
    async fn exhausted_transport_failures_end_in_failed_state() {
        let (transport, _accept) = InMemoryTransport::new();
        transport.fail_connects(true);
        let (_mem, store) = seeded_store(3600);
        let bus = EventBus::default();
        let mut events = bus.subscribe();
        let manager = ConnectionManager::new(fast_config(), transport, store, bus);

        let result = manager.connect().await;
        assert!(matches!(result, Err(RelayError::ReconnectExhausted(10))));
        assert_eq!(manager.state(), ConnectionState::Failed);
        assert_eq!(manager.health(), ConnectionHealth::Down);

        let mut exhausted = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, EngineEvent::ReconnectExhausted { attempts: 10 }) {
                exhausted += 1;
            }
        }
        assert_eq!(exhausted, 1);
    }

    #[tokio::test]
    async fn manual_connect_after_failed_resets_the_counter() {
        let (transport, mut accept) = InMemoryTransport::new();
        transport.fail_connects(true);
        let (_mem, store) = seeded_store(3600);
        let manager =
            ConnectionManager::new(fast_config(), transport, store, EventBus::default());

        assert!(manager.connect().await.is_err());
        assert_eq!(manager.state(), ConnectionState::Failed);

        // The 11th, manual connect starts fresh.
        manager
            .inner
            .transport
            .fail_connects(false);
        let server = tokio::spawn(async move { accept_and_auth(&mut accept).await });
        manager.connect().await.unwrap();
        let _side = server.await.unwrap();

        assert_eq!(manager.state(), ConnectionState::Authenticated);
        assert_eq!(manager.session().reconnect_attempts, 0);
    }

    #[tokio::test]
    async fn transport_drop_triggers_reconnect() {
        let (transport, mut accept) = InMemoryTransport::new();
        let (_mem, store) = seeded_store(3600);
        let bus = EventBus::default();
        let manager = ConnectionManager::new(fast_config(), transport, store, bus.clone());

        let server = tokio::spawn(async move {
            let first = accept_and_auth(&mut accept).await;
            drop(first); // simulate the transport dropping
            let second = accept_and_auth(&mut accept).await;
            second
        });

        let mut events = bus.subscribe();
        manager.connect().await.unwrap();
        let _second = server.await.unwrap();
        wait_for_state(&manager, ConnectionState::Authenticated).await;

        let mut saw_disconnect = false;
        let mut reauthenticated = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                EngineEvent::Disconnected { .. } => saw_disconnect = true,
                EngineEvent::Authenticated { .. } => reauthenticated += 1,
                _ => {}
            }
        }
        assert!(saw_disconnect);
        assert_eq!(reauthenticated, 2);
    }

    #[tokio::test]
    async fn disconnect_resets_the_session() {
        let (transport, mut accept) = InMemoryTransport::new();
        let (_mem, store) = seeded_store(3600);
        let manager =
            ConnectionManager::new(fast_config(), transport, store, EventBus::default());

        let server = tokio::spawn(async move { accept_and_auth(&mut accept).await });
        manager.connect().await.unwrap();
        let _side = server.await.unwrap();

        manager.disconnect();
        let session = manager.session();
        assert_eq!(session.state, ConnectionState::Disconnected);
        assert!(session.tenant_id.is_none());
        assert!(!manager.is_authenticated());
    }

    #[test]
    fn backoff_is_nondecreasing_and_capped() {
        let config = RelayConfig {
            reconnect_base_delay: Duration::from_secs(2),
            reconnect_max_delay: Duration::from_secs(30),
            ..RelayConfig::default()
        };

        let mut last = Duration::ZERO;
        for failures in 1..=20 {
            let delay = backoff_delay(&config, failures);
            assert!(delay >= last, "delay shrank at attempt {failures}");
            assert!(delay <= config.reconnect_max_delay);
            last = delay;
        }
        assert_eq!(backoff_delay(&config, 1), Duration::from_secs(4));
        assert_eq!(backoff_delay(&config, 20), Duration::from_secs(30));
    }
}
