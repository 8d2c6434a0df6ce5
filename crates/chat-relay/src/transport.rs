//! The abstract duplex transport.

use crate::{RelayError, RelayResult};
use chat_types::{ClientFrame, ServerFrame};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Channel capacity for a connected transport, both directions.
pub const CHANNEL_CAPACITY: usize = 64;

/// A connected duplex channel of typed frames.
///
/// Dropping the `outbound` sender closes the connection from our side; the
/// `inbound` receiver yielding `None` means the remote side is gone.
pub struct TransportChannel {
    pub outbound: mpsc::Sender<ClientFrame>,
    pub inbound: mpsc::Receiver<ServerFrame>,
}

/// An abstract bidirectional event channel.
///
/// Wire framing is the implementor's concern; the engine only sees typed
/// frames. Each `connect` call yields a fresh channel.
pub trait Transport: Send + Sync + 'static {
    /// Establish a new connection to `url`.
    fn connect(&self, url: &str) -> impl Future<Output = RelayResult<TransportChannel>> + Send;
}

/// The server-side endpoints of one accepted in-memory connection.
pub struct ServerSide {
    pub from_client: mpsc::Receiver<ClientFrame>,
    pub to_client: mpsc::Sender<ServerFrame>,
}

/// Loopback transport: every `connect` hands the server half of a fresh
/// channel pair to the acceptor returned by [`InMemoryTransport::new`].
///
/// Used by the test suites and useful for offline demos; `fail_next`
/// simulates transport-level connect failures.
pub struct InMemoryTransport {
    accept_tx: mpsc::UnboundedSender<ServerSide>,
    fail: AtomicBool,
}

impl InMemoryTransport {
    /// Create a transport and the acceptor stream of server-side halves.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerSide>) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (
            Self {
                accept_tx,
                fail: AtomicBool::new(false),
            },
            accept_rx,
        )
    }

    /// Make every subsequent `connect` fail until cleared.
    pub fn fail_connects(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl Transport for InMemoryTransport {
    fn connect(&self, _url: &str) -> impl Future<Output = RelayResult<TransportChannel>> + Send {
        let fail = self.fail.load(Ordering::SeqCst);
        let accept_tx = self.accept_tx.clone();
        async move {
            if fail {
                return Err(RelayError::Connection(
                    "simulated transport failure".to_string(),
                ));
            }
            let (out_tx, out_rx) = mpsc::channel(CHANNEL_CAPACITY);
            let (in_tx, in_rx) = mpsc::channel(CHANNEL_CAPACITY);
            accept_tx
                .send(ServerSide {
                    from_client: out_rx,
                    to_client: in_tx,
                })
                .map_err(|_| RelayError::Connection("acceptor dropped".to_string()))?;
            Ok(TransportChannel {
                outbound: out_tx,
                inbound: in_rx,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_types::TenantId;

    fn tenant(c: char) -> TenantId {
        TenantId::new(&c.to_string().repeat(24)).unwrap()
    }

    #[tokio::test]
    async fn loopback_round_trips_frames() {
        let (transport, mut accept) = InMemoryTransport::new();
        let mut channel = transport.connect("mem://test").await.unwrap();
        let mut server = accept.recv().await.unwrap();

        channel
            .outbound
            .send(ClientFrame::Join {
                tenant_id: tenant('a'),
            })
            .await
            .unwrap();
        assert_eq!(
            server.from_client.recv().await.unwrap(),
            ClientFrame::Join {
                tenant_id: tenant('a')
            }
        );

        server
            .to_client
            .send(ServerFrame::Joined {
                tenant_id: tenant('a'),
            })
            .await
            .unwrap();
        assert_eq!(
            channel.inbound.recv().await.unwrap(),
            ServerFrame::Joined {
                tenant_id: tenant('a')
            }
        );
    }

    #[tokio::test]
    async fn fail_connects_simulates_transport_failure() {
        let (transport, _accept) = InMemoryTransport::new();
        transport.fail_connects(true);
        assert!(matches!(
            transport.connect("mem://test").await,
            Err(RelayError::Connection(_))
        ));

        transport.fail_connects(false);
        assert!(transport.connect("mem://test").await.is_ok());
    }

    #[tokio::test]
    async fn dropped_server_half_closes_inbound() {
        let (transport, mut accept) = InMemoryTransport::new();
        let mut channel = transport.connect("mem://test").await.unwrap();
        let server = accept.recv().await.unwrap();
        drop(server);
        assert_eq!(channel.inbound.recv().await, None);
    }
}
