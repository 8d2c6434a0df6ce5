//! WebSocket transport.

use crate::transport::{Transport, TransportChannel, CHANNEL_CAPACITY};
use crate::{RelayError, RelayResult};
use chat_types::{ClientFrame, ServerFrame};
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

/// Production transport over tokio-tungstenite.
///
/// Frames are JSON text messages; pings are answered by tungstenite itself.
#[derive(Debug, Default, Clone)]
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for WsTransport {
    fn connect(&self, url: &str) -> impl Future<Output = RelayResult<TransportChannel>> + Send {
        let url = url.to_string();
        async move {
            let (ws_stream, _) = connect_async(url.as_str())
                .await
                .map_err(|e| RelayError::Connection(e.to_string()))?;
            debug!(url = %url, "websocket connected");
            let (mut write, mut read) = ws_stream.split();

            let (out_tx, mut out_rx) = mpsc::channel::<ClientFrame>(CHANNEL_CAPACITY);
            let (in_tx, in_rx) = mpsc::channel::<ServerFrame>(CHANNEL_CAPACITY);

            // Outbound writer: ends when the engine drops its sender.
            tokio::spawn(async move {
                while let Some(frame) = out_rx.recv().await {
                    let json = match serde_json::to_string(&frame) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!(error = %e, "dropping unserializable frame");
                            continue;
                        }
                    };
                    if write.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                let _ = write.close().await;
            });

            // Inbound reader: dropping `in_tx` signals disconnect upstream.
            tokio::spawn(async move {
                while let Some(msg) = read.next().await {
                    match msg {
                        Ok(Message::Text(text)) => match serde_json::from_str(&text) {
                            Ok(frame) => {
                                if in_tx.send(frame).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "failed to parse server frame");
                            }
                        },
                        Ok(Message::Close(_)) => {
                            debug!("websocket closed by server");
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(error = %e, "websocket read error");
                            break;
                        }
                    }
                }
            });

            Ok(TransportChannel {
                outbound: out_tx,
                inbound: in_rx,
            })
        }
    }
}
