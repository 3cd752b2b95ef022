//! The live event transport seam.
//!
//! A [`Transport`] opens one [`TransportLink`] per (connection, target)
//! pair: a read-only stream of [`LinkEvent`]s plus an idempotent close.
//! The session never sends application traffic after the transport's
//! initial subscribe — this is a follow channel.
//!
//! [`WebSocketTransport`] is the production implementation; tests drive the
//! session with links built directly from channels via
//! [`TransportLink::new`].

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tideline_types::{ControlFrame, SubscribeFrame};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use url::Url;

/// One inbound notification from the live channel.
#[derive(Clone, Debug)]
pub enum LinkEvent {
    /// The underlying channel is open (subscribe sent).
    Opened,
    /// The server acknowledged the subscription. May be delayed or missing
    /// in some environments; the session only waits for it a bounded time.
    Ready,
    /// One raw inbound message, already parsed to JSON.
    Frame(Value),
    /// The channel ended — cleanly (`None`) or with an error.
    Closed(Option<String>),
}

/// Why a transport failed to open.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport connect failed: {0}")]
    Connect(String),
    #[error("transport subscribe failed: {0}")]
    Subscribe(String),
}

/// A live, read-only event channel for one target.
#[derive(Debug)]
pub struct TransportLink {
    events: mpsc::UnboundedReceiver<LinkEvent>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TransportLink {
    /// Assemble a link from its raw parts. The production transport does
    /// this internally; tests use it to script a connection.
    pub fn new(events: mpsc::UnboundedReceiver<LinkEvent>, shutdown: oneshot::Sender<()>) -> Self {
        Self {
            events,
            shutdown: Some(shutdown),
        }
    }

    /// Next inbound event; `None` once the channel is gone.
    pub async fn next(&mut self) -> Option<LinkEvent> {
        self.events.recv().await
    }

    /// Close the channel. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

impl Drop for TransportLink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens live event channels, one per subscription target.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a channel following `target_id`.
    async fn open(&self, target_id: &str) -> Result<TransportLink, TransportError>;
}

// ============================================================================
// WebSocket implementation
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// The production transport: one WebSocket per target, subscribed on open.
pub struct WebSocketTransport {
    /// Base URL with a `ws`/`wss` scheme, e.g. `wss://host/api/`.
    base: Url,
}

impl WebSocketTransport {
    pub fn new(base: Url) -> Self {
        Self { base }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, target_id: &str) -> Result<TransportLink, TransportError> {
        let url = self
            .base
            .join(&format!("timelines/{target_id}/events"))
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        debug!(%url, "opening websocket");

        let (mut ws, _response) = connect_async(url.as_str())
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;

        let subscribe = serde_json::to_string(&SubscribeFrame::new(target_id))
            .map_err(|err| TransportError::Subscribe(err.to_string()))?;
        ws.send(Message::text(subscribe))
            .await
            .map_err(|err| TransportError::Subscribe(err.to_string()))?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(pump(ws, events_tx, shutdown_rx));
        Ok(TransportLink::new(events_rx, shutdown_tx))
    }
}

/// Forward websocket traffic into the link channel until closed from
/// either side.
async fn pump(
    mut ws: WsStream,
    events: mpsc::UnboundedSender<LinkEvent>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let _ = events.send(LinkEvent::Opened);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                let _ = ws.close(None).await;
                break;
            }
            inbound = ws.next() => match inbound {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<Value>(text.as_str()) {
                    Ok(value) if ControlFrame::is_ready(&value) => {
                        let _ = events.send(LinkEvent::Ready);
                    }
                    Ok(value) => {
                        let _ = events.send(LinkEvent::Frame(value));
                    }
                    Err(err) => trace!(%err, "ignoring non-JSON text frame"),
                },
                // Pings and pongs are answered by the protocol layer;
                // binary frames are not part of this protocol.
                Some(Ok(Message::Close(_))) | None => {
                    let _ = events.send(LinkEvent::Closed(None));
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    let _ = events.send(LinkEvent::Closed(Some(err.to_string())));
                    break;
                }
            }
        }
    }
}
