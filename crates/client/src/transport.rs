//! Duplex transport beneath a connection.
//!
//! The protocol core only needs to push whole messages out and to be told
//! about inbound messages and lifecycle changes. [`Transport`] is the
//! outbound half; the inbound half is a stream of [`TransportEvent`]s that
//! the owner of the connection feeds into
//! [`Connection::handle_transport_event`](crate::Connection::handle_transport_event).
//!
//! [`WebSocketTransport`] runs the socket on two tokio tasks: a writer that
//! connects and drains queued frames, and a reader that forwards inbound
//! messages.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use protocol::{ProtocolError, Result};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use url::Url;

/// Capacity of the inbound event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Outbound half of a duplex, message-framed channel.
pub trait Transport: Send {
    /// Queues one whole message.
    fn send(&mut self, data: Bytes) -> Result<()>;

    /// Closes the channel. Calling it again is a no-op.
    fn close(&mut self);
}

/// Lifecycle and inbound traffic reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The channel is connected.
    Opened,
    /// One inbound message.
    Message(Bytes),
    /// The channel is gone. Reported once.
    Closed(Option<String>),
}

enum Command {
    Frame(Bytes),
    Close,
}

/// WebSocket transport backed by tokio-tungstenite.
#[derive(Debug)]
pub struct WebSocketTransport {
    url: Url,
    commands: mpsc::UnboundedSender<Command>,
    closed: bool,
}

impl WebSocketTransport {
    /// Starts connecting to `url` in the background.
    ///
    /// Returns immediately. The receiver yields [`TransportEvent::Opened`]
    /// once the handshake completes, or [`TransportEvent::Closed`] if it
    /// fails. Frames sent before the handshake completes are queued.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(url: &str) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let url = parse_ws_url(url)?;
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(run_socket(url.clone(), command_rx, event_tx));

        Ok((
            Self {
                url,
                commands: command_tx,
                closed: false,
            },
            event_rx,
        ))
    }

    /// The server URL.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl Transport for WebSocketTransport {
    fn send(&mut self, data: Bytes) -> Result<()> {
        if self.closed {
            return Err(ProtocolError::TransportClosed(
                "transport was closed locally".to_string(),
            ));
        }
        self.commands
            .send(Command::Frame(data))
            .map_err(|_| ProtocolError::TransportClosed("socket task has stopped".to_string()))
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // The socket task may already be gone; nothing left to close then.
        let _ = self.commands.send(Command::Close);
    }
}

/// Validates a WebSocket server URL.
pub fn parse_ws_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url)
        .map_err(|e| ProtocolError::Transport(format!("invalid server URL '{url}': {e}")))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(parsed),
        other => Err(ProtocolError::Transport(format!(
            "unsupported URL scheme '{other}' (expected ws or wss)"
        ))),
    }
}

async fn run_socket(
    url: Url,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::Sender<TransportEvent>,
) {
    tracing::info!(url = %url, "Connecting to server");

    let ws_stream = match connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            tracing::error!(url = %url, error = %e, "WebSocket connection failed");
            let _ = events
                .send(TransportEvent::Closed(Some(format!(
                    "WebSocket connection failed: {e}"
                ))))
                .await;
            return;
        }
    };

    if events.send(TransportEvent::Opened).await.is_err() {
        tracing::debug!("Event receiver dropped before the socket opened");
        return;
    }

    let (mut ws_sink, mut ws_stream) = ws_stream.split();

    let reader_events = events.clone();
    tokio::spawn(async move {
        let mut reason = None;
        while let Some(result) = ws_stream.next().await {
            let data = match result {
                Ok(WsMessage::Binary(data)) => Bytes::from(data),
                Ok(WsMessage::Text(text)) => Bytes::from(text.into_bytes()),
                Ok(WsMessage::Close(frame)) => {
                    reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty());
                    tracing::debug!(reason = ?reason, "Server closed the connection");
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    reason = Some(format!("WebSocket error: {e}"));
                    break;
                }
            };
            if reader_events.send(TransportEvent::Message(data)).await.is_err() {
                break;
            }
        }
        let _ = reader_events.send(TransportEvent::Closed(reason)).await;
    });

    while let Some(command) = commands.recv().await {
        match command {
            Command::Frame(data) => {
                if let Err(e) = ws_sink.send(WsMessage::Binary(data.to_vec())).await {
                    tracing::error!(error = %e, "Failed to send WebSocket message");
                    break;
                }
            }
            Command::Close => {
                if let Err(e) = ws_sink.close().await {
                    tracing::debug!(error = %e, "WebSocket close handshake failed");
                }
                break;
            }
        }
    }
}
