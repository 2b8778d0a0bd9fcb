//! Duplex channel: one persistent connection, reported as events.
//!
//! The channel owns exactly one connection attempt. It reports `Opened`,
//! `Message`, `TransportError` and `Closed` to its owner and never retries;
//! reconnection policy belongs to whoever owns the channel.

use std::{
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use devbox_core::{ConnectionState, StateCell};
use futures::{Sink, SinkExt, StreamExt, stream::BoxStream};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use url::Url;

/// Close code reported when the connection drops without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;
/// Close code reported when the peer sent a close frame without a status.
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// Transport error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    Connect(String),
    #[error("Transport error: {0}")]
    Io(String),
    #[error("Connection closed")]
    Closed,
}

/// Close frame contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

/// A single frame on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Close(Option<CloseFrame>),
}

/// Application payload of a data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
}

impl Payload {
    /// Raw bytes of the payload.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(data) => data,
        }
    }

    /// Payload as text, if it is a text frame.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }
}

impl From<Payload> for Frame {
    fn from(payload: Payload) -> Self {
        match payload {
            Payload::Text(text) => Self::Text(text),
            Payload::Binary(data) => Self::Binary(data),
        }
    }
}

/// Event reported by a channel to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The transport reported the connection open.
    Opened,
    /// A data frame arrived.
    Message(Payload),
    /// The transport failed; a `Closed` event always follows.
    TransportError(String),
    /// The connection is gone. Always the last event.
    Closed { code: u16, reason: String },
}

/// Outbound half of a connection.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;
/// Inbound half of a connection.
pub type FrameStream = BoxStream<'static, Result<Frame, TransportError>>;

/// Opens connections for a channel.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish a connection to `url`.
    async fn connect(&self, url: &Url) -> Result<(FrameSink, FrameStream), TransportError>;
}

enum Outbound {
    Frame(Frame),
    Close,
}

/// Handle to one connection.
///
/// Dropping the handle closes the connection.
pub struct DuplexChannel {
    outbound: mpsc::UnboundedSender<Outbound>,
    state: watch::Receiver<ConnectionState>,
    closed: AtomicBool,
}

impl DuplexChannel {
    /// Start connecting to `url`.
    ///
    /// Returns the handle and the receiver for its events. Must be called
    /// from within a tokio runtime.
    #[must_use]
    pub fn open(
        connector: Arc<dyn Connector>,
        url: Url,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cell = StateCell::new();
        let state = cell.subscribe();

        tokio::spawn(drive(connector, url, cell, outbound_rx, events_tx));

        let channel = Self {
            outbound: outbound_tx,
            state,
            closed: AtomicBool::new(false),
        };
        (channel, events_rx)
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Send a payload.
    ///
    /// Silently dropped unless the channel is currently connected. Returns
    /// whether the payload was handed to the transport.
    pub fn send(&self, payload: Payload) -> bool {
        if self.closed.load(Ordering::Acquire) || !self.state().is_connected() {
            tracing::trace!("Dropped frame on channel that is not connected");
            return false;
        }
        self.outbound.send(Outbound::Frame(payload.into())).is_ok()
    }

    /// Serialize `msg` as JSON and send it as a text frame.
    pub fn send_json<T: Serialize>(&self, msg: &T) -> bool {
        match serde_json::to_string(msg) {
            Ok(json) => self.send(Payload::Text(json)),
            Err(e) => {
                tracing::error!("Failed to serialize message: {e}");
                false
            }
        }
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.outbound.send(Outbound::Close);
        }
    }
}

impl Drop for DuplexChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Resolves when the owner closes the channel (or drops it).
async fn closed_locally(outbound: &mut mpsc::UnboundedReceiver<Outbound>) {
    while let Some(cmd) = outbound.recv().await {
        if matches!(cmd, Outbound::Close) {
            return;
        }
    }
}

fn emit(events: &mpsc::UnboundedSender<ChannelEvent>, event: ChannelEvent) {
    let _ = events.send(event);
}

fn emit_failure(cell: &StateCell, events: &mpsc::UnboundedSender<ChannelEvent>, error: &str) {
    cell.advance(ConnectionState::Disconnected);
    emit(events, ChannelEvent::TransportError(error.to_string()));
    emit(
        events,
        ChannelEvent::Closed {
            code: ABNORMAL_CLOSURE,
            reason: String::new(),
        },
    );
}

async fn drive(
    connector: Arc<dyn Connector>,
    url: Url,
    cell: StateCell,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<ChannelEvent>,
) {
    tracing::debug!(%url, "Connecting");

    let connected = tokio::select! {
        res = connector.connect(&url) => res,
        () = closed_locally(&mut outbound) => {
            tracing::debug!(%url, "Closed while connecting");
            cell.advance(ConnectionState::Disconnected);
            return;
        }
    };

    let (mut sink, mut stream) = match connected {
        Ok(halves) => halves,
        Err(e) => {
            tracing::warn!(%url, "Connection failed: {e}");
            emit_failure(&cell, &events, &e.to_string());
            return;
        }
    };

    // State first, then the event: an owner reacting to `Opened` can send.
    cell.advance(ConnectionState::Connected);
    emit(&events, ChannelEvent::Opened);
    tracing::debug!(%url, "Connected");

    loop {
        tokio::select! {
            cmd = outbound.recv() => match cmd {
                Some(Outbound::Frame(frame)) => {
                    if let Err(e) = sink.send(frame).await {
                        tracing::warn!(%url, "Send failed: {e}");
                        emit_failure(&cell, &events, &e.to_string());
                        return;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = sink.send(Frame::Close(None)).await;
                    let _ = sink.close().await;
                    cell.advance(ConnectionState::Disconnected);
                    tracing::debug!(%url, "Closed locally");
                    return;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Frame::Text(text))) => {
                    emit(&events, ChannelEvent::Message(Payload::Text(text)));
                }
                Some(Ok(Frame::Binary(data))) => {
                    emit(&events, ChannelEvent::Message(Payload::Binary(data)));
                }
                Some(Ok(Frame::Close(frame))) => {
                    let (code, reason) = frame
                        .map_or((NO_STATUS_RECEIVED, String::new()), |f| (f.code, f.reason));
                    tracing::debug!(%url, code, %reason, "Closed by peer");
                    // Flushes the transport's queued close reply.
                    let _ = sink.close().await;
                    cell.advance(ConnectionState::Disconnected);
                    emit(&events, ChannelEvent::Closed { code, reason });
                    return;
                }
                Some(Err(e)) => {
                    tracing::warn!(%url, "Receive failed: {e}");
                    emit_failure(&cell, &events, &e.to_string());
                    return;
                }
                None => {
                    tracing::debug!(%url, "Stream ended without close frame");
                    cell.advance(ConnectionState::Disconnected);
                    emit(
                        &events,
                        ChannelEvent::Closed {
                            code: ABNORMAL_CLOSURE,
                            reason: String::new(),
                        },
                    );
                    return;
                }
            },
        }
    }
}
