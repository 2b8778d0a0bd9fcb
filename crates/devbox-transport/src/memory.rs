//! In-memory connector.
//!
//! Every `connect` either fails (when a refusal was scripted) or hands a
//! [`MemoryPeer`] to the paired [`MemoryServer`], which plays the server side.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use url::Url;

use crate::channel::{CloseFrame, Connector, Frame, FrameSink, FrameStream, TransportError};

#[derive(Default)]
struct Script {
    refusals: usize,
    history: VecDeque<Url>,
}

/// Connector whose connections terminate in a [`MemoryServer`].
#[derive(Clone)]
pub struct MemoryConnector {
    script: Arc<Mutex<Script>>,
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
}

impl MemoryConnector {
    /// Create a connector and its server side.
    #[must_use]
    pub fn new() -> (Self, MemoryServer) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let connector = Self {
            script: Arc::new(Mutex::new(Script::default())),
            accept_tx,
        };
        (connector, MemoryServer { accept_rx })
    }

    /// Refuse the next `n` connection attempts.
    pub fn refuse_next(&self, n: usize) {
        self.script().refusals += n;
    }

    /// Every URL a connection was attempted to, in order.
    #[must_use]
    pub fn attempted_urls(&self) -> Vec<Url> {
        self.script().history.iter().cloned().collect()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &Url) -> Result<(FrameSink, FrameStream), TransportError> {
        {
            let mut script = self.script();
            script.history.push_back(url.clone());
            if script.refusals > 0 {
                script.refusals -= 1;
                return Err(TransportError::Connect("connection refused".into()));
            }
        }

        let (to_server_tx, to_server_rx) = mpsc::unbounded_channel::<Frame>();
        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            url: url.clone(),
            inbound: to_server_rx,
            outbound: to_client_tx,
        };
        self.accept_tx
            .send(peer)
            .map_err(|_| TransportError::Connect("server gone".into()))?;

        let sink = futures::sink::unfold(to_server_tx, |tx, frame: Frame| async move {
            tx.send(frame).map_err(|_| TransportError::Closed)?;
            Ok::<_, TransportError>(tx)
        });
        let stream = UnboundedReceiverStream::new(to_client_rx).boxed();
        Ok((Box::pin(sink), stream))
    }
}

/// Server side of a [`MemoryConnector`].
pub struct MemoryServer {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryServer {
    /// Wait for the next accepted connection.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }
}

/// Server end of one in-memory connection.
///
/// Dropping the peer hangs up without a close frame.
pub struct MemoryPeer {
    /// Address the client connected to.
    pub url: Url,
    inbound: mpsc::UnboundedReceiver<Frame>,
    outbound: mpsc::UnboundedSender<Result<Frame, TransportError>>,
}

impl MemoryPeer {
    /// Next frame sent by the client; `None` once the client released the connection.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.inbound.recv().await
    }

    /// Next frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.inbound.try_recv().ok()
    }

    /// Send a text frame.
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.outbound.send(Ok(Frame::Text(text.into())));
    }

    /// Send a binary frame.
    pub fn send_binary(&self, data: impl Into<Bytes>) {
        let _ = self.outbound.send(Ok(Frame::Binary(data.into())));
    }

    /// Close with a status code.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.outbound.send(Ok(Frame::Close(Some(CloseFrame {
            code,
            reason: reason.to_string(),
        }))));
    }

    /// Fail the connection with a transport error.
    pub fn fail(&self, error: &str) {
        let _ = self.outbound.send(Err(TransportError::Io(error.to_string())));
    }
}
