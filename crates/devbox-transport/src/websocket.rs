//! WebSocket connector built on `tokio-tungstenite`.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future};
use tokio_tungstenite::tungstenite::{
    self,
    protocol::{CloseFrame as WsCloseFrame, frame::coding::CloseCode},
};
use url::Url;

use crate::channel::{CloseFrame, Connector, Frame, FrameSink, FrameStream, TransportError};

/// Connects duplex channels over WebSocket (`ws://` or, with the `tls`
/// feature, `wss://`).
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<(FrameSink, FrameStream), TransportError> {
        let (ws_stream, response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        tracing::debug!(status = %response.status(), "WebSocket handshake complete");

        let (sender, receiver) = ws_stream.split();

        let sink = sender
            .sink_map_err(|e| TransportError::Io(e.to_string()))
            .with(|frame: Frame| future::ready(Ok::<_, TransportError>(to_ws_message(frame))));
        let stream = receiver
            .filter_map(|msg| future::ready(from_ws_message(msg)))
            .boxed();

        Ok((Box::pin(sink), stream))
    }
}

fn to_ws_message(frame: Frame) -> tungstenite::Message {
    match frame {
        Frame::Text(text) => tungstenite::Message::Text(text.into()),
        Frame::Binary(data) => tungstenite::Message::Binary(data),
        Frame::Close(None) => tungstenite::Message::Close(None),
        Frame::Close(Some(close)) => tungstenite::Message::Close(Some(WsCloseFrame {
            code: CloseCode::from(close.code),
            reason: close.reason.into(),
        })),
    }
}

/// Map an incoming message; control frames are handled by tungstenite.
fn from_ws_message(
    msg: Result<tungstenite::Message, tungstenite::Error>,
) -> Option<Result<Frame, TransportError>> {
    match msg {
        Ok(tungstenite::Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
        Ok(tungstenite::Message::Binary(data)) => Some(Ok(Frame::Binary(data))),
        Ok(tungstenite::Message::Close(close)) => Some(Ok(Frame::Close(close.map(|c| {
            CloseFrame {
                code: u16::from(c.code),
                reason: c.reason.as_str().to_owned(),
            }
        })))),
        Ok(
            tungstenite::Message::Ping(_)
            | tungstenite::Message::Pong(_)
            | tungstenite::Message::Frame(_),
        ) => None,
        Err(e) => Some(Err(TransportError::Io(e.to_string()))),
    }
}
