//! Transport layer for the devbox real-time clients.
//!
//! Provides:
//! - Wire protocol (JSON text frames)
//! - `DuplexChannel` - one connection, state reporting, no retries
//! - WebSocket connector (feature: websocket)
//! - In-memory connector for tests (feature: memory)

pub mod channel;
pub mod protocol;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(any(test, feature = "memory"))]
pub mod memory;

pub use channel::{
    ChannelEvent, CloseFrame, Connector, DuplexChannel, Frame, FrameSink, FrameStream, Payload,
    TransportError,
};
pub use protocol::{
    ConsoleAction, ConsoleFrame, ConsoleRequest, Notification, NotificationAction,
    NotificationData, PtySize,
};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnector;
