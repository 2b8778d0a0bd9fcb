//! Connection lifecycle state.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Lifecycle of a single duplex channel.
///
/// `Connecting` is the initial state and `Disconnected` is terminal: a channel
/// that has disconnected never comes back, reconnecting means opening a new one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Waiting for the transport to report the connection open.
    #[default]
    Connecting,
    /// The transport reported the connection open.
    Connected,
    /// Closed, either locally or by the peer.
    Disconnected,
}

impl ConnectionState {
    /// Whether messages may currently be sent.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Connected | Self::Disconnected)
                | (Self::Connected, Self::Disconnected)
        )
    }

    /// Lowercase label, as shown in status badges.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable connection state that only accepts legal transitions.
///
/// Readers subscribe through [`StateCell::subscribe`] and see every accepted
/// transition in order.
#[derive(Debug)]
pub struct StateCell {
    tx: watch::Sender<ConnectionState>,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    /// Create a cell in the `Connecting` state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionState::Connecting);
        Self { tx }
    }

    /// Current state.
    #[must_use]
    pub fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Move to `next` if the transition is legal.
    ///
    /// Returns `true` when the state changed.
    pub fn advance(&self, next: ConnectionState) -> bool {
        self.tx.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                tracing::trace!(from = %current, to = %next, "Ignored state transition");
                false
            }
        })
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }
}
