//! Close classification.

use thiserror::Error;

/// Policy violation; the backend uses it for rejected tokens.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Missing or invalid token or container.
pub const CLOSE_INVALID_CONNECTION: u16 = 4000;
/// Token rejected.
pub const CLOSE_UNAUTHORIZED: u16 = 4001;

/// Why a console session stopped working.
///
/// The `Display` text is what the user sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ConsoleFailure {
    /// No token was available locally.
    #[error("Not authenticated")]
    NotAuthenticated,
    /// The server rejected the token.
    #[error("Unauthorized. Please log in again.")]
    Unauthorized,
    /// The server rejected the token or target container.
    #[error("Invalid connection (missing or invalid token or container).")]
    InvalidConnection,
    /// Any other close.
    #[error("Console connection closed.")]
    Closed,
    /// The transport failed before the server closed the connection.
    #[error("WebSocket connection failed. Check network or try again.")]
    Transport,
}

impl ConsoleFailure {
    /// Classify a close code.
    #[must_use]
    pub const fn from_close_code(code: u16) -> Self {
        match code {
            CLOSE_UNAUTHORIZED | CLOSE_POLICY_VIOLATION => Self::Unauthorized,
            CLOSE_INVALID_CONNECTION => Self::InvalidConnection,
            _ => Self::Closed,
        }
    }

    /// Whether the caller should send the user through login again.
    #[must_use]
    pub const fn requires_login(self) -> bool {
        matches!(self, Self::NotAuthenticated | Self::Unauthorized)
    }
}
