//! Wire protocol for the console and notification endpoints.

use std::{fmt, str::FromStr};

use devbox_core::SurfaceGeometry;
use serde::{Deserialize, Serialize};

/// What the console endpoint does with the target container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleAction {
    /// Spawn a new shell in the container.
    Shell,
    /// Attach to the container's main process.
    Attach,
}

impl ConsoleAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Shell => "shell",
            Self::Attach => "attach",
        }
    }
}

impl fmt::Display for ConsoleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown console action name.
#[derive(Debug, thiserror::Error)]
#[error("Unknown console action: {0}")]
pub struct UnknownAction(pub String);

impl FromStr for ConsoleAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shell" => Ok(Self::Shell),
            "attach" => Ok(Self::Attach),
            other => Err(UnknownAction(other.to_string())),
        }
    }
}

/// Terminal size as sent in `pty_resize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PtySize {
    pub rows: u16,
    pub cols: u16,
    /// Surface height in pixels.
    pub height: u32,
    /// Surface width in pixels.
    pub width: u32,
}

impl PtySize {
    /// Build a size from measured geometry.
    ///
    /// Returns `None` unless `cols` and `rows` are finite, at least one after
    /// truncation and fit in a `u16`, and the pixel box is finite.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_geometry(geometry: SurfaceGeometry) -> Option<Self> {
        let cells = |v: f64| {
            (v.is_finite() && v >= 1.0 && v <= f64::from(u16::MAX)).then(|| v.trunc() as u16)
        };
        let pixels = |v: f64| {
            v.is_finite()
                .then(|| v.max(0.0).round().min(f64::from(u32::MAX)) as u32)
        };

        Some(Self {
            cols: cells(geometry.cols)?,
            rows: cells(geometry.rows)?,
            width: pixels(geometry.width_px)?,
            height: pixels(geometry.height_px)?,
        })
    }
}

/// Request carried on the console endpoint, tagged by `action`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "payload", rename_all = "snake_case")]
pub enum ConsoleRequest {
    /// Spawn a shell; only valid as the handshake.
    Shell {
        #[serde(rename = "Id")]
        id: String,
    },
    /// Attach to the main process; only valid as the handshake.
    Attach {
        #[serde(rename = "Id")]
        id: String,
    },
    /// Keystrokes for the PTY.
    PtyInput { input: String, id: String },
    /// New terminal size.
    PtyResize { size: PtySize },
}

impl ConsoleRequest {
    /// Create an input message from raw bytes.
    #[must_use]
    pub fn input(data: &[u8], container_id: &str) -> Self {
        Self::PtyInput {
            input: String::from_utf8_lossy(data).into_owned(),
            id: container_id.to_string(),
        }
    }

    /// Create a resize message.
    #[must_use]
    pub const fn resize(size: PtySize) -> Self {
        Self::PtyResize { size }
    }

    fn open(action: ConsoleAction, container_id: &str) -> Self {
        let id = container_id.to_string();
        match action {
            ConsoleAction::Shell => Self::Shell { id },
            ConsoleAction::Attach => Self::Attach { id },
        }
    }
}

/// Top-level console frame: a request plus, on the handshake only, the token.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct ConsoleFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(flatten)]
    request: ConsoleRequest,
}

impl ConsoleFrame {
    /// The authentication handshake, sent once as the first message.
    #[must_use]
    pub fn handshake(token: impl Into<String>, action: ConsoleAction, container_id: &str) -> Self {
        Self {
            token: Some(token.into()),
            request: ConsoleRequest::open(action, container_id),
        }
    }

    /// Any request after the handshake.
    #[must_use]
    pub const fn request(request: ConsoleRequest) -> Self {
        Self {
            token: None,
            request,
        }
    }

    /// Whether this frame carries credentials.
    #[must_use]
    pub const fn is_handshake(&self) -> bool {
        self.token.is_some()
    }

    #[must_use]
    pub const fn inner(&self) -> &ConsoleRequest {
        &self.request
    }
}

impl fmt::Debug for ConsoleFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleFrame")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("request", &self.request)
            .finish()
    }
}

/// Kind of a notification pushed by the job queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationAction {
    /// A container job was queued and is running.
    Waiting,
    Created,
    Started,
    Stopped,
    Removed,
    Restarted,
    /// Any action this client does not know about.
    #[serde(other)]
    Other,
}

impl NotificationAction {
    /// Whether the action reports a finished container job.
    #[must_use]
    pub const fn is_completion(self) -> bool {
        matches!(
            self,
            Self::Created | Self::Started | Self::Stopped | Self::Removed | Self::Restarted
        )
    }
}

/// Optional structured data on a notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    #[serde(default)]
    pub container_id: Option<String>,
    #[serde(default)]
    pub cmd: Option<String>,
}

/// A notification, as found under the `message` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub action: NotificationAction,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub data: Option<NotificationData>,
}

#[derive(Deserialize)]
struct Envelope {
    message: Notification,
}

impl Notification {
    /// Parse a `{"message": {...}}` frame.
    ///
    /// # Errors
    /// Returns error if the text is not JSON or lacks `message.action`.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<Envelope>(text).map(|envelope| envelope.message)
    }

    /// Container id from `data`, if present.
    #[must_use]
    pub fn container_id(&self) -> Option<&str> {
        self.data.as_ref()?.container_id.as_deref()
    }
}
