//! Capabilities the clients consume from their host.
//!
//! The terminal renderer, the token store and the toast area all live outside
//! this workspace. The clients only see them through these traits.

use std::fmt;

use futures::{
    FutureExt, StreamExt,
    future::{self, BoxFuture},
    stream::{self, BoxStream},
};

/// Measured size of a terminal surface.
///
/// Character counts come from font metrics and may be fractional or even
/// non-finite while the surface is still being laid out, so they are kept as
/// `f64` until a resize message is built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceGeometry {
    /// Columns in the character grid.
    pub cols: f64,
    /// Rows in the character grid.
    pub rows: f64,
    /// Width of the surface box in pixels.
    pub width_px: f64,
    /// Height of the surface box in pixels.
    pub height_px: f64,
}

impl SurfaceGeometry {
    /// Create a geometry value.
    #[must_use]
    pub const fn new(cols: f64, rows: f64, width_px: f64, height_px: f64) -> Self {
        Self {
            cols,
            rows,
            width_px,
            height_px,
        }
    }

    /// Whether the surface box has a non-zero area.
    ///
    /// A zero-sized box means the surface is hidden or not laid out yet.
    #[must_use]
    pub fn has_area(&self) -> bool {
        self.width_px > 0.0 && self.height_px > 0.0
    }
}

/// Layout change reported by the host around a terminal surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutEvent {
    /// The element hosting the surface (or its parent) changed size.
    ContainerResized,
    /// The top-level window changed size.
    WindowResized,
}

/// A terminal renderer.
///
/// Accepts raw output bytes, reports its size and emits layout changes.
/// Keystrokes flow the other way through the console session handle.
pub trait TerminalSurface: Send + Sync {
    /// Write raw output.
    fn write(&self, bytes: &[u8]);

    /// Give the surface keyboard focus.
    fn focus(&self);

    /// Currently selected text, if any.
    fn selection(&self) -> Option<String>;

    /// Fit the grid to the surface box and report the result.
    fn measure(&self) -> SurfaceGeometry;

    /// Accept or refuse further input; read-only surfaces are shown muted.
    fn set_read_only(&self, read_only: bool);

    /// Resolves once layout has settled and `measure` is meaningful.
    fn layout_stable(&self) -> BoxFuture<'static, ()> {
        future::ready(()).boxed()
    }

    /// Layout changes around the surface.
    ///
    /// The stream is dropped when the session tears down, which disconnects
    /// whatever observer feeds it.
    fn layout_events(&self) -> BoxStream<'static, LayoutEvent> {
        stream::pending().boxed()
    }

    /// Release renderer resources.
    fn dispose(&self) {}
}

/// Source of the short-lived access token.
pub trait CredentialProvider: Send + Sync {
    /// Current token, or `None` when the user is not logged in.
    fn token(&self) -> Option<String>;
}

impl<F> CredentialProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn token(&self) -> Option<String> {
        self()
    }
}

/// A fixed token held in memory.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    /// Wrap a token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticToken(<redacted>)")
    }
}

impl CredentialProvider for StaticToken {
    fn token(&self) -> Option<String> {
        if self.0.is_empty() {
            None
        } else {
            Some(self.0.clone())
        }
    }
}

/// Toast/banner area for user-visible text.
pub trait NoticeSink: Send + Sync {
    /// Informational notice.
    fn info(&self, text: &str);
    /// Success notice.
    fn success(&self, text: &str);
    /// Warning notice.
    fn warn(&self, text: &str);
}

/// Notice sink that writes to the `tracing` log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotices;

impl NoticeSink for TracingNotices {
    fn info(&self, text: &str) {
        tracing::info!(target: "devbox::notice", "{text}");
    }

    fn success(&self, text: &str) {
        tracing::info!(target: "devbox::notice", success = true, "{text}");
    }

    fn warn(&self, text: &str) {
        tracing::warn!(target: "devbox::notice", "{text}");
    }
}
