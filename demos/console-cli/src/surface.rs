//! Terminal surface backed by the local terminal.

use std::{
    io::{self, Write},
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use crossterm::{cursor, execute, terminal};
use devbox_core::{LayoutEvent, SurfaceGeometry, TerminalSurface};
use futures::{
    StreamExt,
    stream::{self, BoxStream},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Cell size assumed when the terminal does not report pixels.
const CELL_WIDTH_PX: f64 = 8.0;
const CELL_HEIGHT_PX: f64 = 16.0;

/// Writes remote output straight to stdout; the local terminal does the
/// rendering.
pub struct LocalTerminal {
    read_only: AtomicBool,
    disposed: AtomicBool,
    layout: Mutex<Option<mpsc::UnboundedReceiver<LayoutEvent>>>,
}

impl LocalTerminal {
    /// `layout` receives the resize events read from the terminal.
    pub fn new(layout: mpsc::UnboundedReceiver<LayoutEvent>) -> Self {
        Self {
            read_only: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            layout: Mutex::new(Some(layout)),
        }
    }

    /// Whether the session ended and input is no longer accepted.
    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }
}

impl TerminalSurface for LocalTerminal {
    fn write(&self, bytes: &[u8]) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        let mut stdout = io::stdout().lock();
        if let Err(e) = stdout.write_all(bytes).and_then(|()| stdout.flush()) {
            tracing::warn!("Failed to write to terminal: {e}");
        }
    }

    fn focus(&self) {
        let _ = execute!(io::stdout(), cursor::Show);
    }

    fn selection(&self) -> Option<String> {
        // Selection belongs to the host terminal emulator.
        None
    }

    fn measure(&self) -> SurfaceGeometry {
        match terminal::window_size() {
            Ok(size) => {
                let cols = f64::from(size.columns);
                let rows = f64::from(size.rows);
                let (width, height) = if size.width == 0 || size.height == 0 {
                    (cols * CELL_WIDTH_PX, rows * CELL_HEIGHT_PX)
                } else {
                    (f64::from(size.width), f64::from(size.height))
                };
                SurfaceGeometry::new(cols, rows, width, height)
            }
            Err(e) => {
                tracing::debug!("Terminal size unavailable: {e}");
                SurfaceGeometry::new(0.0, 0.0, 0.0, 0.0)
            }
        }
    }

    fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Release);
        if read_only {
            let _ = execute!(io::stdout(), cursor::DisableBlinking);
        }
    }

    fn layout_events(&self) -> BoxStream<'static, LayoutEvent> {
        let taken = self
            .layout
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match taken {
            Some(rx) => UnboundedReceiverStream::new(rx).boxed(),
            None => stream::pending().boxed(),
        }
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }
}

/// Raw mode for the lifetime of the guard.
pub struct RawMode;

impl RawMode {
    pub fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let _ = execute!(io::stdout(), cursor::EnableBlinking);
    }
}
