//! Recording terminal surface for tests.

use std::sync::{Arc, Mutex};

use devbox_core::{LayoutEvent, SurfaceGeometry, TerminalSurface};
use futures::{
    FutureExt, StreamExt,
    future::BoxFuture,
    stream::{self, BoxStream},
};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

#[derive(Default)]
struct Record {
    output: Vec<u8>,
    focused: usize,
    read_only: bool,
    disposed: bool,
    layout_waits: usize,
}

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct FakeSurface {
    geometry: Arc<Mutex<SurfaceGeometry>>,
    record: Arc<Mutex<Record>>,
    held: Arc<watch::Sender<bool>>,
    layout_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<LayoutEvent>>>>,
    layout_tx: mpsc::UnboundedSender<LayoutEvent>,
}

impl FakeSurface {
    pub fn new(cols: f64, rows: f64, width_px: f64, height_px: f64) -> Self {
        let (held, _) = watch::channel(false);
        let (layout_tx, layout_rx) = mpsc::unbounded_channel();
        Self {
            geometry: Arc::new(Mutex::new(SurfaceGeometry::new(
                cols, rows, width_px, height_px,
            ))),
            record: Arc::new(Mutex::new(Record::default())),
            held: Arc::new(held),
            layout_rx: Arc::new(Mutex::new(Some(layout_rx))),
            layout_tx,
        }
    }

    pub fn set_geometry(&self, geometry: SurfaceGeometry) {
        *self.geometry.lock().unwrap() = geometry;
    }

    pub fn emit_layout(&self, event: LayoutEvent) {
        let _ = self.layout_tx.send(event);
    }

    /// Whether the session still listens for layout events.
    pub fn layout_observed(&self) -> bool {
        !self.layout_tx.is_closed()
    }

    pub fn hold_layout(&self) {
        self.held.send_replace(true);
    }

    pub fn release_layout(&self) {
        self.held.send_replace(false);
    }

    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.record.lock().unwrap().output).into_owned()
    }

    pub fn focused(&self) -> usize {
        self.record.lock().unwrap().focused
    }

    pub fn read_only(&self) -> bool {
        self.record.lock().unwrap().read_only
    }

    pub fn disposed(&self) -> bool {
        self.record.lock().unwrap().disposed
    }

    pub fn layout_waits(&self) -> usize {
        self.record.lock().unwrap().layout_waits
    }
}

impl TerminalSurface for FakeSurface {
    fn write(&self, bytes: &[u8]) {
        self.record.lock().unwrap().output.extend_from_slice(bytes);
    }

    fn focus(&self) {
        self.record.lock().unwrap().focused += 1;
    }

    fn selection(&self) -> Option<String> {
        Some("selected".to_string())
    }

    fn measure(&self) -> SurfaceGeometry {
        *self.geometry.lock().unwrap()
    }

    fn set_read_only(&self, read_only: bool) {
        self.record.lock().unwrap().read_only = read_only;
    }

    fn layout_stable(&self) -> BoxFuture<'static, ()> {
        self.record.lock().unwrap().layout_waits += 1;
        let mut held = self.held.subscribe();
        async move {
            let _ = held.wait_for(|held| !held).await;
        }
        .boxed()
    }

    fn layout_events(&self) -> BoxStream<'static, LayoutEvent> {
        match self.layout_rx.lock().unwrap().take() {
            Some(rx) => UnboundedReceiverStream::new(rx).boxed(),
            None => stream::pending().boxed(),
        }
    }

    fn dispose(&self) {
        self.record.lock().unwrap().disposed = true;
    }
}
