//! Console session: one terminal view bridged to one container PTY.
//!
//! Each session runs as an independent tokio task that owns the channel, the
//! resize timers and the surface's layout observer. The handle talks to it
//! over an mpsc inbox; channel events, layout events and timer ticks arrive
//! in the same `select!` loop, so there is no shared mutable state.

use std::sync::Arc;

use bytes::Bytes;
use devbox_core::{
    ClientConfig, ConfigError, ConnectionState, CredentialProvider, LayoutEvent, StateCell,
    SurfaceGeometry, TerminalSurface,
};
use devbox_transport::{
    ChannelEvent, ConsoleAction, ConsoleFrame, ConsoleRequest, Connector, DuplexChannel, PtySize,
};
use futures::{StreamExt, stream::BoxStream};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    classify::ConsoleFailure,
    resize::{ResizeScheduler, ResizeTick},
};

/// Written to the surface when the connection ends.
const CLOSED_BANNER: &[u8] = b"\r\n\n[Connection closed]\r\n";

/// Console open error.
#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    #[error("Not authenticated")]
    NotAuthenticated,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ConsoleError {
    /// The failure class the caller should act on.
    #[must_use]
    pub const fn failure(&self) -> Option<ConsoleFailure> {
        match self {
            Self::NotAuthenticated => Some(ConsoleFailure::NotAuthenticated),
            Self::Config(_) => None,
        }
    }
}

/// Which container to open and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleTarget {
    pub container_id: String,
    pub action: ConsoleAction,
}

impl ConsoleTarget {
    #[must_use]
    pub fn new(container_id: impl Into<String>, action: ConsoleAction) -> Self {
        Self {
            container_id: container_id.into(),
            action,
        }
    }
}

/// Event reported to the view that owns the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleEvent {
    /// The session moved to a new state.
    StateChanged(ConnectionState),
    /// The session stopped working; the text is user-facing.
    Failed(ConsoleFailure),
}

enum Command {
    Input(Bytes),
    Resize(SurfaceGeometry),
    Close,
}

/// Handle to a running console session.
///
/// Dropping the handle tears the session down; [`ConsoleSession::close`]
/// does the same and waits for teardown to finish.
pub struct ConsoleSession {
    id: Uuid,
    target: ConsoleTarget,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    surface: Arc<dyn TerminalSurface>,
    task: Option<JoinHandle<()>>,
}

impl ConsoleSession {
    /// Open a console session.
    ///
    /// The endpoint address carries only the container id; the token is read
    /// from `credentials` once and sent in the handshake.
    ///
    /// # Errors
    /// Returns [`ConsoleError::NotAuthenticated`] when no token is available
    /// (the surface is released and nothing is connected), or a config error
    /// if the endpoint cannot be built.
    pub fn open(
        connector: Arc<dyn Connector>,
        config: &ClientConfig,
        target: ConsoleTarget,
        credentials: &dyn CredentialProvider,
        surface: Arc<dyn TerminalSurface>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ConsoleEvent>), ConsoleError> {
        let Some(token) = credentials.token() else {
            tracing::warn!(
                container_id = %target.container_id,
                "No access token, console not opened"
            );
            surface.dispose();
            return Err(ConsoleError::NotAuthenticated);
        };
        let url = match config.console_url(&target.container_id) {
            Ok(url) => url,
            Err(e) => {
                surface.dispose();
                return Err(e.into());
            }
        };

        let id = Uuid::new_v4();
        let (channel, channel_events) = DuplexChannel::open(connector, url);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let state = StateCell::new();
        let state_rx = state.subscribe();

        let actor = SessionActor {
            target: target.clone(),
            token: Some(token),
            channel,
            channel_events: Some(channel_events),
            layout: Some(surface.layout_events()),
            surface: Arc::clone(&surface),
            resize: ResizeScheduler::new(config.timings),
            state,
            transport_failed: false,
            events: events_tx,
        };
        let span = tracing::info_span!(
            "console",
            session_id = %id,
            container_id = %target.container_id,
            action = %target.action,
        );
        let task = tokio::spawn(actor.run(commands_rx).instrument(span));

        let session = Self {
            id,
            target,
            commands: commands_tx,
            state: state_rx,
            surface,
            task: Some(task),
        };
        Ok((session, events_rx))
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn target(&self) -> &ConsoleTarget {
        &self.target
    }

    /// Current state. `Connected` means the handshake has been sent.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Forward keystrokes. Dropped unless connected.
    pub fn send_input(&self, data: &[u8]) {
        if !self.state().is_connected() {
            tracing::trace!(session_id = %self.id, "Input dropped, session not connected");
            return;
        }
        let _ = self.commands.send(Command::Input(Bytes::copy_from_slice(data)));
    }

    /// Send an explicit size. Dropped unless connected; abandoned when the
    /// pixel box is empty; suppressed when the grid is not a finite positive
    /// size.
    pub fn request_resize(&self, cols: f64, rows: f64, width_px: f64, height_px: f64) {
        if !self.state().is_connected() {
            return;
        }
        let geometry = SurfaceGeometry::new(cols, rows, width_px, height_px);
        let _ = self.commands.send(Command::Resize(geometry));
    }

    /// The surface's current selection, for copy-on-shortcut.
    #[must_use]
    pub fn selection(&self) -> Option<String> {
        self.surface.selection().filter(|s| !s.is_empty())
    }

    /// Tear the session down and wait until it is gone.
    ///
    /// Timers are cancelled, the layout observer is disconnected, the channel
    /// is closed and the surface is released, in that order.
    pub async fn close(mut self) {
        let _ = self.commands.send(Command::Close);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(session_id = %self.id, "Console task failed: {e}");
            }
        }
    }
}

impl Drop for ConsoleSession {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Close);
    }
}

struct SessionActor {
    target: ConsoleTarget,
    /// Taken by the handshake, so it can only be sent once.
    token: Option<String>,
    channel: DuplexChannel,
    channel_events: Option<mpsc::UnboundedReceiver<ChannelEvent>>,
    layout: Option<BoxStream<'static, LayoutEvent>>,
    surface: Arc<dyn TerminalSurface>,
    resize: ResizeScheduler,
    state: StateCell,
    transport_failed: bool,
    events: mpsc::UnboundedSender<ConsoleEvent>,
}

impl SessionActor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Input(data)) => self.send_input(&data),
                    Some(Command::Resize(geometry)) => self.send_resize(geometry),
                    Some(Command::Close) | None => break,
                },
                event = next_channel_event(&mut self.channel_events) => match event {
                    Some(event) => self.on_channel_event(event),
                    None => self.channel_events = None,
                },
                layout = next_layout(&mut self.layout) => match layout {
                    Some(event) => self.on_layout(event),
                    None => self.layout = None,
                },
                tick = self.resize.next() => self.on_tick(tick),
            }
        }
        self.teardown();
    }

    /// Connected and the handshake is out.
    fn ready(&self) -> bool {
        self.token.is_none() && self.state.get().is_connected()
    }

    fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Opened => self.on_opened(),
            ChannelEvent::Message(payload) => {
                if self.ready() {
                    self.surface.write(payload.as_bytes());
                }
            }
            ChannelEvent::TransportError(error) => {
                tracing::warn!("Console transport error: {error}");
                if !self.transport_failed && self.state.get() != ConnectionState::Disconnected {
                    self.transport_failed = true;
                    self.emit(ConsoleEvent::Failed(ConsoleFailure::Transport));
                }
            }
            ChannelEvent::Closed { code, reason } => self.on_closed(code, &reason),
        }
    }

    fn on_opened(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        let handshake =
            ConsoleFrame::handshake(token, self.target.action, &self.target.container_id);
        if !self.channel.send_json(&handshake) {
            tracing::warn!("Handshake could not be sent");
            return;
        }
        tracing::info!("Console connected");
        if self.state.advance(ConnectionState::Connected) {
            self.emit(ConsoleEvent::StateChanged(ConnectionState::Connected));
        }
        self.surface.focus();
        self.resize.on_connected();
    }

    fn on_closed(&mut self, code: u16, reason: &str) {
        let failure = ConsoleFailure::from_close_code(code);
        tracing::info!(code, reason, ?failure, "Console connection closed");

        self.resize.cancel();
        self.layout = None;
        self.surface.write(CLOSED_BANNER);
        self.surface.set_read_only(true);

        if self.state.advance(ConnectionState::Disconnected) {
            self.emit(ConsoleEvent::StateChanged(ConnectionState::Disconnected));
        }
        if !self.transport_failed {
            self.emit(ConsoleEvent::Failed(failure));
        }
    }

    fn on_layout(&mut self, event: LayoutEvent) {
        if self.ready() {
            self.resize.on_layout(event, self.surface.as_ref());
        }
    }

    fn on_tick(&mut self, tick: ResizeTick) {
        if !self.ready() {
            return;
        }
        match tick {
            ResizeTick::SettleElapsed | ResizeTick::DebounceElapsed => {
                self.resize.request_measure(self.surface.as_ref());
            }
            ResizeTick::LayoutStable => self.send_resize(self.surface.measure()),
        }
    }

    fn send_input(&self, data: &[u8]) {
        if !self.ready() {
            return;
        }
        let request = ConsoleRequest::input(data, &self.target.container_id);
        self.channel.send_json(&ConsoleFrame::request(request));
    }

    fn send_resize(&self, geometry: SurfaceGeometry) {
        if !self.ready() {
            return;
        }
        if !geometry.has_area() {
            tracing::debug!(?geometry, "Surface not laid out, resize abandoned");
            return;
        }
        let Some(size) = PtySize::from_geometry(geometry) else {
            tracing::debug!(?geometry, "Invalid grid size, resize suppressed");
            return;
        };
        tracing::debug!(cols = size.cols, rows = size.rows, "Sending resize");
        self.channel
            .send_json(&ConsoleFrame::request(ConsoleRequest::resize(size)));
    }

    fn teardown(mut self) {
        self.resize.cancel();
        self.layout = None;
        self.channel.close();
        self.surface.dispose();
        if self.state.advance(ConnectionState::Disconnected) {
            self.emit(ConsoleEvent::StateChanged(ConnectionState::Disconnected));
        }
        tracing::info!("Console session closed");
    }

    fn emit(&self, event: ConsoleEvent) {
        let _ = self.events.send(event);
    }
}

async fn next_channel_event(
    events: &mut Option<mpsc::UnboundedReceiver<ChannelEvent>>,
) -> Option<ChannelEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_layout(layout: &mut Option<BoxStream<'static, LayoutEvent>>) -> Option<LayoutEvent> {
    match layout {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use devbox_core::StaticToken;
    use devbox_transport::{
        Frame,
        memory::{MemoryConnector, MemoryPeer, MemoryServer},
    };
    use serde_json::{Value, json};
    use tokio::time::{Instant, timeout};

    use super::*;
    use crate::testing::FakeSurface;

    struct Harness {
        session: ConsoleSession,
        events: mpsc::UnboundedReceiver<ConsoleEvent>,
        surface: FakeSurface,
        connector: MemoryConnector,
        server: MemoryServer,
    }

    fn open_with(surface: FakeSurface, action: ConsoleAction) -> Harness {
        let (connector, server) = MemoryConnector::new();
        let (session, events) = tokio_test::assert_ok!(ConsoleSession::open(
            Arc::new(connector.clone()),
            &ClientConfig::default(),
            ConsoleTarget::new("c1", action),
            &StaticToken::new("t1"),
            Arc::new(surface.clone()),
        ));
        Harness {
            session,
            events,
            surface,
            connector,
            server,
        }
    }

    fn open_shell() -> Harness {
        open_with(FakeSurface::new(80.0, 24.0, 640.0, 384.0), ConsoleAction::Shell)
    }

    async fn next_json(peer: &mut MemoryPeer) -> Value {
        match peer.recv().await {
            Some(Frame::Text(text)) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    /// Accept the connection and consume the handshake.
    async fn connect(h: &mut Harness) -> MemoryPeer {
        let mut peer = h.server.accept().await.unwrap();
        let handshake = next_json(&mut peer).await;
        assert_eq!(handshake["token"], "t1");
        assert_eq!(
            h.events.recv().await,
            Some(ConsoleEvent::StateChanged(ConnectionState::Connected))
        );
        peer
    }

    async fn assert_silent(peer: &mut MemoryPeer, window: Duration) {
        tokio_test::assert_err!(timeout(window, peer.recv()).await, "unexpected frame");
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_then_settled_resize() {
        let mut h = open_shell();
        let mut peer = h.server.accept().await.unwrap();
        let opened_at = Instant::now();

        assert_eq!(
            next_json(&mut peer).await,
            json!({"token": "t1", "action": "shell", "payload": {"Id": "c1"}})
        );

        let resize = next_json(&mut peer).await;
        assert!(opened_at.elapsed() >= Duration::from_millis(250));
        assert_eq!(
            resize,
            json!({
                "action": "pty_resize",
                "payload": {"size": {"rows": 24, "cols": 80, "height": 384, "width": 640}}
            })
        );
        assert_eq!(h.surface.focused(), 1);
        assert_eq!(h.session.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_handshake() {
        let mut h = open_with(FakeSurface::new(80.0, 24.0, 640.0, 384.0), ConsoleAction::Attach);
        let mut peer = h.server.accept().await.unwrap();
        assert_eq!(
            next_json(&mut peer).await,
            json!({"token": "t1", "action": "attach", "payload": {"Id": "c1"}})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_url_carries_container_only() {
        let mut h = open_shell();
        let peer = h.server.accept().await.unwrap();
        assert_eq!(
            peer.url.as_str(),
            "ws://localhost:8000/ws/console/?container=c1"
        );
        assert!(!peer.url.as_str().contains("t1"));
        assert_eq!(h.connector.attempted_urls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_input_before_handshake_never_sent() {
        let mut h = open_shell();
        h.session.send_input(b"early");
        h.session.request_resize(100.0, 30.0, 800.0, 480.0);

        let mut peer = connect(&mut h).await;
        h.session.send_input(b"ls\r");
        assert_eq!(
            next_json(&mut peer).await,
            json!({"action": "pty_input", "payload": {"input": "ls\r", "id": "c1"}})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_written_verbatim() {
        let mut h = open_shell();
        let peer = connect(&mut h).await;

        peer.send_text("$ ");
        peer.send_binary(&b"\x1b[32mok\x1b[0m"[..]);
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(h.surface.output(), "$ \x1b[32mok\x1b[0m");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_close() {
        let mut h = open_shell();
        let peer = connect(&mut h).await;

        peer.close(4001, "Unauthorized");
        assert_eq!(
            h.events.recv().await,
            Some(ConsoleEvent::StateChanged(ConnectionState::Disconnected))
        );
        let Some(ConsoleEvent::Failed(failure)) = h.events.recv().await else {
            panic!("expected failure");
        };
        assert_eq!(failure.to_string(), "Unauthorized. Please log in again.");
        assert!(failure.requires_login());
        assert!(h.surface.read_only());
        assert!(h.surface.output().ends_with("[Connection closed]\r\n"));
        // Muted, not destroyed.
        assert!(!h.surface.disposed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_connection_close() {
        let mut h = open_shell();
        let peer = connect(&mut h).await;

        peer.close(4000, "");
        h.events.recv().await;
        assert_eq!(
            h.events.recv().await,
            Some(ConsoleEvent::Failed(ConsoleFailure::InvalidConnection))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_reported_once() {
        let mut h = open_shell();
        let peer = connect(&mut h).await;

        peer.fail("connection reset");
        assert_eq!(
            h.events.recv().await,
            Some(ConsoleEvent::Failed(ConsoleFailure::Transport))
        );
        assert_eq!(
            h.events.recv().await,
            Some(ConsoleEvent::StateChanged(ConnectionState::Disconnected))
        );
        assert!(h.surface.read_only());

        h.session.close().await;
        assert_eq!(h.events.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_connection_is_transport_failure() {
        let (connector, _server) = MemoryConnector::new();
        connector.refuse_next(1);
        let surface = FakeSurface::new(80.0, 24.0, 640.0, 384.0);
        let (session, mut events) = ConsoleSession::open(
            Arc::new(connector),
            &ClientConfig::default(),
            ConsoleTarget::new("c1", ConsoleAction::Shell),
            &StaticToken::new("t1"),
            Arc::new(surface),
        )
        .unwrap();

        assert_eq!(
            events.recv().await,
            Some(ConsoleEvent::Failed(ConsoleFailure::Transport))
        );
        assert_eq!(
            events.recv().await,
            Some(ConsoleEvent::StateChanged(ConnectionState::Disconnected))
        );
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_resize_without_area() {
        let mut h = open_with(FakeSurface::new(80.0, 24.0, 0.0, 0.0), ConsoleAction::Shell);
        let mut peer = connect(&mut h).await;

        assert_silent(&mut peer, Duration::from_secs(1)).await;

        h.surface
            .set_geometry(SurfaceGeometry::new(120.0, 40.0, 960.0, 640.0));
        h.surface.emit_layout(LayoutEvent::ContainerResized);
        let resize = next_json(&mut peer).await;
        assert_eq!(resize["payload"]["size"]["cols"], 120);
        assert_eq!(resize["payload"]["size"]["rows"], 40);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_finite_grid_suppressed() {
        let mut h = open_with(
            FakeSurface::new(f64::NAN, 24.0, 640.0, 384.0),
            ConsoleAction::Shell,
        );
        let mut peer = connect(&mut h).await;
        assert_silent(&mut peer, Duration::from_secs(1)).await;

        h.session.request_resize(0.0, 24.0, 640.0, 384.0);
        h.session.request_resize(-1.0, 24.0, 640.0, 384.0);
        h.session.request_resize(80.0, f64::INFINITY, 640.0, 384.0);
        assert_silent(&mut peer, Duration::from_secs(1)).await;

        h.session.request_resize(100.0, 30.0, 800.0, 480.0);
        assert_eq!(next_json(&mut peer).await["payload"]["size"]["cols"], 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resize_sends_trailing_retry() {
        let mut h = open_shell();
        let mut peer = connect(&mut h).await;
        // Settle resize.
        next_json(&mut peer).await;

        h.surface
            .set_geometry(SurfaceGeometry::new(100.0, 30.0, 800.0, 480.0));
        let before = Instant::now();
        h.surface.emit_layout(LayoutEvent::WindowResized);

        let first = next_json(&mut peer).await;
        assert_eq!(first["payload"]["size"]["cols"], 100);
        let trailing = next_json(&mut peer).await;
        assert!(before.elapsed() >= Duration::from_millis(100));
        assert_eq!(trailing["payload"]["size"]["cols"], 100);
        assert_silent(&mut peer, Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_resize_waits_for_stable_layout() {
        let mut h = open_shell();
        h.surface.hold_layout();
        let mut peer = connect(&mut h).await;

        assert_silent(&mut peer, Duration::from_secs(1)).await;
        h.surface.release_layout();
        assert_eq!(next_json(&mut peer).await["action"], "pty_resize");
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_before_settle_cancels_everything() {
        let mut h = open_shell();
        let mut peer = connect(&mut h).await;

        let surface = h.surface.clone();
        h.session.close().await;

        assert_eq!(peer.recv().await, Some(Frame::Close(None)));
        assert_eq!(peer.recv().await, None);
        assert!(surface.disposed());
        assert!(!surface.layout_observed());
        assert_eq!(
            h.events.recv().await,
            Some(ConsoleEvent::StateChanged(ConnectionState::Disconnected))
        );
        assert_eq!(h.events.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_tears_down() {
        let mut h = open_shell();
        let mut peer = connect(&mut h).await;
        let surface = h.surface.clone();

        drop(h.session);
        assert_eq!(peer.recv().await, Some(Frame::Close(None)));
        assert_eq!(peer.recv().await, None);
        assert!(surface.disposed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_token() {
        let (connector, _server) = MemoryConnector::new();
        let surface = FakeSurface::new(80.0, 24.0, 640.0, 384.0);
        let no_token = || None::<String>;

        let result = ConsoleSession::open(
            Arc::new(connector.clone()),
            &ClientConfig::default(),
            ConsoleTarget::new("c1", ConsoleAction::Shell),
            &no_token,
            Arc::new(surface.clone()),
        );

        let Err(err) = result else {
            panic!("expected error");
        };
        assert_eq!(err.failure(), Some(ConsoleFailure::NotAuthenticated));
        assert!(surface.disposed());
        assert!(connector.attempted_urls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_selection_passthrough() {
        let h = open_shell();
        assert_eq!(h.session.selection().as_deref(), Some("selected"));
    }
}
