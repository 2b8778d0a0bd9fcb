//! Notification bus: one long-lived subscription per dashboard.
//!
//! The bus owns at most one [`DuplexChannel`] at a time. When the server
//! goes away it waits a fixed delay and opens a new one, up to a bounded
//! number of consecutive attempts. Status is published through a `watch`
//! channel so views can render a live badge.

use std::{
    pin::Pin,
    sync::{Arc, Weak},
};

use devbox_core::{ClientConfig, ConfigError, ConnectionState, NoticeSink};
use devbox_transport::{ChannelEvent, Connector, DuplexChannel, Notification, Payload};
use serde::Serialize;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{Sleep, sleep},
};
use tracing::Instrument;
use url::Url;

use crate::{
    dispatch::{NotificationHandler, Observers},
    policy::ReconnectPolicy,
};

/// Shown once when the bus stops retrying.
const LOST_CONNECTION: &str = "Lost connection to notifications.";

/// Live status of the bus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BusStatus {
    pub state: ConnectionState,
    /// Consecutive reconnect attempts; zero while connected.
    pub reconnect_attempt: u32,
}

impl BusStatus {
    #[must_use]
    pub const fn connected(&self) -> bool {
        self.state.is_connected()
    }
}

enum Command {
    AddObserver(Weak<dyn NotificationHandler>),
    RemoveObserver(Weak<dyn NotificationHandler>),
    Close,
}

/// Handle to a running notification subscription.
///
/// Dropping the handle closes the subscription.
pub struct NotificationBus {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<BusStatus>,
    task: Option<JoinHandle<()>>,
}

impl NotificationBus {
    /// Subscribe to notifications.
    ///
    /// `handler` is held weakly: keep the `Arc` alive for as long as it
    /// should receive callbacks.
    ///
    /// # Errors
    /// Returns error if the notification endpoint cannot be built.
    pub fn subscribe(
        connector: Arc<dyn Connector>,
        config: &ClientConfig,
        notices: Arc<dyn NoticeSink>,
        handler: &Arc<dyn NotificationHandler>,
    ) -> Result<Self, ConfigError> {
        let url = config.notifications_url()?;
        let mut observers = Observers::new();
        observers.add(Arc::downgrade(handler));

        let (status_tx, status_rx) = watch::channel(BusStatus::default());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let span = tracing::info_span!("notifications", %url);
        let actor = BusActor {
            connector,
            url,
            notices,
            observers,
            policy: ReconnectPolicy::from_timings(&config.timings),
            channel: None,
            events: None,
            retry: None,
            gave_up: false,
            status: status_tx,
        };
        let task = tokio::spawn(actor.run(commands_rx).instrument(span));

        Ok(Self {
            commands: commands_tx,
            status: status_rx,
            task: Some(task),
        })
    }

    #[must_use]
    pub fn status(&self) -> BusStatus {
        *self.status.borrow()
    }

    /// Subscribe to status changes.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<BusStatus> {
        self.status.clone()
    }

    #[must_use]
    pub fn connected(&self) -> bool {
        self.status().connected()
    }

    /// Register another observer.
    pub fn add_observer(&self, handler: &Arc<dyn NotificationHandler>) {
        let _ = self
            .commands
            .send(Command::AddObserver(Arc::downgrade(handler)));
    }

    pub fn remove_observer(&self, handler: &Arc<dyn NotificationHandler>) {
        let _ = self
            .commands
            .send(Command::RemoveObserver(Arc::downgrade(handler)));
    }

    /// Close the subscription and wait until it is gone.
    pub async fn close(mut self) {
        let _ = self.commands.send(Command::Close);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!("Notification task failed: {e}");
            }
        }
    }
}

impl Drop for NotificationBus {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Close);
    }
}

struct BusActor {
    connector: Arc<dyn Connector>,
    url: Url,
    notices: Arc<dyn NoticeSink>,
    observers: Observers,
    policy: ReconnectPolicy,
    channel: Option<DuplexChannel>,
    events: Option<mpsc::UnboundedReceiver<ChannelEvent>>,
    retry: Option<Pin<Box<Sleep>>>,
    gave_up: bool,
    status: watch::Sender<BusStatus>,
}

impl BusActor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        self.connect();
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::AddObserver(handler)) => self.observers.add(handler),
                    Some(Command::RemoveObserver(handler)) => self.observers.remove(&handler),
                    Some(Command::Close) | None => break,
                },
                event = next_event(&mut self.events) => match event {
                    Some(event) => self.on_event(event),
                    None => self.events = None,
                },
                () = retry_elapsed(&mut self.retry) => self.connect(),
            }
        }
        self.teardown();
    }

    fn connect(&mut self) {
        self.retry = None;
        tracing::debug!(attempt = self.policy.attempt(), "Connecting");
        let (channel, events) = DuplexChannel::open(Arc::clone(&self.connector), self.url.clone());
        self.channel = Some(channel);
        self.events = Some(events);
        self.publish(ConnectionState::Connecting);
    }

    fn on_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Opened => {
                self.policy.on_connected();
                self.gave_up = false;
                tracing::info!("Notifications connected");
                self.publish(ConnectionState::Connected);
            }
            ChannelEvent::Message(payload) => self.on_message(&payload),
            ChannelEvent::TransportError(error) => {
                tracing::warn!("Notification transport error: {error}");
            }
            ChannelEvent::Closed { code, reason } => self.on_closed(code, &reason),
        }
    }

    fn on_message(&mut self, payload: &Payload) {
        let Ok(text) = std::str::from_utf8(payload.as_bytes()) else {
            tracing::debug!("Ignoring non-UTF-8 notification");
            return;
        };
        match Notification::parse(text) {
            Ok(notification) => {
                tracing::debug!(
                    action = ?notification.action,
                    container_id = ?notification.container_id(),
                    cmd = ?notification.data.as_ref().and_then(|d| d.cmd.as_deref()),
                    "Notification received"
                );
                self.observers.dispatch(&notification, self.notices.as_ref());
            }
            Err(e) => tracing::debug!("Ignoring malformed notification: {e}"),
        }
    }

    fn on_closed(&mut self, code: u16, reason: &str) {
        self.channel = None;
        self.events = None;

        match self.policy.on_close() {
            Some(delay) => {
                tracing::info!(
                    code,
                    reason,
                    attempt = self.policy.attempt(),
                    "Notifications disconnected, retrying in {delay:?}"
                );
                self.retry = Some(Box::pin(sleep(delay)));
            }
            None => {
                tracing::warn!(code, reason, "Notifications disconnected, giving up");
                if !self.gave_up {
                    self.gave_up = true;
                    self.notices.warn(LOST_CONNECTION);
                }
            }
        }
        self.publish(ConnectionState::Disconnected);
    }

    fn teardown(mut self) {
        self.retry = None;
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        self.events = None;
        self.publish(ConnectionState::Disconnected);
        tracing::info!("Notifications closed");
    }

    fn publish(&self, state: ConnectionState) {
        let next = BusStatus {
            state,
            reconnect_attempt: self.policy.attempt(),
        };
        self.status.send_if_modified(|status| {
            if *status == next {
                false
            } else {
                *status = next;
                true
            }
        });
    }
}

async fn next_event(
    events: &mut Option<mpsc::UnboundedReceiver<ChannelEvent>>,
) -> Option<ChannelEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn retry_elapsed(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(timer) => timer.as_mut().await,
        None => std::future::pending().await,
    }
}
