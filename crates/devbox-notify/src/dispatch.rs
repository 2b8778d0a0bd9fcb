//! Fan-out of notifications to observers and the notice sink.

use std::sync::{Arc, Weak};

use devbox_core::NoticeSink;
use devbox_transport::{Notification, NotificationAction};

/// Observer of container job notifications.
///
/// Registered with the bus by reference; the bus holds it weakly, so an
/// observer disappears once its owner drops it.
pub trait NotificationHandler: Send + Sync {
    /// The container list is stale and should be fetched again.
    fn on_refetch(&self);

    /// A job for `container_id` is running.
    fn on_waiting(&self, container_id: &str) {
        let _ = container_id;
    }

    /// A job finished; clear any waiting state.
    fn on_done(&self) {}
}

/// Weakly held observer set.
#[derive(Default)]
pub struct Observers {
    handlers: Vec<Weak<dyn NotificationHandler>>,
}

impl Observers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. Registering the same observer twice is a no-op.
    pub fn add(&mut self, handler: Weak<dyn NotificationHandler>) {
        if !self.handlers.iter().any(|h| Weak::ptr_eq(h, &handler)) {
            self.handlers.push(handler);
        }
    }

    pub fn remove(&mut self, handler: &Weak<dyn NotificationHandler>) {
        self.handlers.retain(|h| !Weak::ptr_eq(h, handler));
    }

    /// Number of observers still alive.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.iter().filter(|h| h.strong_count() > 0).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live observers, pruning the ones that were dropped.
    fn live(&mut self) -> Vec<Arc<dyn NotificationHandler>> {
        self.handlers.retain(|h| h.strong_count() > 0);
        self.handlers.iter().filter_map(Weak::upgrade).collect()
    }

    /// Route one notification.
    ///
    /// `WAITING` shows its details as an info notice and reports the
    /// container. Completion actions show a success notice, then every
    /// observer gets `on_done` followed by `on_refetch`. Anything else is
    /// ignored. Empty details and empty container ids count as absent.
    pub fn dispatch(&mut self, notification: &Notification, notices: &dyn NoticeSink) {
        let details = notification.details.as_deref().filter(|d| !d.is_empty());
        match notification.action {
            NotificationAction::Waiting => {
                if let Some(details) = details {
                    notices.info(details);
                }
                let container_id = notification.container_id().filter(|id| !id.is_empty());
                if let Some(container_id) = container_id {
                    for handler in self.live() {
                        handler.on_waiting(container_id);
                    }
                }
            }
            action if action.is_completion() => {
                if let Some(details) = details {
                    notices.success(details);
                }
                for handler in self.live() {
                    handler.on_done();
                    handler.on_refetch();
                }
            }
            _ => tracing::trace!(action = ?notification.action, "Ignored notification"),
        }
    }
}
