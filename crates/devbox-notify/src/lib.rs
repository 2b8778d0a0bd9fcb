//! Notification bus for the devbox dashboard.
//!
//! Provides:
//! - `NotificationBus` - Long-lived subscription that survives server restarts
//! - `NotificationHandler` - Observer callbacks (refetch, waiting, done)
//! - `ReconnectPolicy` - Fixed-delay, bounded reconnection

pub mod bus;
pub mod dispatch;
pub mod policy;

#[cfg(test)]
mod testing;

pub use bus::{BusStatus, NotificationBus};
pub use dispatch::{NotificationHandler, Observers};
pub use policy::ReconnectPolicy;
