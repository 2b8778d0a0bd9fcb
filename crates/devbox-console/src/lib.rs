//! Interactive console sessions over a duplex channel.
//!
//! Provides:
//! - `ConsoleSession` - Handshake, input/output relay and resize negotiation
//!   for one terminal view
//! - `ConsoleFailure` - Classification of how a session ended

pub mod classify;
pub mod resize;
pub mod session;

#[cfg(test)]
mod testing;

pub use classify::ConsoleFailure;
pub use session::{ConsoleError, ConsoleEvent, ConsoleSession, ConsoleTarget};
