//! Core abstractions for the devbox real-time clients.
//!
//! This crate provides the fundamental building blocks:
//! - `ConnectionState` / `StateCell` - Per-channel lifecycle state machine
//! - `TerminalSurface`, `CredentialProvider`, `NoticeSink` - Host capabilities
//! - `ClientConfig` - Endpoint addresses and protocol timings

pub mod config;
pub mod state;
pub mod traits;

pub use config::{ClientConfig, ConfigError, Timings};
pub use state::{ConnectionState, StateCell};
pub use traits::{
    CredentialProvider, LayoutEvent, NoticeSink, StaticToken, SurfaceGeometry, TerminalSurface,
    TracingNotices,
};
