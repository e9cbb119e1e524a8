//! # pairlink-core
//!
//! Core of Pairlink, a per-user session manager for linked messaging
//! accounts.
//!
//! This crate is framework-agnostic and can be used by:
//! - the HTTP server (`pairlink-http`)
//! - the daemon binary (`pairlink-daemon`)
//! - tests and embedders, through the in-memory stores
//!
//! ## Key Concepts
//!
//! - **Session**: persisted record of one user's connection lifecycle
//! - **Registry**: in-memory map of live connections, the only authority on
//!   whether a connection is usable right now
//! - **Supervisor**: drives each user's Disconnected/Connecting/Connected
//!   state machine and the reconnection policy
//! - **Dispatcher**: routes inbound messages to feature handlers

pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod event_bus;
pub mod features;
pub mod jobs;
pub mod logging;
pub mod paths;
pub mod persistence;
pub mod protocol;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::SupervisorConfig;
pub use dispatch::{ConnectionLookup, InboundDispatcher};
pub use event_bus::{BroadcastEvent, EventBus};
pub use session::{
    AuthMethod, ConnectionSupervisor, SessionError, SessionId, SessionRecord, SessionStatus,
    UserId,
};
