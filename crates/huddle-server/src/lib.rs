//! # huddle-server
//!
//! In-process chat relay over WebSockets.
//!
//! - [`registry::Registry`]: identity → connection map; serialized register,
//!   unregister, broadcast and snapshot
//! - [`session::Session`]: per-connection lifecycle from handshake to close
//! - [`events::OutboundEvent`]: `roster_update` / `chat_message` wire events
//! - [`server::HuddleServer`]: Axum router (`/`, `/ws`, `/clock`, `/health`, `/metrics`)
//! - Graceful shutdown via `CancellationToken` that drives every session closed

#![deny(unsafe_code)]

pub mod clock;
pub mod config;
pub mod connection;
pub mod errors;
pub mod events;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod transport;
