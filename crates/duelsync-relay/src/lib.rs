//! # duelsync-relay
//!
//! The publish/subscribe backend duelsync peers talk to over WebSocket.
//!
//! The relay knows channels and presence, nothing else. It never decodes
//! game traffic: `Publish` payloads are forwarded to the other subscribers
//! as opaque bytes. Ordering, acknowledgement and recovery all live in the
//! peers.

mod config;
mod error;
mod handler;
mod registry;
mod server;

pub use config::{BIND_ADDR_ENV, RelayConfig};
pub use error::RelayError;
pub use server::{RelayServer, RelayServerBuilder};
