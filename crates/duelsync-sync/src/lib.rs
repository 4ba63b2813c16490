//! Command synchronization for duelsync.
//!
//! Two peers each hold a full copy of the match. This crate keeps those
//! copies identical over a channel that loses, duplicates, and reorders
//! messages:
//!
//! - [`CommandSender`] numbers local commands and keeps them until the
//!   other peer acknowledges them.
//! - [`InboundQueue`] releases remote commands strictly in issuer order.
//! - [`AuthorityExecutor`] is the one place a command becomes a new state.
//! - [`SnapshotManager`] takes and applies full-state checkpoints.
//! - [`SyncManager`] wires all of the above to a
//!   [`ReconnectionManager`](duelsync_session::ReconnectionManager).
//!
//! Game rules plug in through the [`RulesEngine`] trait.
//!
//! Everything here is sans-IO: the manager takes bytes and instants in and
//! hands frames and events out. The `duelsync` crate's `Peer` actor does
//! the actual publishing and sleeping.

mod config;
mod error;
mod events;
mod executor;
mod manager;
mod reorder;
mod rules;
mod sender;
mod snapshot;
#[cfg(test)]
mod testing;

pub use config::{AuthorityMode, SyncConfig};
pub use error::{SnapshotError, SyncError};
pub use events::{Receipt, SyncEvent, Ticket};
pub use executor::{ApplyOutcome, AuthorityExecutor, ExecutorPhase, Origin, RejectReason, Verdict};
pub use manager::{LinkDirective, OutboundFrame, SyncManager};
pub use reorder::{InboundQueue, Offer};
pub use rules::RulesEngine;
pub use sender::{CommandSender, Draft, Transmission};
pub use snapshot::SnapshotManager;
