//! Connection lifecycle for duelsync.
//!
//! This crate answers "is the link to the other peer usable, and if not,
//! what should happen next?":
//!
//! 1. **Session**: [`ConnectionSession`]: which room, who is local, who is
//!    remote, how far the last successful sync got.
//! 2. **Backoff**: [`RetryPolicy`]: bounded exponential delays, shared by
//!    every retry loop in the workspace.
//! 3. **Reconnection**: [`ReconnectionManager`]: the
//!    `Connected → Disconnected → Reconnecting → Resyncing → Connected`
//!    state machine, with terminal `Abandoned`.
//!
//! Nothing here sleeps or touches the network. Callers pass `now` in and
//! get [`ReconnectAction`]s out, so the same code is driven by tokio timers
//! in production and by a hand-advanced clock in tests.
//!
//! ```text
//! Sync Layer (above)  ← drives the state machine, performs the actions
//!     ↕
//! Session Layer (this crate)  ← decides when to retry and when to give up
//!     ↕
//! Protocol Layer (below)  ← provides PlayerId
//! ```

mod error;
mod policy;
mod reconnect;
mod session;

pub use error::SessionError;
pub use policy::RetryPolicy;
pub use reconnect::{LinkState, ReconnectAction, ReconnectConfig, ReconnectionManager, ResyncReason};
pub use session::{ChannelStatus, ConnectionSession};
