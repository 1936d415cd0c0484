//! # pairsync-core
//!
//! Access control and sync coordination for owner-scoped conversation logs.
//!
//! - [`IdentityRegistry`] knows the local main identity and which device
//!   identities belong to which person.
//! - [`ChannelDirectory`] derives topic ids and owns the per-owner channel
//!   logs of each topic.
//! - [`AccessGrantManager`] persists which remote identities may read which
//!   channels and retries grants that failed to persist.
//! - [`SyncCoordinator`] grants on write, re-affirms grants when a connection
//!   opens and serves/consumes sync pulls.
//!
//! Components are constructed explicitly and shared through `Arc`; there is
//! no process-wide instance.

pub mod access;
pub mod config;
pub mod coordinator;
pub mod directory;
pub mod error;
pub mod events;
pub mod identities;

mod pull;

#[cfg(test)]
mod scenarios;

use std::sync::Arc;

use pairsync_store::Database;
use tokio::sync::Mutex;

pub use access::{AccessGrantManager, GrantOutcome, GrantSweep, MissingGrant, PendingGrant, RetryReport};
pub use config::SyncConfig;
pub use coordinator::{PostReceipt, ReaffirmReport, SyncCoordinator};
pub use directory::ChannelDirectory;
pub use error::{Result, SyncError};
pub use events::{GrantEvent, TopicUpdate};
pub use identities::IdentityRegistry;

/// The store handle every component shares. Each operation holds the lock
/// only for its own synchronous SQLite work.
pub type SharedDatabase = Arc<Mutex<Database>>;

/// Wrap an open database for sharing between components.
pub fn share(db: Database) -> SharedDatabase {
    Arc::new(Mutex::new(db))
}
