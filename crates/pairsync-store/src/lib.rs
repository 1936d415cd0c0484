//! # pairsync-store
//!
//! Local SQLite storage for identities, topics, owner-scoped channel logs,
//! their messages and the access grants that let remote identities read them.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for every domain model.
//! Channel logs are append-only and grants are never deleted, so there are no
//! delete helpers for either.

pub mod channels;
pub mod database;
pub mod grants;
pub mod identities;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod topics;

mod columns;
mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
