//! `lifeline-memory` – Durable agent memory.
//!
//! Everything the agent must remember across process death lives here, on a
//! local SQLite substrate (or an in-memory map for tests).
//!
//! # Modules
//!
//! - [`kv`] – [`KeyValueStore`][kv::KeyValueStore]: the raw `get`/`set`/`remove`
//!   contract, with [`SqliteKv`][kv::SqliteKv] and [`MemoryKv`][kv::MemoryKv]
//!   implementations.
//! - [`state_store`] – [`StateStore`][state_store::StateStore]: the single
//!   mutual-exclusion boundary around the key-value store.  Every read and
//!   write of agent state, DMS configuration and DMS runtime goes through a
//!   [`StoreGuard`][state_store::StoreGuard].
//! - [`event_log`] – [`EventLog`][event_log::EventLog]: bounded, append-only
//!   audit log of agent, safety and command events.

pub mod event_log;
pub mod kv;
pub mod state_store;

use lifeline_types::LifelineError;
use thiserror::Error;

pub use event_log::EventLog;
pub use kv::{KeyValueStore, MemoryKv, SqliteKv};
pub use state_store::{StateStore, StoreGuard};

/// Errors raised by the memory layer.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for LifelineError {
    fn from(err: StoreError) -> Self {
        LifelineError::Storage(err.to_string())
    }
}
