//! roomline-core library.
//!
//! A local cache for chat room timelines: chunks of events filled by
//! forward and backward pagination, a read-receipt ledger, reaction
//! aggregates and the read-only projections built on them.

pub mod config;
pub mod db;
pub mod error;
pub mod event;
pub mod lock;
pub mod timeline;

// Conventions
//
// - Errors: store operations return `error::Result`; config loading and
//   opening a cache return `anyhow::Result`.
// - Logging: `tracing` macros (`info!`, `warn!`, `debug!`).
// - Writes: every mutation takes a `timeline::RoomTxn`.

pub use error::{ErrorCode, TimelineError};
pub use event::{Event, PaginationDirection};
pub use timeline::{InsertOutcome, TimelineStore};
