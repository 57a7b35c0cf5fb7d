//! Chunked timeline store.
//!
//! A room's history is split into [`chunk::Chunk`]s, each a contiguous run
//! of events between two pagination tokens. Events enter a chunk through
//! [`insert::add_event`] (linked, display-ordered) or
//! [`insert::add_state_event`] (out-of-band state). All writes go through a
//! [`txn::RoomTxn`] obtained from [`store::TimelineStore::write`].

pub mod annotations;
pub mod chunk;
pub mod cursor;
pub mod insert;
pub mod notify;
pub mod receipts;
pub mod sender;
pub mod store;
pub mod txn;

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use chunk::{Chunk, NewChunk};
pub use cursor::{ChunkCursor, IndexOverflow, Position};
pub use notify::{ChangeKind, RoomChange};
pub use store::{ChunkTarget, IngestReport, PaginationBatch, TimelineStore};
pub use txn::RoomTxn;

/// State index given to out-of-band state events so they sort before every
/// linked event during state resolution.
pub const UNLINKED_STATE_INDEX: i64 = i64::MIN;

/// Row id of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(pub i64);

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChunkId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl ToSql for ChunkId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0))
    }
}

impl FromSql for ChunkId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        i64::column_result(value).map(Self)
    }
}

/// Where an inserted event landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EventPosition {
    pub chunk_id: ChunkId,
    /// `None` for out-of-band state events, which are not displayed.
    pub display_index: Option<i64>,
    pub state_index: i64,
    pub is_unlinked: bool,
    /// Whether the sender's read receipt moved onto this event.
    pub receipt_promoted: bool,
}

/// Result of offering one event to the store.
///
/// Neither `Duplicate` nor `MissingEventId` is a failure. Redelivered
/// events and id-less local echoes are absorbed without a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InsertOutcome {
    Inserted(EventPosition),
    Duplicate,
    MissingEventId,
}

impl InsertOutcome {
    #[must_use]
    pub const fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }

    #[must_use]
    pub const fn position(&self) -> Option<EventPosition> {
        match self {
            Self::Inserted(position) => Some(*position),
            Self::Duplicate | Self::MissingEventId => None,
        }
    }
}

pub(crate) fn now_us() -> i64 {
    chrono::Utc::now().timestamp_micros()
}


#[cfg(test)]
mod tests {
    use super::{ChunkId, EventPosition, InsertOutcome};

    #[test]
    fn chunk_id_parses_and_displays() {
        let id: ChunkId = " 42 ".parse().expect("parse");
        assert_eq!(id, ChunkId(42));
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn outcome_exposes_position_only_when_inserted() {
        let position = EventPosition {
            chunk_id: ChunkId(1),
            display_index: Some(1),
            state_index: 0,
            is_unlinked: false,
            receipt_promoted: false,
        };
        assert_eq!(InsertOutcome::Inserted(position).position(), Some(position));
        assert!(InsertOutcome::Duplicate.position().is_none());
        assert!(!InsertOutcome::MissingEventId.is_inserted());
    }
}
