//! Write session for one room.
//!
//! A [`RoomTxn`] wraps an `IMMEDIATE` SQLite transaction scoped to a single
//! room. Every store mutation takes one explicitly. Dropping the session
//! without [`RoomTxn::commit`] rolls everything back.

use std::collections::BTreeSet;
use std::ops::Deref;

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::error::{Result, TimelineError};
use crate::event::{Event, PaginationDirection};

use super::chunk;
use super::insert;
use super::notify::ChangeKind;
use super::{ChunkId, InsertOutcome};

/// Write transaction bound to one room.
pub struct RoomTxn<'conn> {
    tx: Transaction<'conn>,
    room_id: String,
    changes: BTreeSet<ChangeKind>,
}

impl<'conn> RoomTxn<'conn> {
    /// Begin an immediate write transaction for `room_id`.
    ///
    /// Callers are responsible for holding the room's write lock; use
    /// [`super::TimelineStore::write`] unless you manage connections
    /// yourself.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot start the transaction.
    pub fn begin(conn: &'conn mut Connection, room_id: &str) -> Result<Self> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(Self {
            tx,
            room_id: room_id.to_string(),
            changes: BTreeSet::new(),
        })
    }

    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    #[must_use]
    pub fn conn(&self) -> &Connection {
        &self.tx
    }

    pub(crate) fn touch(&mut self, kind: ChangeKind) {
        self.changes.insert(kind);
    }

    /// Commit the transaction and return the kinds of change it made.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails; nothing is applied in that case.
    pub fn commit(self) -> Result<Vec<ChangeKind>> {
        let changes = self.changes.into_iter().collect();
        self.tx.commit()?;
        Ok(changes)
    }

    /// Insert one event with room-wide deduplication.
    ///
    /// The event is a duplicate if its id is already linked in any chunk of
    /// the room; otherwise it goes through the chunk insertion algorithm.
    ///
    /// # Errors
    ///
    /// Returns [`TimelineError::IntegrityViolation`] if the id is linked in
    /// more than one chunk or the chunk belongs to another room.
    pub fn insert_event(
        &mut self,
        chunk_id: ChunkId,
        event: &Event,
        direction: PaginationDirection,
        state_index_offset: i64,
        is_unlinked: bool,
    ) -> Result<InsertOutcome> {
        let Some(event_id) = event.id() else {
            tracing::warn!(
                room_id = %self.room_id,
                event_type = %event.event_type,
                "dropping event without id"
            );
            return Ok(InsertOutcome::MissingEventId);
        };

        let owners = chunk::chunks_linking(self.conn(), &self.room_id, event_id)?;
        match owners.as_slice() {
            [] => {}
            [owner] => {
                tracing::debug!(
                    room_id = %self.room_id,
                    event_id,
                    chunk_id = %owner,
                    "event already linked in room; skipping"
                );
                return Ok(InsertOutcome::Duplicate);
            }
            many => {
                return Err(TimelineError::integrity(
                    &self.room_id,
                    format!("event {event_id} linked in {} chunks", many.len()),
                ));
            }
        }

        insert::add_event(self, chunk_id, event, direction, state_index_offset, is_unlinked)
    }

    /// Insert one out-of-band state event into `chunk_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk is missing or belongs to another room.
    pub fn insert_state_event(&mut self, chunk_id: ChunkId, event: &Event) -> Result<InsertOutcome> {
        insert::add_state_event(self, chunk_id, event)
    }
}

impl Deref for RoomTxn<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.tx
    }
}

/// Map SQLite constraint failures raised inside a room write to
/// [`TimelineError::IntegrityViolation`].
pub(crate) fn constraint_to_integrity<'a>(
    room_id: &'a str,
    what: &'static str,
) -> impl FnOnce(rusqlite::Error) -> TimelineError + 'a {
    move |err| {
        let err = TimelineError::from(err);
        if err.is_constraint_violation() {
            TimelineError::integrity(room_id, format!("{what}: {err}"))
        } else {
            err
        }
    }
}
