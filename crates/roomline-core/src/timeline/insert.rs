//! Chunk insertion algorithm.
//!
//! Linked events get a display index and a state index from the chunk's
//! [`ChunkCursor`](super::cursor::ChunkCursor), promote their sender's read
//! receipt, snapshot the sender profile and get a receipt summary.
//! Out-of-band state events skip all of that and are stored unlinked with
//! [`UNLINKED_STATE_INDEX`].
//!
//! Both entry points run inside the caller's [`RoomTxn`]; room-wide
//! deduplication happens in [`RoomTxn::insert_event`] before these run.

use rusqlite::params;
use tracing::{debug, warn};

use crate::error::{Result, TimelineError};
use crate::event::{Event, PaginationDirection, SendState};

use super::chunk::{
    chunk_contains, chunk_has_state_event, first_event_is_state, load_chunk, save_cursor,
};
use super::notify::ChangeKind;
use super::txn::{RoomTxn, constraint_to_integrity};
use super::{EventPosition, InsertOutcome, UNLINKED_STATE_INDEX, annotations, now_us, receipts, sender};

/// Link `event` into `chunk_id` in `direction`.
pub(crate) fn add_event(
    txn: &mut RoomTxn<'_>,
    chunk_id: super::ChunkId,
    event: &Event,
    direction: PaginationDirection,
    state_index_offset: i64,
    is_unlinked: bool,
) -> Result<InsertOutcome> {
    let room_id = txn.room_id().to_string();
    let Some(event_id) = event.id() else {
        warn!(room_id = %room_id, chunk_id = %chunk_id, "dropping event without id");
        return Ok(InsertOutcome::MissingEventId);
    };

    let chunk = load_chunk(txn.conn(), &room_id, chunk_id)?;
    if chunk_contains(txn.conn(), chunk_id, event_id)? {
        debug!(room_id = %room_id, event_id, chunk_id = %chunk_id, "duplicate in chunk");
        return Ok(InsertOutcome::Duplicate);
    }

    let is_state = event.is_state_event();
    let first_is_state = match direction {
        PaginationDirection::Forwards => None,
        PaginationDirection::Backwards => first_event_is_state(txn.conn(), chunk_id)?,
    };
    let mut cursor = chunk.cursor;
    let position = cursor
        .advance(direction, is_state, first_is_state, state_index_offset)
        .map_err(|err| {
            TimelineError::integrity(&room_id, format!("index {event_id} in chunk {chunk_id}: {err}"))
        })?;
    save_cursor(txn.conn(), chunk_id, &cursor)?;

    let receipt_promoted = match event.origin_server_ts {
        Some(ts) => receipts::promote(txn, &event.sender_id, event_id, ts)?,
        None => false,
    };

    let snapshot = sender::resolve(txn.conn(), chunk_id, event, position.display_index)?;
    let content_json = event.content_json()?;

    txn.conn()
        .prepare_cached(
            "INSERT INTO timeline_events (
                room_id, event_id, chunk_id, event_type, sender_id, state_key, content_json,
                origin_server_ts, display_index, state_index, is_state, is_unlinked, send_state,
                sender_name, sender_avatar, is_unique_display_name, inserted_at_us
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        )?
        .execute(params![
            room_id,
            event_id,
            chunk_id,
            event.event_type,
            event.sender_id,
            event.state_key,
            content_json,
            event.origin_server_ts,
            position.display_index,
            position.state_index,
            is_state,
            is_unlinked,
            SendState::Synced.as_str(),
            snapshot.display_name,
            snapshot.avatar_url,
            snapshot.is_unique_display_name,
            now_us(),
        ])
        .map_err(constraint_to_integrity(&room_id, "link event"))?;

    receipts::ensure_summary(txn.conn(), &room_id, event_id)?;
    annotations::aggregate_event(txn, event)?;
    txn.touch(ChangeKind::Timeline);

    debug!(
        room_id = %room_id,
        event_id,
        chunk_id = %chunk_id,
        direction = %direction,
        display_index = position.display_index,
        state_index = position.state_index,
        receipt_promoted,
        "event linked"
    );

    Ok(InsertOutcome::Inserted(EventPosition {
        chunk_id,
        display_index: Some(position.display_index),
        state_index: position.state_index,
        is_unlinked,
        receipt_promoted,
    }))
}

/// Store `event` as out-of-band state of `chunk_id`.
pub(crate) fn add_state_event(
    txn: &mut RoomTxn<'_>,
    chunk_id: super::ChunkId,
    event: &Event,
) -> Result<InsertOutcome> {
    let room_id = txn.room_id().to_string();
    let Some(event_id) = event.id() else {
        warn!(room_id = %room_id, chunk_id = %chunk_id, "dropping state event without id");
        return Ok(InsertOutcome::MissingEventId);
    };

    load_chunk(txn.conn(), &room_id, chunk_id)?;
    if chunk_has_state_event(txn.conn(), chunk_id, event_id)? {
        debug!(room_id = %room_id, event_id, chunk_id = %chunk_id, "duplicate state event");
        return Ok(InsertOutcome::Duplicate);
    }

    let content_json = event.content_json()?;
    txn.conn()
        .prepare_cached(
            "INSERT INTO chunk_state_events (
                chunk_id, room_id, event_id, event_type, sender_id, state_key, content_json,
                origin_server_ts, state_index, is_unlinked, send_state, inserted_at_us
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10, ?11)",
        )?
        .execute(params![
            chunk_id,
            room_id,
            event_id,
            event.event_type,
            event.sender_id,
            event.state_key,
            content_json,
            event.origin_server_ts,
            UNLINKED_STATE_INDEX,
            SendState::Synced.as_str(),
            now_us(),
        ])
        .map_err(constraint_to_integrity(&room_id, "store state event"))?;
    txn.touch(ChangeKind::Timeline);

    debug!(room_id = %room_id, event_id, chunk_id = %chunk_id, "state event stored unlinked");

    Ok(InsertOutcome::Inserted(EventPosition {
        chunk_id,
        display_index: None,
        state_index: UNLINKED_STATE_INDEX,
        is_unlinked: true,
        receipt_promoted: false,
    }))
}
