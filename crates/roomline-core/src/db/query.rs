//! Read-only projections over the timeline cache.
//!
//! These are the lookups the presentation layer builds on: a single event
//! by id, a chunk's events in display order, a room overview and the room
//! state in effect at an event. All functions take a shared `&Connection`
//! (a [`crate::timeline::TimelineStore::read`] snapshot derefs to one) and
//! return typed structs, never raw rows.

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, TimelineError};
use crate::event::{Event, SendState};
use crate::timeline::ChunkId;
use crate::timeline::annotations::{AnnotationSummary, annotation_summary};
use crate::timeline::receipts::{ReadReceipt, receipts_for_event};
use crate::timeline::sender::SenderSnapshot;

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// A linked event with everything projected onto it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEvent {
    pub room_id: String,
    pub chunk_id: ChunkId,
    pub event: Event,
    pub display_index: i64,
    pub state_index: i64,
    pub is_unlinked: bool,
    pub send_state: SendState,
    pub sender: SenderSnapshot,
    pub receipts: Vec<ReadReceipt>,
    pub annotations: Option<AnnotationSummary>,
}

/// A state event resolved for a point in the timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateEntry {
    pub chunk_id: ChunkId,
    pub event: Event,
    pub state_index: i64,
    /// `None` when the entry is out-of-band state.
    pub display_index: Option<i64>,
    pub is_unlinked: bool,
}

/// Overview of one room's cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomSummary {
    pub room_id: String,
    pub chunk_count: usize,
    pub event_count: usize,
    pub state_event_count: usize,
    pub receipt_count: usize,
    pub live_chunk: Option<ChunkId>,
    /// Highest display index of the live chunk.
    pub latest_event: Option<TimelineEvent>,
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

const EVENT_COLUMNS: &str = "room_id, chunk_id, event_id, event_type, sender_id, state_key, \
     content_json, origin_server_ts, display_index, state_index, is_unlinked, send_state, \
     sender_name, sender_avatar, is_unique_display_name";

struct EventRow {
    room_id: String,
    chunk_id: ChunkId,
    event_id: String,
    event_type: String,
    sender_id: String,
    state_key: Option<String>,
    content_json: Option<String>,
    origin_server_ts: Option<i64>,
    display_index: i64,
    state_index: i64,
    is_unlinked: bool,
    send_state: String,
    sender: SenderSnapshot,
}

fn event_row(row: &Row<'_>) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        room_id: row.get(0)?,
        chunk_id: row.get(1)?,
        event_id: row.get(2)?,
        event_type: row.get(3)?,
        sender_id: row.get(4)?,
        state_key: row.get(5)?,
        content_json: row.get(6)?,
        origin_server_ts: row.get(7)?,
        display_index: row.get(8)?,
        state_index: row.get(9)?,
        is_unlinked: row.get(10)?,
        send_state: row.get(11)?,
        sender: SenderSnapshot {
            display_name: row.get(12)?,
            avatar_url: row.get(13)?,
            is_unique_display_name: row.get(14)?,
        },
    })
}

fn parse_content(raw: Option<&str>) -> Result<Option<Value>> {
    Ok(raw.map(serde_json::from_str).transpose()?)
}

fn build_event(
    event_id: String,
    event_type: String,
    sender_id: String,
    origin_server_ts: Option<i64>,
    state_key: Option<String>,
    content_json: Option<&str>,
) -> Result<Event> {
    Ok(Event {
        event_id: Some(event_id),
        event_type,
        sender_id,
        origin_server_ts,
        state_key,
        content: parse_content(content_json)?,
    })
}

fn project(conn: &Connection, row: EventRow) -> Result<TimelineEvent> {
    let send_state = SendState::parse(&row.send_state).ok_or_else(|| {
        TimelineError::integrity(
            &row.room_id,
            format!("event {} has unknown send state {}", row.event_id, row.send_state),
        )
    })?;
    let receipts = receipts_for_event(conn, &row.room_id, &row.event_id)?;
    let annotations = annotation_summary(conn, &row.room_id, &row.event_id)?;
    let event = build_event(
        row.event_id,
        row.event_type,
        row.sender_id,
        row.origin_server_ts,
        row.state_key,
        row.content_json.as_deref(),
    )?;

    Ok(TimelineEvent {
        room_id: row.room_id,
        chunk_id: row.chunk_id,
        event,
        display_index: row.display_index,
        state_index: row.state_index,
        is_unlinked: row.is_unlinked,
        send_state,
        sender: row.sender,
        receipts,
        annotations,
    })
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Look up one linked event by id.
///
/// # Errors
///
/// Returns an error if a query fails or stored content is malformed.
pub fn timeline_event(conn: &Connection, room_id: &str, event_id: &str) -> Result<Option<TimelineEvent>> {
    let sql = format!("SELECT {EVENT_COLUMNS} FROM timeline_events WHERE room_id = ?1 AND event_id = ?2");
    let row = conn
        .query_row(&sql, params![room_id, event_id], event_row)
        .optional()?;
    row.map(|row| project(conn, row)).transpose()
}

/// Linked events of a chunk in display order.
///
/// # Errors
///
/// Returns an error if a query fails or stored content is malformed.
pub fn chunk_events(conn: &Connection, chunk_id: ChunkId) -> Result<Vec<TimelineEvent>> {
    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM timeline_events WHERE chunk_id = ?1 ORDER BY display_index ASC"
    );
    let rows = {
        let mut stmt = conn.prepare(&sql)?;
        let mapped = stmt.query_map(params![chunk_id], event_row)?;
        mapped.collect::<rusqlite::Result<Vec<_>>>()?
    };
    rows.into_iter().map(|row| project(conn, row)).collect()
}

/// Out-of-band state events of a chunk, oldest stored first.
///
/// # Errors
///
/// Returns an error if the query fails or stored content is malformed.
pub fn chunk_state_events(conn: &Connection, chunk_id: ChunkId) -> Result<Vec<StateEntry>> {
    let rows: Vec<(String, String, String, Option<i64>, Option<String>, Option<String>, i64)> = {
        let mut stmt = conn.prepare(
            "SELECT event_id, event_type, sender_id, origin_server_ts, state_key, content_json,
                    state_index
             FROM chunk_state_events WHERE chunk_id = ?1 ORDER BY rowid ASC",
        )?;
        let mapped = stmt.query_map(params![chunk_id], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
            ))
        })?;
        mapped.collect::<rusqlite::Result<Vec<_>>>()?
    };

    rows.into_iter()
        .map(|(event_id, event_type, sender_id, ts, state_key, content, state_index)| {
            Ok(StateEntry {
                chunk_id,
                event: build_event(event_id, event_type, sender_id, ts, state_key, content.as_deref())?,
                state_index,
                display_index: None,
                is_unlinked: true,
            })
        })
        .collect()
}

/// Overview of a room: counts, live chunk and its latest event.
///
/// # Errors
///
/// Returns an error if a query fails.
pub fn room_summary(conn: &Connection, room_id: &str) -> Result<RoomSummary> {
    let (chunk_count, event_count, state_event_count, receipt_count): (usize, usize, usize, usize) =
        conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM chunks WHERE room_id = ?1),
                (SELECT COUNT(*) FROM timeline_events WHERE room_id = ?1),
                (SELECT COUNT(*) FROM chunk_state_events WHERE room_id = ?1),
                (SELECT COUNT(*) FROM read_receipts WHERE room_id = ?1)",
            params![room_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

    let live_chunk: Option<ChunkId> = conn
        .query_row(
            "SELECT chunk_id FROM chunks WHERE room_id = ?1 AND is_last_forward = 1
             ORDER BY chunk_id DESC LIMIT 1",
            params![room_id],
            |row| row.get(0),
        )
        .optional()?;

    let latest_event = match live_chunk {
        Some(chunk_id) => {
            let sql = format!(
                "SELECT {EVENT_COLUMNS} FROM timeline_events WHERE chunk_id = ?1
                 ORDER BY display_index DESC LIMIT 1"
            );
            let row = conn.query_row(&sql, params![chunk_id], event_row).optional()?;
            row.map(|row| project(conn, row)).transpose()?
        }
        None => None,
    };

    Ok(RoomSummary {
        room_id: room_id.to_string(),
        chunk_count,
        event_count,
        state_event_count,
        receipt_count,
        live_chunk,
        latest_event,
    })
}

/// The `(event_type, state_key)` state in effect just before `event_id`.
///
/// Looks at linked state events of the same chunk that precede the event
/// in display order and do not exceed its state index, newest first; falls
/// back to the chunk's out-of-band state. `None` if the event is unknown
/// or no such state is cached.
///
/// # Errors
///
/// Returns an error if a query fails or stored content is malformed.
pub fn state_at_event(
    conn: &Connection,
    room_id: &str,
    event_id: &str,
    event_type: &str,
    state_key: &str,
) -> Result<Option<StateEntry>> {
    let anchor: Option<(ChunkId, i64, i64)> = conn
        .query_row(
            "SELECT chunk_id, display_index, state_index FROM timeline_events
             WHERE room_id = ?1 AND event_id = ?2",
            params![room_id, event_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    let Some((chunk_id, display_index, state_index)) = anchor else {
        return Ok(None);
    };

    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM timeline_events
         WHERE chunk_id = ?1 AND event_type = ?2 AND state_key = ?3
           AND state_index <= ?4 AND display_index < ?5
         ORDER BY display_index DESC
         LIMIT 1"
    );
    let linked = conn
        .query_row(
            &sql,
            params![chunk_id, event_type, state_key, state_index, display_index],
            event_row,
        )
        .optional()?;
    if let Some(row) = linked {
        return Ok(Some(StateEntry {
            chunk_id,
            display_index: Some(row.display_index),
            state_index: row.state_index,
            is_unlinked: row.is_unlinked,
            event: build_event(
                row.event_id,
                row.event_type,
                row.sender_id,
                row.origin_server_ts,
                row.state_key,
                row.content_json.as_deref(),
            )?,
        }));
    }

    let out_of_band = chunk_state_events(conn, chunk_id)?
        .into_iter()
        .rev()
        .find(|entry| {
            entry.event.event_type == event_type && entry.event.state_key.as_deref() == Some(state_key)
        });
    Ok(out_of_band)
}
