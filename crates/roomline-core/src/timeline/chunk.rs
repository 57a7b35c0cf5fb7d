//! Chunk lifecycle: creation, lookup, token bookkeeping, merge, cascade
//! delete and pruning.
//!
//! A chunk exclusively owns its linked events (`timeline_events`) and its
//! out-of-band state (`chunk_state_events`). Read-receipt summaries are
//! keyed by event id, so deleting a chunk removes the summaries of every id
//! that lived only in that chunk in the same transaction.

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, TimelineError};
use crate::event::PaginationDirection;

use super::cursor::{ChunkCursor, DirectionSlot};
use super::notify::ChangeKind;
use super::txn::{RoomTxn, constraint_to_integrity};
use super::{ChunkId, now_us};

/// A stored chunk and its counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub chunk_id: ChunkId,
    pub room_id: String,
    pub prev_token: Option<String>,
    pub next_token: Option<String>,
    pub is_last_forward: bool,
    pub is_last_backward: bool,
    pub cursor: ChunkCursor,
    pub created_at_us: i64,
}

/// Parameters for a fresh chunk opened by a pagination response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewChunk {
    #[serde(default)]
    pub prev_token: Option<String>,
    #[serde(default)]
    pub next_token: Option<String>,
    #[serde(default)]
    pub is_last_forward: bool,
    #[serde(default)]
    pub is_last_backward: bool,
}

/// Rows removed by a cascade delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    pub chunk_id: Option<ChunkId>,
    pub timeline_events: usize,
    pub state_events: usize,
    pub receipt_summaries: usize,
}

/// What a merge moved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub target: Option<ChunkId>,
    pub moved_events: usize,
    pub moved_state_events: usize,
    pub dropped_state_events: usize,
}

const CHUNK_COLUMNS: &str = "chunk_id, room_id, prev_token, next_token, is_last_forward, \
     is_last_backward, forwards_display_index, backwards_display_index, \
     forwards_state_index, backwards_state_index, created_at_us";

fn chunk_from_row(row: &Row<'_>) -> rusqlite::Result<Chunk> {
    Ok(Chunk {
        chunk_id: row.get(0)?,
        room_id: row.get(1)?,
        prev_token: row.get(2)?,
        next_token: row.get(3)?,
        is_last_forward: row.get(4)?,
        is_last_backward: row.get(5)?,
        cursor: ChunkCursor {
            forwards: DirectionSlot {
                display_index: row.get(6)?,
                state_index: row.get(8)?,
            },
            backwards: DirectionSlot {
                display_index: row.get(7)?,
                state_index: row.get(9)?,
            },
        },
        created_at_us: row.get(10)?,
    })
}

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

/// Load a chunk by id, regardless of room.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn find_chunk(conn: &Connection, chunk_id: ChunkId) -> Result<Option<Chunk>> {
    let sql = format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE chunk_id = ?1");
    Ok(conn
        .query_row(&sql, params![chunk_id], chunk_from_row)
        .optional()?)
}

/// Load a chunk and check that it belongs to `room_id`.
///
/// # Errors
///
/// [`TimelineError::ChunkNotFound`] if absent,
/// [`TimelineError::IntegrityViolation`] if it belongs to another room.
pub fn load_chunk(conn: &Connection, room_id: &str, chunk_id: ChunkId) -> Result<Chunk> {
    let chunk = find_chunk(conn, chunk_id)?.ok_or(TimelineError::ChunkNotFound(chunk_id))?;
    if chunk.room_id != room_id {
        return Err(TimelineError::integrity(
            room_id,
            format!("chunk {chunk_id} belongs to room {}", chunk.room_id),
        ));
    }
    Ok(chunk)
}

/// All chunks of a room in creation order.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn list_chunks(conn: &Connection, room_id: &str) -> Result<Vec<Chunk>> {
    let sql = format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE room_id = ?1 ORDER BY chunk_id ASC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![room_id], chunk_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// The live chunk (flagged last-forward) of a room, if any.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn live_chunk(conn: &Connection, room_id: &str) -> Result<Option<Chunk>> {
    let sql = format!(
        "SELECT {CHUNK_COLUMNS} FROM chunks WHERE room_id = ?1 AND is_last_forward = 1 \
         ORDER BY chunk_id DESC LIMIT 1"
    );
    Ok(conn
        .query_row(&sql, params![room_id], chunk_from_row)
        .optional()?)
}

/// Find the chunk bounded by the given pagination tokens.
///
/// A chunk matches if its `prev_token` equals `prev_token` or its
/// `next_token` equals `next_token`; absent arguments never match.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn find_chunk_by_token(
    conn: &Connection,
    room_id: &str,
    prev_token: Option<&str>,
    next_token: Option<&str>,
) -> Result<Option<Chunk>> {
    if prev_token.is_none() && next_token.is_none() {
        return Ok(None);
    }
    let sql = format!(
        "SELECT {CHUNK_COLUMNS} FROM chunks
         WHERE room_id = ?1
           AND ((?2 IS NOT NULL AND prev_token = ?2) OR (?3 IS NOT NULL AND next_token = ?3))
         ORDER BY chunk_id DESC LIMIT 1"
    );
    Ok(conn
        .query_row(&sql, params![room_id, prev_token, next_token], chunk_from_row)
        .optional()?)
}

/// Chunks of `room_id` whose linked sequence contains `event_id`.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn chunks_linking(conn: &Connection, room_id: &str, event_id: &str) -> Result<Vec<ChunkId>> {
    let mut stmt = conn.prepare_cached(
        "SELECT DISTINCT chunk_id FROM timeline_events WHERE room_id = ?1 AND event_id = ?2",
    )?;
    let rows = stmt.query_map(params![room_id, event_id], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Whether `event_id` is linked in `chunk_id`.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn chunk_contains(conn: &Connection, chunk_id: ChunkId, event_id: &str) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM timeline_events WHERE chunk_id = ?1 AND event_id = ?2)",
        params![chunk_id, event_id],
        |row| row.get(0),
    )?)
}

/// Whether `event_id` is stored as out-of-band state in `chunk_id`.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn chunk_has_state_event(conn: &Connection, chunk_id: ChunkId, event_id: &str) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM chunk_state_events WHERE chunk_id = ?1 AND event_id = ?2)",
        params![chunk_id, event_id],
        |row| row.get(0),
    )?)
}

/// Whether the event currently first in the chunk (lowest display index)
/// is a state event. `None` for an empty chunk.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn first_event_is_state(conn: &Connection, chunk_id: ChunkId) -> Result<Option<bool>> {
    Ok(conn
        .query_row(
            "SELECT is_state FROM timeline_events
             WHERE chunk_id = ?1
             ORDER BY display_index ASC
             LIMIT 1",
            params![chunk_id],
            |row| row.get(0),
        )
        .optional()?)
}

// ---------------------------------------------------------------------------
// Mutation
// ---------------------------------------------------------------------------

/// Create an empty chunk with all counters unset.
///
/// A chunk created as last-forward becomes the room's only live chunk.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub fn create_chunk(txn: &mut RoomTxn<'_>, new: &NewChunk) -> Result<Chunk> {
    let room_id = txn.room_id().to_string();
    if new.is_last_forward {
        clear_live_flag(txn.conn(), &room_id)?;
    }

    txn.conn()
        .execute(
            "INSERT INTO chunks (room_id, prev_token, next_token, is_last_forward, is_last_backward, created_at_us)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                room_id,
                new.prev_token,
                new.next_token,
                new.is_last_forward,
                new.is_last_backward,
                now_us(),
            ],
        )
        .map_err(constraint_to_integrity(&room_id, "create chunk"))?;
    let chunk_id = ChunkId(txn.conn().last_insert_rowid());
    txn.touch(ChangeKind::Chunks);

    info!(
        room_id = %room_id,
        chunk_id = %chunk_id,
        live = new.is_last_forward,
        "created chunk"
    );
    load_chunk(txn.conn(), &room_id, chunk_id)
}

fn clear_live_flag(conn: &Connection, room_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE chunks SET is_last_forward = 0 WHERE room_id = ?1 AND is_last_forward = 1",
        params![room_id],
    )?;
    Ok(())
}

/// Persist the counters of a chunk.
pub(crate) fn save_cursor(conn: &Connection, chunk_id: ChunkId, cursor: &ChunkCursor) -> Result<()> {
    conn.prepare_cached(
        "UPDATE chunks SET
            forwards_display_index = ?1,
            backwards_display_index = ?2,
            forwards_state_index = ?3,
            backwards_state_index = ?4
         WHERE chunk_id = ?5",
    )?
    .execute(params![
        cursor.forwards.display_index,
        cursor.backwards.display_index,
        cursor.forwards.state_index,
        cursor.backwards.state_index,
        chunk_id,
    ])?;
    Ok(())
}

/// Record the continuation token and edge flag for one side of a chunk
/// after a pagination response.
///
/// `direction` names the side: forwards updates `next_token` and
/// `is_last_forward`, backwards updates `prev_token` and `is_last_backward`.
///
/// # Errors
///
/// Returns an error if the chunk is missing, foreign, or the update fails.
pub fn update_tokens(
    txn: &mut RoomTxn<'_>,
    chunk_id: ChunkId,
    direction: PaginationDirection,
    token: Option<&str>,
    reached_edge: bool,
) -> Result<Chunk> {
    let room_id = txn.room_id().to_string();
    load_chunk(txn.conn(), &room_id, chunk_id)?;

    match direction {
        PaginationDirection::Forwards => {
            if reached_edge {
                clear_live_flag(txn.conn(), &room_id)?;
            }
            txn.conn().execute(
                "UPDATE chunks SET next_token = ?1, is_last_forward = ?2 WHERE chunk_id = ?3",
                params![token, reached_edge, chunk_id],
            )?;
        }
        PaginationDirection::Backwards => {
            txn.conn().execute(
                "UPDATE chunks SET prev_token = ?1, is_last_backward = ?2 WHERE chunk_id = ?3",
                params![token, reached_edge, chunk_id],
            )?;
        }
    }
    txn.touch(ChangeKind::Chunks);
    load_chunk(txn.conn(), &room_id, chunk_id)
}

/// Remove a chunk with every event, out-of-band state event and receipt
/// summary it exclusively owns.
///
/// Runs inside the caller's transaction, so a failure at any step leaves
/// nothing removed once the transaction rolls back.
///
/// # Errors
///
/// Returns an error if the chunk is missing or foreign, a delete fails, or
/// owned rows survive the delete.
pub fn delete_chunk(txn: &mut RoomTxn<'_>, chunk_id: ChunkId) -> Result<DeleteReport> {
    let room_id = txn.room_id().to_string();
    load_chunk(txn.conn(), &room_id, chunk_id)?;
    let conn = txn.conn();

    let receipt_summaries = conn.execute(
        "DELETE FROM read_receipt_summaries
         WHERE room_id = ?1
           AND event_id IN (
               SELECT event_id FROM timeline_events WHERE chunk_id = ?2
               UNION
               SELECT event_id FROM chunk_state_events WHERE chunk_id = ?2
           )
           AND event_id NOT IN (
               SELECT event_id FROM timeline_events WHERE room_id = ?1 AND chunk_id <> ?2
               UNION
               SELECT event_id FROM chunk_state_events WHERE room_id = ?1 AND chunk_id <> ?2
           )",
        params![room_id, chunk_id],
    )?;
    let timeline_events = conn.execute(
        "DELETE FROM timeline_events WHERE chunk_id = ?1",
        params![chunk_id],
    )?;
    let state_events = conn.execute(
        "DELETE FROM chunk_state_events WHERE chunk_id = ?1",
        params![chunk_id],
    )?;
    conn.execute("DELETE FROM chunks WHERE chunk_id = ?1", params![chunk_id])?;

    let leftovers: i64 = conn.query_row(
        "SELECT (SELECT COUNT(*) FROM timeline_events WHERE chunk_id = ?1)
              + (SELECT COUNT(*) FROM chunk_state_events WHERE chunk_id = ?1)",
        params![chunk_id],
        |row| row.get(0),
    )?;
    if leftovers != 0 {
        return Err(TimelineError::integrity(
            &room_id,
            format!("{leftovers} rows still owned by deleted chunk {chunk_id}"),
        ));
    }

    txn.touch(ChangeKind::Chunks);
    txn.touch(ChangeKind::Timeline);
    if receipt_summaries > 0 {
        txn.touch(ChangeKind::Receipts);
    }

    info!(
        room_id = %room_id,
        chunk_id = %chunk_id,
        timeline_events,
        state_events,
        receipt_summaries,
        "deleted chunk"
    );

    Ok(DeleteReport {
        chunk_id: Some(chunk_id),
        timeline_events,
        state_events,
        receipt_summaries,
    })
}

/// Fold `source` into `target` and delete `source`.
///
/// Linked events of `source` are re-indexed into `target` as if inserted in
/// `direction`: ascending display order for forwards, descending for
/// backwards. Event ids survive, so receipts and summaries stay attached.
/// Out-of-band state not already in `target` moves over. `target` adopts
/// the token and edge flag of `source` on the merged side.
///
/// # Errors
///
/// Returns an error if either chunk is missing or foreign, if they are the
/// same chunk, or if a row update fails.
pub fn merge_chunks(
    txn: &mut RoomTxn<'_>,
    target_id: ChunkId,
    source_id: ChunkId,
    direction: PaginationDirection,
) -> Result<MergeReport> {
    let room_id = txn.room_id().to_string();
    if target_id == source_id {
        return Err(TimelineError::integrity(
            &room_id,
            format!("cannot merge chunk {target_id} into itself"),
        ));
    }
    let target = load_chunk(txn.conn(), &room_id, target_id)?;
    let source = load_chunk(txn.conn(), &room_id, source_id)?;

    let order = match direction {
        PaginationDirection::Forwards => "ASC",
        PaginationDirection::Backwards => "DESC",
    };
    let moving: Vec<(String, bool)> = {
        let sql = format!(
            "SELECT event_id, is_state FROM timeline_events
             WHERE chunk_id = ?1 ORDER BY display_index {order}"
        );
        let mut stmt = txn.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![source_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };

    let mut cursor = target.cursor;
    for (event_id, is_state) in &moving {
        let first_is_state = first_event_is_state(txn.conn(), target_id)?;
        let position = cursor
            .advance(direction, *is_state, first_is_state, 0)
            .map_err(|err| {
                TimelineError::integrity(&room_id, format!("merge {event_id} into chunk {target_id}: {err}"))
            })?;
        txn.conn()
            .execute(
                "UPDATE timeline_events
                 SET chunk_id = ?1, display_index = ?2, state_index = ?3
                 WHERE room_id = ?4 AND event_id = ?5",
                params![
                    target_id,
                    position.display_index,
                    position.state_index,
                    room_id,
                    event_id
                ],
            )
            .map_err(constraint_to_integrity(&room_id, "move event during merge"))?;
    }
    save_cursor(txn.conn(), target_id, &cursor)?;

    let moved_state_events = txn.conn().execute(
        "INSERT OR IGNORE INTO chunk_state_events (
            chunk_id, room_id, event_id, event_type, sender_id, state_key, content_json,
            origin_server_ts, state_index, is_unlinked, send_state, inserted_at_us
         )
         SELECT ?1, room_id, event_id, event_type, sender_id, state_key, content_json,
                origin_server_ts, state_index, is_unlinked, send_state, inserted_at_us
         FROM chunk_state_events WHERE chunk_id = ?2",
        params![target_id, source_id],
    )?;
    let source_state_events: usize = txn.conn().query_row(
        "SELECT COUNT(*) FROM chunk_state_events WHERE chunk_id = ?1",
        params![source_id],
        |row| row.get(0),
    )?;

    match direction {
        PaginationDirection::Forwards => {
            if source.is_last_forward {
                clear_live_flag(txn.conn(), &room_id)?;
            }
            txn.conn().execute(
                "UPDATE chunks SET next_token = ?1, is_last_forward = ?2 WHERE chunk_id = ?3",
                params![source.next_token, source.is_last_forward, target_id],
            )?;
        }
        PaginationDirection::Backwards => {
            txn.conn().execute(
                "UPDATE chunks SET prev_token = ?1, is_last_backward = ?2 WHERE chunk_id = ?3",
                params![source.prev_token, source.is_last_backward, target_id],
            )?;
        }
    }

    delete_chunk(txn, source_id)?;

    debug!(
        room_id = %room_id,
        target = %target_id,
        source = %source_id,
        direction = %direction,
        moved = moving.len(),
        "merged chunks"
    );

    Ok(MergeReport {
        target: Some(target_id),
        moved_events: moving.len(),
        moved_state_events,
        dropped_state_events: source_state_events.saturating_sub(moved_state_events),
    })
}

/// Evict the oldest non-live chunks so at most `max_chunks` remain.
///
/// The live chunk is never evicted and counts toward the limit.
///
/// # Errors
///
/// Returns an error if any cascade delete fails.
pub fn prune_room(txn: &mut RoomTxn<'_>, max_chunks: usize) -> Result<Vec<ChunkId>> {
    let room_id = txn.room_id().to_string();
    let chunks = list_chunks(txn.conn(), &room_id)?;
    if chunks.len() <= max_chunks {
        return Ok(Vec::new());
    }

    let live = chunks.iter().filter(|chunk| chunk.is_last_forward).count();
    let keep_others = max_chunks.saturating_sub(live);
    let mut others: Vec<ChunkId> = chunks
        .iter()
        .filter(|chunk| !chunk.is_last_forward)
        .map(|chunk| chunk.chunk_id)
        .collect();
    // Newest first; everything past the kept prefix is evicted.
    others.sort_unstable_by(|a, b| b.cmp(a));
    let evicted: Vec<ChunkId> = others.into_iter().skip(keep_others).collect();

    for chunk_id in &evicted {
        delete_chunk(txn, *chunk_id)?;
    }
    if !evicted.is_empty() {
        info!(room_id = %room_id, evicted = evicted.len(), max_chunks, "pruned room");
    }
    Ok(evicted)
}

/// Remove every chunk, receipt, receipt summary and annotation of the room.
///
/// # Errors
///
/// Returns an error if any delete fails.
pub fn delete_room(txn: &mut RoomTxn<'_>) -> Result<DeleteReport> {
    let room_id = txn.room_id().to_string();
    let mut report = DeleteReport::default();
    for chunk in list_chunks(txn.conn(), &room_id)? {
        let deleted = delete_chunk(txn, chunk.chunk_id)?;
        report.timeline_events += deleted.timeline_events;
        report.state_events += deleted.state_events;
        report.receipt_summaries += deleted.receipt_summaries;
    }

    let conn = txn.conn();
    report.receipt_summaries += conn.execute(
        "DELETE FROM read_receipt_summaries WHERE room_id = ?1",
        params![room_id],
    )?;
    conn.execute("DELETE FROM read_receipts WHERE room_id = ?1", params![room_id])?;
    conn.execute(
        "DELETE FROM annotation_summaries WHERE room_id = ?1",
        params![room_id],
    )?;

    txn.touch(ChangeKind::Receipts);
    txn.touch(ChangeKind::Annotations);
    info!(room_id = %room_id, "deleted room");
    Ok(report)
}
