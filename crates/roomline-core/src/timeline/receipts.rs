//! Read-receipt ledger.
//!
//! Each user has exactly one receipt per room. A receipt only moves forward:
//! it is re-pointed at a new event iff that event's server timestamp is
//! strictly greater than the one recorded. The receipts attached to an event
//! are derived from the ledger, gated by the event's summary row, so moving
//! a receipt detaches it from the old summary and attaches it to the new one
//! in a single update.

use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use tracing::debug;

use crate::error::Result;

use super::notify::ChangeKind;
use super::now_us;
use super::txn::RoomTxn;

/// A user's most recent read position in a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadReceipt {
    pub user_id: String,
    /// `None` until the first promotion.
    pub event_id: Option<String>,
    pub origin_server_ts: i64,
}

/// Create the summary row for `event_id` if it does not exist yet.
/// Returns `true` if a row was created.
pub(crate) fn ensure_summary(conn: &Connection, room_id: &str, event_id: &str) -> Result<bool> {
    let created = conn
        .prepare_cached(
            "INSERT OR IGNORE INTO read_receipt_summaries (room_id, event_id, created_at_us)
             VALUES (?1, ?2, ?3)",
        )?
        .execute(params![room_id, event_id, now_us()])?;
    Ok(created > 0)
}

fn is_linked(conn: &Connection, room_id: &str, event_id: &str) -> Result<bool> {
    Ok(conn
        .prepare_cached(
            "SELECT EXISTS(SELECT 1 FROM timeline_events WHERE room_id = ?1 AND event_id = ?2)",
        )?
        .query_row(params![room_id, event_id], |row| row.get(0))?)
}

/// Move `user_id`'s receipt onto `event_id` if `ts` is newer than the one on
/// record. The receipt row is created on first sight with timestamp 0.
///
/// Returns `true` if the receipt moved.
pub(crate) fn promote(txn: &mut RoomTxn<'_>, user_id: &str, event_id: &str, ts: i64) -> Result<bool> {
    let room_id = txn.room_id().to_string();
    let conn = txn.conn();

    conn.prepare_cached(
        "INSERT OR IGNORE INTO read_receipts (room_id, user_id, event_id, origin_server_ts, updated_at_us)
         VALUES (?1, ?2, NULL, 0, ?3)",
    )?
    .execute(params![room_id, user_id, now_us()])?;

    let (previous, stored_ts): (Option<String>, i64) = conn
        .prepare_cached(
            "SELECT event_id, origin_server_ts FROM read_receipts
             WHERE room_id = ?1 AND user_id = ?2",
        )?
        .query_row(params![room_id, user_id], |row| Ok((row.get(0)?, row.get(1)?)))?;

    if ts <= stored_ts {
        debug!(
            room_id = %room_id,
            user_id,
            event_id,
            ts,
            stored_ts,
            "receipt not promoted: event is not newer"
        );
        return Ok(false);
    }

    if is_linked(conn, &room_id, event_id)? {
        ensure_summary(conn, &room_id, event_id)?;
    }
    conn.prepare_cached(
        "UPDATE read_receipts
         SET event_id = ?3, origin_server_ts = ?4, updated_at_us = ?5
         WHERE room_id = ?1 AND user_id = ?2",
    )?
    .execute(params![room_id, user_id, event_id, ts, now_us()])?;
    txn.touch(ChangeKind::Receipts);

    debug!(
        room_id = %room_id,
        user_id,
        from = previous.as_deref().unwrap_or("-"),
        to = event_id,
        ts,
        "receipt promoted"
    );
    Ok(true)
}

/// Apply an explicit read receipt delivered by sync.
///
/// Same rule as implicit promotion on insert: the receipt only moves to an
/// event with a strictly newer timestamp.
///
/// # Errors
///
/// Returns an error if a ledger query or update fails.
pub fn record_receipt(txn: &mut RoomTxn<'_>, user_id: &str, event_id: &str, ts: i64) -> Result<bool> {
    promote(txn, user_id, event_id, ts)
}

fn receipt_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReadReceipt> {
    Ok(ReadReceipt {
        user_id: row.get(0)?,
        event_id: row.get(1)?,
        origin_server_ts: row.get(2)?,
    })
}

/// Current read marker of `user_id` in `room_id`.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn read_marker(conn: &Connection, room_id: &str, user_id: &str) -> Result<Option<ReadReceipt>> {
    Ok(conn
        .prepare_cached(
            "SELECT user_id, event_id, origin_server_ts FROM read_receipts
             WHERE room_id = ?1 AND user_id = ?2",
        )?
        .query_row(params![room_id, user_id], receipt_from_row)
        .optional()?)
}

/// Receipts currently attached to `event_id`, newest first.
///
/// Empty when the event has no summary (never stored, or its chunk was
/// deleted).
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn receipts_for_event(conn: &Connection, room_id: &str, event_id: &str) -> Result<Vec<ReadReceipt>> {
    let mut stmt = conn.prepare_cached(
        "SELECT r.user_id, r.event_id, r.origin_server_ts
         FROM read_receipts r
         JOIN read_receipt_summaries s
           ON s.room_id = r.room_id AND s.event_id = r.event_id
         WHERE r.room_id = ?1 AND r.event_id = ?2
         ORDER BY r.origin_server_ts DESC, r.user_id ASC",
    )?;
    let rows = stmt.query_map(params![room_id, event_id], receipt_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Every receipt in the room, ordered by user id.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn room_receipts(conn: &Connection, room_id: &str) -> Result<Vec<ReadReceipt>> {
    let mut stmt = conn.prepare_cached(
        "SELECT user_id, event_id, origin_server_ts FROM read_receipts
         WHERE room_id = ?1 ORDER BY user_id ASC",
    )?;
    let rows = stmt.query_map(params![room_id], receipt_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

#[cfg(test)]
mod tests {
    use super::{read_marker, receipts_for_event, record_receipt};
    use crate::event::PaginationDirection::Forwards;
    use crate::timeline::chunk::{NewChunk, create_chunk, delete_chunk};
    use crate::timeline::testing::{ROOM, message, test_db};
    use crate::timeline::{InsertOutcome, RoomTxn};

    const ALICE: &str = "@alice:example.org";

    #[test]
    fn first_event_creates_and_promotes_receipt() {
        let mut conn = test_db();
        let mut txn = RoomTxn::begin(&mut conn, ROOM).unwrap();
        let chunk = create_chunk(&mut txn, &NewChunk::default()).unwrap();

        let outcome = txn
            .insert_event(chunk.chunk_id, &message("$a", ALICE, 100), Forwards, 0, false)
            .unwrap();
        assert!(outcome.position().unwrap().receipt_promoted);

        let marker = read_marker(txn.conn(), ROOM, ALICE).unwrap().unwrap();
        assert_eq!(marker.event_id.as_deref(), Some("$a"));
        assert_eq!(marker.origin_server_ts, 100);
    }

    #[test]
    fn older_event_does_not_move_receipt_and_newer_does() {
        let mut conn = test_db();
        let mut txn = RoomTxn::begin(&mut conn, ROOM).unwrap();
        let chunk = create_chunk(&mut txn, &NewChunk::default()).unwrap();

        txn.insert_event(chunk.chunk_id, &message("$t100", ALICE, 100), Forwards, 0, false)
            .unwrap();
        let older = txn
            .insert_event(chunk.chunk_id, &message("$t90", ALICE, 90), Forwards, 0, false)
            .unwrap();
        assert!(!older.position().unwrap().receipt_promoted);
        assert_eq!(
            read_marker(txn.conn(), ROOM, ALICE).unwrap().unwrap().event_id.as_deref(),
            Some("$t100")
        );

        let newer = txn
            .insert_event(chunk.chunk_id, &message("$t150", ALICE, 150), Forwards, 0, false)
            .unwrap();
        assert!(newer.position().unwrap().receipt_promoted);
        assert!(receipts_for_event(txn.conn(), ROOM, "$t100").unwrap().is_empty());
        let attached = receipts_for_event(txn.conn(), ROOM, "$t150").unwrap();
        assert_eq!(attached.len(), 1);
        assert_eq!(attached[0].user_id, ALICE);
    }

    #[test]
    fn equal_timestamp_does_not_promote() {
        let mut conn = test_db();
        let mut txn = RoomTxn::begin(&mut conn, ROOM).unwrap();
        let chunk = create_chunk(&mut txn, &NewChunk::default()).unwrap();

        txn.insert_event(chunk.chunk_id, &message("$x", ALICE, 100), Forwards, 0, false)
            .unwrap();
        assert!(!record_receipt(&mut txn, ALICE, "$y", 100).unwrap());
        assert!(record_receipt(&mut txn, ALICE, "$y", 101).unwrap());
    }

    #[test]
    fn event_without_timestamp_leaves_ledger_alone() {
        let mut conn = test_db();
        let mut txn = RoomTxn::begin(&mut conn, ROOM).unwrap();
        let chunk = create_chunk(&mut txn, &NewChunk::default()).unwrap();

        let mut event = message("$nots", ALICE, 0);
        event.origin_server_ts = None;
        let outcome = txn
            .insert_event(chunk.chunk_id, &event, Forwards, 0, false)
            .unwrap();
        assert!(matches!(outcome, InsertOutcome::Inserted(_)));
        assert!(read_marker(txn.conn(), ROOM, ALICE).unwrap().is_none());
    }

    #[test]
    fn explicit_receipt_attaches_to_summary() {
        let mut conn = test_db();
        let mut txn = RoomTxn::begin(&mut conn, ROOM).unwrap();
        let chunk = create_chunk(&mut txn, &NewChunk::default()).unwrap();
        txn.insert_event(chunk.chunk_id, &message("$m", "@bob:x", 10), Forwards, 0, false)
            .unwrap();

        assert!(record_receipt(&mut txn, ALICE, "$m", 10).unwrap());
        let users: Vec<String> = receipts_for_event(txn.conn(), ROOM, "$m")
            .unwrap()
            .into_iter()
            .map(|r| r.user_id)
            .collect();
        assert_eq!(users, vec!["@alice:example.org".to_string(), "@bob:x".to_string()]);
    }

    fn summary_count(txn: &RoomTxn<'_>) -> i64 {
        txn.conn()
            .query_row("SELECT COUNT(*) FROM read_receipt_summaries", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn receipt_on_unknown_event_attaches_when_it_arrives() {
        let mut conn = test_db();
        let mut txn = RoomTxn::begin(&mut conn, ROOM).unwrap();
        let chunk = create_chunk(&mut txn, &NewChunk::default()).unwrap();
        txn.insert_event(chunk.chunk_id, &message("$m", ALICE, 10), Forwards, 0, false)
            .unwrap();

        assert!(record_receipt(&mut txn, "@bob:x", "$never", 50).unwrap());
        assert!(record_receipt(&mut txn, "@bob:x", "$later", 60).unwrap());
        assert_eq!(summary_count(&txn), 1);
        assert!(receipts_for_event(txn.conn(), ROOM, "$later").unwrap().is_empty());

        txn.insert_event(chunk.chunk_id, &message("$later", ALICE, 60), Forwards, 0, false)
            .unwrap();
        let users: Vec<String> = receipts_for_event(txn.conn(), ROOM, "$later")
            .unwrap()
            .into_iter()
            .map(|r| r.user_id)
            .collect();
        assert_eq!(users, vec!["@alice:example.org".to_string(), "@bob:x".to_string()]);

        delete_chunk(&mut txn, chunk.chunk_id).unwrap();
        assert_eq!(summary_count(&txn), 0);
    }
}
