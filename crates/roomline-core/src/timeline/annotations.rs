//! Reaction aggregates per target event.
//!
//! Summaries are keyed by the target's event id and are not owned by any
//! chunk: a reaction may arrive before its target, and the target's row
//! finds its summary by id when projected.

use rusqlite::{Connection, params};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::event::Event;
use crate::event::types::REACTION;

use super::notify::ChangeKind;
use super::now_us;
use super::txn::RoomTxn;

/// Count of one reaction key on an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReactionCount {
    pub key: String,
    pub count: i64,
    /// Timestamp of the first reaction with this key.
    pub first_ts: i64,
}

/// All reactions recorded for one event, ordered by first appearance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnotationSummary {
    pub event_id: String,
    pub reactions: Vec<ReactionCount>,
}

/// Target event id and key of an `m.reaction` annotation, if `event` is one.
#[must_use]
pub fn annotation_target(event: &Event) -> Option<(&str, &str)> {
    if event.event_type != REACTION {
        return None;
    }
    let relates_to = event.content.as_ref()?.get("m.relates_to")?;
    if relates_to.get("rel_type").and_then(Value::as_str) != Some("m.annotation") {
        return None;
    }
    let target = relates_to.get("event_id").and_then(Value::as_str)?;
    let key = relates_to.get("key").and_then(Value::as_str)?;
    (!target.is_empty() && !key.is_empty()).then_some((target, key))
}

/// Count one `key` reaction on `target_event_id`, creating the summary if
/// absent. Returns the new count for the key.
///
/// # Errors
///
/// Returns an error if a write fails.
pub fn record_reaction(
    txn: &mut RoomTxn<'_>,
    target_event_id: &str,
    key: &str,
    ts: i64,
) -> Result<i64> {
    let room_id = txn.room_id().to_string();
    let conn = txn.conn();

    conn.prepare_cached(
        "INSERT OR IGNORE INTO annotation_summaries (room_id, event_id, created_at_us)
         VALUES (?1, ?2, ?3)",
    )?
    .execute(params![room_id, target_event_id, now_us()])?;

    let count: i64 = conn
        .prepare_cached(
            "INSERT INTO reaction_aggregates (room_id, event_id, reaction_key, count, first_ts)
             VALUES (?1, ?2, ?3, 1, ?4)
             ON CONFLICT (room_id, event_id, reaction_key) DO UPDATE SET
                count = count + 1,
                first_ts = MIN(first_ts, excluded.first_ts)
             RETURNING count",
        )?
        .query_row(params![room_id, target_event_id, key, ts], |row| row.get(0))?;
    txn.touch(ChangeKind::Annotations);

    debug!(room_id = %room_id, target = target_event_id, key, count, "reaction recorded");
    Ok(count)
}

/// Aggregate `event` onto its target if it is an annotation.
pub(crate) fn aggregate_event(txn: &mut RoomTxn<'_>, event: &Event) -> Result<bool> {
    let Some((target, key)) = annotation_target(event) else {
        return Ok(false);
    };
    record_reaction(txn, target, key, event.origin_server_ts.unwrap_or(0))?;
    Ok(true)
}

/// Reaction counts for `event_id`, or `None` if nothing was recorded.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn annotation_summary(conn: &Connection, room_id: &str, event_id: &str) -> Result<Option<AnnotationSummary>> {
    let exists: bool = conn
        .prepare_cached(
            "SELECT EXISTS(SELECT 1 FROM annotation_summaries WHERE room_id = ?1 AND event_id = ?2)",
        )?
        .query_row(params![room_id, event_id], |row| row.get(0))?;
    if !exists {
        return Ok(None);
    }

    let mut stmt = conn.prepare_cached(
        "SELECT reaction_key, count, first_ts FROM reaction_aggregates
         WHERE room_id = ?1 AND event_id = ?2 AND count > 0
         ORDER BY first_ts ASC, reaction_key ASC",
    )?;
    let reactions = stmt
        .query_map(params![room_id, event_id], |row| {
            Ok(ReactionCount {
                key: row.get(0)?,
                count: row.get(1)?,
                first_ts: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(Some(AnnotationSummary {
        event_id: event_id.to_string(),
        reactions,
    }))
}

#[cfg(test)]
mod tests {
    use super::{annotation_summary, annotation_target, record_reaction};
    use crate::event::Event;
    use crate::event::PaginationDirection::Forwards;
    use crate::timeline::chunk::{NewChunk, create_chunk, delete_chunk};
    use crate::timeline::testing::{ROOM, message, test_db};
    use crate::timeline::RoomTxn;
    use serde_json::json;

    fn reaction(id: &str, target: &str, key: &str, ts: i64) -> Event {
        Event {
            event_id: Some(id.into()),
            event_type: "m.reaction".into(),
            sender_id: "@r:x".into(),
            origin_server_ts: Some(ts),
            state_key: None,
            content: Some(json!({
                "m.relates_to": { "rel_type": "m.annotation", "event_id": target, "key": key }
            })),
        }
    }

    #[test]
    fn extracts_annotation_target() {
        let event = reaction("$r", "$m", "👍", 1);
        assert_eq!(annotation_target(&event), Some(("$m", "👍")));
        assert_eq!(annotation_target(&message("$m", "@a:x", 1)), None);
    }

    #[test]
    fn counts_accumulate_per_key() {
        let mut conn = test_db();
        let mut txn = RoomTxn::begin(&mut conn, ROOM).unwrap();

        assert_eq!(record_reaction(&mut txn, "$m", "👍", 20).unwrap(), 1);
        assert_eq!(record_reaction(&mut txn, "$m", "👍", 10).unwrap(), 2);
        assert_eq!(record_reaction(&mut txn, "$m", "🎉", 15).unwrap(), 1);

        let summary = annotation_summary(txn.conn(), ROOM, "$m").unwrap().unwrap();
        let keys: Vec<(&str, i64)> = summary
            .reactions
            .iter()
            .map(|r| (r.key.as_str(), r.count))
            .collect();
        assert_eq!(keys, vec![("👍", 2), ("🎉", 1)]);
        assert!(annotation_summary(txn.conn(), ROOM, "$other").unwrap().is_none());
    }

    #[test]
    fn inserted_reactions_aggregate_and_survive_chunk_delete() {
        let mut conn = test_db();
        let mut txn = RoomTxn::begin(&mut conn, ROOM).unwrap();
        let chunk = create_chunk(&mut txn, &NewChunk::default()).unwrap();

        txn.insert_event(chunk.chunk_id, &reaction("$r1", "$m", "👍", 5), Forwards, 0, false)
            .unwrap();
        txn.insert_event(chunk.chunk_id, &message("$m", "@a:x", 1), Forwards, 0, false)
            .unwrap();
        // Redelivery is a duplicate and must not count twice.
        txn.insert_event(chunk.chunk_id, &reaction("$r1", "$m", "👍", 5), Forwards, 0, false)
            .unwrap();

        let summary = annotation_summary(txn.conn(), ROOM, "$m").unwrap().unwrap();
        assert_eq!(summary.reactions[0].count, 1);

        delete_chunk(&mut txn, chunk.chunk_id).unwrap();
        assert!(annotation_summary(txn.conn(), ROOM, "$m").unwrap().is_some());
    }
}
