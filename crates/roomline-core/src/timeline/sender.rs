//! Sender profile snapshots.
//!
//! An event stores the display name and avatar its sender had at the
//! event's position in the chunk, resolved from `m.room.member` events.

use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::event::Event;
use crate::event::types::ROOM_MEMBER;

use super::ChunkId;

/// Display data cached on a stored event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SenderSnapshot {
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub is_unique_display_name: bool,
}

impl Default for SenderSnapshot {
    fn default() -> Self {
        Self {
            display_name: None,
            avatar_url: None,
            is_unique_display_name: true,
        }
    }
}

fn profile_from_content(content: &Value) -> (Option<String>, Option<String>) {
    let field = |name: &str| {
        content
            .get(name)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    (field("displayname"), field("avatar_url"))
}

fn profile_from_json(raw: Option<String>) -> Result<(Option<String>, Option<String>)> {
    match raw {
        Some(raw) => Ok(profile_from_content(&serde_json::from_str(&raw)?)),
        None => Ok((None, None)),
    }
}

/// Resolve the sender snapshot for `event` about to be linked at
/// `display_index` in `chunk_id`.
///
/// Lookup order: the event itself when it is the sender's own member
/// event, then the latest linked member event at or before
/// `display_index`, then the chunk's out-of-band member state.
///
/// # Errors
///
/// Returns an error if a query fails or stored content is not valid JSON.
pub fn resolve(
    conn: &Connection,
    chunk_id: ChunkId,
    event: &Event,
    display_index: i64,
) -> Result<SenderSnapshot> {
    let sender = event.sender_id.as_str();
    if sender.is_empty() {
        return Ok(SenderSnapshot::default());
    }

    let own_member_event = event.event_type == ROOM_MEMBER
        && event.state_key.as_deref() == Some(sender);

    let (display_name, avatar_url) = if own_member_event {
        event
            .content
            .as_ref()
            .map(profile_from_content)
            .unwrap_or_default()
    } else {
        let linked: Option<Option<String>> = conn
            .prepare_cached(
                "SELECT content_json FROM timeline_events
                 WHERE chunk_id = ?1 AND event_type = ?2 AND state_key = ?3
                   AND display_index <= ?4
                 ORDER BY display_index DESC
                 LIMIT 1",
            )?
            .query_row(params![chunk_id, ROOM_MEMBER, sender, display_index], |row| {
                row.get(0)
            })
            .optional()?;

        let raw = match linked {
            Some(raw) => raw,
            None => conn
                .prepare_cached(
                    "SELECT content_json FROM chunk_state_events
                     WHERE chunk_id = ?1 AND event_type = ?2 AND state_key = ?3
                     ORDER BY rowid DESC
                     LIMIT 1",
                )?
                .query_row(params![chunk_id, ROOM_MEMBER, sender], |row| {
                    row.get::<_, Option<String>>(0)
                })
                .optional()?
                .flatten(),
        };
        profile_from_json(raw)?
    };

    let is_unique_display_name = match display_name.as_deref() {
        Some(name) => !display_name_taken(conn, chunk_id, sender, name, display_index)?,
        None => true,
    };

    Ok(SenderSnapshot {
        display_name,
        avatar_url,
        is_unique_display_name,
    })
}

/// Whether a member other than `user_id` carries `name` at `display_index`.
///
/// Each member counts with their latest linked member event at or before
/// `display_index`, else their latest out-of-band member state.
fn display_name_taken(
    conn: &Connection,
    chunk_id: ChunkId,
    user_id: &str,
    name: &str,
    display_index: i64,
) -> Result<bool> {
    Ok(conn
        .prepare_cached(
            "WITH linked AS (
                SELECT state_key, content_json,
                       ROW_NUMBER() OVER (PARTITION BY state_key ORDER BY display_index DESC) AS rn
                FROM timeline_events
                WHERE chunk_id = ?1 AND event_type = ?2 AND state_key <> ?3
                  AND display_index <= ?5
             ),
             out_of_band AS (
                SELECT state_key, content_json,
                       ROW_NUMBER() OVER (PARTITION BY state_key ORDER BY rowid DESC) AS rn
                FROM chunk_state_events
                WHERE chunk_id = ?1 AND event_type = ?2 AND state_key <> ?3
             ),
             effective AS (
                SELECT content_json FROM linked WHERE rn = 1
                UNION ALL
                SELECT content_json FROM out_of_band
                WHERE rn = 1 AND state_key NOT IN (SELECT state_key FROM linked)
             )
             SELECT EXISTS(
                SELECT 1 FROM effective WHERE json_extract(content_json, '$.displayname') = ?4
             )",
        )?
        .query_row(
            params![chunk_id, ROOM_MEMBER, user_id, name, display_index],
            |row| row.get(0),
        )?)
}

#[cfg(test)]
mod tests {
    use super::{SenderSnapshot, resolve};
    use crate::event::PaginationDirection::Forwards;
    use crate::timeline::chunk::{NewChunk, create_chunk};
    use crate::timeline::testing::{ROOM, member, message, test_db};
    use crate::timeline::RoomTxn;

    #[test]
    fn unknown_sender_has_empty_snapshot() {
        let mut conn = test_db();
        let mut txn = RoomTxn::begin(&mut conn, ROOM).unwrap();
        let chunk = create_chunk(&mut txn, &NewChunk::default()).unwrap();

        let snapshot = resolve(txn.conn(), chunk.chunk_id, &message("$m", "@u:x", 1), 1).unwrap();
        assert_eq!(snapshot, SenderSnapshot::default());
    }

    #[test]
    fn own_member_event_describes_itself() {
        let mut conn = test_db();
        let mut txn = RoomTxn::begin(&mut conn, ROOM).unwrap();
        let chunk = create_chunk(&mut txn, &NewChunk::default()).unwrap();

        let join = member("$j", "@alice:x", "Alice", 1);
        let snapshot = resolve(txn.conn(), chunk.chunk_id, &join, 1).unwrap();
        assert_eq!(snapshot.display_name.as_deref(), Some("Alice"));
        assert_eq!(snapshot.avatar_url.as_deref(), Some("mxc://example.org/Alice"));
        assert!(snapshot.is_unique_display_name);
    }

    #[test]
    fn linked_member_event_wins_over_out_of_band_state() {
        let mut conn = test_db();
        let mut txn = RoomTxn::begin(&mut conn, ROOM).unwrap();
        let chunk = create_chunk(&mut txn, &NewChunk::default()).unwrap();

        txn.insert_state_event(chunk.chunk_id, &member("$old", "@alice:x", "Old Alice", 1))
            .unwrap();
        let snapshot = resolve(txn.conn(), chunk.chunk_id, &message("$m0", "@alice:x", 2), 1)
            .unwrap();
        assert_eq!(snapshot.display_name.as_deref(), Some("Old Alice"));

        txn.insert_event(chunk.chunk_id, &member("$new", "@alice:x", "Alice", 3), Forwards, 0, false)
            .unwrap();
        let snapshot = resolve(txn.conn(), chunk.chunk_id, &message("$m1", "@alice:x", 4), 2)
            .unwrap();
        assert_eq!(snapshot.display_name.as_deref(), Some("Alice"));
    }

    #[test]
    fn shared_display_name_is_not_unique() {
        let mut conn = test_db();
        let mut txn = RoomTxn::begin(&mut conn, ROOM).unwrap();
        let chunk = create_chunk(&mut txn, &NewChunk::default()).unwrap();

        txn.insert_event(chunk.chunk_id, &member("$a", "@alice:x", "Sam", 1), Forwards, 0, false)
            .unwrap();
        txn.insert_event(chunk.chunk_id, &member("$b", "@bob:x", "Sam", 2), Forwards, 0, false)
            .unwrap();

        let snapshot = resolve(txn.conn(), chunk.chunk_id, &message("$m", "@bob:x", 3), 3).unwrap();
        assert_eq!(snapshot.display_name.as_deref(), Some("Sam"));
        assert!(!snapshot.is_unique_display_name);
    }

    #[test]
    fn renamed_member_releases_old_display_name() {
        let mut conn = test_db();
        let mut txn = RoomTxn::begin(&mut conn, ROOM).unwrap();
        let chunk = create_chunk(&mut txn, &NewChunk::default()).unwrap();

        txn.insert_event(chunk.chunk_id, &member("$a1", "@alice:x", "Sam", 1), Forwards, 0, false)
            .unwrap();
        txn.insert_event(chunk.chunk_id, &member("$a2", "@alice:x", "Alice", 2), Forwards, 0, false)
            .unwrap();
        txn.insert_event(chunk.chunk_id, &member("$b", "@bob:x", "Sam", 3), Forwards, 0, false)
            .unwrap();

        let now = resolve(txn.conn(), chunk.chunk_id, &message("$m", "@bob:x", 4), 4).unwrap();
        assert_eq!(now.display_name.as_deref(), Some("Sam"));
        assert!(now.is_unique_display_name);

        // Between alice's join and her rename, "Sam" was still hers.
        let earlier = resolve(txn.conn(), chunk.chunk_id, &member("$b0", "@bob:x", "Sam", 0), 1)
            .unwrap();
        assert!(!earlier.is_unique_display_name);
    }
}
