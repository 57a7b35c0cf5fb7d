#![allow(dead_code)]

use roomline_core::config::CacheConfig;
use roomline_core::event::Event;
use roomline_core::timeline::{ChunkId, NewChunk, TimelineStore};
use serde_json::json;
use tempfile::TempDir;

pub const ROOM: &str = "!room:example.org";

pub fn open_store() -> (TempDir, TimelineStore) {
    open_store_with(CacheConfig::default())
}

pub fn open_store_with(config: CacheConfig) -> (TempDir, TimelineStore) {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = TimelineStore::open(dir.path(), config).expect("open store");
    (dir, store)
}

pub fn message(id: &str, sender: &str, ts: i64) -> Event {
    Event {
        event_id: Some(id.to_string()),
        event_type: "m.room.message".into(),
        sender_id: sender.into(),
        origin_server_ts: Some(ts),
        state_key: None,
        content: Some(json!({ "msgtype": "m.text", "body": id })),
    }
}

pub fn state(id: &str, event_type: &str, ts: i64) -> Event {
    Event {
        event_id: Some(id.to_string()),
        event_type: event_type.into(),
        sender_id: "@admin:example.org".into(),
        origin_server_ts: Some(ts),
        state_key: Some(String::new()),
        content: Some(json!({ "name": id })),
    }
}

pub fn new_chunk(store: &TimelineStore, room_id: &str, live: bool) -> ChunkId {
    store
        .write(room_id, |txn| {
            roomline_core::timeline::chunk::create_chunk(
                txn,
                &NewChunk {
                    is_last_forward: live,
                    ..NewChunk::default()
                },
            )
        })
        .expect("create chunk")
        .chunk_id
}
