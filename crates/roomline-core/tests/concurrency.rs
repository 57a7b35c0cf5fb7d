mod support;

use roomline_core::db::query::chunk_events;
use roomline_core::event::PaginationDirection::{Backwards, Forwards};
use roomline_core::timeline::ChangeKind;
use std::sync::{Arc, Barrier};
use std::thread;
use support::{ROOM, message, new_chunk, open_store};

#[test]
fn opposite_directions_on_one_chunk_never_share_an_index() {
    let (_dir, store) = open_store();
    let store = Arc::new(store);
    let chunk_id = new_chunk(&store, ROOM, true);
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = [(Forwards, "f"), (Backwards, "b")]
        .into_iter()
        .map(|(direction, prefix)| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for n in 0..25 {
                    let event = message(&format!("${prefix}{n}"), "@u:x", n);
                    store
                        .write(ROOM, |txn| txn.insert_event(chunk_id, &event, direction, 0, false))
                        .expect("insert");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread");
    }

    let events = store.read(|conn| chunk_events(conn, chunk_id)).expect("read");
    let indices: Vec<i64> = events.iter().map(|e| e.display_index).collect();
    let expected: Vec<i64> = (-25..=-1).chain(1..=25).collect();
    assert_eq!(indices, expected);
}

#[test]
fn same_event_raced_by_many_writers_is_stored_once() {
    let (_dir, store) = open_store();
    let store = Arc::new(store);
    let live = new_chunk(&store, ROOM, true);
    let history = new_chunk(&store, ROOM, false);
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            let (chunk_id, direction) = if i % 2 == 0 {
                (live, Forwards)
            } else {
                (history, Backwards)
            };
            thread::spawn(move || {
                barrier.wait();
                store
                    .write(ROOM, |txn| {
                        txn.insert_event(chunk_id, &message("$raced", "@u:x", 1), direction, 0, false)
                    })
                    .expect("insert")
                    .is_inserted()
            })
        })
        .collect();

    let inserted = handles
        .into_iter()
        .map(|handle| handle.join().expect("writer thread"))
        .filter(|inserted| *inserted)
        .count();
    assert_eq!(inserted, 1);
}

#[test]
fn rooms_write_independently_and_notify_their_own_subscribers() {
    let (_dir, store) = open_store();
    let store = Arc::new(store);
    let rooms: Vec<String> = (0..4).map(|n| format!("!room{n}:example.org")).collect();
    let chunks: Vec<_> = rooms.iter().map(|room| new_chunk(&store, room, true)).collect();
    let first_room_feed = store.subscribe(Some(&rooms[0]));

    let handles: Vec<_> = rooms
        .iter()
        .cloned()
        .zip(chunks.iter().copied())
        .map(|(room, chunk_id)| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for n in 0..20 {
                    store
                        .write(&room, |txn| {
                            txn.insert_event(chunk_id, &message(&format!("$m{n}"), "@u:x", n), Forwards, 0, false)
                        })
                        .expect("insert");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread");
    }

    for chunk_id in &chunks {
        let events = store.read(|conn| chunk_events(conn, *chunk_id)).expect("read");
        assert_eq!(events.len(), 20);
    }

    let changes: Vec<_> = first_room_feed.try_iter().collect();
    assert_eq!(changes.len(), 20);
    assert!(changes.iter().all(|change| change.room_id == rooms[0]));
    assert!(changes.iter().all(|change| change.kinds.contains(&ChangeKind::Timeline)));
}
