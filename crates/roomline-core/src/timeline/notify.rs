//! Change notifications for the projection layer.
//!
//! A [`RoomChange`] is published after a write transaction commits. Each
//! subscriber gets its own channel, optionally filtered to one room.
//! Subscribers whose receiver was dropped are removed on the next publish.

use serde::Serialize;
use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, Sender};

/// Which projection a committed write may have changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Timeline,
    Receipts,
    Chunks,
    Annotations,
}

/// One committed write to a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomChange {
    pub room_id: String,
    pub kinds: Vec<ChangeKind>,
}

#[derive(Debug)]
struct Subscriber {
    room_filter: Option<String>,
    tx: Sender<RoomChange>,
}

/// Fan-out of [`RoomChange`]s to subscribers.
#[derive(Debug, Default)]
pub struct ChangeFeed {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl ChangeFeed {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. With `room` set, only that room's changes are
    /// delivered.
    pub fn subscribe(&self, room: Option<&str>) -> Receiver<RoomChange> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(Subscriber {
                room_filter: room.map(str::to_string),
                tx,
            });
        }
        rx
    }

    /// Deliver `change` to every matching subscriber, returning how many
    /// received it.
    pub fn publish(&self, change: &RoomChange) -> usize {
        let Ok(mut subscribers) = self.subscribers.lock() else {
            tracing::warn!(room_id = %change.room_id, "change feed lock poisoned; dropping change");
            return 0;
        };

        let mut delivered = 0;
        subscribers.retain(|subscriber| {
            let wanted = subscriber
                .room_filter
                .as_deref()
                .is_none_or(|room| room == change.room_id);
            if !wanted {
                return true;
            }
            if subscriber.tx.send(change.clone()).is_ok() {
                delivered += 1;
                true
            } else {
                false
            }
        });
        delivered
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::{ChangeFeed, ChangeKind, RoomChange};

    fn change(room: &str) -> RoomChange {
        RoomChange {
            room_id: room.into(),
            kinds: vec![ChangeKind::Timeline],
        }
    }

    #[test]
    fn room_filter_limits_delivery() {
        let feed = ChangeFeed::new();
        let all = feed.subscribe(None);
        let only_a = feed.subscribe(Some("!a:x"));

        assert_eq!(feed.publish(&change("!a:x")), 2);
        assert_eq!(feed.publish(&change("!b:x")), 1);

        assert_eq!(all.try_iter().count(), 2);
        let received: Vec<_> = only_a.try_iter().collect();
        assert_eq!(received, vec![change("!a:x")]);
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let feed = ChangeFeed::new();
        let keep = feed.subscribe(None);
        drop(feed.subscribe(None));
        assert_eq!(feed.subscriber_count(), 2);

        assert_eq!(feed.publish(&change("!a:x")), 1);
        assert_eq!(feed.subscriber_count(), 1);
        assert!(keep.try_recv().is_ok());
    }
}
