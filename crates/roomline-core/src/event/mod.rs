//! Event model consumed by the timeline store.
//!
//! Events arrive already decrypted from the sync/pagination layer. The
//! store never mutates them; indices and delivery state live on the stored
//! row, not on the [`Event`] itself.

pub mod types;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub use types::is_state_event;

/// A room event as delivered by sync or pagination.
///
/// Field names follow the client-server wire shape so a raw event object
/// deserializes directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Server-assigned id. Absent for local echoes, which are never stored
    /// in a chunk.
    #[serde(default)]
    pub event_id: Option<String>,

    #[serde(rename = "type")]
    pub event_type: String,

    /// Sender user id. Missing senders are stored as the empty string.
    #[serde(default, rename = "sender")]
    pub sender_id: String,

    /// Server clock in milliseconds since the epoch.
    #[serde(default, rename = "origin_server_ts")]
    pub origin_server_ts: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}

impl Event {
    /// Returns `true` if this event's type affects room state.
    #[must_use]
    pub fn is_state_event(&self) -> bool {
        is_state_event(&self.event_type)
    }

    /// The event id, if present and non-empty.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.event_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Serialized content, or `None` when the event carries no content.
    pub(crate) fn content_json(&self) -> serde_json::Result<Option<String>> {
        self.content.as_ref().map(serde_json::to_string).transpose()
    }
}

/// Direction a pagination batch travels in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaginationDirection {
    /// Toward the live edge (present).
    Forwards,
    /// Toward history.
    Backwards,
}

impl PaginationDirection {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Forwards => "forwards",
            Self::Backwards => "backwards",
        }
    }

    #[must_use]
    pub const fn reversed(self) -> Self {
        match self {
            Self::Forwards => Self::Backwards,
            Self::Backwards => Self::Forwards,
        }
    }
}

impl fmt::Display for PaginationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown direction string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown pagination direction '{raw}': expected forwards or backwards")]
pub struct UnknownDirection {
    pub raw: String,
}

impl FromStr for PaginationDirection {
    type Err = UnknownDirection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forwards" | "forward" | "f" => Ok(Self::Forwards),
            "backwards" | "backward" | "b" => Ok(Self::Backwards),
            _ => Err(UnknownDirection { raw: s.to_string() }),
        }
    }
}

/// Delivery state of a stored event.
///
/// Everything arriving through sync or pagination is `Synced`; the other
/// states belong to the outgoing-message path and are only read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendState {
    Unsent,
    Sending,
    Sent,
    Synced,
    UndeliverableFailed,
}

impl SendState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unsent => "unsent",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Synced => "synced",
            Self::UndeliverableFailed => "undeliverable_failed",
        }
    }

    pub(crate) fn parse(raw: &str) -> Option<Self> {
        match raw {
            "unsent" => Some(Self::Unsent),
            "sending" => Some(Self::Sending),
            "sent" => Some(Self::Sent),
            "synced" => Some(Self::Synced),
            "undeliverable_failed" => Some(Self::UndeliverableFailed),
            _ => None,
        }
    }
}

impl fmt::Display for SendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::{Event, PaginationDirection, SendState};
    use serde_json::json;

    #[test]
    fn deserializes_wire_shape() {
        let raw = json!({
            "event_id": "$abc",
            "type": "m.room.member",
            "sender": "@alice:example.org",
            "origin_server_ts": 1_700_000_000_000_i64,
            "state_key": "@alice:example.org",
            "content": { "membership": "join", "displayname": "Alice" }
        });
        let event: Event = serde_json::from_value(raw).expect("parse event");

        assert_eq!(event.id(), Some("$abc"));
        assert_eq!(event.sender_id, "@alice:example.org");
        assert!(event.is_state_event());
        assert_eq!(event.origin_server_ts, Some(1_700_000_000_000));
    }

    #[test]
    fn missing_fields_default() {
        let event: Event =
            serde_json::from_value(json!({ "type": "m.room.message" })).expect("parse event");
        assert_eq!(event.id(), None);
        assert_eq!(event.sender_id, "");
        assert!(!event.is_state_event());
        assert_eq!(event.content_json().expect("json"), None);
    }

    #[test]
    fn empty_event_id_counts_as_missing() {
        let event = Event {
            event_id: Some(String::new()),
            event_type: "m.room.message".into(),
            sender_id: "@a:x".into(),
            origin_server_ts: None,
            state_key: None,
            content: None,
        };
        assert_eq!(event.id(), None);
    }

    #[test]
    fn direction_parses_and_reverses() {
        assert_eq!(
            "Forwards".parse::<PaginationDirection>().expect("parse"),
            PaginationDirection::Forwards
        );
        assert_eq!(
            "b".parse::<PaginationDirection>().expect("parse"),
            PaginationDirection::Backwards
        );
        assert!("sideways".parse::<PaginationDirection>().is_err());
        assert_eq!(
            PaginationDirection::Forwards.reversed(),
            PaginationDirection::Backwards
        );
    }

    #[test]
    fn send_state_round_trips_through_str() {
        for state in [
            SendState::Unsent,
            SendState::Sending,
            SendState::Sent,
            SendState::Synced,
            SendState::UndeliverableFailed,
        ] {
            assert_eq!(SendState::parse(state.as_str()), Some(state));
        }
        assert_eq!(SendState::parse("bogus"), None);
    }
}
