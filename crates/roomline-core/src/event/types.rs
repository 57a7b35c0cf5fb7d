//! Event type classification.
//!
//! Only the distinction between room-state events and message-like events
//! matters to the timeline store: state events advance the state index,
//! everything else inherits it.

/// `m.room.member`, the event carrying a member's display name and avatar.
pub const ROOM_MEMBER: &str = "m.room.member";

/// `m.reaction`, an annotation on another event.
pub const REACTION: &str = "m.reaction";

/// Every event type treated as room state.
pub const STATE_EVENT_TYPES: [&str; 17] = [
    "m.room.create",
    "m.room.name",
    "m.room.topic",
    "m.room.avatar",
    ROOM_MEMBER,
    "m.room.third_party_invite",
    "m.room.join_rules",
    "m.room.guest_access",
    "m.room.history_visibility",
    "m.room.power_levels",
    "m.room.canonical_alias",
    "m.room.aliases",
    "m.room.tombstone",
    "m.room.encryption",
    "m.room.pinned_events",
    "m.room.server_acl",
    "m.room.related_groups",
];

/// Returns `true` if events of `event_type` affect room state.
#[must_use]
pub fn is_state_event(event_type: &str) -> bool {
    STATE_EVENT_TYPES.contains(&event_type)
}

#[cfg(test)]
mod tests {
    use super::{ROOM_MEMBER, is_state_event};

    #[test]
    fn member_and_name_are_state() {
        assert!(is_state_event(ROOM_MEMBER));
        assert!(is_state_event("m.room.name"));
        assert!(is_state_event("m.room.power_levels"));
    }

    #[test]
    fn messages_and_unknown_types_are_not_state() {
        assert!(!is_state_event("m.room.message"));
        assert!(!is_state_event("m.reaction"));
        assert!(!is_state_event(""));
        assert!(!is_state_event("org.example.custom"));
    }
}
