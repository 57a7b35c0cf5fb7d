//! Canonical SQLite schema for the timeline cache.
//!
//! - `chunks` holds one row per contiguous timeline segment, including the
//!   four per-direction counters (NULL until first used)
//! - `timeline_events` is the linked, display-ordered sequence; the
//!   `(room_id, event_id)` key makes an event id unique across a room
//! - `chunk_state_events` holds out-of-band state owned by a chunk
//! - `read_receipts` keeps one row per user per room; the receipts attached
//!   to an event are derived by `event_id`, gated by the lazily created
//!   `read_receipt_summaries` row
//! - `cache_meta` tracks the schema version

/// Migration v1: chunks, events, receipts and cache metadata.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS chunks (
    chunk_id INTEGER PRIMARY KEY AUTOINCREMENT,
    room_id TEXT NOT NULL CHECK (length(room_id) > 0),
    prev_token TEXT,
    next_token TEXT,
    is_last_forward INTEGER NOT NULL DEFAULT 0 CHECK (is_last_forward IN (0, 1)),
    is_last_backward INTEGER NOT NULL DEFAULT 0 CHECK (is_last_backward IN (0, 1)),
    forwards_display_index INTEGER,
    backwards_display_index INTEGER,
    forwards_state_index INTEGER,
    backwards_state_index INTEGER,
    created_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS timeline_events (
    room_id TEXT NOT NULL,
    event_id TEXT NOT NULL CHECK (length(event_id) > 0),
    chunk_id INTEGER NOT NULL REFERENCES chunks(chunk_id) ON DELETE CASCADE,
    event_type TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    state_key TEXT,
    content_json TEXT,
    origin_server_ts INTEGER,
    display_index INTEGER NOT NULL,
    state_index INTEGER NOT NULL,
    is_state INTEGER NOT NULL CHECK (is_state IN (0, 1)),
    is_unlinked INTEGER NOT NULL DEFAULT 0 CHECK (is_unlinked IN (0, 1)),
    send_state TEXT NOT NULL DEFAULT 'synced',
    sender_name TEXT,
    sender_avatar TEXT,
    is_unique_display_name INTEGER NOT NULL DEFAULT 1 CHECK (is_unique_display_name IN (0, 1)),
    inserted_at_us INTEGER NOT NULL,
    PRIMARY KEY (room_id, event_id),
    UNIQUE (chunk_id, display_index)
);

CREATE TABLE IF NOT EXISTS chunk_state_events (
    chunk_id INTEGER NOT NULL REFERENCES chunks(chunk_id) ON DELETE CASCADE,
    room_id TEXT NOT NULL,
    event_id TEXT NOT NULL CHECK (length(event_id) > 0),
    event_type TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    state_key TEXT,
    content_json TEXT,
    origin_server_ts INTEGER,
    state_index INTEGER NOT NULL,
    is_unlinked INTEGER NOT NULL DEFAULT 1 CHECK (is_unlinked IN (0, 1)),
    send_state TEXT NOT NULL DEFAULT 'synced',
    inserted_at_us INTEGER NOT NULL,
    PRIMARY KEY (chunk_id, event_id)
);

CREATE TABLE IF NOT EXISTS read_receipts (
    room_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    event_id TEXT,
    origin_server_ts INTEGER NOT NULL DEFAULT 0,
    updated_at_us INTEGER NOT NULL,
    PRIMARY KEY (room_id, user_id)
);

CREATE TABLE IF NOT EXISTS read_receipt_summaries (
    room_id TEXT NOT NULL,
    event_id TEXT NOT NULL,
    created_at_us INTEGER NOT NULL,
    PRIMARY KEY (room_id, event_id)
);

CREATE TABLE IF NOT EXISTS cache_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL,
    created_at_us INTEGER NOT NULL DEFAULT 0
);

INSERT OR IGNORE INTO cache_meta (id, schema_version, created_at_us)
VALUES (1, 1, 0);
";

/// Migration v2: read-path indexes and annotation aggregates.
pub const MIGRATION_V2_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_chunks_room_created
    ON chunks(room_id, chunk_id);

CREATE INDEX IF NOT EXISTS idx_chunks_room_tokens
    ON chunks(room_id, prev_token, next_token);

CREATE INDEX IF NOT EXISTS idx_timeline_events_chunk_display
    ON timeline_events(chunk_id, display_index);

CREATE INDEX IF NOT EXISTS idx_timeline_events_chunk_state_lookup
    ON timeline_events(chunk_id, event_type, state_key, display_index);

CREATE INDEX IF NOT EXISTS idx_chunk_state_events_lookup
    ON chunk_state_events(chunk_id, event_type, state_key);

CREATE INDEX IF NOT EXISTS idx_read_receipts_event
    ON read_receipts(room_id, event_id);

CREATE TABLE IF NOT EXISTS annotation_summaries (
    room_id TEXT NOT NULL,
    event_id TEXT NOT NULL,
    created_at_us INTEGER NOT NULL,
    PRIMARY KEY (room_id, event_id)
);

CREATE TABLE IF NOT EXISTS reaction_aggregates (
    room_id TEXT NOT NULL,
    event_id TEXT NOT NULL,
    reaction_key TEXT NOT NULL CHECK (length(reaction_key) > 0),
    count INTEGER NOT NULL DEFAULT 0 CHECK (count >= 0),
    first_ts INTEGER NOT NULL,
    PRIMARY KEY (room_id, event_id, reaction_key),
    FOREIGN KEY (room_id, event_id)
        REFERENCES annotation_summaries(room_id, event_id) ON DELETE CASCADE
);

UPDATE cache_meta
SET schema_version = 2
WHERE id = 1;
";

/// Indexes expected by insertion and projection query paths.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_chunks_room_created",
    "idx_chunks_room_tokens",
    "idx_timeline_events_chunk_display",
    "idx_timeline_events_chunk_state_lookup",
    "idx_chunk_state_events_lookup",
    "idx_read_receipts_event",
];
