use std::fmt;

use crate::lock::LockError;
use crate::timeline::ChunkId;

/// Machine-readable error codes for callers that branch on failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    CacheNotFound,
    ConfigParseError,
    ChunkNotFound,
    EventNotFound,
    IntegrityViolation,
    CorruptCache,
    StorageFailure,
    LockContention,
    LockPoisoned,
    ReadOnlyCache,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::CacheNotFound => "E1001",
            Self::ConfigParseError => "E1002",
            Self::ChunkNotFound => "E2001",
            Self::EventNotFound => "E2002",
            Self::IntegrityViolation => "E3001",
            Self::CorruptCache => "E3003",
            Self::StorageFailure => "E5001",
            Self::LockContention => "E5002",
            Self::LockPoisoned => "E5003",
            Self::ReadOnlyCache => "E5004",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::CacheNotFound => "Timeline cache not found",
            Self::ConfigParseError => "Config file parse error",
            Self::ChunkNotFound => "Chunk not found",
            Self::EventNotFound => "Event not found",
            Self::IntegrityViolation => "Timeline integrity violation",
            Self::CorruptCache => "Corrupt SQLite cache",
            Self::StorageFailure => "Storage operation failed",
            Self::LockContention => "Lock contention",
            Self::LockPoisoned => "Room write lock poisoned",
            Self::ReadOnlyCache => "Cache opened read-only",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::CacheNotFound => Some("Pass --cache or set ROOMLINE_CACHE_DIR."),
            Self::ConfigParseError => Some("Fix syntax in roomline.toml and retry."),
            Self::ChunkNotFound => Some("List chunks with `rl chunks <room>`."),
            Self::EventNotFound => None,
            Self::IntegrityViolation => {
                Some("The write was rolled back. Re-sync the room if the condition persists.")
            }
            Self::CorruptCache => Some("Delete the cache directory; it is rebuilt by sync."),
            Self::StorageFailure => Some("Check disk space and write permissions."),
            Self::LockContention => {
                Some("Retry after the other process releases the cache lock.")
            }
            Self::LockPoisoned => Some("Restart the process; a writer panicked mid-transaction."),
            Self::ReadOnlyCache => Some("Open the cache without --read-only to write."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Errors raised by timeline store operations.
///
/// Redelivered events and events without an id are not errors; they are
/// reported through [`crate::timeline::InsertOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum TimelineError {
    /// A write would break a timeline invariant. The transaction is rolled
    /// back and prior state is left intact.
    #[error("integrity violation in room {room_id}: {detail}")]
    IntegrityViolation { room_id: String, detail: String },

    #[error("chunk {0} not found")]
    ChunkNotFound(ChunkId),

    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),

    #[error("cache is open read-only")]
    ReadOnly,

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    /// No pooled connection became free within the busy timeout.
    #[error("connection pool: {0}")]
    Pool(#[from] r2d2::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TimelineError {
    pub(crate) fn integrity(room_id: &str, detail: impl Into<String>) -> Self {
        Self::IntegrityViolation {
            room_id: room_id.to_string(),
            detail: detail.into(),
        }
    }

    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::IntegrityViolation { .. } => ErrorCode::IntegrityViolation,
            Self::ChunkNotFound(_) => ErrorCode::ChunkNotFound,
            Self::LockPoisoned(_) => ErrorCode::LockPoisoned,
            Self::ReadOnly => ErrorCode::ReadOnlyCache,
            Self::Lock(err) => err.code(),
            Self::Sqlite(rusqlite::Error::SqliteFailure(failure, _))
                if matches!(
                    failure.code,
                    rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase
                ) =>
            {
                ErrorCode::CorruptCache
            }
            Self::Sqlite(_) | Self::Pool(_) => ErrorCode::StorageFailure,
            Self::Json(_) => ErrorCode::InternalUnexpected,
        }
    }

    /// Returns `true` when the underlying SQLite failure is a constraint
    /// violation (unique key, foreign key, check).
    #[must_use]
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            Self::Sqlite(rusqlite::Error::SqliteFailure(failure, _))
                if failure.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

pub type Result<T, E = TimelineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::{ErrorCode, TimelineError};
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            ErrorCode::CacheNotFound,
            ErrorCode::ConfigParseError,
            ErrorCode::ChunkNotFound,
            ErrorCode::EventNotFound,
            ErrorCode::IntegrityViolation,
            ErrorCode::CorruptCache,
            ErrorCode::StorageFailure,
            ErrorCode::LockContention,
            ErrorCode::LockPoisoned,
            ErrorCode::ReadOnlyCache,
            ErrorCode::InternalUnexpected,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = ErrorCode::IntegrityViolation.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn integrity_violation_display_names_room() {
        let err = TimelineError::integrity("!room:example.org", "event in two chunks");
        assert_eq!(err.code(), ErrorCode::IntegrityViolation);
        assert!(err.to_string().contains("!room:example.org"));
        assert!(err.code().hint().is_some());
    }

    #[test]
    fn constraint_failures_are_detected() {
        let conn = rusqlite::Connection::open_in_memory().expect("open");
        conn.execute_batch("CREATE TABLE t (id TEXT PRIMARY KEY); INSERT INTO t VALUES ('a');")
            .expect("setup");
        let err: TimelineError = conn
            .execute("INSERT INTO t VALUES ('a')", [])
            .expect_err("duplicate key")
            .into();
        assert!(err.is_constraint_violation());
        assert_eq!(err.code(), ErrorCode::StorageFailure);
    }
}
