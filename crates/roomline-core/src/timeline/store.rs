//! The timeline store: a cache directory, its connection pool, per-room
//! write serialization and the change feed.
//!
//! Writes run through [`TimelineStore::write`]:
//! 1. lock the room's in-process mutex,
//! 2. check out a pooled connection,
//! 3. begin an `IMMEDIATE` transaction and hand the caller a [`RoomTxn`],
//! 4. commit on `Ok`, roll back on `Err` or unwind,
//! 5. publish a [`RoomChange`] once the commit is durable.
//!
//! Reads run through [`TimelineStore::read`] inside one deferred
//! transaction, i.e. one WAL snapshot.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::PoisonError;
use std::sync::mpsc::Receiver;

use anyhow::{Context, bail};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::db::pool::{ConnectionPool, open_pool};
use crate::db::{CACHE_DB_FILE, configure_connection, migrations, open_cache};
use crate::error::{ErrorCode, Result, TimelineError};
use crate::event::{Event, PaginationDirection};
use crate::lock::{CacheLock, LockMode, RoomLocks};

use super::chunk::{self, DeleteReport, MergeReport, NewChunk};
use super::notify::{ChangeFeed, RoomChange};
use super::txn::RoomTxn;
use super::{ChunkId, InsertOutcome, receipts};

/// Where a pagination batch goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkTarget {
    Existing(ChunkId),
    New(NewChunk),
}

/// One pagination or sync response for a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginationBatch {
    pub room_id: String,
    pub target: ChunkTarget,
    pub direction: PaginationDirection,
    /// In delivery order.
    #[serde(default)]
    pub events: Vec<Event>,
    /// Out-of-band state for the target chunk.
    #[serde(default)]
    pub state_events: Vec<Event>,
    #[serde(default)]
    pub state_index_offset: Option<i64>,
}

/// Tally of one ingested batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub chunk_id: Option<ChunkId>,
    pub inserted: usize,
    pub duplicates: usize,
    pub missing_ids: usize,
    pub state_inserted: usize,
    pub pruned: Vec<ChunkId>,
}

impl IngestReport {
    fn count(&mut self, outcome: InsertOutcome) {
        match outcome {
            InsertOutcome::Inserted(_) => self.inserted += 1,
            InsertOutcome::Duplicate => self.duplicates += 1,
            InsertOutcome::MissingEventId => self.missing_ids += 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// A timeline cache rooted at one directory.
#[derive(Debug)]
pub struct TimelineStore {
    cache_dir: PathBuf,
    db_path: PathBuf,
    config: CacheConfig,
    pool: ConnectionPool,
    rooms: RoomLocks,
    feed: ChangeFeed,
    mode: LockMode,
    process_lock: Option<CacheLock>,
}

fn lock_path(db_path: &Path) -> PathBuf {
    let mut raw = OsString::from(db_path.as_os_str());
    raw.push(".lock");
    PathBuf::from(raw)
}

impl TimelineStore {
    /// Open (creating if needed) the cache in `cache_dir` for writing.
    ///
    /// # Errors
    ///
    /// Returns an error if the process lock cannot be taken or the database
    /// cannot be opened or migrated.
    pub fn open(cache_dir: &Path, config: CacheConfig) -> anyhow::Result<Self> {
        Self::open_with_mode(cache_dir, config, LockMode::Exclusive)
    }

    /// Open an existing cache for reading only. Writes fail with
    /// [`TimelineError::ReadOnly`].
    ///
    /// # Errors
    ///
    /// Returns an error if the cache does not exist, its schema is older
    /// than this build, or the shared process lock cannot be taken.
    pub fn open_read_only(cache_dir: &Path, config: CacheConfig) -> anyhow::Result<Self> {
        Self::open_with_mode(cache_dir, config, LockMode::Shared)
    }

    /// Open the cache with an explicit process lock mode.
    ///
    /// # Errors
    ///
    /// See [`TimelineStore::open`] and [`TimelineStore::open_read_only`].
    pub fn open_with_mode(cache_dir: &Path, config: CacheConfig, mode: LockMode) -> anyhow::Result<Self> {
        let db_path = cache_dir.join(CACHE_DB_FILE);
        let storage = &config.storage;

        if mode == LockMode::Shared && !db_path.exists() {
            bail!(
                "{}: {} at {}",
                ErrorCode::CacheNotFound.code(),
                ErrorCode::CacheNotFound.message(),
                db_path.display()
            );
        }

        let process_lock = if storage.process_lock {
            Some(
                CacheLock::acquire(&lock_path(&db_path), storage.lock_timeout(), mode)
                    .with_context(|| format!("lock cache {}", cache_dir.display()))?,
            )
        } else {
            None
        };

        match mode {
            LockMode::Exclusive => drop(open_cache(&db_path, storage.busy_timeout())?),
            LockMode::Shared => {
                let conn = Connection::open(&db_path)
                    .with_context(|| format!("open cache database {}", db_path.display()))?;
                configure_connection(&conn, storage.busy_timeout())
                    .context("configure sqlite pragmas")?;
                let version = migrations::current_schema_version(&conn)?;
                if version < migrations::LATEST_SCHEMA_VERSION {
                    bail!(
                        "cache schema v{version} is older than v{}; open it writable once to migrate",
                        migrations::LATEST_SCHEMA_VERSION
                    );
                }
            }
        }

        let pool = open_pool(&db_path, storage.busy_timeout(), storage.pool_size)
            .with_context(|| format!("open connection pool for {}", db_path.display()))?;

        info!(
            path = %db_path.display(),
            read_only = mode == LockMode::Shared,
            "opened timeline cache"
        );

        Ok(Self {
            cache_dir: cache_dir.to_path_buf(),
            db_path,
            config,
            pool,
            rooms: RoomLocks::new(),
            feed: ChangeFeed::new(),
            mode,
            process_lock,
        })
    }

    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.mode == LockMode::Shared
    }

    /// Whether this store holds the cross-process cache lock.
    #[must_use]
    pub const fn holds_process_lock(&self) -> bool {
        self.process_lock.is_some()
    }

    /// Run `f` in one write transaction for `room_id`.
    ///
    /// Writers to the same room are serialized; other rooms proceed in
    /// parallel. The transaction commits iff `f` returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns the closure's error, or an error if the store is read-only,
    /// a lock is poisoned, or SQLite fails to begin or commit.
    pub fn write<T, F>(&self, room_id: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut RoomTxn<'_>) -> Result<T>,
    {
        if self.is_read_only() {
            return Err(TimelineError::ReadOnly);
        }

        let room_lock = self
            .rooms
            .room(room_id)
            .ok_or(TimelineError::LockPoisoned("room registry"))?;
        // A panicking writer's transaction rolled back on unwind, so the
        // guarded state is still consistent.
        let _guard = room_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut conn = self.pool.get()?;
        let mut txn = RoomTxn::begin(&mut conn, room_id)?;
        let value = f(&mut txn)?;
        let kinds = txn.commit()?;

        if !kinds.is_empty() {
            let delivered = self.feed.publish(&RoomChange {
                room_id: room_id.to_string(),
                kinds,
            });
            debug!(room_id, delivered, "published room change");
        }
        Ok(value)
    }

    /// Run `f` against one consistent snapshot.
    ///
    /// # Errors
    ///
    /// Returns the closure's error or an error if SQLite fails.
    pub fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.finish()?;
        Ok(value)
    }

    /// Subscribe to committed changes, optionally for one room only.
    pub fn subscribe(&self, room_id: Option<&str>) -> Receiver<RoomChange> {
        self.feed.subscribe(room_id)
    }

    /// Apply one pagination batch.
    ///
    /// The target chunk is resolved (or created) together with the batch's
    /// out-of-band state in one transaction; then every event is committed
    /// in its own transaction, so an abandoned batch keeps what it already
    /// applied and a retry deduplicates.
    ///
    /// # Errors
    ///
    /// Stops at the first error, e.g. an integrity violation; events before
    /// it stay committed.
    pub fn ingest(&self, batch: &PaginationBatch) -> Result<IngestReport> {
        let room_id = batch.room_id.as_str();
        let mut report = IngestReport::default();

        let (chunk_id, state_inserted) = self.write(room_id, |txn| {
            let chunk_id = match &batch.target {
                ChunkTarget::Existing(chunk_id) => {
                    chunk::load_chunk(txn.conn(), room_id, *chunk_id)?.chunk_id
                }
                ChunkTarget::New(new) => chunk::create_chunk(txn, new)?.chunk_id,
            };
            let mut state_inserted = 0;
            for event in &batch.state_events {
                if txn.insert_state_event(chunk_id, event)?.is_inserted() {
                    state_inserted += 1;
                }
            }
            Ok((chunk_id, state_inserted))
        })?;
        report.chunk_id = Some(chunk_id);
        report.state_inserted = state_inserted;

        let offset = batch.state_index_offset.unwrap_or(0);
        for event in &batch.events {
            let outcome = self
                .write(room_id, |txn| {
                    txn.insert_event(chunk_id, event, batch.direction, offset, false)
                })
                .inspect_err(|err| {
                    warn!(
                        room_id,
                        chunk_id = %chunk_id,
                        event_id = event.id().unwrap_or("-"),
                        error = %err,
                        "aborting batch"
                    );
                })?;
            report.count(outcome);
        }

        let retention = &self.config.retention;
        if let (true, Some(max_chunks)) = (retention.prune_on_ingest, retention.max_chunks_per_room) {
            report.pruned = self.prune(room_id, max_chunks)?;
        }

        info!(
            room_id,
            chunk_id = %chunk_id,
            direction = %batch.direction,
            inserted = report.inserted,
            duplicates = report.duplicates,
            missing_ids = report.missing_ids,
            state_inserted = report.state_inserted,
            pruned = report.pruned.len(),
            "ingested batch"
        );
        Ok(report)
    }

    /// Cascade-delete one chunk.
    ///
    /// # Errors
    ///
    /// See [`chunk::delete_chunk`].
    pub fn delete_chunk(&self, room_id: &str, chunk_id: ChunkId) -> Result<DeleteReport> {
        self.write(room_id, |txn| chunk::delete_chunk(txn, chunk_id))
    }

    /// Fold `source` into `target`.
    ///
    /// # Errors
    ///
    /// See [`chunk::merge_chunks`].
    pub fn merge(
        &self,
        room_id: &str,
        target: ChunkId,
        source: ChunkId,
        direction: PaginationDirection,
    ) -> Result<MergeReport> {
        self.write(room_id, |txn| chunk::merge_chunks(txn, target, source, direction))
    }

    /// Evict the oldest non-live chunks beyond `max_chunks`.
    ///
    /// # Errors
    ///
    /// See [`chunk::prune_room`].
    pub fn prune(&self, room_id: &str, max_chunks: usize) -> Result<Vec<ChunkId>> {
        self.write(room_id, |txn| chunk::prune_room(txn, max_chunks))
    }

    /// Apply an explicit read receipt from sync.
    ///
    /// # Errors
    ///
    /// See [`receipts::record_receipt`].
    pub fn record_receipt(&self, room_id: &str, user_id: &str, event_id: &str, ts: i64) -> Result<bool> {
        self.write(room_id, |txn| receipts::record_receipt(txn, user_id, event_id, ts))
    }
}

#[cfg(test)]
mod tests {
    use super::{ChunkTarget, PaginationBatch, TimelineStore};
    use crate::config::CacheConfig;
    use crate::error::TimelineError;
    use crate::event::PaginationDirection::Forwards;
    use crate::timeline::chunk::{NewChunk, list_chunks};
    use crate::timeline::testing::{ROOM, message, state};
    use crate::timeline::{ChangeKind, ChunkId};

    fn store() -> (tempfile::TempDir, TimelineStore) {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = TimelineStore::open(dir.path(), CacheConfig::default()).expect("open store");
        (dir, store)
    }

    fn batch(events: Vec<crate::event::Event>) -> PaginationBatch {
        PaginationBatch {
            room_id: ROOM.into(),
            target: ChunkTarget::New(NewChunk {
                is_last_forward: true,
                ..NewChunk::default()
            }),
            direction: Forwards,
            events,
            state_events: vec![state("$name", "m.room.name", "", 1)],
            state_index_offset: None,
        }
    }

    #[test]
    fn ingest_counts_outcomes() {
        let (_dir, store) = store();
        let mut no_id = message("$x", "@u:x", 3);
        no_id.event_id = None;

        let report = store
            .ingest(&batch(vec![
                message("$a", "@u:x", 1),
                message("$b", "@u:x", 2),
                message("$a", "@u:x", 1),
                no_id,
            ]))
            .expect("ingest");

        assert_eq!(report.inserted, 2);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.missing_ids, 1);
        assert_eq!(report.state_inserted, 1);
        assert!(report.chunk_id.is_some());
    }

    #[test]
    fn ingest_into_existing_chunk_continues_counters() {
        let (_dir, store) = store();
        let first = store.ingest(&batch(vec![message("$a", "@u:x", 1)])).expect("first");
        let chunk_id = first.chunk_id.expect("chunk");

        let mut next = batch(vec![message("$b", "@u:x", 2)]);
        next.target = ChunkTarget::Existing(chunk_id);
        next.state_events.clear();
        store.ingest(&next).expect("second");

        let chunks = store.read(|conn| list_chunks(conn, ROOM)).expect("read");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].cursor.forwards.display_index, Some(2));
    }

    #[test]
    fn failed_write_rolls_back_and_publishes_nothing() {
        let (_dir, store) = store();
        let changes = store.subscribe(Some(ROOM));

        let err = store
            .write(ROOM, |txn| {
                crate::timeline::chunk::create_chunk(txn, &NewChunk::default())?;
                Err::<(), _>(TimelineError::ChunkNotFound(ChunkId(7)))
            })
            .expect_err("closure error propagates");
        assert!(matches!(err, TimelineError::ChunkNotFound(_)));

        assert!(store.read(|conn| list_chunks(conn, ROOM)).expect("read").is_empty());
        assert!(changes.try_recv().is_err());
    }

    #[test]
    fn committed_write_notifies_subscribers() {
        let (_dir, store) = store();
        let changes = store.subscribe(Some(ROOM));
        store.ingest(&batch(vec![message("$a", "@u:x", 1)])).expect("ingest");

        let kinds: Vec<ChangeKind> = changes.try_iter().flat_map(|c| c.kinds).collect();
        assert!(kinds.contains(&ChangeKind::Chunks));
        assert!(kinds.contains(&ChangeKind::Timeline));
        assert!(kinds.contains(&ChangeKind::Receipts));
    }

    #[test]
    fn read_only_store_rejects_writes() {
        let (dir, store) = store();
        drop(store);

        let reader = TimelineStore::open_read_only(dir.path(), CacheConfig::default())
            .expect("open read-only");
        let err = reader
            .write(ROOM, |_| Ok(()))
            .expect_err("writes are refused");
        assert!(matches!(err, TimelineError::ReadOnly));
    }

    #[test]
    fn read_only_open_of_missing_cache_fails() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = TimelineStore::open_read_only(dir.path(), CacheConfig::default())
            .expect_err("missing cache");
        assert!(err.to_string().contains("E1001"));
    }

    #[test]
    fn second_writer_process_lock_times_out() {
        let (dir, store) = store();
        assert!(store.holds_process_lock());
        let mut config = CacheConfig::default();
        config.storage.lock_timeout_ms = 20;
        assert!(TimelineStore::open(dir.path(), config).is_err());
    }

    #[test]
    fn process_lock_can_be_disabled() {
        let (dir, first) = store();
        drop(first);

        let mut config = CacheConfig::default();
        config.storage.process_lock = false;
        let a = TimelineStore::open(dir.path(), config.clone()).expect("first unlocked open");
        let b = TimelineStore::open(dir.path(), config).expect("second unlocked open");
        assert!(!a.holds_process_lock());
        assert!(!b.holds_process_lock());
    }
}
