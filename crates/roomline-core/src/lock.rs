//! Locks guarding the timeline cache.
//!
//! Two layers:
//! - [`CacheLock`]: advisory file lock on `<db>.lock` so two processes never
//!   write the same cache. Writers hold it exclusively, read-only opens
//!   share it.
//! - [`RoomLocks`]: in-process registry of per-room write mutexes. Every
//!   mutation of a room's chunks runs while holding that room's mutex, so
//!   chunk counters are never read and written by two writers at once.

use crate::error::ErrorCode;
use fs2::FileExt;
use std::{
    collections::HashMap,
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, Weak},
    thread,
    time::{Duration, Instant},
};

/// Advisory lock errors for the cache lock file.
#[derive(Debug)]
pub enum LockError {
    Timeout { path: PathBuf, waited: Duration },
    IoError(io::Error),
}

impl From<io::Error> for LockError {
    fn from(err: io::Error) -> Self {
        Self::IoError(err)
    }
}

impl LockError {
    /// Machine-readable code associated with this lock error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::LockContention,
            Self::IoError(_) => ErrorCode::StorageFailure,
        }
    }

    /// Optional remediation hint for operators.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout { path, waited } => {
                write!(
                    f,
                    "{}: cache lock timed out after {:?} at {}",
                    self.code().code(),
                    waited,
                    path.display()
                )
            }
            Self::IoError(err) => write!(f, "{}: {}", self.code().code(), err),
        }
    }
}

impl std::error::Error for LockError {}

/// Whether a [`CacheLock`] excludes other holders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// RAII guard for the process-level cache lock.
#[derive(Debug)]
pub struct CacheLock {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl CacheLock {
    /// Acquire the lock file at `path`, polling until `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] if another process holds an
    /// incompatible lock for longer than `timeout`.
    pub fn acquire(path: &Path, timeout: Duration, mode: LockMode) -> Result<Self, LockError> {
        let parent = path.parent().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "lock path has no parent")
        })?;
        fs::create_dir_all(parent)?;

        let start = Instant::now();
        loop {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(path)?;

            let contended = match mode {
                LockMode::Shared => file.try_lock_shared().is_err(),
                LockMode::Exclusive => file.try_lock_exclusive().is_err(),
            };

            if !contended {
                return Ok(Self {
                    file,
                    path: path.to_path_buf(),
                    mode,
                });
            }

            if start.elapsed() >= timeout {
                return Err(LockError::Timeout {
                    path: path.to_path_buf(),
                    waited: start.elapsed(),
                });
            }

            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Explicitly release the lock. Release also happens automatically on drop.
    pub fn release(self) {
        drop(self);
    }

    /// Return the lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Registry of per-room write mutexes.
///
/// Entries are weak so rooms nobody writes to anymore do not pin memory;
/// dead entries are pruned when the map grows.
#[derive(Debug, Default)]
pub struct RoomLocks {
    locks: Mutex<HashMap<String, Weak<Mutex<()>>>>,
}

impl RoomLocks {
    const PRUNE_THRESHOLD: usize = 128;

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the write mutex for `room_id`, creating it on first use.
    ///
    /// Callers lock the returned mutex for the duration of one write.
    /// Returns `None` only when the registry mutex itself is poisoned.
    pub fn room(&self, room_id: &str) -> Option<Arc<Mutex<()>>> {
        let mut locks = self.locks.lock().ok()?;

        if locks.len() > Self::PRUNE_THRESHOLD {
            locks.retain(|_, weak| weak.strong_count() > 0);
        }

        if let Some(existing) = locks.get(room_id).and_then(Weak::upgrade) {
            return Some(existing);
        }

        let lock = Arc::new(Mutex::new(()));
        let _ = locks.insert(room_id.to_string(), Arc::downgrade(&lock));
        Some(lock)
    }

    /// Number of rooms with a live write mutex.
    #[must_use]
    pub fn live_rooms(&self) -> usize {
        self.locks
            .lock()
            .map(|locks| locks.values().filter(|weak| weak.strong_count() > 0).count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheLock, LockError, LockMode, RoomLocks};
    use crate::error::ErrorCode;
    use std::{
        path::PathBuf,
        sync::{Arc, Barrier},
        thread,
        time::Duration,
    };

    fn lock_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push("roomline_lock_tests");
        path.push(name);
        path
    }

    #[test]
    fn exclusive_lock_allows_acquire_and_release() -> Result<(), LockError> {
        let path = lock_path("basic.lock");
        let lock = CacheLock::acquire(&path, Duration::from_millis(50), LockMode::Exclusive)?;
        assert_eq!(lock.path(), path.as_path());
        assert_eq!(lock.mode(), LockMode::Exclusive);
        lock.release();
        Ok(())
    }

    #[test]
    fn exclusive_lock_times_out_when_held() {
        let path = lock_path("timeout.lock");
        let _guard =
            CacheLock::acquire(&path, Duration::from_millis(50), LockMode::Exclusive).unwrap();
        let err = CacheLock::acquire(&path, Duration::from_millis(20), LockMode::Exclusive)
            .unwrap_err();

        assert!(matches!(err, LockError::Timeout { path: p, .. } if p == path));
    }

    #[test]
    fn lock_error_maps_to_machine_code() {
        let timeout = LockError::Timeout {
            path: lock_path("code.lock"),
            waited: Duration::from_millis(10),
        };
        assert_eq!(timeout.code(), ErrorCode::LockContention);
        assert!(timeout.hint().is_some());
    }

    #[test]
    fn shared_locks_are_compatible() -> Result<(), LockError> {
        let path = lock_path("read-share.lock");
        let first = CacheLock::acquire(&path, Duration::from_millis(50), LockMode::Shared)?;
        let second = CacheLock::acquire(&path, Duration::from_millis(50), LockMode::Shared)?;

        first.release();
        second.release();
        Ok(())
    }

    #[test]
    fn writer_blocks_shared_holder_until_released() -> Result<(), LockError> {
        let path = lock_path("thread.lock");

        let blocker = Arc::new(Barrier::new(2));
        let waiter = Arc::new(Barrier::new(2));

        let blocker_thread = Arc::clone(&blocker);
        let waiter_thread = Arc::clone(&waiter);
        let path_in_thread = path.clone();
        let handle = thread::spawn(move || {
            let _writer = CacheLock::acquire(
                &path_in_thread,
                Duration::from_millis(200),
                LockMode::Exclusive,
            )
            .unwrap();
            blocker_thread.wait();
            waiter_thread.wait();
        });

        blocker.wait();
        assert!(matches!(
            CacheLock::acquire(&path, Duration::from_millis(20), LockMode::Shared),
            Err(LockError::Timeout { .. })
        ));
        waiter.wait();
        handle.join().unwrap();

        let follow_up = CacheLock::acquire(&path, Duration::from_millis(50), LockMode::Exclusive)?;
        follow_up.release();
        Ok(())
    }

    #[test]
    fn room_locks_are_shared_per_room() {
        let locks = RoomLocks::new();
        let a1 = locks.room("!a:x").unwrap();
        let a2 = locks.room("!a:x").unwrap();
        let b = locks.room("!b:x").unwrap();

        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
        assert_eq!(locks.live_rooms(), 2);

        drop(b);
        assert_eq!(locks.live_rooms(), 1);
    }

    #[test]
    fn room_lock_serializes_writers() {
        let locks = Arc::new(RoomLocks::new());
        let counter = Arc::new(std::sync::Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..4)
            .map(|n| {
                let locks = Arc::clone(&locks);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    let room = locks.room("!busy:x").unwrap();
                    let _guard = room.lock().unwrap();
                    let len = counter.lock().unwrap().len();
                    thread::sleep(Duration::from_millis(5));
                    counter.lock().unwrap().push((n, len));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let seen = counter.lock().unwrap();
        let mut lens: Vec<_> = seen.iter().map(|(_, len)| *len).collect();
        lens.sort_unstable();
        assert_eq!(lens, vec![0, 1, 2, 3]);
    }
}
