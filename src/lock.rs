/*
 * Copyright 2023-2025 the ocfl-store authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Per-object mutual exclusion for writers.
//!
//! Every mutating repository operation runs while holding the object's write
//! lock; readers never take locks and rely on the atomic root-inventory swap.
//! The lock is pluggable: [`InMemoryObjectLock`] serializes writers within a
//! process, and the `lock-sqlite` feature adds [`SqliteObjectLock`] for
//! coordinating multiple processes sharing a repository.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use static_assertions::assert_obj_safe;

use crate::error::{Error, Result};

/// The default time to wait for a lock before failing.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// The number of stripes guarding the in-memory lock table.
const STRIPE_COUNT: usize = 16;

/// An exclusive lease on an object. Dropping the guard releases the lock.
pub trait LockGuard: Send + Debug {}

/// A pluggable per-object write lock.
///
/// `acquire` blocks until the lease is granted or the implementation's
/// timeout elapses. Holding the returned guard is what makes the critical
/// section: callers perform the guarded work and then drop the guard.
pub trait ObjectLock: Send + Sync + Debug {
    /// Acquire an exclusive lease on `object_id`.
    ///
    /// # Errors
    /// - `Error::Lock`: The lease could not be acquired within the timeout.
    fn acquire(&self, object_id: &str) -> Result<Box<dyn LockGuard>>;
}

assert_obj_safe!(ObjectLock);

impl dyn ObjectLock {
    /// Run `task` while holding the write lock on `object_id`.
    pub fn do_in_write_lock<T>(&self, object_id: &str, task: impl FnOnce() -> Result<T>) -> Result<T> {
        let _guard = self.acquire(object_id)?;
        task()
    }
}

/// One lockable entry: a flag guarded by a mutex, with a condvar to wake
/// waiters on release.
#[derive(Debug, Default)]
struct LockEntry {
    held: Mutex<bool>,
    released: Condvar,
}

/// An [`ObjectLock`] that serializes writers within a single process.
///
/// Object IDs map to lock entries through a striped table so that unrelated
/// objects never contend on the same map mutex. Entries are retained for the
/// life of the lock; they are a few dozen bytes per distinct object ID.
#[derive(Debug)]
pub struct InMemoryObjectLock {
    timeout: Duration,
    stripes: Vec<Mutex<HashMap<String, Arc<LockEntry>>>>,
}

impl InMemoryObjectLock {
    /// Create a lock with the given acquisition timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            stripes: (0..STRIPE_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn entry(&self, object_id: &str) -> Arc<LockEntry> {
        let mut hasher = DefaultHasher::new();
        object_id.hash(&mut hasher);
        let stripe = &self.stripes[hasher.finish() as usize % STRIPE_COUNT];

        let mut entries = stripe.lock().unwrap();
        Arc::clone(entries.entry(object_id.to_owned()).or_default())
    }
}

impl Default for InMemoryObjectLock {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT)
    }
}

impl ObjectLock for InMemoryObjectLock {
    fn acquire(&self, object_id: &str) -> Result<Box<dyn LockGuard>> {
        let entry = self.entry(object_id);
        let deadline = Instant::now() + self.timeout;

        {
            let mut held = entry.held.lock().unwrap();
            while *held {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(Error::Lock(format!(
                        "failed to acquire lock for object {}",
                        object_id
                    )));
                }
                let (guard, result) = entry.released.wait_timeout(held, remaining).unwrap();
                held = guard;
                if result.timed_out() && *held {
                    return Err(Error::Lock(format!(
                        "failed to acquire lock for object {}",
                        object_id
                    )));
                }
            }
            *held = true;
        }

        Ok(Box::new(InMemoryGuard { entry }))
    }
}

#[derive(Debug)]
struct InMemoryGuard {
    entry: Arc<LockEntry>,
}

impl LockGuard for InMemoryGuard {}

impl Drop for InMemoryGuard {
    fn drop(&mut self) {
        let mut held = self.entry.held.lock().unwrap();
        *held = false;
        self.entry.released.notify_one();
    }
}

#[cfg(feature = "lock-sqlite")]
pub use self::sqlite::SqliteObjectLock;

#[cfg(feature = "lock-sqlite")]
mod sqlite {
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use rusqlite::Connection;

    use super::{LockGuard, ObjectLock};
    use crate::error::{Error, Result};

    /// An [`ObjectLock`] backed by a SQLite database, for coordinating
    /// multiple processes sharing one repository.
    ///
    /// Each acquisition opens a connection, upserts a row for the object, and
    /// holds an immediate transaction until the guard is dropped. SQLite's
    /// locking is database-wide rather than per-row, so distinct objects
    /// contend on the same lock; the busy timeout bounds the wait.
    #[derive(Debug)]
    pub struct SqliteObjectLock {
        db_path: PathBuf,
        timeout: Duration,
    }

    impl SqliteObjectLock {
        /// Create the lock database at `db_path` if needed.
        ///
        /// # Errors
        /// - `Error::Store`: The database could not be opened or initialized.
        pub fn new(db_path: &Path, timeout: Duration) -> Result<Self> {
            let connection = Connection::open(db_path).map_err(Error::store)?;
            connection
                .execute(
                    "CREATE TABLE IF NOT EXISTS ocfl_object_lock (object_id TEXT PRIMARY KEY)",
                    [],
                )
                .map_err(Error::store)?;

            Ok(Self {
                db_path: db_path.to_owned(),
                timeout,
            })
        }
    }

    impl ObjectLock for SqliteObjectLock {
        fn acquire(&self, object_id: &str) -> Result<Box<dyn LockGuard>> {
            let connection = Connection::open(&self.db_path).map_err(Error::store)?;
            connection
                .busy_timeout(self.timeout)
                .map_err(Error::store)?;

            connection
                .execute(
                    "INSERT OR IGNORE INTO ocfl_object_lock (object_id) VALUES (?1)",
                    [object_id],
                )
                .map_err(|error| translate_busy(error, object_id))?;

            connection
                .execute_batch("BEGIN IMMEDIATE")
                .map_err(|error| translate_busy(error, object_id))?;
            connection
                .execute(
                    "UPDATE ocfl_object_lock SET object_id = object_id WHERE object_id = ?1",
                    [object_id],
                )
                .map_err(|error| translate_busy(error, object_id))?;

            Ok(Box::new(SqliteGuard {
                connection: Some(connection),
            }))
        }
    }

    fn translate_busy(error: rusqlite::Error, object_id: &str) -> Error {
        if let rusqlite::Error::SqliteFailure(failure, _) = &error {
            if failure.code == rusqlite::ErrorCode::DatabaseBusy
                || failure.code == rusqlite::ErrorCode::DatabaseLocked
            {
                return Error::Lock(format!("failed to acquire lock for object {}", object_id));
            }
        }
        Error::store(error)
    }

    #[derive(Debug)]
    struct SqliteGuard {
        connection: Option<Connection>,
    }

    impl LockGuard for SqliteGuard {}

    impl Drop for SqliteGuard {
        fn drop(&mut self) {
            if let Some(connection) = self.connection.take() {
                if let Err(error) = connection.execute_batch("COMMIT") {
                    tracing::warn!("failed to release sqlite object lock: {}", error);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn acquire_and_release() -> anyhow::Result<()> {
        let lock = InMemoryObjectLock::new(Duration::from_millis(100));

        let guard = lock.acquire("obj-1")?;
        drop(guard);
        let guard = lock.acquire("obj-1")?;
        drop(guard);
        Ok(())
    }

    #[test]
    fn contention_times_out() -> anyhow::Result<()> {
        let lock = InMemoryObjectLock::new(Duration::from_millis(50));
        let _guard = lock.acquire("obj-1")?;

        let error = lock.acquire("obj-1").unwrap_err();
        assert!(matches!(error, Error::Lock(_)));
        Ok(())
    }

    #[test]
    fn different_objects_do_not_contend() -> anyhow::Result<()> {
        let lock = InMemoryObjectLock::new(Duration::from_millis(50));
        let _first = lock.acquire("obj-1")?;
        let _second = lock.acquire("obj-2")?;
        Ok(())
    }

    #[test]
    fn lock_serializes_critical_sections() -> anyhow::Result<()> {
        let lock = Arc::new(InMemoryObjectLock::new(Duration::from_secs(5)));
        let in_section = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = Arc::clone(&lock);
            let in_section = Arc::clone(&in_section);
            let max_seen = Arc::clone(&max_seen);

            handles.push(thread::spawn(move || {
                for _ in 0..20 {
                    let _guard = lock.acquire("obj-1").unwrap();
                    let now = in_section.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    in_section.fetch_sub(1, Ordering::SeqCst);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        Ok(())
    }
}
