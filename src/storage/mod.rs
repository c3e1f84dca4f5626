//! Local store
//!
//! SQLite persistence for business entities, bindings, scan watermarks and
//! the job queue.
//!
//! # Units of work
//!
//! [`Store`] is a connection factory. Every job opens its own [`Session`]
//! (one connection) and brackets its work with `begin`/`commit`/`rollback`.
//! A second session opened mid-job sees only committed state, which is what
//! the importer's concurrent-creation recheck relies on.
//!
//! Advisory locks are kept in a companion database, see [`LockTable`].

mod bindings;
mod entities;
mod fields;
mod jobs;
mod locks;
mod schema;
mod timestamps;

pub use bindings::{Binding, BindingTable};
pub use entities::EntityTable;
pub use fields::{from_sql, same_resolved, to_sql, FieldValues};
pub use jobs::{Job, JobHandle, JobRecord, JobRequest, JobState, DEFAULT_JOB_PRIORITY, DEFAULT_MAX_RETRIES};
pub use locks::{LockInfo, LockTable};
pub use timestamps::SyncTimestamp;

use crate::{Result, SyncError};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Default time a connection waits for another writer
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Time a job's session waits for another writer before giving up
///
/// Job sessions hold their transaction across remote calls; a job blocked on
/// the write lock gives up after this long and is retried.
pub const JOB_BUSY_TIMEOUT: Duration = Duration::from_millis(250);

/// Default lifetime of an advisory lock
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(3600);

/// Connection factory for one database (plus its lock companion)
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
    locks_path: PathBuf,
    busy_timeout: Duration,
    job_busy_timeout: Duration,
    lock_ttl: Duration,
}

impl Store {
    /// Open (and initialize) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut locks_path = path.clone().into_os_string();
        locks_path.push(".locks");

        let store = Self {
            path,
            locks_path: PathBuf::from(locks_path),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            job_busy_timeout: JOB_BUSY_TIMEOUT,
            lock_ttl: DEFAULT_LOCK_TTL,
        };

        tracing::info!(path = %store.path.display(), "Opening sync database");

        let conn = store.connect(&store.path, store.busy_timeout)?;
        schema::init_data_schema(&conn)?;
        let locks = store.connect(&store.locks_path, store.busy_timeout)?;
        schema::init_locks_schema(&locks)?;

        Ok(store)
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn with_job_busy_timeout(mut self, timeout: Duration) -> Self {
        self.job_busy_timeout = timeout;
        self
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_ttl(&self) -> Duration {
        self.lock_ttl
    }

    fn connect(&self, path: &Path, busy_timeout: Duration) -> Result<Connection> {
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(busy_timeout)?;
        Ok(conn)
    }

    /// Open an independent unit-of-work handle
    pub fn session(&self) -> Result<Session> {
        Ok(Session {
            conn: Mutex::new(self.connect(&self.path, self.busy_timeout)?),
        })
    }

    /// Open the unit-of-work handle of one job
    ///
    /// Write lock contention surfaces after [`JOB_BUSY_TIMEOUT`] as a busy
    /// error, which the job runner retries without counting it.
    pub fn job_session(&self) -> Result<Session> {
        Ok(Session {
            conn: Mutex::new(self.connect(&self.path, self.job_busy_timeout)?),
        })
    }

    /// Open the lock table for one worker
    pub fn lock_table(&self, worker: &str) -> Result<LockTable> {
        let conn = self.connect(&self.locks_path, self.busy_timeout)?;
        Ok(LockTable::new(conn, worker, self.lock_ttl))
    }
}

/// One connection and its transaction state
///
/// The connection is guarded by a mutex so a session can be shared by the
/// importers of one job; the guard is never held across an `.await`.
#[derive(Debug)]
pub struct Session {
    conn: Mutex<Connection>,
}

impl Session {
    /// Run `f` with exclusive access to the connection
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| SyncError::Storage("session connection poisoned".to_string()))?;
        f(&conn)
    }

    /// True while a transaction is open
    pub fn in_transaction(&self) -> Result<bool> {
        self.with_conn(|conn| Ok(!conn.is_autocommit()))
    }

    pub fn begin(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch("BEGIN DEFERRED")?;
            Ok(())
        })
    }

    /// Begin a transaction holding the write lock from the start
    pub fn begin_immediate(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch("BEGIN IMMEDIATE")?;
            Ok(())
        })
    }

    pub fn commit(&self) -> Result<()> {
        self.with_conn(|conn| {
            if !conn.is_autocommit() {
                conn.execute_batch("COMMIT")?;
            }
            Ok(())
        })
    }

    pub fn rollback(&self) -> Result<()> {
        self.with_conn(|conn| {
            if !conn.is_autocommit() {
                conn.execute_batch("ROLLBACK")?;
            }
            Ok(())
        })
    }

    /// Commit what has been written so far and keep working in a new transaction
    pub fn commit_and_continue(&self) -> Result<()> {
        self.with_conn(|conn| {
            if !conn.is_autocommit() {
                conn.execute_batch("COMMIT; BEGIN DEFERRED")?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_both_databases() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("sync.db");
        let store = Store::open(&path).unwrap();

        assert!(path.exists());
        assert!(dir.path().join("nested").join("sync.db.locks").exists());
        assert_eq!(store.lock_ttl(), DEFAULT_LOCK_TTL);
    }

    #[test]
    fn test_transactions_are_isolated_between_sessions() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().join("sync.db")).unwrap();
        let writer = store.session().unwrap();
        let reader = store.session().unwrap();

        writer.begin().unwrap();
        assert!(writer.in_transaction().unwrap());
        writer
            .with_conn(|c| {
                c.execute(
                    "INSERT INTO users (login, name) VALUES ('ann', 'Ann')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();

        let count = |s: &Session| {
            s.with_conn(|c| {
                Ok(c.query_row("SELECT COUNT(*) FROM users", [], |r| r.get::<_, i64>(0))?)
            })
            .unwrap()
        };
        assert_eq!(count(&reader), 0);

        writer.commit_and_continue().unwrap();
        assert!(writer.in_transaction().unwrap());
        assert_eq!(count(&reader), 1);

        writer.rollback().unwrap();
        assert!(!writer.in_transaction().unwrap());
        assert_eq!(count(&reader), 1);
    }
}
