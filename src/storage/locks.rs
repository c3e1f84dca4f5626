//! Advisory locks
//!
//! Keyed mutual exclusion shared by every worker through the companion lock
//! database. Writes run in autocommit mode, so a lock is visible to other
//! workers as soon as it is taken, independently of the job's data
//! transaction.
//!
//! - Locks are non-blocking: `try_acquire` never waits
//! - Locks expire after a TTL so a crashed worker cannot wedge a key
//! - A holder may re-acquire a key it already holds
//! - Everything a holder took is dropped by [`LockTable::release_all`]

use crate::{Result, SyncError};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

static HOLDER_SEQ: AtomicU64 = AtomicU64::new(0);

/// Information about a held lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    pub key: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Lock handle of one job runner
#[derive(Debug)]
pub struct LockTable {
    conn: Mutex<Connection>,
    holder: String,
    ttl: Duration,
    held: Mutex<Vec<String>>,
}

impl LockTable {
    pub(crate) fn new(conn: Connection, worker: &str, ttl: Duration) -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        let seq = HOLDER_SEQ.fetch_add(1, Ordering::Relaxed);

        Self {
            conn: Mutex::new(conn),
            holder: format!("{}:{}:{}:{}", host, std::process::id(), worker, seq),
            ttl,
            held: Mutex::new(Vec::new()),
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| SyncError::Storage("lock connection poisoned".to_string()))?;
        f(&conn)
    }

    fn held(&self) -> Result<std::sync::MutexGuard<'_, Vec<String>>> {
        self.held
            .lock()
            .map_err(|_| SyncError::Storage("lock registry poisoned".to_string()))
    }

    /// Try to take `key` without waiting
    ///
    /// Returns `false` when another holder owns an unexpired lock on it.
    pub fn try_acquire(&self, key: &str) -> Result<bool> {
        if self.held()?.iter().any(|k| k == key) {
            return Ok(true);
        }

        let now = Utc::now().timestamp_millis();
        let expires = now + self.ttl.as_millis() as i64;

        let acquired = self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM advisory_locks WHERE key = ?1 AND expires_at < ?2",
                params![key, now],
            )?;
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO advisory_locks (key, holder, acquired_at, expires_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![key, self.holder, now, expires],
            )?;
            Ok(inserted == 1)
        })?;

        if acquired {
            self.held()?.push(key.to_string());
            tracing::trace!(key = %key, holder = %self.holder, "Lock acquired");
        } else {
            tracing::debug!(key = %key, "Lock held by another worker");
        }
        Ok(acquired)
    }

    /// Take `key` or fail with a retryable contention error
    pub fn acquire_or_retry(&self, key: &str, what: &str) -> Result<()> {
        if self.try_acquire(key)? {
            Ok(())
        } else {
            crate::daemon::metrics::record_lock_contention(key);
            Err(SyncError::contention(format!(
                "{} is being processed by another worker ({})",
                what, key
            )))
        }
    }

    pub fn release(&self, key: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM advisory_locks WHERE key = ?1 AND holder = ?2",
                params![key, self.holder],
            )?;
            Ok(())
        })?;
        self.held()?.retain(|k| k != key);
        Ok(())
    }

    /// Drop every lock this holder took
    pub fn release_all(&self) -> Result<usize> {
        let released = self.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM advisory_locks WHERE holder = ?1",
                params![self.holder],
            )?)
        })?;
        self.held()?.clear();
        Ok(released)
    }

    pub fn active_locks(&self) -> Result<Vec<LockInfo>> {
        let now = Utc::now().timestamp_millis();
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT key, holder, acquired_at, expires_at FROM advisory_locks \
                 WHERE expires_at >= ?1 ORDER BY key",
            )?;
            let rows = stmt.query_map(params![now], |row| {
                Ok(LockInfo {
                    key: row.get(0)?,
                    holder: row.get(1)?,
                    acquired_at: crate::integrations::ms_to_datetime(row.get(2)?),
                    expires_at: crate::integrations::ms_to_datetime(row.get(3)?),
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    pub fn cleanup_expired(&self) -> Result<usize> {
        let now = Utc::now().timestamp_millis();
        self.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM advisory_locks WHERE expires_at < ?1",
                params![now],
            )?)
        })
    }
}
