//! Scan watermarks

use super::Session;
use crate::integrations::ms_to_datetime;
use crate::Result;
use chrono::{DateTime, Utc};
use rusqlite::params;

/// Persisted "processed up to" point of one incremental scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTimestamp {
    pub id: i64,
    pub backend_id: String,
    pub scan_name: String,
    pub scan_kind: String,
    pub last_timestamp: DateTime<Utc>,
}

impl Session {
    /// Watermark row of a scan, created at the epoch on first use
    pub fn sync_timestamp(
        &self,
        backend_id: &str,
        scan_name: &str,
        scan_kind: &str,
    ) -> Result<SyncTimestamp> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO sync_timestamps (backend_id, scan_name, scan_kind, last_timestamp) \
                 VALUES (?1, ?2, ?3, 0)",
                params![backend_id, scan_name, scan_kind],
            )?;
            let (id, last): (i64, i64) = conn.query_row(
                "SELECT id, last_timestamp FROM sync_timestamps \
                 WHERE backend_id = ?1 AND scan_name = ?2 AND scan_kind = ?3",
                params![backend_id, scan_name, scan_kind],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(SyncTimestamp {
                id,
                backend_id: backend_id.to_string(),
                scan_name: scan_name.to_string(),
                scan_kind: scan_kind.to_string(),
                last_timestamp: ms_to_datetime(last),
            })
        })
    }

    pub fn set_watermark(&self, timestamp_id: i64, value: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE sync_timestamps SET last_timestamp = ?1 WHERE id = ?2",
                params![value.timestamp_millis(), timestamp_id],
            )?;
            Ok(())
        })
    }

    pub fn list_timestamps(&self, backend_id: &str) -> Result<Vec<SyncTimestamp>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, backend_id, scan_name, scan_kind, last_timestamp FROM sync_timestamps \
                 WHERE backend_id = ?1 ORDER BY scan_name, scan_kind",
            )?;
            let rows = stmt.query_map(params![backend_id], |row| {
                Ok(SyncTimestamp {
                    id: row.get(0)?,
                    backend_id: row.get(1)?,
                    scan_name: row.get(2)?,
                    scan_kind: row.get(3)?,
                    last_timestamp: ms_to_datetime(row.get(4)?),
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::Store;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    #[test]
    fn test_watermark_created_at_epoch() {
        let dir = TempDir::new().unwrap();
        let session = Store::open(dir.path().join("sync.db")).unwrap().session().unwrap();

        let ts = session.sync_timestamp("acme", "tasks", "import").unwrap();
        assert_eq!(ts.last_timestamp.timestamp_millis(), 0);

        let mark = Utc.with_ymd_and_hms(2019, 4, 5, 0, 0, 0).unwrap();
        session.set_watermark(ts.id, mark).unwrap();

        let again = session.sync_timestamp("acme", "tasks", "import").unwrap();
        assert_eq!(again.id, ts.id);
        assert_eq!(again.last_timestamp, mark);
        assert_eq!(session.list_timestamps("acme").unwrap().len(), 1);
    }
}
