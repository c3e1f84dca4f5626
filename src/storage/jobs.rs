//! Durable job queue
//!
//! Jobs are rows in the data database, so submitting a job takes part in the
//! caller's transaction: a scan that rolls back also forgets the jobs it
//! enqueued.

use super::Session;
use crate::integrations::ms_to_datetime;
use crate::sync::{BatchKind, Model};
use crate::{Result, SyncError};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Lower runs first
pub const DEFAULT_JOB_PRIORITY: i32 = 10;
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Unit of work executed by a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Job {
    ImportRecord {
        backend: String,
        model: Model,
        external_id: String,
        #[serde(default)]
        force: bool,
        /// Raw remote payload supplied by the caller
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    ExportRecord {
        backend: String,
        model: Model,
        binding_id: i64,
        /// Local columns that changed (empty means everything)
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        fields: Vec<String>,
    },
    DeleteRecord {
        backend: String,
        model: Model,
        external_id: String,
    },
    ImportBatch {
        backend: String,
        batch: BatchKind,
    },
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Job::ImportRecord { .. } => "import_record",
            Job::ExportRecord { .. } => "export_record",
            Job::DeleteRecord { .. } => "delete_record",
            Job::ImportBatch { .. } => "import_batch",
        }
    }

    pub fn backend(&self) -> &str {
        match self {
            Job::ImportRecord { backend, .. }
            | Job::ExportRecord { backend, .. }
            | Job::DeleteRecord { backend, .. }
            | Job::ImportBatch { backend, .. } => backend,
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::ImportRecord {
                backend,
                model,
                external_id,
                force,
                ..
            } => {
                write!(f, "Import {} {} from {}", model, external_id, backend)?;
                if *force {
                    write!(f, " (forced)")?;
                }
                Ok(())
            }
            Job::ExportRecord {
                backend,
                model,
                binding_id,
                ..
            } => write!(f, "Export {} binding {} to {}", model, binding_id, backend),
            Job::DeleteRecord {
                backend,
                model,
                external_id,
            } => write!(f, "Delete {} {} deleted on {}", model, external_id, backend),
            Job::ImportBatch { backend, batch } => {
                write!(f, "Run {} batch on {}", batch, backend)
            }
        }
    }
}

/// A job plus its scheduling parameters
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub job: Job,
    pub priority: i32,
    /// Earliest execution time; `None` means now
    pub eta: Option<DateTime<Utc>>,
    pub max_retries: u32,
}

impl JobRequest {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            priority: DEFAULT_JOB_PRIORITY,
            eta: None,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn eta(mut self, eta: DateTime<Utc>) -> Self {
        self.eta = Some(eta);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobHandle {
    pub id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Started,
    Done,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Started => "started",
            JobState::Done => "done",
            JobState::Failed => "failed",
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobState::Pending),
            "started" => Ok(JobState::Started),
            "done" => Ok(JobState::Done),
            "failed" => Ok(JobState::Failed),
            other => Err(SyncError::Parse(format!("Unknown job state: {}", other))),
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queued job as stored
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub id: i64,
    pub job: Job,
    pub description: String,
    pub priority: i32,
    pub eta: Option<DateTime<Utc>>,
    pub state: JobState,
    pub attempts: u32,
    pub max_retries: u32,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

const JOB_COLUMNS: &str =
    "id, job, description, priority, eta, state, attempts, max_retries, result, error, created_at";

/// A jobs row before its payload is decoded
struct JobRow {
    id: i64,
    payload: String,
    description: String,
    priority: i32,
    eta: Option<i64>,
    state: String,
    attempts: u32,
    max_retries: u32,
    result: Option<String>,
    error: Option<String>,
    created_at: i64,
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<JobRow> {
    Ok(JobRow {
        id: row.get(0)?,
        payload: row.get(1)?,
        description: row.get(2)?,
        priority: row.get(3)?,
        eta: row.get(4)?,
        state: row.get(5)?,
        attempts: row.get(6)?,
        max_retries: row.get(7)?,
        result: row.get(8)?,
        error: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn decode(row: JobRow) -> Result<JobRecord> {
    Ok(JobRecord {
        id: row.id,
        job: serde_json::from_str(&row.payload)?,
        description: row.description,
        priority: row.priority,
        eta: row.eta.map(ms_to_datetime),
        state: row.state.parse()?,
        attempts: row.attempts,
        max_retries: row.max_retries,
        result: row.result,
        error: row.error,
        created_at: ms_to_datetime(row.created_at),
    })
}

impl Session {
    /// Enqueue a job inside the current unit of work
    pub fn submit_job(&self, request: &JobRequest, now: DateTime<Utc>) -> Result<JobHandle> {
        let payload = serde_json::to_string(&request.job)?;
        let description = request.job.to_string();
        let now_ms = now.timestamp_millis();

        let id = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO jobs (job, description, priority, eta, state, attempts, max_retries, \
                 created_at, updated_at) VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?6, ?6)",
                params![
                    payload,
                    description,
                    request.priority,
                    request.eta.map(|e| e.timestamp_millis()),
                    request.max_retries,
                    now_ms
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;

        tracing::debug!(job_id = id, job = %description, "Job enqueued");
        Ok(JobHandle { id })
    }

    /// Claim the most urgent due job, marking it started
    pub fn claim_job(&self, now: DateTime<Utc>) -> Result<Option<JobRecord>> {
        let now_ms = now.timestamp_millis();
        self.begin_immediate()?;

        let claimed = self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM jobs WHERE state = 'pending' AND (eta IS NULL OR eta <= ?1) \
                 ORDER BY priority, COALESCE(eta, created_at), id LIMIT 1",
                JOB_COLUMNS
            );
            let found = conn.query_row(&sql, params![now_ms], job_from_row).optional()?;
            if let Some(row) = &found {
                conn.execute(
                    "UPDATE jobs SET state = 'started', updated_at = ?1 WHERE id = ?2",
                    params![now_ms, row.id],
                )?;
            }
            Ok(found)
        });

        match claimed {
            Ok(found) => {
                self.commit()?;
                found
                    .map(|row| {
                        decode(row).map(|mut record| {
                            record.state = JobState::Started;
                            record
                        })
                    })
                    .transpose()
            }
            Err(e) => {
                self.rollback()?;
                Err(e)
            }
        }
    }

    pub fn complete_job(&self, id: i64, result: &str, now: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE jobs SET state = 'done', result = ?1, error = NULL, updated_at = ?2 \
                 WHERE id = ?3",
                params![result, now.timestamp_millis(), id],
            )?;
            Ok(())
        })
    }

    /// Put a job back in the queue
    ///
    /// A counted retry consumes one attempt; once the budget is spent the job
    /// is failed instead. Returns the resulting state.
    pub fn retry_job(
        &self,
        id: i64,
        eta: DateTime<Utc>,
        counted: bool,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<JobState> {
        self.with_conn(|conn| {
            let (attempts, max_retries): (u32, u32) = conn.query_row(
                "SELECT attempts, max_retries FROM jobs WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let attempts = if counted { attempts + 1 } else { attempts };
            let state = if attempts > max_retries {
                JobState::Failed
            } else {
                JobState::Pending
            };

            conn.execute(
                "UPDATE jobs SET state = ?1, attempts = ?2, eta = ?3, error = ?4, updated_at = ?5 \
                 WHERE id = ?6",
                params![
                    state.as_str(),
                    attempts,
                    eta.timestamp_millis(),
                    error,
                    now.timestamp_millis(),
                    id
                ],
            )?;
            Ok(state)
        })
    }

    pub fn fail_job(&self, id: i64, error: &str, now: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE jobs SET state = 'failed', error = ?1, updated_at = ?2 WHERE id = ?3",
                params![error, now.timestamp_millis(), id],
            )?;
            Ok(())
        })
    }

    pub fn job(&self, id: i64) -> Result<Option<JobRecord>> {
        let sql = format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS);
        let found = self.with_conn(|conn| {
            Ok(conn.query_row(&sql, params![id], job_from_row).optional()?)
        })?;
        found.map(decode).transpose()
    }

    /// Jobs in `state` (all states when `None`), oldest first
    pub fn list_jobs(&self, state: Option<JobState>, limit: usize) -> Result<Vec<JobRecord>> {
        let sql = format!(
            "SELECT {} FROM jobs WHERE (?1 IS NULL OR state = ?1) ORDER BY id LIMIT ?2",
            JOB_COLUMNS
        );
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params![state.map(|s| s.as_str()), limit as i64],
                job_from_row,
            )?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })?;
        rows.into_iter().map(decode).collect()
    }

    pub fn count_jobs(&self, state: JobState) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM jobs WHERE state = ?1",
                params![state.as_str()],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    /// Put jobs left `started` by a crashed worker back in the queue
    pub fn requeue_stale_jobs(&self, started_before: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE jobs SET state = 'pending' WHERE state = 'started' AND updated_at < ?1",
                params![started_before.timestamp_millis()],
            )?)
        })
    }
}
