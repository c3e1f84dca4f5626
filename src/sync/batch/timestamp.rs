//! Timestamp-driven incremental scans
//!
//! Each scan owns a watermark row. A run takes the watermark's lock without
//! waiting (a second scanner gets a retryable "concurrent scan" error), looks
//! at the half-open window `[watermark, now)`, enqueues one job per record
//! found and moves the watermark to `max(now - IMPORT_DELTA, watermark)`.
//! The delta re-scans the last minutes every run because Jira's search
//! index lags behind its writes.

use super::BatchSummary;
use crate::daemon::metrics;
use crate::integrations::{RemoteWorklog, WorklogChange};
use crate::storage::{Job, JobRequest};
use crate::sync::{Model, SyncEnv};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use futures::TryStreamExt;
use std::cmp::max;
use tracing::{debug, info};

/// Visibility lag of Jira searches
pub const IMPORT_DELTA_SECS: i64 = 300;

/// One incremental scan
#[async_trait]
pub trait TimestampScan: Send + Sync {
    /// Watermark name
    fn name(&self) -> &'static str;

    /// `import` or `delete`
    fn kind(&self) -> &'static str;

    /// Jobs for the records changed in `[from, to)`
    async fn collect(
        &self,
        env: &SyncEnv,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<JobRequest>>;
}

pub struct TimestampBatchImporter<S> {
    scan: S,
}

impl<S: TimestampScan> TimestampBatchImporter<S> {
    pub fn new(scan: S) -> Self {
        Self { scan }
    }

    pub fn lock_key(&self, backend_id: &str) -> String {
        format!("timestamp:{}:{}:{}", backend_id, self.scan.name(), self.scan.kind())
    }

    pub async fn run(&self, env: &SyncEnv) -> Result<BatchSummary> {
        let backend_id = env.backend_id();
        env.locks.acquire_or_retry(
            &self.lock_key(backend_id),
            &format!("concurrent {} scan on {}", self.scan.name(), backend_id),
        )?;

        let timestamp = env
            .session
            .sync_timestamp(backend_id, self.scan.name(), self.scan.kind())?;
        let from = timestamp.last_timestamp;
        let to = env.now();

        let jobs = self.scan.collect(env, from, to).await?;
        let mut summary = BatchSummary {
            found: jobs.len(),
            ..Default::default()
        };
        for job in jobs {
            env.submit(job)?;
            summary.enqueued += 1;
        }

        let watermark = next_watermark(from, to);
        env.session.set_watermark(timestamp.id, watermark)?;
        metrics::set_watermark(backend_id, self.scan.name(), watermark);
        summary.watermark = Some(watermark);

        info!(
            backend = %backend_id,
            scan = %self.scan.name(),
            from = %from,
            to = %to,
            summary = %summary,
            "Incremental scan done"
        );
        Ok(summary)
    }
}

/// The watermark never moves backwards
pub fn next_watermark(from: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    max(now - Duration::seconds(IMPORT_DELTA_SECS), from)
}

/// JQL date literal, in the offset Jira applies to the API user
pub fn jql_datetime(at: DateTime<Utc>, offset: &FixedOffset) -> String {
    at.with_timezone(offset).format("%Y-%m-%d %H:%M").to_string()
}

fn import_job(env: &SyncEnv, model: Model, external_id: String, data: Option<serde_json::Value>) -> JobRequest {
    JobRequest::new(Job::ImportRecord {
        backend: env.backend_id().to_string(),
        model,
        external_id,
        force: false,
        data,
    })
}

/// Issues updated in the window
pub struct TaskScan;

#[async_trait]
impl TimestampScan for TaskScan {
    fn name(&self) -> &'static str {
        "tasks"
    }

    fn kind(&self) -> &'static str {
        "import"
    }

    async fn collect(
        &self,
        env: &SyncEnv,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<JobRequest>> {
        let offset = env.backend.query_offset()?;
        let jql = format!(
            "updated >= '{}' and updated < '{}'",
            jql_datetime(from, &offset),
            jql_datetime(to, &offset)
        );
        debug!(backend = %env.backend_id(), jql = %jql, "Searching updated issues");

        let ids = env.remote.search_issues(&jql).await?;
        Ok(ids
            .into_iter()
            .map(|id| import_job(env, Model::Task, id, None))
            .collect())
    }
}

/// Worklog changes in the window, minus those already imported
///
/// The feed reports every worklog touched since `from`; only ids whose
/// remote update time is strictly newer than the one stored on their binding
/// are imported. Payloads are fetched in bulk and travel with the jobs.
pub struct WorklogScan;

impl WorklogScan {
    fn unseen(env: &SyncEnv, changes: Vec<WorklogChange>) -> Result<Vec<String>> {
        let ids: Vec<String> = changes.iter().map(|c| c.worklog_id.clone()).collect();
        let known = env.session.known_external_updates(
            &Model::Worklog.bindings(),
            env.backend_id(),
            &ids,
        )?;

        Ok(changes
            .into_iter()
            .filter(|change| match known.get(&change.worklog_id) {
                Some(Some(local)) => change.updated_at() > *local,
                _ => true,
            })
            .map(|change| change.worklog_id)
            .collect())
    }
}

#[async_trait]
impl TimestampScan for WorklogScan {
    fn name(&self) -> &'static str {
        "worklogs"
    }

    fn kind(&self) -> &'static str {
        "import"
    }

    async fn collect(
        &self,
        env: &SyncEnv,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<JobRequest>> {
        let changes: Vec<WorklogChange> = env
            .remote
            .updated_worklogs_since(from)
            .await?
            .into_iter()
            .filter(|c| c.updated_at() < to)
            .collect();
        let reported = changes.len();
        let ids = Self::unseen(env, changes)?;
        debug!(
            backend = %env.backend_id(),
            reported,
            unseen = ids.len(),
            "Worklog changes filtered"
        );
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let worklogs: Vec<RemoteWorklog> = env.remote.worklogs_by_ids(ids).try_collect().await?;
        worklogs
            .into_iter()
            .map(|worklog| {
                let data = serde_json::to_value(&worklog)?;
                Ok(import_job(env, Model::Worklog, worklog.id, Some(data)))
            })
            .collect()
    }
}

/// Worklogs deleted in the window that exist locally
pub struct DeletedWorklogScan;

#[async_trait]
impl TimestampScan for DeletedWorklogScan {
    fn name(&self) -> &'static str {
        "worklogs"
    }

    fn kind(&self) -> &'static str {
        "delete"
    }

    async fn collect(
        &self,
        env: &SyncEnv,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<JobRequest>> {
        let ids: Vec<String> = env
            .remote
            .deleted_worklogs_since(from)
            .await?
            .into_iter()
            .filter(|c| c.updated_at() < to)
            .map(|c| c.worklog_id)
            .collect();
        let known = env.session.known_external_updates(
            &Model::Worklog.bindings(),
            env.backend_id(),
            &ids,
        )?;

        Ok(ids
            .into_iter()
            .filter(|id| known.contains_key(id))
            .map(|external_id| {
                JobRequest::new(Job::DeleteRecord {
                    backend: env.backend_id().to_string(),
                    model: Model::Worklog,
                    external_id,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_next_watermark() {
        let from = Utc.with_ymd_and_hms(2019, 4, 5, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2019, 4, 8, 12, 51, 36).unwrap()
            + Duration::milliseconds(595);

        let next = next_watermark(from, now);
        assert_eq!(
            next.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
            "2019-04-08T12:46:36.595"
        );

        // a run right after the previous one does not move backwards
        let soon = from + Duration::seconds(10);
        assert_eq!(next_watermark(from, soon), from);
    }

    #[test]
    fn test_jql_datetime() {
        let at = Utc.with_ymd_and_hms(2019, 4, 8, 22, 51, 36).unwrap();
        let utc = FixedOffset::east_opt(0).unwrap();
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();

        assert_eq!(jql_datetime(at, &utc), "2019-04-08 22:51");
        assert_eq!(jql_datetime(at, &plus_two), "2019-04-09 00:51");
    }
}
