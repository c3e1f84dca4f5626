//! Batch imports
//!
//! Three variants share one contract, `run() -> BatchSummary`:
//!
//! - **direct**: list remote records and import each one right away, in the
//!   batch's own unit of work (issue types, organizations)
//! - **delayed**: list remote ids and enqueue one import job per id
//!   (projects, users)
//! - **timestamp-driven**: incremental scans over a persisted watermark
//!   (tasks, worklogs, deleted worklogs); see [`timestamp`]

pub mod timestamp;

pub use timestamp::{
    DeletedWorklogScan, TaskScan, TimestampBatchImporter, TimestampScan, WorklogScan,
    IMPORT_DELTA_SECS,
};

use super::{ImportRequest, Model, SyncEnv};
use crate::config::ScanConfig;
use crate::storage::{Job, JobRequest};
use crate::{Result, SyncError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    Projects,
    IssueTypes,
    Users,
    Organizations,
    Tasks,
    Worklogs,
    DeletedWorklogs,
}

impl BatchKind {
    pub const ALL: [BatchKind; 7] = [
        BatchKind::IssueTypes,
        BatchKind::Users,
        BatchKind::Organizations,
        BatchKind::Projects,
        BatchKind::Tasks,
        BatchKind::Worklogs,
        BatchKind::DeletedWorklogs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchKind::Projects => "projects",
            BatchKind::IssueTypes => "issue_types",
            BatchKind::Users => "users",
            BatchKind::Organizations => "organizations",
            BatchKind::Tasks => "tasks",
            BatchKind::Worklogs => "worklogs",
            BatchKind::DeletedWorklogs => "deleted_worklogs",
        }
    }

    /// Scheduling interval; `None` when the scan is disabled
    pub fn interval(&self, scan: &ScanConfig) -> Option<Duration> {
        let secs = match self {
            BatchKind::Projects | BatchKind::IssueTypes => scan.issue_types_secs,
            BatchKind::Users => scan.users_secs,
            BatchKind::Organizations => scan.organizations_secs,
            BatchKind::Tasks => scan.tasks_secs,
            BatchKind::Worklogs => scan.worklogs_secs,
            BatchKind::DeletedWorklogs => scan.deleted_worklogs_secs,
        };
        (secs > 0).then(|| Duration::from_secs(secs))
    }
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        BatchKind::ALL
            .into_iter()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| SyncError::Config(format!("Unknown batch: '{}'", s)))
    }
}

/// What one batch run did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    /// Remote records considered
    pub found: usize,
    /// Records imported in the batch itself (direct batches)
    pub imported: usize,
    /// Records left alone by the importer
    pub skipped: usize,
    /// Jobs enqueued
    pub enqueued: usize,
    /// Watermark after the run (timestamp-driven batches)
    pub watermark: Option<DateTime<Utc>>,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} found, {} imported, {} skipped, {} job(s) enqueued",
            self.found, self.imported, self.skipped, self.enqueued
        )?;
        if let Some(watermark) = self.watermark {
            write!(f, ", watermark {}", watermark.format("%Y-%m-%d %H:%M:%S%.3f"))?;
        }
        Ok(())
    }
}

/// Import every listed record synchronously
pub async fn direct_batch(
    env: &SyncEnv,
    model: Model,
    records: Vec<(String, Value)>,
) -> Result<BatchSummary> {
    let mut summary = BatchSummary {
        found: records.len(),
        ..Default::default()
    };
    for (external_id, data) in records {
        let outcome = env
            .import_record(model, ImportRequest::new(external_id).with_data(data))
            .await?;
        match outcome {
            super::ImportOutcome::Skipped { .. } => summary.skipped += 1,
            _ => summary.imported += 1,
        }
    }
    info!(backend = %env.backend_id(), model = %model, summary = %summary, "Direct batch done");
    Ok(summary)
}

/// Enqueue one import job per remote id
pub fn delayed_batch(env: &SyncEnv, model: Model, external_ids: Vec<String>) -> Result<BatchSummary> {
    let mut summary = BatchSummary {
        found: external_ids.len(),
        ..Default::default()
    };
    for external_id in external_ids {
        env.submit(JobRequest::new(Job::ImportRecord {
            backend: env.backend_id().to_string(),
            model,
            external_id,
            force: false,
            data: None,
        }))?;
        summary.enqueued += 1;
    }
    info!(backend = %env.backend_id(), model = %model, summary = %summary, "Delayed batch done");
    Ok(summary)
}

fn with_ids<T: Serialize>(records: Vec<T>, id: impl Fn(&T) -> String) -> Result<Vec<(String, Value)>> {
    records
        .into_iter()
        .map(|r| Ok((id(&r), serde_json::to_value(&r)?)))
        .collect()
}

/// Run one batch on the environment's backend
pub async fn run_batch(env: &SyncEnv, kind: BatchKind) -> Result<BatchSummary> {
    match kind {
        BatchKind::IssueTypes => {
            let types = env.remote.list_issue_types().await?;
            direct_batch(env, Model::IssueType, with_ids(types, |t| t.id.clone())?).await
        }
        BatchKind::Organizations => {
            let organizations = env.remote.list_organizations().await?;
            direct_batch(env, Model::Organization, with_ids(organizations, |o| o.id.clone())?).await
        }
        BatchKind::Projects => {
            let ids = env
                .remote
                .search_projects()
                .await?
                .into_iter()
                .map(|p| p.id)
                .collect();
            delayed_batch(env, Model::Project, ids)
        }
        BatchKind::Users => {
            let ids = env
                .remote
                .search_users()
                .await?
                .into_iter()
                .map(|u| u.account_id)
                .collect();
            delayed_batch(env, Model::User, ids)
        }
        BatchKind::Tasks => TimestampBatchImporter::new(TaskScan).run(env).await,
        BatchKind::Worklogs => TimestampBatchImporter::new(WorklogScan).run(env).await,
        BatchKind::DeletedWorklogs => TimestampBatchImporter::new(DeletedWorklogScan).run(env).await,
    }
}
