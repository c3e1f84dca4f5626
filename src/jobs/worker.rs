//! Job worker
//!
//! Claims due jobs from the queue and runs them through the connector. A
//! failed job is retried or failed according to its error's disposition.

use crate::connector::Connector;
use crate::daemon::metrics;
use crate::error::JobDisposition;
use crate::storage::{JobRecord, JobState, Session};
use crate::Result;
use chrono::Duration as ChronoDuration;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// What happened to one claimed job
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub id: i64,
    pub description: String,
    pub state: JobState,
    /// Job summary when done, error message otherwise
    pub message: String,
}

impl fmt::Display for JobReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} [{}] {}",
            self.id, self.description, self.state, self.message
        )
    }
}

pub struct Worker {
    connector: Arc<Connector>,
    name: String,
    /// Queue bookkeeping runs on its own connection, outside job transactions
    session: Session,
}

impl Worker {
    pub fn new(connector: Arc<Connector>, name: impl Into<String>) -> Result<Self> {
        let session = connector.store().session()?;
        Ok(Self {
            connector,
            name: name.into(),
            session,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Claim and run one due job; `None` when the queue has nothing due
    pub async fn run_once(&self) -> Result<Option<JobReport>> {
        let Some(job) = self.session.claim_job(self.connector.now())? else {
            return Ok(None);
        };
        tracing::debug!(worker = %self.name, job_id = job.id, job = %job.description, "Job claimed");

        let outcome = self.connector.run_job(&job.job, &self.name).await;
        let report = self.settle(&job, outcome)?;
        metrics::record_job(job.job.kind(), report.state.as_str());
        Ok(Some(report))
    }

    /// Run due jobs until the queue is empty or `max` jobs ran
    pub async fn drain(&self, max: usize) -> Result<Vec<JobReport>> {
        let mut reports = Vec::new();
        while reports.len() < max {
            match self.run_once().await? {
                Some(report) => reports.push(report),
                None => break,
            }
        }
        Ok(reports)
    }

    fn settle(&self, job: &JobRecord, outcome: Result<String>) -> Result<JobReport> {
        let now = self.connector.now();
        let (state, message) = match outcome {
            Ok(summary) => {
                self.session.complete_job(job.id, &summary, now)?;
                tracing::info!(worker = %self.name, job_id = job.id, result = %summary, "Job done");
                (JobState::Done, summary)
            }
            Err(e) => {
                let message = e.to_string();
                let state = match e.disposition() {
                    JobDisposition::RetryUncounted(delay) => {
                        self.session
                            .retry_job(job.id, now + to_chrono(delay), false, &message, now)?
                    }
                    JobDisposition::RetryCounted(delay) => {
                        self.session
                            .retry_job(job.id, now + to_chrono(delay), true, &message, now)?
                    }
                    JobDisposition::Fail => {
                        self.session.fail_job(job.id, &message, now)?;
                        JobState::Failed
                    }
                };
                if state == JobState::Failed {
                    tracing::warn!(worker = %self.name, job_id = job.id, error = %message, "Job failed");
                } else {
                    tracing::debug!(worker = %self.name, job_id = job.id, error = %message, "Job retried");
                }
                (state, message)
            }
        };

        Ok(JobReport {
            id: job.id,
            description: job.description.clone(),
            state,
            message,
        })
    }
}

fn to_chrono(delay: Duration) -> ChronoDuration {
    ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::seconds(10))
}
