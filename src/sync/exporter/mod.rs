//! Exporter: one local record → Jira
//!
//! Mirror of the importer. The binding is locked, unexported dependencies
//! are exported (and committed) first, then the record is created or
//! updated remotely and bound. A record edited in Jira since the last sync
//! is never overwritten: a forced reimport is scheduled instead.

mod project;
mod task;

pub use project::ProjectExport;
pub use task::TaskExport;

use super::{Model, SyncEnv};
use crate::daemon::metrics;
use crate::integrations::CreatedRef;
use crate::storage::{Binding, FieldValues, Job, JobRequest};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum ExportOutcome {
    Created { external_id: String },
    Updated { external_id: String },
    /// Jira holds changes that were never imported
    ReimportScheduled { job_id: i64 },
    Skipped { reason: String },
}

impl ExportOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ExportOutcome::Created { .. } => "created",
            ExportOutcome::Updated { .. } => "updated",
            ExportOutcome::ReimportScheduled { .. } => "reimport_scheduled",
            ExportOutcome::Skipped { .. } => "skipped",
        }
    }
}

impl fmt::Display for ExportOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportOutcome::Created { external_id } => write!(f, "created in Jira as {}", external_id),
            ExportOutcome::Updated { external_id } => write!(f, "updated {} in Jira", external_id),
            ExportOutcome::ReimportScheduled { job_id } => {
                write!(f, "Jira has newer changes, reimport scheduled (job {})", job_id)
            }
            ExportOutcome::Skipped { reason } => write!(f, "skipped: {}", reason),
        }
    }
}

/// Model specific parts of an export
#[async_trait]
pub trait ExportStrategy: Send + Sync + 'static {
    type Deps: Send + Sync;
    type Payload: Send + Sync;

    const MODEL: Model;

    /// Remote "updated" time of the bound record, when Jira reports one
    async fn remote_updated_at(
        &self,
        env: &SyncEnv,
        external_id: &str,
    ) -> Result<Option<DateTime<Utc>>>;

    async fn export_dependencies(
        &self,
        env: &SyncEnv,
        binding: &Binding,
        local: &FieldValues,
    ) -> Result<Self::Deps>;

    fn to_remote(
        &self,
        env: &SyncEnv,
        binding: &Binding,
        local: &FieldValues,
        deps: &Self::Deps,
        fields: &[String],
    ) -> Result<Self::Payload>;

    async fn create(&self, env: &SyncEnv, payload: &Self::Payload) -> Result<CreatedRef>;

    async fn update(&self, env: &SyncEnv, external_id: &str, payload: &Self::Payload) -> Result<()>;

    /// Store what the remote write taught us on the binding
    fn after_export(
        &self,
        _env: &SyncEnv,
        _binding: &Binding,
        _deps: &Self::Deps,
        _created: Option<&CreatedRef>,
    ) -> Result<()> {
        Ok(())
    }
}

/// Object-safe exporter, the form stored in the registry
#[async_trait]
pub trait RecordExporter: Send + Sync {
    fn model(&self) -> Model;

    async fn export(&self, env: &SyncEnv, binding_id: i64, fields: &[String]) -> Result<ExportOutcome>;
}

pub struct Exporter<S> {
    strategy: S,
}

impl<S: ExportStrategy> Exporter<S> {
    pub fn new(strategy: S) -> Self {
        Self { strategy }
    }

    /// True when Jira changed the record after it was last synchronized
    async fn remote_is_newer(&self, env: &SyncEnv, binding: &Binding, external_id: &str) -> Result<bool> {
        let Some(remote) = self.strategy.remote_updated_at(env, external_id).await? else {
            return Ok(false);
        };
        Ok(binding
            .external_updated_at
            .is_some_and(|synced| remote > synced))
    }

    async fn run(&self, env: &SyncEnv, binding_id: i64, fields: &[String]) -> Result<ExportOutcome> {
        let binder = env.binder(S::MODEL);
        let Some(binding) = binder.binding(binding_id)? else {
            return Ok(ExportOutcome::Skipped {
                reason: format!("{} binding {} no longer exists", S::MODEL, binding_id),
            });
        };
        let Some(local_id) = binding.local_id else {
            return Ok(ExportOutcome::Skipped {
                reason: format!("{} binding {} has no local record", S::MODEL, binding_id),
            });
        };

        if let Some(external_id) = &binding.external_id {
            if self.remote_is_newer(env, &binding, external_id).await? {
                let handle = env.submit(JobRequest::new(Job::ImportRecord {
                    backend: env.backend_id().to_string(),
                    model: S::MODEL,
                    external_id: external_id.clone(),
                    force: true,
                    data: None,
                }))?;
                warn!(
                    backend = %env.backend_id(),
                    model = %S::MODEL,
                    external_id = %external_id,
                    job_id = handle.id,
                    "Jira record changed since last sync, reimporting instead of exporting"
                );
                return Ok(ExportOutcome::ReimportScheduled { job_id: handle.id });
            }
        }

        let Some(entity) = S::MODEL.entity() else {
            return Ok(ExportOutcome::Skipped {
                reason: format!("{} has no local records", S::MODEL),
            });
        };
        let Some(local) = env.session.read_record(&entity, local_id)? else {
            return Ok(ExportOutcome::Skipped {
                reason: format!("{} {} no longer exists", S::MODEL, local_id),
            });
        };

        let deps = self.strategy.export_dependencies(env, &binding, &local).await?;
        let payload = self
            .strategy
            .to_remote(env, &binding, &local, &deps, fields)?;

        let (external_id, created, outcome) = match &binding.external_id {
            Some(external_id) => {
                self.strategy.update(env, external_id, &payload).await?;
                let outcome = ExportOutcome::Updated {
                    external_id: external_id.clone(),
                };
                (external_id.clone(), None, outcome)
            }
            None => {
                let created = self.strategy.create(env, &payload).await?;
                let outcome = ExportOutcome::Created {
                    external_id: created.id.clone(),
                };
                (created.id.clone(), Some(created), outcome)
            }
        };

        // Our own write bumps the remote update time; remember it so the
        // next export does not mistake it for a remote edit
        let synced_at = self
            .strategy
            .remote_updated_at(env, &external_id)
            .await?
            .unwrap_or_else(|| env.now());
        binder.bind(binding.id, &external_id, Some(synced_at))?;
        self.strategy
            .after_export(env, &binding, &deps, created.as_ref())?;

        info!(
            backend = %env.backend_id(),
            model = %S::MODEL,
            binding_id = binding.id,
            outcome = %outcome,
            "Record exported"
        );
        Ok(outcome)
    }
}

#[async_trait]
impl<S: ExportStrategy> RecordExporter for Exporter<S> {
    fn model(&self) -> Model {
        S::MODEL
    }

    async fn export(&self, env: &SyncEnv, binding_id: i64, fields: &[String]) -> Result<ExportOutcome> {
        let key = S::MODEL.binding_lock_key(binding_id);
        env.locks
            .acquire_or_retry(&key, &format!("{} binding {}", S::MODEL, binding_id))?;

        let result = self.run(env, binding_id, fields).await;
        match &result {
            Ok(outcome) => metrics::record_export(S::MODEL.as_str(), outcome.label()),
            Err(e) => {
                metrics::record_export(S::MODEL.as_str(), "error");
                if !e.is_retryable() {
                    warn!(backend = %env.backend_id(), model = %S::MODEL, binding_id, error = %e, "Export failed");
                }
            }
        }
        result
    }
}
