//! Connector: the engine's front door
//!
//! Owns the store, one remote adapter per backend, the component registry
//! and the clock. Every job runs in its own unit of work through
//! [`Connector::run_job`]: begin, execute, commit (or roll back), then
//! release the job's advisory locks.

use crate::config::{BackendConfig, JiraSyncConfig};
use crate::integrations::{JiraAdapter, RemoteAdapter};
use crate::storage::{
    EntityTable, FieldValues, Job, JobHandle, JobRequest, Session, Store, DEFAULT_MAX_RETRIES,
};
use crate::sync::{
    delete_record, run_batch, BatchKind, Clock, ImportRequest, Model, Registry, SyncAction,
    SyncEnv, SystemClock, WriteOptions,
};
use crate::webhook::{WebhookEvent, WEBHOOK_JOB_PRIORITY};
use crate::{Result, SyncError};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Worker name of jobs run outside the daemon
pub const INTERACTIVE_WORKER: &str = "cli";

struct Backend {
    config: Arc<BackendConfig>,
    remote: Arc<dyn RemoteAdapter>,
}

/// Options of [`Connector::link_project`]
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectLink {
    pub project_id: i64,
    /// Jira project id; `None` for a project exported for the first time
    pub jira_project_id: Option<String>,
    pub jira_key: Option<String>,
    pub action: SyncAction,
    /// Jira ids of the issue types to synchronize (empty means all)
    pub issue_types: Vec<String>,
}

pub struct Connector {
    store: Store,
    backends: BTreeMap<String, Backend>,
    registry: Arc<Registry>,
    clock: Arc<dyn Clock>,
    job_max_retries: u32,
}

impl Connector {
    pub fn builder() -> ConnectorBuilder {
        ConnectorBuilder::default()
    }

    /// Build from the configuration file, one Jira adapter per backend
    pub fn from_config(config: &JiraSyncConfig) -> Result<Self> {
        let store = Store::open(&config.database)?.with_lock_ttl(config.lock_ttl());
        let mut builder = Self::builder()
            .store(store)
            .job_max_retries(config.job_max_retries);
        for backend in &config.backends {
            builder = builder.backend(backend.clone());
        }
        builder.build()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn backend_ids(&self) -> impl Iterator<Item = &str> {
        self.backends.keys().map(String::as_str)
    }

    pub fn backend(&self, id: &str) -> Result<&BackendConfig> {
        Ok(&self.handle(id)?.config)
    }

    fn handle(&self, id: &str) -> Result<&Backend> {
        self.backends
            .get(id)
            .ok_or_else(|| SyncError::Config(format!("Unknown backend: {}", id)))
    }

    /// Fresh environment for an operator operation
    pub fn env(&self, backend_id: &str, worker: &str) -> Result<SyncEnv> {
        self.env_with_session(backend_id, worker, self.store.session()?)
    }

    /// Fresh environment for one queued job
    fn job_env(&self, backend_id: &str, worker: &str) -> Result<SyncEnv> {
        self.env_with_session(backend_id, worker, self.store.job_session()?)
    }

    fn env_with_session(&self, backend_id: &str, worker: &str, session: Session) -> Result<SyncEnv> {
        let backend = self.handle(backend_id)?;
        Ok(SyncEnv::new(
            backend.config.clone(),
            backend.remote.clone(),
            self.store.clone(),
            session,
            self.store.lock_table(worker)?,
            self.registry.clone(),
            self.clock.clone(),
        ))
    }

    /// Run one job in its own unit of work, returning its summary
    pub async fn run_job(&self, job: &Job, worker: &str) -> Result<String> {
        let env = self.job_env(job.backend(), worker)?;
        env.session.begin()?;

        let result = match Self::execute(&env, job).await {
            Ok(summary) => env.session.commit().map(|_| summary),
            Err(e) => {
                if let Err(rollback) = env.session.rollback() {
                    warn!(error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        };

        if let Err(e) = env.release_locks() {
            warn!(backend = %job.backend(), error = %e, "Failed to release job locks");
        }
        result
    }

    async fn execute(env: &SyncEnv, job: &Job) -> Result<String> {
        match job {
            Job::ImportRecord {
                model,
                external_id,
                force,
                data,
                ..
            } => {
                let request = ImportRequest {
                    external_id: external_id.clone(),
                    force: *force,
                    data: data.clone(),
                };
                Ok(env.import_record(*model, request).await?.to_string())
            }
            Job::ExportRecord {
                model,
                binding_id,
                fields,
                ..
            } => Ok(env
                .export_record(*model, *binding_id, fields)
                .await?
                .to_string()),
            Job::DeleteRecord {
                model, external_id, ..
            } => Ok(delete_record(env, *model, external_id)?.to_string()),
            Job::ImportBatch { batch, .. } => Ok(run_batch(env, *batch).await?.to_string()),
        }
    }

    /// Import one record right away
    pub async fn import_record(
        &self,
        backend: &str,
        model: Model,
        external_id: &str,
        force: bool,
    ) -> Result<String> {
        let job = Job::ImportRecord {
            backend: backend.to_string(),
            model,
            external_id: external_id.to_string(),
            force,
            data: None,
        };
        self.run_job(&job, INTERACTIVE_WORKER).await
    }

    /// Export one binding right away
    pub async fn export_record(&self, backend: &str, model: Model, binding_id: i64) -> Result<String> {
        let job = Job::ExportRecord {
            backend: backend.to_string(),
            model,
            binding_id,
            fields: Vec::new(),
        };
        self.run_job(&job, INTERACTIVE_WORKER).await
    }

    /// Apply a remote deletion right away
    pub async fn delete_record(&self, backend: &str, model: Model, external_id: &str) -> Result<String> {
        let job = Job::DeleteRecord {
            backend: backend.to_string(),
            model,
            external_id: external_id.to_string(),
        };
        self.run_job(&job, INTERACTIVE_WORKER).await
    }

    /// Run one batch right away
    pub async fn run_batch(&self, backend: &str, batch: BatchKind) -> Result<String> {
        let job = Job::ImportBatch {
            backend: backend.to_string(),
            batch,
        };
        self.run_job(&job, INTERACTIVE_WORKER).await
    }

    /// Submit a job in its own unit of work
    pub fn enqueue(&self, request: JobRequest) -> Result<JobHandle> {
        self.handle(request.job.backend())?;
        let request = if request.max_retries == DEFAULT_MAX_RETRIES {
            request.max_retries(self.job_max_retries)
        } else {
            request
        };
        let session = self.store.session()?;
        let handle = session.submit_job(&request, self.now())?;
        info!(job_id = handle.id, job = %request.job, "Job enqueued");
        Ok(handle)
    }

    /// Enqueue every batch of a backend
    pub fn scan_all(&self, backend: &str) -> Result<Vec<JobHandle>> {
        BatchKind::ALL
            .into_iter()
            .map(|batch| {
                self.enqueue(JobRequest::new(Job::ImportBatch {
                    backend: backend.to_string(),
                    batch,
                }))
            })
            .collect()
    }

    /// Bind a local project to Jira
    ///
    /// A linked project follows an existing Jira project; an exported
    /// project is pushed to Jira (at most one export binding per project).
    /// Issue types must have been imported. Returns the binding id.
    pub fn link_project(&self, backend: &str, link: &ProjectLink) -> Result<i64> {
        let env = self.env(backend, INTERACTIVE_WORKER)?;
        if link.action == SyncAction::Link && link.jira_project_id.is_none() {
            return Err(SyncError::Config(
                "linking requires the Jira project id".to_string(),
            ));
        }
        if link.action == SyncAction::Export && link.jira_key.is_none() && link.jira_project_id.is_none() {
            return Err(SyncError::Config(
                "exporting a new project requires a Jira key".to_string(),
            ));
        }

        env.session.begin()?;
        let result = self.create_project_binding(&env, link);
        let binding_id = match result {
            Ok(id) => {
                env.session.commit()?;
                id
            }
            Err(e) => {
                env.session.rollback()?;
                return Err(e);
            }
        };

        info!(
            backend = %backend,
            project_id = link.project_id,
            binding_id,
            action = link.action.as_str(),
            "Project bound"
        );

        let follow_up = match (&link.action, &link.jira_project_id) {
            (SyncAction::Export, _) => Job::ExportRecord {
                backend: backend.to_string(),
                model: Model::Project,
                binding_id,
                fields: Vec::new(),
            },
            (SyncAction::Link, Some(jira_id)) => Job::ImportRecord {
                backend: backend.to_string(),
                model: Model::Project,
                external_id: jira_id.clone(),
                force: true,
                data: None,
            },
            (SyncAction::Link, None) => return Ok(binding_id),
        };
        self.enqueue(JobRequest::new(follow_up))?;
        Ok(binding_id)
    }

    fn create_project_binding(&self, env: &SyncEnv, link: &ProjectLink) -> Result<i64> {
        if !env.session.record_exists(&EntityTable::PROJECTS, link.project_id)? {
            return Err(SyncError::Config(format!(
                "project {} does not exist",
                link.project_id
            )));
        }

        let mut issue_types = Vec::with_capacity(link.issue_types.len());
        for external_id in &link.issue_types {
            let binding = env
                .binder(Model::IssueType)
                .to_binding(external_id)?
                .ok_or_else(|| {
                    SyncError::Config(format!(
                        "issue type {} is unknown, import issue types first",
                        external_id
                    ))
                })?;
            issue_types.push(binding.id);
        }

        let mut fields = FieldValues::new();
        fields
            .set("sync_action", link.action.as_str())
            .set_opt("jira_key", link.jira_key.clone());
        let binding_id = env
            .binder(Model::Project)
            .create_binding(Some(link.project_id), link.jira_project_id.as_deref(), &fields)
            .map_err(|e| {
                if e.is_unique_violation() {
                    SyncError::Config(format!(
                        "project {} is already bound to this Jira project or already exported",
                        link.project_id
                    ))
                } else {
                    e
                }
            })?;
        env.session.set_project_issue_types(binding_id, &issue_types)?;
        Ok(binding_id)
    }

    /// Remove a binding; the local record is kept
    pub fn unlink(&self, backend: &str, model: Model, binding_id: i64) -> Result<()> {
        let env = self.env(backend, INTERACTIVE_WORKER)?;
        env.locks
            .acquire_or_retry(&model.binding_lock_key(binding_id), "binding")?;
        let result = env.binder(model).unlink(binding_id);
        env.release_locks()?;
        result
    }

    /// Route a webhook to a delete or import job
    pub fn handle_webhook(&self, event: &WebhookEvent) -> Result<JobHandle> {
        let job = event.to_job()?;
        self.enqueue(JobRequest::new(job).priority(WEBHOOK_JOB_PRIORITY))
    }

    /// Write a local record the way the application does: changed columns
    /// only, scheduling exports for exported records in the same transaction
    pub fn update_local_record(
        &self,
        backend: &str,
        model: Model,
        id: i64,
        fields: &FieldValues,
    ) -> Result<usize> {
        let env = self.env(backend, INTERACTIVE_WORKER)?;
        env.session.begin()?;
        match env.update_local(model, id, fields, WriteOptions::default()) {
            Ok(changed) => {
                env.session.commit()?;
                Ok(changed)
            }
            Err(e) => {
                env.session.rollback()?;
                Err(e)
            }
        }
    }

    /// Start exporting a local task of an exported project
    ///
    /// Creates the task binding and enqueues its export.
    pub fn export_task(&self, backend: &str, task_id: i64, issue_type: &str) -> Result<JobHandle> {
        let env = self.env(backend, INTERACTIVE_WORKER)?;
        let task = env
            .session
            .read_record(&EntityTable::TASKS, task_id)?
            .ok_or_else(|| SyncError::Config(format!("task {} does not exist", task_id)))?;
        let project_id = task
            .get_i64("project_id")
            .ok_or_else(|| SyncError::Config(format!("task {} has no project", task_id)))?;
        let project_binding = env
            .binder(Model::Project)
            .export_binding(project_id)?
            .ok_or_else(|| {
                SyncError::Config(format!("project {} is not exported", project_id))
            })?;
        let issue_type = env
            .binder(Model::IssueType)
            .to_binding(issue_type)?
            .ok_or_else(|| SyncError::Config(format!("issue type {} is unknown", issue_type)))?;

        env.session.begin()?;
        let created = env.binder(Model::Task).create_binding(
            Some(task_id),
            None,
            &FieldValues::new()
                .with("project_binding_id", project_binding.id)
                .with("issue_type_binding_id", issue_type.id),
        );
        let binding_id = match created {
            Ok(id) => {
                env.session.commit()?;
                id
            }
            Err(e) => {
                env.session.rollback()?;
                return Err(e);
            }
        };

        self.enqueue(JobRequest::new(Job::ExportRecord {
            backend: backend.to_string(),
            model: Model::Task,
            binding_id,
            fields: Vec::new(),
        }))
    }
}

/// Builder for [`Connector`]
#[derive(Default)]
pub struct ConnectorBuilder {
    store: Option<Store>,
    backends: Vec<(BackendConfig, Option<Arc<dyn RemoteAdapter>>)>,
    registry: Option<Registry>,
    clock: Option<Arc<dyn Clock>>,
    job_max_retries: Option<u32>,
}

impl ConnectorBuilder {
    pub fn store(mut self, store: Store) -> Self {
        self.store = Some(store);
        self
    }

    /// Add a backend served by the Jira REST adapter
    pub fn backend(mut self, config: BackendConfig) -> Self {
        self.backends.push((config, None));
        self
    }

    /// Add a backend served by a custom adapter
    pub fn backend_with_adapter(mut self, config: BackendConfig, remote: Arc<dyn RemoteAdapter>) -> Self {
        self.backends.push((config, Some(remote)));
        self
    }

    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn job_max_retries(mut self, retries: u32) -> Self {
        self.job_max_retries = Some(retries);
        self
    }

    pub fn build(self) -> Result<Connector> {
        let store = self
            .store
            .ok_or_else(|| SyncError::Config("connector needs a store".to_string()))?;

        let mut backends = BTreeMap::new();
        for (config, remote) in self.backends {
            let remote: Arc<dyn RemoteAdapter> = match remote {
                Some(remote) => remote,
                None => Arc::new(JiraAdapter::new(&config)?),
            };
            let id = config.id.clone();
            let backend = Backend {
                config: Arc::new(config),
                remote,
            };
            if backends.insert(id.clone(), backend).is_some() {
                return Err(SyncError::Config(format!("Duplicate backend: {}", id)));
            }
        }

        Ok(Connector {
            store,
            backends,
            registry: Arc::new(self.registry.unwrap_or_else(Registry::with_defaults)),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            job_max_retries: self.job_max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
        })
    }
}
