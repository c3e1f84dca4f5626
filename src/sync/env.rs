//! Per-job synchronization environment
//!
//! A [`SyncEnv`] bundles everything one job needs: the backend, its remote
//! adapter, the job's unit of work, the job's advisory locks and the
//! component registry. Nothing in it is shared between jobs.

use super::binder::Binder;
use super::clock::Clock;
use super::registry::Registry;
use super::{ExportOutcome, ImportOutcome, ImportRequest, Model};
use crate::config::BackendConfig;
use crate::integrations::RemoteAdapter;
use crate::storage::{Binding, FieldValues, Job, JobHandle, JobRequest, LockTable, Session, Store};
use crate::{Result, SyncError};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Options of local writes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Do not schedule exports for this write (set by imports)
    pub suppress_export: bool,
}

impl WriteOptions {
    pub fn from_import() -> Self {
        Self {
            suppress_export: true,
        }
    }
}

pub struct SyncEnv {
    pub backend: Arc<BackendConfig>,
    pub remote: Arc<dyn RemoteAdapter>,
    pub store: Store,
    pub session: Session,
    pub locks: LockTable,
    pub registry: Arc<Registry>,
    pub clock: Arc<dyn Clock>,
    in_progress: Mutex<HashSet<(Model, String)>>,
}

/// Marks a record as being imported for the lifetime of the guard
pub(crate) struct InProgress<'a> {
    env: &'a SyncEnv,
    key: (Model, String),
}

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.env.in_progress.lock() {
            set.remove(&self.key);
        }
    }
}

impl SyncEnv {
    pub fn new(
        backend: Arc<BackendConfig>,
        remote: Arc<dyn RemoteAdapter>,
        store: Store,
        session: Session,
        locks: LockTable,
        registry: Arc<Registry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend,
            remote,
            store,
            session,
            locks,
            registry,
            clock,
            in_progress: Mutex::new(HashSet::new()),
        }
    }

    pub fn backend_id(&self) -> &str {
        &self.backend.id
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn binder(&self, model: Model) -> Binder<'_> {
        Binder::new(&self.session, &self.backend.id, model)
    }

    /// Enqueue a job in the current unit of work
    pub fn submit(&self, request: JobRequest) -> Result<JobHandle> {
        self.session.submit_job(&request, self.now())
    }

    /// Register an import in progress; `None` when it already is (a cycle)
    pub(crate) fn enter(&self, model: Model, external_id: &str) -> Result<Option<InProgress<'_>>> {
        let key = (model, external_id.to_string());
        let mut set = self
            .in_progress
            .lock()
            .map_err(|_| SyncError::Storage("import registry poisoned".to_string()))?;
        if !set.insert(key.clone()) {
            return Ok(None);
        }
        Ok(Some(InProgress { env: self, key }))
    }

    /// Import one remote record through the registered importer
    pub async fn import_record(&self, model: Model, request: ImportRequest) -> Result<ImportOutcome> {
        let importer = self.registry.importer(model)?;
        importer.import(self, request).await
    }

    /// Make sure a referenced record is imported and return its binding
    ///
    /// Returns `None` when the dependency was skipped.
    pub async fn import_dependency(
        &self,
        model: Model,
        external_id: &str,
        data: Option<serde_json::Value>,
    ) -> Result<Option<Binding>> {
        let mut request = ImportRequest::new(external_id);
        request.data = data;
        let outcome = self.import_record(model, request).await?;
        tracing::debug!(
            backend = %self.backend.id,
            model = %model,
            external_id = %external_id,
            outcome = %outcome,
            "Dependency resolved"
        );
        self.binder(model).to_binding(external_id)
    }

    /// Export one binding through the registered exporter
    pub async fn export_record(
        &self,
        model: Model,
        binding_id: i64,
        fields: &[String],
    ) -> Result<ExportOutcome> {
        let exporter = self.registry.exporter(model)?;
        exporter.export(self, binding_id, fields).await
    }

    /// Export a dependency and commit right away
    ///
    /// Once the remote record exists its binding must survive a later failure
    /// of the dependent export, otherwise a retry would push it twice.
    pub async fn export_dependency(&self, model: Model, binding_id: i64) -> Result<ExportOutcome> {
        let outcome = self.export_record(model, binding_id, &[]).await?;
        self.session.commit_and_continue()?;
        Ok(outcome)
    }

    /// Create a local record
    pub fn create_local(&self, model: Model, fields: &FieldValues, options: WriteOptions) -> Result<i64> {
        let entity = model
            .entity()
            .ok_or_else(|| SyncError::Storage(format!("{} has no local records", model)))?;
        let id = self.session.insert_record(&entity, fields)?;
        if !options.suppress_export {
            self.schedule_exports(model, id, fields)?;
        }
        Ok(id)
    }

    /// Write the columns of `fields` that differ from the stored record
    ///
    /// Returns the number of columns written.
    pub fn update_local(
        &self,
        model: Model,
        id: i64,
        fields: &FieldValues,
        options: WriteOptions,
    ) -> Result<usize> {
        let entity = model
            .entity()
            .ok_or_else(|| SyncError::Storage(format!("{} has no local records", model)))?;
        let current = self
            .session
            .read_record(&entity, id)?
            .ok_or_else(|| SyncError::Storage(format!("{} {} does not exist", model, id)))?;

        let changed = fields.changed_from(&current);
        if changed.is_empty() {
            return Ok(0);
        }
        self.session.update_record(&entity, id, &changed)?;
        if !options.suppress_export {
            self.schedule_exports(model, id, &changed)?;
        }
        Ok(changed.len())
    }

    /// Enqueue an export for every exporting binding of a local record
    fn schedule_exports(&self, model: Model, local_id: i64, changed: &FieldValues) -> Result<()> {
        let mut bindings: Vec<Binding> = Vec::new();
        match model {
            Model::Project => bindings.extend(self.binder(model).export_binding(local_id)?),
            Model::Task => {
                for binding in
                    self.session
                        .bindings_by_local(&model.bindings(), self.backend_id(), local_id)?
                {
                    if self.task_is_exported(binding.id)? {
                        bindings.push(binding);
                    }
                }
            }
            _ => {}
        }

        for binding in bindings {
            let fields = changed.columns().map(str::to_string).collect();
            let handle = self.submit(JobRequest::new(Job::ExportRecord {
                backend: self.backend.id.clone(),
                model,
                binding_id: binding.id,
                fields,
            }))?;
            tracing::debug!(
                backend = %self.backend.id,
                model = %model,
                binding_id = binding.id,
                job_id = handle.id,
                "Export scheduled after local write"
            );
        }
        Ok(())
    }

    /// A task binding exports when its project binding does
    fn task_is_exported(&self, task_binding_id: i64) -> Result<bool> {
        let fields = self.session.binding_fields(
            &Model::Task.bindings(),
            task_binding_id,
            &["project_binding_id"],
        )?;
        match fields.and_then(|f| f.get_i64("project_binding_id")) {
            Some(project_binding) => Ok(self.binder(Model::Project).sync_action(project_binding)?
                == Some(super::SyncAction::Export)),
            None => Ok(false),
        }
    }

    /// Release every advisory lock taken by this job
    pub fn release_locks(&self) -> Result<()> {
        let released = self.locks.release_all()?;
        tracing::trace!(backend = %self.backend.id, released, "Job locks released");
        Ok(())
    }
}
