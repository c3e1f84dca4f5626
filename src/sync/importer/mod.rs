//! Importer: one remote record → local store
//!
//! [`Importer`] runs the import state machine; everything model specific is
//! injected through an [`ImportStrategy`]:
//!
//! ```text
//! start → locked → fetched → (skip | missing-remote) → bound-check
//!       → (up-to-date) → dependencies-imported → written → bound → done
//! ```
//!
//! Dependencies go through the same state machine (and the same advisory
//! lock discipline) via [`SyncEnv::import_dependency`].

mod issue_type;
mod organization;
mod project;
mod task;
mod user;
mod worklog;

pub use issue_type::IssueTypeImport;
pub use organization::OrganizationImport;
pub use project::ProjectImport;
pub use task::TaskImport;
pub use user::UserImport;
pub use worklog::WorklogImport;

use super::mapper::MappedRecord;
use super::{Model, SyncEnv, WriteOptions};
use crate::daemon::metrics;
use crate::storage::Binding;
use crate::{Result, SyncError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use tracing::{debug, info, warn};

/// What to do with the local side when Jira no longer has the record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingPolicy {
    /// Drop the binding, keep the local record
    Unlink,
    /// Delete the local record and its binding
    Delete,
}

/// Result of dependency resolution
#[derive(Debug)]
pub enum Dependencies<D> {
    Resolved(D),
    /// The record cannot be placed locally; skip it
    Skip(String),
}

/// One import request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportRequest {
    pub external_id: String,
    /// Import even when the binding looks up to date
    pub force: bool,
    /// Raw payload supplied by the caller (saves a remote read)
    pub data: Option<Value>,
}

impl ImportRequest {
    pub fn new(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            ..Default::default()
        }
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportOutcome {
    Created { binding_id: i64 },
    Updated { binding_id: i64, changed: usize },
    UpToDate { binding_id: i64 },
    Skipped { reason: String },
    /// The record is gone from Jira; the binding was unlinked or the local
    /// record deleted
    MissingRemote { deleted: bool },
}

impl ImportOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ImportOutcome::Created { .. } => "created",
            ImportOutcome::Updated { .. } => "updated",
            ImportOutcome::UpToDate { .. } => "up_to_date",
            ImportOutcome::Skipped { .. } => "skipped",
            ImportOutcome::MissingRemote { .. } => "missing_remote",
        }
    }

    pub fn binding_id(&self) -> Option<i64> {
        match self {
            ImportOutcome::Created { binding_id }
            | ImportOutcome::Updated { binding_id, .. }
            | ImportOutcome::UpToDate { binding_id } => Some(*binding_id),
            _ => None,
        }
    }
}

impl fmt::Display for ImportOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportOutcome::Created { binding_id } => write!(f, "created (binding {})", binding_id),
            ImportOutcome::Updated {
                binding_id,
                changed,
            } => write!(f, "updated {} field(s) (binding {})", changed, binding_id),
            ImportOutcome::UpToDate { binding_id } => {
                write!(f, "already up to date (binding {})", binding_id)
            }
            ImportOutcome::Skipped { reason } => write!(f, "skipped: {}", reason),
            ImportOutcome::MissingRemote { deleted: true } => {
                write!(f, "record missing on Jira, local record deleted")
            }
            ImportOutcome::MissingRemote { deleted: false } => {
                write!(f, "record missing on Jira, binding unlinked")
            }
        }
    }
}

/// Model specific parts of an import
#[async_trait]
pub trait ImportStrategy: Send + Sync + 'static {
    type Raw: DeserializeOwned + Send + Sync;
    type Deps: Send + Sync;

    const MODEL: Model;

    async fn fetch(&self, env: &SyncEnv, external_id: &str) -> Result<Self::Raw>;

    /// Remote "updated" time; `None` disables the up-to-date check
    fn remote_updated_at(&self, _raw: &Self::Raw) -> Result<Option<DateTime<Utc>>> {
        Ok(None)
    }

    /// Reason to leave the record alone, if any
    async fn skip_reason(
        &self,
        _env: &SyncEnv,
        _raw: &Self::Raw,
        _binding: Option<&Binding>,
    ) -> Result<Option<String>> {
        Ok(None)
    }

    async fn import_dependencies(
        &self,
        env: &SyncEnv,
        raw: &Self::Raw,
    ) -> Result<Dependencies<Self::Deps>>;

    fn map(&self, env: &SyncEnv, raw: &Self::Raw, deps: &Self::Deps) -> Result<MappedRecord>;

    fn missing_policy(&self) -> MissingPolicy {
        MissingPolicy::Unlink
    }

    /// Create the local side and its binding, returning the binding id
    fn create(
        &self,
        env: &SyncEnv,
        external_id: &str,
        _raw: &Self::Raw,
        mapped: &MappedRecord,
    ) -> Result<i64> {
        let local_id = if Self::MODEL.is_standalone() {
            None
        } else {
            Some(env.create_local(Self::MODEL, &mapped.local, WriteOptions::from_import())?)
        };
        env.binder(Self::MODEL)
            .create_binding(local_id, Some(external_id), &mapped.binding)
    }

    /// Write changed values to an existing record, returning the number of
    /// columns written
    fn update(&self, env: &SyncEnv, binding: &Binding, mapped: &MappedRecord) -> Result<usize> {
        let mut changed = 0;
        if let Some(local_id) = binding.local_id {
            if !mapped.local.is_empty() {
                changed += env.update_local(
                    Self::MODEL,
                    local_id,
                    &mapped.local,
                    WriteOptions::from_import(),
                )?;
            }
        }

        if !mapped.binding.is_empty() {
            let table = Self::MODEL.bindings();
            let columns: Vec<&'static str> = mapped.binding.columns().collect();
            if let Some(current) = env.session.binding_fields(&table, binding.id, &columns)? {
                let diff = mapped.binding.changed_from(&current);
                changed += diff.len();
                env.session.update_binding(&table, binding.id, &diff)?;
            }
        }
        Ok(changed)
    }

    async fn after_import(&self, _env: &SyncEnv, _binding_id: i64, _raw: &Self::Raw) -> Result<()> {
        Ok(())
    }
}

/// Object-safe importer, the form stored in the registry
#[async_trait]
pub trait RecordImporter: Send + Sync {
    fn model(&self) -> Model;

    async fn import(&self, env: &SyncEnv, request: ImportRequest) -> Result<ImportOutcome>;
}

/// Generic import state machine
pub struct Importer<S> {
    strategy: S,
}

impl<S: ImportStrategy> Importer<S> {
    pub fn new(strategy: S) -> Self {
        Self { strategy }
    }

    async fn handle_missing(&self, env: &SyncEnv, external_id: &str) -> Result<ImportOutcome> {
        let binder = env.binder(S::MODEL);
        let Some(binding) = binder.to_binding(external_id)? else {
            info!(
                backend = %env.backend_id(),
                model = %S::MODEL,
                external_id = %external_id,
                "Record missing on Jira and never imported"
            );
            return Ok(ImportOutcome::MissingRemote { deleted: false });
        };

        let deleted = match self.strategy.missing_policy() {
            MissingPolicy::Delete => {
                binder.unlink(binding.id)?;
                if let (Some(entity), Some(local_id)) = (S::MODEL.entity(), binding.local_id) {
                    env.session.delete_record(&entity, local_id)?;
                }
                true
            }
            MissingPolicy::Unlink => {
                binder.unlink(binding.id)?;
                false
            }
        };

        info!(
            backend = %env.backend_id(),
            model = %S::MODEL,
            external_id = %external_id,
            deleted,
            "Record missing on Jira"
        );
        Ok(ImportOutcome::MissingRemote { deleted })
    }

    /// Look for a binding committed by a concurrent import in a fresh unit of work
    fn recheck_concurrent_creation(&self, env: &SyncEnv, external_id: &str) -> Result<()> {
        let fresh = env.store.session()?;
        let found =
            fresh.binding_by_external(&S::MODEL.bindings(), env.backend_id(), external_id)?;
        if found.is_some() {
            return Err(SyncError::retry_later(
                format!("concurrent import detected for {} {}", S::MODEL, external_id),
                crate::error::DEFAULT_RETRY_DELAY,
            ));
        }
        Ok(())
    }

    async fn run(&self, env: &SyncEnv, request: ImportRequest) -> Result<ImportOutcome> {
        let external_id = request.external_id.as_str();
        let binder = env.binder(S::MODEL);

        let raw: S::Raw = match request.data {
            Some(data) => serde_json::from_value(data)?,
            None => match self.strategy.fetch(env, external_id).await {
                Ok(raw) => raw,
                Err(e) if e.is_not_found() => return self.handle_missing(env, external_id).await,
                Err(e) => return Err(e),
            },
        };

        let binding = binder.to_binding(external_id)?;
        if binding.is_none() {
            self.recheck_concurrent_creation(env, external_id)?;
        }

        if let Some(reason) = self
            .strategy
            .skip_reason(env, &raw, binding.as_ref())
            .await?
        {
            debug!(
                backend = %env.backend_id(),
                model = %S::MODEL,
                external_id = %external_id,
                reason = %reason,
                "Import skipped"
            );
            return Ok(ImportOutcome::Skipped { reason });
        }

        let remote_updated = self.strategy.remote_updated_at(&raw)?;
        if !request.force {
            if let Some(binding) = &binding {
                if is_up_to_date(binding.external_updated_at, remote_updated) {
                    return Ok(ImportOutcome::UpToDate {
                        binding_id: binding.id,
                    });
                }
            }
        }

        let deps = match self.strategy.import_dependencies(env, &raw).await? {
            Dependencies::Resolved(deps) => deps,
            Dependencies::Skip(reason) => return Ok(ImportOutcome::Skipped { reason }),
        };

        let mapped = self.strategy.map(env, &raw, &deps)?;

        let outcome = match &binding {
            Some(binding) => {
                let changed = self.strategy.update(env, binding, &mapped)?;
                ImportOutcome::Updated {
                    binding_id: binding.id,
                    changed,
                }
            }
            None => {
                let binding_id = self
                    .strategy
                    .create(env, external_id, &raw, &mapped)
                    .map_err(|e| {
                        if e.is_unique_violation() {
                            SyncError::retry_later(
                                format!(
                                    "{} {} was created concurrently: {}",
                                    S::MODEL,
                                    external_id,
                                    e
                                ),
                                crate::error::DEFAULT_RETRY_DELAY,
                            )
                        } else {
                            e
                        }
                    })?;
                ImportOutcome::Created { binding_id }
            }
        };

        let binding_id = outcome.binding_id().unwrap_or_default();
        binder.bind(binding_id, external_id, remote_updated)?;
        self.strategy.after_import(env, binding_id, &raw).await?;

        info!(
            backend = %env.backend_id(),
            model = %S::MODEL,
            external_id = %external_id,
            outcome = %outcome,
            "Record imported"
        );
        Ok(outcome)
    }
}

/// A binding is up to date when it saw a remote change at least as recent
fn is_up_to_date(local: Option<DateTime<Utc>>, remote: Option<DateTime<Utc>>) -> bool {
    match (local, remote) {
        (Some(local), Some(remote)) => local >= remote,
        _ => false,
    }
}

#[async_trait]
impl<S: ImportStrategy> RecordImporter for Importer<S> {
    fn model(&self) -> Model {
        S::MODEL
    }

    async fn import(&self, env: &SyncEnv, request: ImportRequest) -> Result<ImportOutcome> {
        let Some(_guard) = env.enter(S::MODEL, &request.external_id)? else {
            return Ok(ImportOutcome::Skipped {
                reason: format!(
                    "{} {} is already being imported (cycle)",
                    S::MODEL,
                    request.external_id
                ),
            });
        };

        let key = S::MODEL.import_lock_key(env.backend_id(), &request.external_id);
        env.locks
            .acquire_or_retry(&key, &format!("{} {}", S::MODEL, request.external_id))?;

        let result = self.run(env, request).await;
        match &result {
            Ok(outcome) => metrics::record_import(S::MODEL.as_str(), outcome.label()),
            Err(e) => {
                metrics::record_import(S::MODEL.as_str(), "error");
                if !e.is_retryable() {
                    warn!(backend = %env.backend_id(), model = %S::MODEL, error = %e, "Import failed");
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_up_to_date_check() {
        let t = Utc.with_ymd_and_hms(2019, 4, 8, 12, 0, 0).unwrap();
        let later = t + chrono::Duration::milliseconds(1);

        assert!(is_up_to_date(Some(t), Some(t)));
        assert!(is_up_to_date(Some(later), Some(t)));
        assert!(!is_up_to_date(Some(t), Some(later)));
        assert!(!is_up_to_date(None, Some(t)));
        assert!(!is_up_to_date(Some(t), None));
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(
            ImportOutcome::MissingRemote { deleted: true }.to_string(),
            "record missing on Jira, local record deleted"
        );
        assert_eq!(ImportOutcome::Created { binding_id: 4 }.binding_id(), Some(4));
        assert_eq!(
            ImportOutcome::Skipped {
                reason: "x".into()
            }
            .binding_id(),
            None
        );
    }
}
