//! Deleter: a record deleted in Jira → local side
//!
//! What happens locally depends on the model:
//!
//! | model                      | local record       | binding |
//! |----------------------------|--------------------|---------|
//! | worklog                    | deleted            | removed |
//! | task                       | deactivated        | removed |
//! | project, user, standalone  | kept               | removed |

use super::{Model, SyncEnv, WriteOptions};
use crate::storage::FieldValues;
use crate::Result;
use std::fmt;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletePolicy {
    DeleteLocal,
    Deactivate,
    Unlink,
}

impl DeletePolicy {
    pub fn for_model(model: Model) -> Self {
        match model {
            Model::Worklog => DeletePolicy::DeleteLocal,
            Model::Task => DeletePolicy::Deactivate,
            Model::Project | Model::User | Model::IssueType | Model::Organization => {
                DeletePolicy::Unlink
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    Deactivated,
    Unlinked,
    /// Nothing local was bound to the remote record
    NotBound,
}

impl fmt::Display for DeleteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeleteOutcome::Deleted => "local record deleted",
            DeleteOutcome::Deactivated => "local record deactivated",
            DeleteOutcome::Unlinked => "binding unlinked",
            DeleteOutcome::NotBound => "not bound locally",
        })
    }
}

/// Apply a remote deletion; takes the record's import lock
pub fn delete_record(env: &SyncEnv, model: Model, external_id: &str) -> Result<DeleteOutcome> {
    let key = model.import_lock_key(env.backend_id(), external_id);
    env.locks
        .acquire_or_retry(&key, &format!("{} {}", model, external_id))?;

    let binder = env.binder(model);
    let Some(binding) = binder.to_binding(external_id)? else {
        return Ok(DeleteOutcome::NotBound);
    };

    let outcome = match (DeletePolicy::for_model(model), binding.local_id, model.entity()) {
        (DeletePolicy::DeleteLocal, Some(local_id), Some(entity)) => {
            binder.unlink(binding.id)?;
            env.session.delete_record(&entity, local_id)?;
            DeleteOutcome::Deleted
        }
        (DeletePolicy::Deactivate, Some(local_id), Some(_)) => {
            env.update_local(
                model,
                local_id,
                &FieldValues::new().with("active", false),
                WriteOptions::from_import(),
            )?;
            binder.unlink(binding.id)?;
            DeleteOutcome::Deactivated
        }
        _ => {
            binder.unlink(binding.id)?;
            DeleteOutcome::Unlinked
        }
    };

    info!(
        backend = %env.backend_id(),
        model = %model,
        external_id = %external_id,
        outcome = %outcome,
        "Remote deletion applied"
    );
    Ok(outcome)
}
