//! Synchronization core
//!
//! Bidirectional sync between the local store and Jira, per entity type:
//!
//! - [`Binder`]: local identity ↔ remote identity
//! - [`mapper`]: pure field transformations
//! - [`importer`]: the import state machine plus one strategy per model
//! - [`exporter`]: the export mirror for projects and tasks
//! - [`deleter`]: remote deletions
//! - [`batch`]: direct, delayed and timestamp-driven batch imports
//! - [`TaskProjectMatcher`]: where a remote issue or worklog lives locally
//!
//! Every operation runs inside a [`SyncEnv`], the per-job environment.

pub mod batch;
pub mod binder;
pub mod clock;
pub mod deleter;
pub mod env;
pub mod exporter;
pub mod importer;
pub mod mapper;
pub mod matcher;
pub mod model;
pub mod registry;

pub use batch::{run_batch, BatchKind, BatchSummary};
pub use binder::{Binder, SyncAction};
pub use clock::{Clock, FixedClock, SystemClock};
pub use deleter::{delete_record, DeleteOutcome, DeletePolicy};
pub use env::{SyncEnv, WriteOptions};
pub use exporter::{ExportOutcome, ExportStrategy, Exporter, RecordExporter};
pub use importer::{
    Dependencies, ImportOutcome, ImportRequest, ImportStrategy, Importer, MissingPolicy,
    RecordImporter,
};
pub use mapper::MappedRecord;
pub use matcher::TaskProjectMatcher;
pub use model::Model;
pub use registry::Registry;
