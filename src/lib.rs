//! jirasync - bidirectional synchronization between a local store and Jira
//!
//! Projects, issue types, users, organizations, tasks and worklogs are kept in
//! sync per configured Jira backend. Every synchronization step is a job in a
//! persistent queue; workers run jobs in their own unit of work and retry
//! them according to the failure's disposition.
//!
//! # Architecture
//!
//! - **config**: YAML configuration of backends, scans and workers
//! - **integrations**: the `RemoteAdapter` seam and the Jira REST adapter
//! - **storage**: SQLite store, bindings, watermarks, job queue, advisory locks
//! - **sync**: binder, mapper, importers, exporters, deleter and batches
//! - **connector**: runs jobs and the operator operations
//! - **jobs**: queue workers
//! - **daemon**: scheduler, worker pool and metrics
//! - **webhook**: Jira webhook routing

pub mod config;
pub mod connector;
pub mod daemon;
pub mod error;
pub mod integrations;
pub mod jobs;
pub mod logging;
pub mod storage;
pub mod sync;
pub mod webhook;

pub use error::{Result, SyncError};
