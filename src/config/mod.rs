//! Configuration system
//!
//! Loads ~/.config/jirasync/config.yaml with support for:
//! - Multiple Jira backends, each with its own credentials
//! - Per-backend worklog date policy and fallback project
//! - Scan intervals of the incremental batch imports
//! - Worker pool and lock settings

mod backend;
mod jirasync_config;
pub mod validation;

pub use backend::{parse_utc_offset, BackendConfig, ScanConfig, WorklogTimezone};
pub use jirasync_config::JiraSyncConfig;
pub use validation::{validate_config, validate_config_result, ValidationError};
