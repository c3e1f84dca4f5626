//! jirasync configuration file handling
//!
//! Loads and manages the ~/.config/jirasync/config.yaml file.

use super::backend::BackendConfig;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete jirasync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraSyncConfig {
    /// SQLite database holding entities, bindings, watermarks and jobs
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Number of concurrent worker loops in the daemon
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// How often idle workers poll the job queue
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Expiry of advisory lock rows left behind by a crashed worker
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,

    /// Retry budget of newly submitted jobs
    #[serde(default = "default_max_retries")]
    pub job_max_retries: u32,

    /// Configured Jira connections
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

fn config_dir() -> PathBuf {
    // Always use ~/.config for consistency across platforms (macOS, Linux)
    let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(".config");
    path.push("jirasync");
    path
}

fn default_database() -> PathBuf {
    config_dir().join("sync.db")
}

fn default_workers() -> usize {
    2
}

fn default_poll_interval() -> u64 {
    5
}

fn default_lock_ttl() -> u64 {
    3600
}

fn default_max_retries() -> u32 {
    5
}

impl JiraSyncConfig {
    /// Create a configuration without backends
    pub fn new() -> Self {
        Self {
            database: default_database(),
            workers: default_workers(),
            poll_interval_secs: default_poll_interval(),
            lock_ttl_secs: default_lock_ttl(),
            job_max_retries: default_max_retries(),
            backends: Vec::new(),
        }
    }

    /// Load configuration from the default path
    pub fn load_default() -> Result<Self> {
        Self::load(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(crate::SyncError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading jirasync configuration");

        let content = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;

        tracing::debug!(
            backends = config.backends.len(),
            workers = config.workers,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "Saving jirasync configuration");

        fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// ~/.config/jirasync/config.yaml
    pub fn default_path() -> PathBuf {
        config_dir().join("config.yaml")
    }

    pub fn backend(&self, id: &str) -> Option<&BackendConfig> {
        self.backends.iter().find(|b| b.id == id)
    }

    /// Look up a backend, failing with a configuration error
    pub fn require_backend(&self, id: &str) -> Result<&BackendConfig> {
        self.backend(id)
            .ok_or_else(|| crate::SyncError::Config(format!("Unknown backend: {}", id)))
    }

    pub fn add_backend(&mut self, backend: BackendConfig) {
        self.backends.push(backend);
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }
}

impl Default for JiraSyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = JiraSyncConfig::new();
        assert_eq!(config.workers, 2);
        assert_eq!(config.lock_ttl(), Duration::from_secs(3600));
        assert!(config.backends.is_empty());
        assert!(config.database.ends_with("jirasync/sync.db"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let mut config = JiraSyncConfig::new();
        config.database = dir.path().join("sync.db");
        config.add_backend(
            BackendConfig::new("acme", "https://acme.atlassian.net")
                .with_token_env("JIRA_TOKEN")
                .with_fallback_project(7),
        );
        config.save(&path).unwrap();

        let loaded = JiraSyncConfig::load(&path).unwrap();
        assert_eq!(loaded.backends.len(), 1);
        let backend = loaded.backend("acme").unwrap();
        assert_eq!(backend.token_env.as_deref(), Some("JIRA_TOKEN"));
        assert_eq!(backend.worklog_fallback_project_id, Some(7));
        assert!(loaded.require_backend("other").is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = JiraSyncConfig::load("/nonexistent/jirasync.yaml").unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }
}
