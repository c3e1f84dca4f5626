//! Sync daemon
//!
//! Long-running process that keeps backends in sync. It owns:
//!
//! - a scheduler enqueuing each backend's batches at their configured interval
//! - a pool of workers draining the job queue
//! - a maintenance tick requeuing jobs left `started` by a crashed worker and
//!   refreshing the queue gauges
//!
//! The event loop follows the usual shape: one `tokio::select!` over ticks,
//! operator commands and termination signals.

pub mod metrics;

use crate::config::JiraSyncConfig;
use crate::connector::Connector;
use crate::jobs::{JobReport, Worker};
use crate::storage::{Job, JobRequest, JobState};
use crate::sync::BatchKind;
use crate::{Result, SyncError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Default queue poll interval of idle workers
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default scheduler resolution
pub const DEFAULT_SCHEDULER_TICK: Duration = Duration::from_secs(1);

/// Jobs `started` for longer than this are considered abandoned
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(3600);

/// Default event channel capacity
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Number of concurrent workers
    pub workers: usize,

    /// How long an idle worker waits before polling the queue again
    pub poll_interval: Duration,

    /// Resolution of the batch scheduler
    pub scheduler_tick: Duration,

    /// Age after which a started job is requeued
    pub stale_after: Duration,

    /// Enqueue every scan once at startup
    pub scan_on_start: bool,

    pub event_channel_capacity: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            poll_interval: DEFAULT_POLL_INTERVAL,
            scheduler_tick: DEFAULT_SCHEDULER_TICK,
            stale_after: DEFAULT_STALE_AFTER,
            scan_on_start: true,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl DaemonConfig {
    pub fn from_config(config: &JiraSyncConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            poll_interval: config.poll_interval(),
            stale_after: config.lock_ttl(),
            ..Default::default()
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_scan_on_start(mut self, enabled: bool) -> Self {
        self.scan_on_start = enabled;
        self
    }
}

/// Events emitted by the daemon
#[derive(Debug, Clone)]
pub enum DaemonEvent {
    Started,
    Stopped,
    /// A batch was enqueued by the scheduler
    BatchScheduled { backend: String, batch: BatchKind },
    /// A worker finished a job
    JobFinished(JobReport),
    /// Abandoned jobs were put back in the queue
    JobsRequeued(usize),
    Error { message: String },
}

/// Commands that can be sent to the daemon
#[derive(Debug, Clone)]
pub enum DaemonCommand {
    /// Enqueue every batch now (one backend, or all when `None`)
    ScanNow(Option<String>),
    Shutdown,
}

enum CommandResult {
    Continue,
    Stop,
}

pub struct Daemon {
    config: DaemonConfig,
    connector: Arc<Connector>,
    /// Next due time of each (backend, batch)
    schedule: HashMap<(String, BatchKind), Instant>,
    event_tx: broadcast::Sender<DaemonEvent>,
    command_tx: mpsc::Sender<DaemonCommand>,
    command_rx: Option<mpsc::Receiver<DaemonCommand>>,
}

impl Daemon {
    pub fn new(connector: Arc<Connector>, config: DaemonConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity);
        let (command_tx, command_rx) = mpsc::channel(10);
        Self {
            config,
            connector,
            schedule: HashMap::new(),
            event_tx,
            command_tx,
            command_rx: Some(command_rx),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DaemonEvent> {
        self.event_tx.subscribe()
    }

    pub fn command_sender(&self) -> mpsc::Sender<DaemonCommand> {
        self.command_tx.clone()
    }

    fn send_event(&self, event: DaemonEvent) {
        if self.event_tx.send(event).is_err() {
            tracing::trace!("Daemon event sent but no receivers subscribed");
        }
    }

    /// Run until a shutdown command or SIGTERM/SIGINT
    pub async fn run(&mut self) -> Result<()> {
        let mut command_rx = self
            .command_rx
            .take()
            .ok_or_else(|| SyncError::Config("Daemon already running".to_string()))?;

        metrics::set_health_status(true);
        self.send_event(DaemonEvent::Started);
        tracing::info!(workers = self.config.workers, "Sync daemon started");

        self.init_schedule();
        self.maintenance();

        let (stop_tx, stop_rx) = watch::channel(false);
        let workers = self.spawn_workers(stop_rx)?;

        let result = self.event_loop(&mut command_rx).await;

        tracing::info!("Stopping workers");
        let _ = stop_tx.send(true);
        for handle in workers {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Worker task ended abnormally");
            }
        }

        metrics::set_health_status(false);
        self.send_event(DaemonEvent::Stopped);
        tracing::info!("Sync daemon stopped");
        result
    }

    #[cfg(unix)]
    async fn event_loop(&mut self, command_rx: &mut mpsc::Receiver<DaemonCommand>) -> Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| SyncError::Config(format!("Failed to set up SIGTERM handler: {}", e)))?;
        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| SyncError::Config(format!("Failed to set up SIGINT handler: {}", e)))?;

        let mut scheduler = tokio::time::interval(self.config.scheduler_tick);
        let mut maintenance = tokio::time::interval(self.config.poll_interval);

        loop {
            tokio::select! {
                _ = scheduler.tick() => self.schedule_due(),
                _ = maintenance.tick() => self.maintenance(),
                Some(cmd) = command_rx.recv() => {
                    if let CommandResult::Stop = self.handle_command(cmd) {
                        break;
                    }
                }
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, initiating graceful shutdown");
                    break;
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT, initiating graceful shutdown");
                    break;
                }
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    async fn event_loop(&mut self, command_rx: &mut mpsc::Receiver<DaemonCommand>) -> Result<()> {
        let mut scheduler = tokio::time::interval(self.config.scheduler_tick);
        let mut maintenance = tokio::time::interval(self.config.poll_interval);

        loop {
            tokio::select! {
                _ = scheduler.tick() => self.schedule_due(),
                _ = maintenance.tick() => self.maintenance(),
                Some(cmd) = command_rx.recv() => {
                    if let CommandResult::Stop = self.handle_command(cmd) {
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Received Ctrl+C, initiating graceful shutdown");
                    break;
                }
            }
        }
        Ok(())
    }

    fn handle_command(&mut self, cmd: DaemonCommand) -> CommandResult {
        match cmd {
            DaemonCommand::ScanNow(backend) => {
                let backends: Vec<String> = match backend {
                    Some(id) => vec![id],
                    None => self.connector.backend_ids().map(str::to_string).collect(),
                };
                for id in backends {
                    if let Err(e) = self.connector.scan_all(&id) {
                        self.report_error(format!("scan of {} failed: {}", id, e));
                    }
                }
                CommandResult::Continue
            }
            DaemonCommand::Shutdown => {
                tracing::info!("Shutdown requested");
                CommandResult::Stop
            }
        }
    }

    /// First due time of every enabled batch
    fn init_schedule(&mut self) {
        let now = Instant::now();
        let mut schedule = HashMap::new();
        for id in self.connector.backend_ids() {
            let Ok(backend) = self.connector.backend(id) else {
                continue;
            };
            for batch in BatchKind::ALL {
                if let Some(interval) = batch.interval(&backend.scan) {
                    let first = if self.config.scan_on_start {
                        now
                    } else {
                        now + interval
                    };
                    schedule.insert((id.to_string(), batch), first);
                }
            }
        }
        self.schedule = schedule;
    }

    /// Enqueue every batch whose time has come
    fn schedule_due(&mut self) {
        let now = Instant::now();
        let due: Vec<(String, BatchKind)> = self
            .schedule
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(key, _)| key.clone())
            .collect();

        for (backend, batch) in due {
            let interval = self
                .connector
                .backend(&backend)
                .ok()
                .and_then(|config| batch.interval(&config.scan));
            let Some(interval) = interval else {
                self.schedule.remove(&(backend, batch));
                continue;
            };
            self.schedule.insert((backend.clone(), batch), now + interval);

            let request = JobRequest::new(Job::ImportBatch {
                backend: backend.clone(),
                batch,
            });
            match self.connector.enqueue(request) {
                Ok(_) => {
                    tracing::debug!(backend = %backend, batch = %batch, "Batch scheduled");
                    self.send_event(DaemonEvent::BatchScheduled { backend, batch });
                }
                Err(e) => self.report_error(format!("scheduling {} on {} failed: {}", batch, backend, e)),
            }
        }
    }

    fn maintenance(&self) {
        let result = (|| -> Result<(usize, usize)> {
            let session = self.connector.store().session()?;
            let stale = chrono::Duration::from_std(self.config.stale_after)
                .map_err(|e| SyncError::Config(format!("invalid stale timeout: {}", e)))?;
            let requeued = session.requeue_stale_jobs(self.connector.now() - stale)?;
            let expired = self.connector.store().lock_table("daemon")?.cleanup_expired()?;
            if expired > 0 {
                tracing::debug!(expired, "Expired advisory locks removed");
            }
            let pending = session.count_jobs(JobState::Pending)?;
            Ok((requeued, pending))
        })();

        match result {
            Ok((requeued, pending)) => {
                metrics::set_queue_depth(pending);
                if requeued > 0 {
                    tracing::warn!(requeued, "Requeued abandoned jobs");
                    self.send_event(DaemonEvent::JobsRequeued(requeued));
                }
            }
            Err(e) => self.report_error(format!("maintenance failed: {}", e)),
        }
    }

    fn report_error(&self, message: String) {
        tracing::error!(error = %message, "Daemon error");
        self.send_event(DaemonEvent::Error { message });
    }

    fn spawn_workers(&self, stop: watch::Receiver<bool>) -> Result<Vec<JoinHandle<()>>> {
        let mut handles = Vec::with_capacity(self.config.workers);
        for n in 0..self.config.workers {
            let worker = Worker::new(self.connector.clone(), format!("worker-{}", n + 1))?;
            let events = self.event_tx.clone();
            let idle = self.config.poll_interval;
            let stop = stop.clone();
            handles.push(tokio::spawn(worker_loop(worker, events, idle, stop)));
        }
        Ok(handles)
    }
}

/// Run jobs until told to stop, sleeping while the queue is empty
async fn worker_loop(
    worker: Worker,
    events: broadcast::Sender<DaemonEvent>,
    idle: Duration,
    mut stop: watch::Receiver<bool>,
) {
    tracing::debug!(worker = %worker.name(), "Worker started");
    loop {
        if *stop.borrow() {
            break;
        }
        let wait = match worker.run_once().await {
            Ok(Some(report)) => {
                let _ = events.send(DaemonEvent::JobFinished(report));
                continue;
            }
            Ok(None) => idle,
            Err(e) => {
                tracing::error!(worker = %worker.name(), error = %e, "Worker error");
                let _ = events.send(DaemonEvent::Error {
                    message: e.to_string(),
                });
                idle
            }
        };
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = stop.changed() => {}
        }
    }
    tracing::debug!(worker = %worker.name(), "Worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use crate::storage::Store;
    use tempfile::TempDir;

    fn connector(dir: &TempDir) -> Arc<Connector> {
        let mut backend = BackendConfig::new("acme", "http://127.0.0.1:9");
        backend.scan.tasks_secs = 0;
        backend.scan.worklogs_secs = 0;
        backend.scan.deleted_worklogs_secs = 0;
        backend.scan.issue_types_secs = 0;
        backend.scan.users_secs = 60;
        backend.scan.organizations_secs = 0;
        Arc::new(
            Connector::builder()
                .store(Store::open(dir.path().join("sync.db")).unwrap())
                .backend(backend)
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_config_builder() {
        let config = DaemonConfig::default()
            .with_workers(0)
            .with_poll_interval(Duration::from_millis(50))
            .with_scan_on_start(false);
        assert_eq!(config.workers, 1);
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert!(!config.scan_on_start);
    }

    #[tokio::test]
    async fn test_only_enabled_batches_are_scheduled() {
        let dir = TempDir::new().unwrap();
        let mut daemon = Daemon::new(connector(&dir), DaemonConfig::default());

        daemon.init_schedule();
        assert_eq!(daemon.schedule.len(), 1);

        daemon.schedule_due();
        let session = daemon.connector.store().session().unwrap();
        let jobs = session.list_jobs(Some(JobState::Pending), 10).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(
            jobs[0].job,
            Job::ImportBatch {
                backend: "acme".into(),
                batch: BatchKind::Users
            }
        );

        // not due again before its interval
        daemon.schedule_due();
        assert_eq!(session.count_jobs(JobState::Pending).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_command_stops_run() {
        let dir = TempDir::new().unwrap();
        let config = DaemonConfig::default()
            .with_workers(1)
            .with_poll_interval(Duration::from_millis(20))
            .with_scan_on_start(false);
        let mut daemon = Daemon::new(connector(&dir), config);
        let mut events = daemon.subscribe();
        let commands = daemon.command_sender();

        commands.send(DaemonCommand::Shutdown).await.unwrap();
        daemon.run().await.unwrap();

        assert!(matches!(events.recv().await.unwrap(), DaemonEvent::Started));
        assert!(daemon.run().await.is_err());
    }
}
