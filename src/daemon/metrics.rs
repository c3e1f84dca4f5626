//! Prometheus metrics of the sync engine
//!
//! Registered in the default registry; `jirasync metrics` and the daemon
//! render them with [`encode_metrics`].

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, CounterVec, Encoder, Gauge,
    GaugeVec, TextEncoder,
};

lazy_static! {
    /// Counter: records synchronized by model, direction and outcome
    pub static ref RECORDS_SYNCED: CounterVec = register_counter_vec!(
        "jirasync_records_total",
        "Records synchronized by model, direction and outcome",
        &["model", "direction", "outcome"]
    )
    .expect("Failed to create records_total metric");

    /// Counter: finished job runs by job type and outcome
    pub static ref JOBS: CounterVec = register_counter_vec!(
        "jirasync_jobs_total",
        "Job runs by type and outcome",
        &["job_type", "outcome"]
    )
    .expect("Failed to create jobs_total metric");

    /// Counter: advisory lock contention
    pub static ref LOCK_CONTENTION: CounterVec = register_counter_vec!(
        "jirasync_lock_contention_total",
        "Advisory locks found held by another worker",
        &["lock"]
    )
    .expect("Failed to create lock_contention metric");

    /// Gauge: pending jobs
    pub static ref QUEUE_DEPTH: Gauge = register_gauge!(
        "jirasync_queue_depth",
        "Jobs waiting in the queue"
    )
    .expect("Failed to create queue_depth metric");

    /// Gauge: scan watermark (Unix seconds)
    pub static ref WATERMARK: GaugeVec = register_gauge_vec!(
        "jirasync_watermark_seconds",
        "Watermark of incremental scans",
        &["backend", "scan"]
    )
    .expect("Failed to create watermark metric");

    /// Gauge: daemon health status (1 = healthy, 0 = unhealthy)
    pub static ref HEALTH_STATUS: Gauge = register_gauge!(
        "jirasync_health_status",
        "Daemon health status (1 = healthy, 0 = unhealthy)"
    )
    .expect("Failed to create health_status metric");
}

pub fn record_import(model: &str, outcome: &str) {
    RECORDS_SYNCED
        .with_label_values(&[model, "import", outcome])
        .inc();
}

pub fn record_export(model: &str, outcome: &str) {
    RECORDS_SYNCED
        .with_label_values(&[model, "export", outcome])
        .inc();
}

pub fn record_job(job_type: &str, outcome: &str) {
    JOBS.with_label_values(&[job_type, outcome]).inc();
}

/// Lock keys carry record ids; only their prefix becomes a label
pub fn record_lock_contention(key: &str) {
    let kind = key.split(':').next().unwrap_or(key);
    LOCK_CONTENTION.with_label_values(&[kind]).inc();
}

pub fn set_queue_depth(depth: usize) {
    QUEUE_DEPTH.set(depth as f64);
}

pub fn set_watermark(backend: &str, scan: &str, watermark: DateTime<Utc>) {
    WATERMARK
        .with_label_values(&[backend, scan])
        .set(watermark.timestamp() as f64);
}

pub fn set_health_status(healthy: bool) {
    HEALTH_STATUS.set(if healthy { 1.0 } else { 0.0 });
}

/// Encode all metrics as Prometheus text format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        record_import("task", "created");
        record_export("project", "updated");
        record_job("import_record", "done");
        record_lock_contention("import:acme:task:10001");
        set_queue_depth(3);
        set_watermark("acme", "tasks", Utc::now());
        set_health_status(true);

        let output = encode_metrics();
        assert!(output.contains("jirasync_records_total"));
        assert!(output.contains("jirasync_lock_contention_total"));
        assert!(output.contains("lock=\"import\""));
    }
}
