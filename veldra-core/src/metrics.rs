//! Process-wide counters and durations for lifecycle operations.

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Process-wide metrics sink.
///
/// Holds lifecycle counters, per-plugin operation durations, and
/// per-endpoint API counters. Constructed once at host startup and handed
/// to plugins through their context; mutation happens only through the
/// `record_*` methods, reads only through snapshots.
#[derive(Debug, Default)]
pub struct MetricsSink {
    started_at_ms: AtomicI64,
    total_installed: AtomicU64,
    total_started: AtomicU64,
    total_stopped: AtomicU64,
    total_unloaded: AtomicU64,
    total_errors: AtomicU64,
    api_requests: AtomicU64,
    api_errors: AtomicU64,
    endpoints: DashMap<String, AtomicU64>,
    plugins: DashMap<String, PluginStats>,
}

#[derive(Debug, Default)]
struct PluginStats {
    install_count: AtomicU64,
    start_count: AtomicU64,
    stop_count: AtomicU64,
    error_count: AtomicU64,
    total_install_ms: AtomicU64,
    total_start_ms: AtomicU64,
    total_stop_ms: AtomicU64,
    last_install_ms: AtomicI64,
    last_start_ms: AtomicI64,
    last_stop_ms: AtomicI64,
}

/// Read-only view of one plugin's metrics.
#[derive(Debug, Clone, Serialize)]
pub struct PluginMetricsSnapshot {
    /// Number of installs recorded.
    pub install_count: u64,
    /// Number of successful starts recorded.
    pub start_count: u64,
    /// Number of successful stops recorded.
    pub stop_count: u64,
    /// Number of lifecycle errors recorded.
    pub error_count: u64,
    /// Cumulative install duration in milliseconds.
    pub total_install_ms: u64,
    /// Cumulative start duration in milliseconds.
    pub total_start_ms: u64,
    /// Cumulative stop duration in milliseconds.
    pub total_stop_ms: u64,
    /// Average install duration in milliseconds.
    pub avg_install_ms: f64,
    /// Average start duration in milliseconds.
    pub avg_start_ms: f64,
    /// Average stop duration in milliseconds.
    pub avg_stop_ms: f64,
    /// Epoch-millisecond stamp of the last install, 0 if never.
    pub last_install_ms: i64,
    /// Epoch-millisecond stamp of the last start, 0 if never.
    pub last_start_ms: i64,
    /// Epoch-millisecond stamp of the last stop, 0 if never.
    pub last_stop_ms: i64,
}

/// Read-only view of the whole sink.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Total plugins installed over the host lifetime.
    pub installed: u64,
    /// Total successful starts.
    pub started: u64,
    /// Total successful stops.
    pub stopped: u64,
    /// Total unloads.
    pub unloaded: u64,
    /// Total lifecycle errors.
    pub errors: u64,
    /// Total API requests recorded by collaborators.
    pub api_requests: u64,
    /// Total API errors recorded by collaborators.
    pub api_errors: u64,
    /// Milliseconds since the sink was created.
    pub uptime_ms: i64,
    /// Request counts per API endpoint.
    pub endpoints: HashMap<String, u64>,
    /// Per-plugin metrics for currently tracked plugins.
    pub plugins: HashMap<String, PluginMetricsSnapshot>,
}

impl MetricsSink {
    /// Create an empty sink stamped now.
    pub fn new() -> Self {
        let sink = Self::default();
        sink.started_at_ms.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        sink
    }

    /// Record a completed install and its duration.
    pub fn record_installed(&self, plugin: &str, duration: Duration) {
        let ms = duration.as_millis() as u64;
        self.total_installed.fetch_add(1, Ordering::Relaxed);
        let stats = self.plugins.entry(plugin.to_string()).or_default();
        stats.install_count.fetch_add(1, Ordering::Relaxed);
        stats.total_install_ms.fetch_add(ms, Ordering::Relaxed);
        stats.last_install_ms.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        debug!(plugin, duration_ms = ms, "recorded plugin install");
    }

    /// Record a successful start and its duration.
    pub fn record_started(&self, plugin: &str, duration: Duration) {
        let ms = duration.as_millis() as u64;
        self.total_started.fetch_add(1, Ordering::Relaxed);
        let stats = self.plugins.entry(plugin.to_string()).or_default();
        stats.start_count.fetch_add(1, Ordering::Relaxed);
        stats.total_start_ms.fetch_add(ms, Ordering::Relaxed);
        stats.last_start_ms.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        debug!(plugin, duration_ms = ms, "recorded plugin start");
    }

    /// Record a successful stop and its duration.
    pub fn record_stopped(&self, plugin: &str, duration: Duration) {
        let ms = duration.as_millis() as u64;
        self.total_stopped.fetch_add(1, Ordering::Relaxed);
        let stats = self.plugins.entry(plugin.to_string()).or_default();
        stats.stop_count.fetch_add(1, Ordering::Relaxed);
        stats.total_stop_ms.fetch_add(ms, Ordering::Relaxed);
        stats.last_stop_ms.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        debug!(plugin, duration_ms = ms, "recorded plugin stop");
    }

    /// Record an unload; the plugin's per-plugin stats are dropped.
    pub fn record_unloaded(&self, plugin: &str) {
        self.total_unloaded.fetch_add(1, Ordering::Relaxed);
        self.plugins.remove(plugin);
        debug!(plugin, "recorded plugin unload");
    }

    /// Record a lifecycle error for the named operation.
    pub fn record_error(&self, plugin: &str, operation: &str) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
        self.plugins.entry(plugin.to_string()).or_default().error_count.fetch_add(1, Ordering::Relaxed);
        debug!(plugin, operation, "recorded plugin error");
    }

    /// Record an API request against an endpoint.
    pub fn record_api_request(&self, endpoint: &str) {
        self.api_requests.fetch_add(1, Ordering::Relaxed);
        self.endpoints
            .entry(endpoint.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record an API error.
    pub fn record_api_error(&self) {
        self.api_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Milliseconds since the sink was created.
    pub fn uptime_ms(&self) -> i64 {
        Utc::now().timestamp_millis() - self.started_at_ms.load(Ordering::Relaxed)
    }

    /// Per-plugin metrics, if the plugin is currently tracked.
    pub fn plugin_snapshot(&self, plugin: &str) -> Option<PluginMetricsSnapshot> {
        self.plugins.get(plugin).map(|stats| snapshot_stats(&stats))
    }

    /// A consistent-enough point-in-time view of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            installed: self.total_installed.load(Ordering::Relaxed),
            started: self.total_started.load(Ordering::Relaxed),
            stopped: self.total_stopped.load(Ordering::Relaxed),
            unloaded: self.total_unloaded.load(Ordering::Relaxed),
            errors: self.total_errors.load(Ordering::Relaxed),
            api_requests: self.api_requests.load(Ordering::Relaxed),
            api_errors: self.api_errors.load(Ordering::Relaxed),
            uptime_ms: self.uptime_ms(),
            endpoints: self
                .endpoints
                .iter()
                .map(|entry| (entry.key().clone(), entry.load(Ordering::Relaxed)))
                .collect(),
            plugins: self
                .plugins
                .iter()
                .map(|entry| (entry.key().clone(), snapshot_stats(entry.value())))
                .collect(),
        }
    }
}

fn snapshot_stats(stats: &PluginStats) -> PluginMetricsSnapshot {
    let install_count = stats.install_count.load(Ordering::Relaxed);
    let start_count = stats.start_count.load(Ordering::Relaxed);
    let stop_count = stats.stop_count.load(Ordering::Relaxed);
    let total_install_ms = stats.total_install_ms.load(Ordering::Relaxed);
    let total_start_ms = stats.total_start_ms.load(Ordering::Relaxed);
    let total_stop_ms = stats.total_stop_ms.load(Ordering::Relaxed);

    let avg = |total: u64, count: u64| if count > 0 { total as f64 / count as f64 } else { 0.0 };

    PluginMetricsSnapshot {
        install_count,
        start_count,
        stop_count,
        error_count: stats.error_count.load(Ordering::Relaxed),
        total_install_ms,
        total_start_ms,
        total_stop_ms,
        avg_install_ms: avg(total_install_ms, install_count),
        avg_start_ms: avg(total_start_ms, start_count),
        avg_stop_ms: avg(total_stop_ms, stop_count),
        last_install_ms: stats.last_install_ms.load(Ordering::Relaxed),
        last_start_ms: stats.last_start_ms.load(Ordering::Relaxed),
        last_stop_ms: stats.last_stop_ms.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_counters_accumulate() {
        let sink = MetricsSink::new();
        sink.record_installed("p1", Duration::from_millis(12));
        sink.record_started("p1", Duration::from_millis(3));
        sink.record_started("p1", Duration::from_millis(5));
        sink.record_stopped("p1", Duration::from_millis(2));
        sink.record_error("p1", "start");

        let snapshot = sink.snapshot();
        assert_eq!(snapshot.installed, 1);
        assert_eq!(snapshot.started, 2);
        assert_eq!(snapshot.stopped, 1);
        assert_eq!(snapshot.errors, 1);

        let p1 = sink.plugin_snapshot("p1").expect("stats");
        assert_eq!(p1.start_count, 2);
        assert_eq!(p1.total_start_ms, 8);
        assert!((p1.avg_start_ms - 4.0).abs() < f64::EPSILON);
        assert!(p1.last_start_ms > 0);
    }

    #[test]
    fn unload_drops_plugin_stats() {
        let sink = MetricsSink::new();
        sink.record_installed("p1", Duration::from_millis(1));
        sink.record_unloaded("p1");

        assert!(sink.plugin_snapshot("p1").is_none());
        assert_eq!(sink.snapshot().unloaded, 1);
        // The host-wide install counter survives the unload.
        assert_eq!(sink.snapshot().installed, 1);
    }

    #[test]
    fn api_counters_track_endpoints() {
        let sink = MetricsSink::new();
        sink.record_api_request("/api/plugins/install");
        sink.record_api_request("/api/plugins/install");
        sink.record_api_request("/api/plugins/list");
        sink.record_api_error();

        let snapshot = sink.snapshot();
        assert_eq!(snapshot.api_requests, 3);
        assert_eq!(snapshot.api_errors, 1);
        assert_eq!(snapshot.endpoints.get("/api/plugins/install"), Some(&2));
    }

    #[test]
    fn averages_handle_zero_counts() {
        let sink = MetricsSink::new();
        sink.record_error("p1", "init");
        let p1 = sink.plugin_snapshot("p1").expect("stats");
        assert_eq!(p1.avg_install_ms, 0.0);
    }
}
