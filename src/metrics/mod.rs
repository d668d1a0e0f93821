//! Aggregate and per-plugin counters the host keeps for observability,
//! per §4.7. No external metrics crate is pulled in: everything here is
//! atomics and a `RwLock`-guarded map, snapshotted on demand rather than
//! pushed anywhere.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::RwLock;

/// Running counts and durations for a single plugin. `total_*_duration`
/// divided by the matching count gives a mean; no percentile tracking is
/// kept, since nothing downstream of this crate consumes one.
#[derive(Debug, Clone, Default)]
pub struct PluginMetrics {
    pub install_count: u64,
    pub start_count: u64,
    pub stop_count: u64,
    pub failure_count: u64,
    pub total_install_duration: Duration,
    pub total_start_duration: Duration,
    pub total_stop_duration: Duration,
}

/// Process-wide lifecycle operation totals, independent of which plugin
/// they concerned.
#[derive(Debug, Clone, Copy, Default)]
pub struct AggregateCounts {
    pub installs: u64,
    pub starts: u64,
    pub stops: u64,
    pub unloads: u64,
    pub errors: u64,
}

/// A point-in-time copy of everything [`MetricsSink`] tracks.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub plugins: HashMap<String, PluginMetrics>,
    pub aggregate: AggregateCounts,
    pub events_dispatched: u64,
    pub events_failed: u64,
}

/// Sink every component with something worth counting writes into:
/// the Registry (install/start/stop/failure per plugin, plus aggregate
/// totals) and the Event Bus (dispatch/failure totals). Read-only
/// outside of its `record_*` mutators; a plugin only ever sees it
/// through [`super::plugin_system::context::Services`].
#[derive(Debug, Default)]
pub struct MetricsSink {
    plugins: RwLock<HashMap<String, PluginMetrics>>,
    installs: AtomicU64,
    starts: AtomicU64,
    stops: AtomicU64,
    unloads: AtomicU64,
    errors: AtomicU64,
    events_dispatched: AtomicU64,
    events_failed: AtomicU64,
}

impl MetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_install_duration(&self, plugin_name: &str, duration: Duration) {
        let mut plugins = self.plugins.write().await;
        let entry = plugins.entry(plugin_name.to_string()).or_default();
        entry.install_count += 1;
        entry.total_install_duration += duration;
        self.installs.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn record_start(&self, plugin_name: &str) {
        self.plugins.write().await.entry(plugin_name.to_string()).or_default().start_count += 1;
        self.starts.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn record_stop(&self, plugin_name: &str) {
        self.plugins.write().await.entry(plugin_name.to_string()).or_default().stop_count += 1;
        self.stops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unload(&self) {
        self.unloads.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn record_failure(&self, plugin_name: &str) {
        self.plugins.write().await.entry(plugin_name.to_string()).or_default().failure_count += 1;
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_dispatched(&self) {
        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_failed(&self) {
        self.events_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn plugin_metrics(&self, plugin_name: &str) -> Option<PluginMetrics> {
        self.plugins.read().await.get(plugin_name).cloned()
    }

    pub fn aggregate(&self) -> AggregateCounts {
        AggregateCounts {
            installs: self.installs.load(Ordering::Relaxed),
            starts: self.starts.load(Ordering::Relaxed),
            stops: self.stops.load(Ordering::Relaxed),
            unloads: self.unloads.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            plugins: self.plugins.read().await.clone(),
            aggregate: self.aggregate(),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn install_duration_accumulates_per_plugin() {
        let sink = MetricsSink::new();
        sink.record_install_duration("p1", Duration::from_millis(10)).await;
        sink.record_install_duration("p1", Duration::from_millis(20)).await;
        let metrics = sink.plugin_metrics("p1").await.expect("metrics recorded");
        assert_eq!(metrics.install_count, 2);
        assert_eq!(metrics.total_install_duration, Duration::from_millis(30));
    }

    #[tokio::test]
    async fn snapshot_includes_event_totals() {
        let sink = MetricsSink::new();
        sink.record_event_dispatched();
        sink.record_event_dispatched();
        sink.record_event_failed();
        let snap = sink.snapshot().await;
        assert_eq!(snap.events_dispatched, 2);
        assert_eq!(snap.events_failed, 1);
    }

    #[tokio::test]
    async fn unknown_plugin_has_no_metrics() {
        let sink = MetricsSink::new();
        assert!(sink.plugin_metrics("ghost").await.is_none());
    }

    #[tokio::test]
    async fn aggregate_counts_track_every_lifecycle_operation() {
        let sink = MetricsSink::new();
        sink.record_install_duration("p1", Duration::from_millis(1)).await;
        sink.record_start("p1").await;
        sink.record_stop("p1").await;
        sink.record_failure("p1").await;
        sink.record_unload();
        let aggregate = sink.aggregate();
        assert_eq!(aggregate.installs, 1);
        assert_eq!(aggregate.starts, 1);
        assert_eq!(aggregate.stops, 1);
        assert_eq!(aggregate.errors, 1);
        assert_eq!(aggregate.unloads, 1);
    }
}
