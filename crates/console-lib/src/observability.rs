//! Observability infrastructure for the console
//!
//! Provides:
//! - Prometheus metrics (refresh latency and outcome, source failures,
//!   cluster gauges, cache effectiveness)
//! - Structured event logging with tracing

use prometheus::{
    register_histogram, register_int_counter_vec, register_int_gauge, register_int_gauge_vec,
    Histogram, IntCounterVec, IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::anomaly::{Alert, AlertSeverity};
use crate::error::MetricsError;

/// Refresh cycles talk to many nodes; buckets reach well past a minute
const REFRESH_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

/// Registered once per process. `None` when registration failed, in which
/// case every recording is a no-op.
static GLOBAL_METRICS: OnceLock<Option<ConsoleMetricsInner>> = OnceLock::new();

struct ConsoleMetricsInner {
    refresh_duration_seconds: Histogram,
    refreshes: IntCounterVec,
    node_metrics_failures: IntCounterVec,
    nodes: IntGauge,
    nodes_without_metrics: IntGauge,
    pods: IntGauge,
    active_alerts: IntGaugeVec,
    cache_lookups: IntCounterVec,
}

impl ConsoleMetricsInner {
    fn new() -> prometheus::Result<Self> {
        Ok(Self {
            refresh_duration_seconds: register_histogram!(
                "kube_console_refresh_duration_seconds",
                "Time spent building one cluster snapshot",
                REFRESH_BUCKETS.to_vec()
            )?,
            refreshes: register_int_counter_vec!(
                "kube_console_refreshes_total",
                "Refresh cycles by outcome",
                &["result"]
            )?,
            node_metrics_failures: register_int_counter_vec!(
                "kube_console_node_metrics_failures_total",
                "Failed kubelet summary fetches by reason",
                &["reason"]
            )?,
            nodes: register_int_gauge!("kube_console_nodes", "Nodes in the last snapshot")?,
            nodes_without_metrics: register_int_gauge!(
                "kube_console_nodes_without_metrics",
                "Nodes whose usage could not be read in the last snapshot"
            )?,
            pods: register_int_gauge!("kube_console_pods", "Pods in the last snapshot")?,
            active_alerts: register_int_gauge_vec!(
                "kube_console_active_alerts",
                "Alerts in the last snapshot by severity",
                &["severity"]
            )?,
            cache_lookups: register_int_counter_vec!(
                "kube_console_cache_lookups_total",
                "Snapshot cache lookups by result",
                &["result"]
            )?,
        })
    }
}

/// Handle to the process-wide console metrics. Clones share the same
/// underlying series.
#[derive(Clone)]
pub struct ConsoleMetrics {
    _private: (),
}

impl Default for ConsoleMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(|| match ConsoleMetricsInner::new() {
            Ok(inner) => Some(inner),
            Err(e) => {
                warn!(error = %e, "Failed to register console metrics; metrics disabled");
                None
            }
        });
        Self { _private: () }
    }

    fn inner(&self) -> Option<&ConsoleMetricsInner> {
        GLOBAL_METRICS.get().and_then(Option::as_ref)
    }

    pub fn observe_refresh(&self, duration_secs: f64, success: bool) {
        if let Some(m) = self.inner() {
            m.refresh_duration_seconds.observe(duration_secs);
            let result = if success { "success" } else { "failure" };
            m.refreshes.with_label_values(&[result]).inc();
        }
    }

    pub fn inc_node_metrics_failure(&self, err: &MetricsError) {
        if let Some(m) = self.inner() {
            let reason = match err {
                MetricsError::PermissionDenied(_) => "permission_denied",
                MetricsError::Timeout(_) => "timeout",
                MetricsError::Unavailable(_) => "unavailable",
                MetricsError::Decode(_) => "decode",
            };
            m.node_metrics_failures.with_label_values(&[reason]).inc();
        }
    }

    pub fn set_cluster_size(&self, nodes: u64, nodes_without_metrics: u64, pods: u64) {
        if let Some(m) = self.inner() {
            m.nodes.set(nodes as i64);
            m.nodes_without_metrics.set(nodes_without_metrics as i64);
            m.pods.set(pods as i64);
        }
    }

    pub fn set_alerts(&self, alerts: &[Alert]) {
        if let Some(m) = self.inner() {
            for severity in [AlertSeverity::Info, AlertSeverity::Warning, AlertSeverity::Critical] {
                let count = alerts.iter().filter(|a| a.severity == severity).count();
                m.active_alerts
                    .with_label_values(&[&severity.to_string()])
                    .set(count as i64);
            }
        }
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        if let Some(m) = self.inner() {
            let result = if hit { "hit" } else { "miss" };
            m.cache_lookups.with_label_values(&[result]).inc();
        }
    }
}

/// Event-tagged log records for significant console events
#[derive(Clone)]
pub struct StructuredLogger {
    cluster: String,
}

impl StructuredLogger {
    /// `cluster` names the kube context or `in-cluster`
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
        }
    }

    pub fn log_startup(&self, version: &str, namespace: &str, interval_secs: u64) {
        info!(
            event = "console_started",
            cluster = %self.cluster,
            version = %version,
            namespace = %namespace,
            interval_secs = interval_secs,
            "Cluster console started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "console_shutdown",
            cluster = %self.cluster,
            reason = %reason,
            "Cluster console shutting down"
        );
    }

    pub fn log_refresh(&self, nodes: u64, pods: u64, alerts: usize, elapsed_ms: u128) {
        info!(
            event = "snapshot_refreshed",
            cluster = %self.cluster,
            nodes = nodes,
            pods = pods,
            alerts = alerts,
            elapsed_ms = elapsed_ms as u64,
            "Cluster snapshot refreshed"
        );
    }

    pub fn log_refresh_failed(&self, error: &str) {
        warn!(
            event = "snapshot_refresh_failed",
            cluster = %self.cluster,
            error = %error,
            "Cluster snapshot refresh failed, keeping previous snapshot"
        );
    }

    pub fn log_metrics_access(&self, allowed: bool, reason: Option<&str>) {
        if allowed {
            info!(
                event = "metrics_access",
                cluster = %self.cluster,
                allowed = true,
                "Node metrics access granted"
            );
        } else {
            warn!(
                event = "metrics_access",
                cluster = %self.cluster,
                allowed = false,
                reason = reason.unwrap_or("unknown"),
                "Node metrics access denied; usage figures suppressed"
            );
        }
    }
}
