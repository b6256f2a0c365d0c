//! Anomaly classification and alerting
//!
//! This module provides:
//! - The container anomaly taxonomy (OOM kills, crash loops, image pulls)
//! - Threshold alerts over nodes, pods, services and volume claims

mod alerter;
mod reason;

pub use alerter::{
    Alert, AlertCategory, AlertInput, AlertRules, AlertSeverity, AlertType,
    HIGH_RESTART_THRESHOLD,
};
pub use reason::{classify_pod, container_anomalies, is_stuck_creating, pod_has, ContainerAnomaly};
