//! Threshold alerts over one cluster snapshot
//!
//! Alerts are recomputed from scratch every cycle; there is no state carried
//! between evaluations and therefore no deduplication window.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::reason::{container_anomalies, ContainerAnomaly};
use crate::models::{NodeRecord, PodRecord, ServiceRecord, VolumeClaimRecord};

/// Restart count from which a pod is considered flapping
pub const HIGH_RESTART_THRESHOLD: u32 = 5;

/// Alert severity levels, ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Info => write!(f, "info"),
            AlertSeverity::Warning => write!(f, "warning"),
            AlertSeverity::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCategory {
    Node,
    Pod,
    Service,
    Storage,
}

impl std::fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertCategory::Node => write!(f, "node"),
            AlertCategory::Pod => write!(f, "pod"),
            AlertCategory::Service => write!(f, "service"),
            AlertCategory::Storage => write!(f, "storage"),
        }
    }
}

/// Alert type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    NodeNotReady,
    NodeMemoryPressure,
    NodeDiskPressure,
    NodePidPressure,
    NodeHighCpu,
    NodeHighMemory,
    AcceleratorUnhealthy,
    PodOomKilled,
    PodCrashLoop,
    PodImagePull,
    PodHighRestarts,
    PodPending,
    PodFailed,
    ServiceNoEndpoints,
    ClaimPending,
}

impl AlertType {
    pub fn category(&self) -> AlertCategory {
        match self {
            AlertType::NodeNotReady
            | AlertType::NodeMemoryPressure
            | AlertType::NodeDiskPressure
            | AlertType::NodePidPressure
            | AlertType::NodeHighCpu
            | AlertType::NodeHighMemory
            | AlertType::AcceleratorUnhealthy => AlertCategory::Node,
            AlertType::PodOomKilled
            | AlertType::PodCrashLoop
            | AlertType::PodImagePull
            | AlertType::PodHighRestarts
            | AlertType::PodPending
            | AlertType::PodFailed => AlertCategory::Pod,
            AlertType::ServiceNoEndpoints => AlertCategory::Service,
            AlertType::ClaimPending => AlertCategory::Storage,
        }
    }

    /// Tiebreak among alerts of equal severity; higher sorts first
    fn rank(&self) -> u32 {
        match self {
            AlertType::NodeNotReady => 15,
            AlertType::NodeMemoryPressure => 14,
            AlertType::AcceleratorUnhealthy => 13,
            AlertType::PodOomKilled => 12,
            AlertType::PodCrashLoop => 11,
            AlertType::NodeHighMemory => 10,
            AlertType::NodeHighCpu => 9,
            AlertType::NodeDiskPressure => 8,
            AlertType::NodePidPressure => 7,
            AlertType::PodFailed => 6,
            AlertType::PodImagePull => 5,
            AlertType::ServiceNoEndpoints => 4,
            AlertType::ClaimPending => 3,
            AlertType::PodPending => 2,
            AlertType::PodHighRestarts => 1,
        }
    }

    pub fn recommended_action(&self) -> &'static str {
        match self {
            AlertType::NodeNotReady => "Check kubelet status and node connectivity",
            AlertType::NodeMemoryPressure => "Evict or reschedule memory-heavy pods",
            AlertType::NodeDiskPressure => "Free disk space or prune unused images",
            AlertType::NodePidPressure => "Look for processes leaking threads or forks",
            AlertType::NodeHighCpu => "Rebalance workloads or add nodes",
            AlertType::NodeHighMemory => "Review memory limits or add nodes",
            AlertType::AcceleratorUnhealthy => "Drain the node and inspect the accelerator",
            AlertType::PodOomKilled => "Increase the memory limit or fix the leak",
            AlertType::PodCrashLoop => "Inspect container logs for the crash cause",
            AlertType::PodImagePull => "Verify the image name, tag and pull secrets",
            AlertType::PodHighRestarts => "Check liveness probes and container logs",
            AlertType::PodPending => "Check scheduling events and resource requests",
            AlertType::PodFailed => "Inspect pod events and container exit codes",
            AlertType::ServiceNoEndpoints => "Check the selector and backing pod readiness",
            AlertType::ClaimPending => "Check the storage class and provisioner",
        }
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AlertType::NodeNotReady => "NodeNotReady",
            AlertType::NodeMemoryPressure => "NodeMemoryPressure",
            AlertType::NodeDiskPressure => "NodeDiskPressure",
            AlertType::NodePidPressure => "NodePIDPressure",
            AlertType::NodeHighCpu => "NodeHighCPU",
            AlertType::NodeHighMemory => "NodeHighMemory",
            AlertType::AcceleratorUnhealthy => "AcceleratorUnhealthy",
            AlertType::PodOomKilled => "PodOOMKilled",
            AlertType::PodCrashLoop => "PodCrashLoopBackOff",
            AlertType::PodImagePull => "PodImagePullError",
            AlertType::PodHighRestarts => "PodHighRestarts",
            AlertType::PodPending => "PodPending",
            AlertType::PodFailed => "PodFailed",
            AlertType::ServiceNoEndpoints => "ServiceNoEndpoints",
            AlertType::ClaimPending => "ClaimPending",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub category: AlertCategory,
    pub alert_type: AlertType,
    pub resource_kind: String,
    pub namespace: Option<String>,
    pub name: String,
    pub message: String,
    /// Observed value that tripped the rule, when numeric
    pub value: Option<f64>,
    pub threshold: Option<f64>,
    pub recommended_action: String,
}

impl Alert {
    fn new(
        alert_type: AlertType,
        severity: AlertSeverity,
        resource_kind: &str,
        namespace: Option<&str>,
        name: &str,
        message: String,
    ) -> Self {
        Self {
            severity,
            category: alert_type.category(),
            alert_type,
            resource_kind: resource_kind.to_string(),
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
            message,
            value: None,
            threshold: None,
            recommended_action: alert_type.recommended_action().to_string(),
        }
    }

    fn with_values(mut self, value: f64, threshold: f64) -> Self {
        self.value = Some(value);
        self.threshold = Some(threshold);
        self
    }

    /// Severity first, alert type second
    pub fn priority(&self) -> u32 {
        let severity = match self.severity {
            AlertSeverity::Info => 0,
            AlertSeverity::Warning => 1,
            AlertSeverity::Critical => 2,
        };
        severity * 100 + self.alert_type.rank()
    }
}

/// Collections an evaluation looks at
#[derive(Debug, Clone, Copy)]
pub struct AlertInput<'a> {
    pub nodes: &'a [NodeRecord],
    pub pods: &'a [PodRecord],
    pub services: &'a [ServiceRecord],
    pub claims: &'a [VolumeClaimRecord],
}

/// Alert thresholds
#[derive(Debug, Clone)]
pub struct AlertRules {
    pub cpu_warning_percent: f64,
    pub cpu_critical_percent: f64,
    pub memory_warning_percent: f64,
    pub memory_critical_percent: f64,
    pub restart_threshold: u32,
    pub pending_after: Duration,
}

impl Default for AlertRules {
    fn default() -> Self {
        Self {
            cpu_warning_percent: 80.0,
            cpu_critical_percent: 90.0,
            memory_warning_percent: 80.0,
            memory_critical_percent: 90.0,
            restart_threshold: HIGH_RESTART_THRESHOLD,
            pending_after: Duration::minutes(5),
        }
    }
}

impl AlertRules {
    /// Evaluate every rule and return alerts ordered by descending priority
    pub fn evaluate(&self, input: AlertInput<'_>, now: DateTime<Utc>) -> Vec<Alert> {
        let mut alerts = Vec::new();

        for node in input.nodes {
            self.node_alerts(node, &mut alerts);
        }
        for pod in input.pods {
            self.pod_alerts(pod, now, &mut alerts);
        }
        for service in input.services {
            if service.ready_endpoints == 0 && service.service_type != "ExternalName" {
                alerts.push(Alert::new(
                    AlertType::ServiceNoEndpoints,
                    AlertSeverity::Warning,
                    "Service",
                    Some(service.namespace.as_str()),
                    &service.name,
                    format!("Service {} has no ready endpoints", service.name),
                ));
            }
        }
        for claim in input.claims {
            if claim.phase == "Pending" && self.pending_too_long(claim.created_at, now) {
                alerts.push(Alert::new(
                    AlertType::ClaimPending,
                    AlertSeverity::Warning,
                    "PersistentVolumeClaim",
                    Some(claim.namespace.as_str()),
                    &claim.name,
                    format!(
                        "Claim {} has been pending for more than {} minutes",
                        claim.name,
                        self.pending_after.num_minutes()
                    ),
                ));
            }
        }

        alerts.sort_by(|a, b| b.priority().cmp(&a.priority()));
        alerts
    }

    fn node_alerts(&self, node: &NodeRecord, alerts: &mut Vec<Alert>) {
        let raise = |alert_type, severity, message: String| {
            Alert::new(alert_type, severity, "Node", None, &node.name, message)
        };

        if !node.ready {
            alerts.push(raise(
                AlertType::NodeNotReady,
                AlertSeverity::Critical,
                format!("Node {} is not ready", node.name),
            ));
        }
        if node.memory_pressure {
            alerts.push(raise(
                AlertType::NodeMemoryPressure,
                AlertSeverity::Critical,
                format!("Node {} reports memory pressure", node.name),
            ));
        }
        if node.disk_pressure {
            alerts.push(raise(
                AlertType::NodeDiskPressure,
                AlertSeverity::Warning,
                format!("Node {} reports disk pressure", node.name),
            ));
        }
        if node.pid_pressure {
            alerts.push(raise(
                AlertType::NodePidPressure,
                AlertSeverity::Warning,
                format!("Node {} reports PID pressure", node.name),
            ));
        }

        if node.has_metrics {
            if let Some((severity, threshold)) = tier(
                node.cpu_usage_percent,
                self.cpu_critical_percent,
                self.cpu_warning_percent,
            ) {
                alerts.push(
                    raise(
                        AlertType::NodeHighCpu,
                        severity,
                        format!("Node {} CPU usage at {:.1}%", node.name, node.cpu_usage_percent),
                    )
                    .with_values(node.cpu_usage_percent, threshold),
                );
            }
            if let Some((severity, threshold)) = tier(
                node.memory_usage_percent,
                self.memory_critical_percent,
                self.memory_warning_percent,
            ) {
                alerts.push(
                    raise(
                        AlertType::NodeHighMemory,
                        severity,
                        format!(
                            "Node {} memory usage at {:.1}%",
                            node.name, node.memory_usage_percent
                        ),
                    )
                    .with_values(node.memory_usage_percent, threshold),
                );
            }
        }

        if let Some(accel) = &node.accelerator {
            let unhealthy = accel.chips.iter().filter(|c| !c.healthy).count();
            if unhealthy > 0 {
                alerts.push(
                    raise(
                        AlertType::AcceleratorUnhealthy,
                        AlertSeverity::Critical,
                        format!("Node {} has {} unhealthy accelerator chip(s)", node.name, unhealthy),
                    )
                    .with_values(unhealthy as f64, 0.0),
                );
            }
        }
    }

    fn pod_alerts(&self, pod: &PodRecord, now: DateTime<Utc>, alerts: &mut Vec<Alert>) {
        let raise = |alert_type, severity, message: String| {
            Alert::new(alert_type, severity, "Pod", Some(pod.namespace.as_str()), &pod.name, message)
        };

        // one alert per reason per pod, naming the first offending container
        let first_with = move |anomaly: ContainerAnomaly| {
            pod.containers
                .iter()
                .find(|c| container_anomalies(c).contains(&anomaly))
        };

        if let Some(c) = first_with(ContainerAnomaly::OomKilled) {
            alerts.push(raise(
                AlertType::PodOomKilled,
                AlertSeverity::Critical,
                format!("Container {} of pod {} was OOMKilled", c.name, pod.name),
            ));
        }
        if let Some(c) = first_with(ContainerAnomaly::CrashLoopBackOff) {
            alerts.push(raise(
                AlertType::PodCrashLoop,
                AlertSeverity::Critical,
                format!("Container {} of pod {} is in CrashLoopBackOff", c.name, pod.name),
            ));
        }
        if let Some(c) = first_with(ContainerAnomaly::ImagePull) {
            alerts.push(raise(
                AlertType::PodImagePull,
                AlertSeverity::Warning,
                format!("Container {} of pod {} cannot pull its image", c.name, pod.name),
            ));
        }

        let restarts = pod.restart_count();
        if restarts >= self.restart_threshold {
            alerts.push(
                raise(
                    AlertType::PodHighRestarts,
                    AlertSeverity::Warning,
                    format!("Pod {} restarted {} times", pod.name, restarts),
                )
                .with_values(restarts as f64, self.restart_threshold as f64),
            );
        }

        match pod.phase.as_str() {
            "Pending" if self.pending_too_long(pod.created_at, now) => {
                alerts.push(raise(
                    AlertType::PodPending,
                    AlertSeverity::Warning,
                    format!(
                        "Pod {} has been pending for more than {} minutes",
                        pod.name,
                        self.pending_after.num_minutes()
                    ),
                ));
            }
            "Failed" => {
                alerts.push(raise(
                    AlertType::PodFailed,
                    AlertSeverity::Warning,
                    format!("Pod {} failed", pod.name),
                ));
            }
            _ => {}
        }
    }

    fn pending_too_long(&self, created_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        created_at
            .map(|created| now.signed_duration_since(created) >= self.pending_after)
            .unwrap_or(false)
    }
}

/// Critical is evaluated first; the two tiers never both fire
fn tier(value: f64, critical: f64, warning: f64) -> Option<(AlertSeverity, f64)> {
    if value >= critical {
        Some((AlertSeverity::Critical, critical))
    } else if value >= warning {
        Some((AlertSeverity::Warning, warning))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AcceleratorChip, ContainerRecord, ContainerState, NodeAccelerators};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn ready_node(name: &str) -> NodeRecord {
        NodeRecord {
            name: name.to_string(),
            ready: true,
            has_metrics: true,
            ..Default::default()
        }
    }

    fn pod(name: &str, phase: &str) -> PodRecord {
        PodRecord {
            name: name.to_string(),
            namespace: "default".to_string(),
            phase: phase.to_string(),
            created_at: Some(now()),
            ..Default::default()
        }
    }

    fn evaluate(
        nodes: &[NodeRecord],
        pods: &[PodRecord],
        services: &[ServiceRecord],
        claims: &[VolumeClaimRecord],
    ) -> Vec<Alert> {
        AlertRules::default().evaluate(
            AlertInput {
                nodes,
                pods,
                services,
                claims,
            },
            now(),
        )
    }

    #[test]
    fn test_cpu_tiers_are_exclusive() {
        let mut hot = ready_node("hot");
        hot.cpu_usage_percent = 95.0;
        let mut warm = ready_node("warm");
        warm.cpu_usage_percent = 85.0;
        let mut cool = ready_node("cool");
        cool.cpu_usage_percent = 79.9;

        let alerts = evaluate(&[hot, warm, cool], &[], &[], &[]);
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].name, "hot");
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
        assert_eq!(alerts[0].threshold, Some(90.0));
        assert_eq!(alerts[1].name, "warm");
        assert_eq!(alerts[1].severity, AlertSeverity::Warning);
    }

    #[test]
    fn test_usage_ignored_without_metrics() {
        let mut node = ready_node("n1");
        node.has_metrics = false;
        node.memory_usage_percent = 99.0;
        assert!(evaluate(&[node], &[], &[], &[]).is_empty());
    }

    #[test]
    fn test_node_conditions() {
        let mut node = ready_node("n1");
        node.ready = false;
        node.memory_pressure = true;
        node.disk_pressure = true;
        node.pid_pressure = true;

        let alerts = evaluate(&[node], &[], &[], &[]);
        let types: Vec<_> = alerts.iter().map(|a| a.alert_type).collect();
        assert_eq!(
            types,
            vec![
                AlertType::NodeNotReady,
                AlertType::NodeMemoryPressure,
                AlertType::NodeDiskPressure,
                AlertType::NodePidPressure,
            ]
        );
    }

    #[test]
    fn test_one_oom_alert_per_pod() {
        let oom = |name: &str| ContainerRecord {
            name: name.to_string(),
            state: ContainerState::Terminated,
            reason: Some("OOMKilled".to_string()),
            ..Default::default()
        };
        let mut p = pod("worker", "Running");
        p.containers = vec![oom("a"), oom("b")];

        let alerts = evaluate(&[], &[p], &[], &[]);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::PodOomKilled);
        assert!(alerts[0].message.contains("Container a"));
        assert_eq!(
            alerts[0].recommended_action,
            AlertType::PodOomKilled.recommended_action()
        );
    }

    #[test]
    fn test_pending_alert_uses_injected_clock() {
        let mut young = pod("young", "Pending");
        young.created_at = Some(now() - Duration::minutes(4));
        let mut old = pod("old", "Pending");
        old.created_at = Some(now() - Duration::minutes(5));

        let alerts = evaluate(&[], &[young, old], &[], &[]);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].name, "old");
        assert_eq!(alerts[0].alert_type, AlertType::PodPending);
    }

    #[test]
    fn test_high_restarts_and_failed() {
        let mut p = pod("flappy", "Failed");
        p.containers = vec![ContainerRecord {
            restart_count: 5,
            ..Default::default()
        }];
        let alerts = evaluate(&[], &[p], &[], &[]);
        let types: Vec<_> = alerts.iter().map(|a| a.alert_type).collect();
        assert_eq!(types, vec![AlertType::PodFailed, AlertType::PodHighRestarts]);
        assert_eq!(alerts[1].value, Some(5.0));
    }

    #[test]
    fn test_service_without_endpoints() {
        let svc = |name: &str, service_type: &str| ServiceRecord {
            name: name.to_string(),
            namespace: "default".to_string(),
            service_type: service_type.to_string(),
            ..Default::default()
        };
        let alerts = evaluate(
            &[],
            &[],
            &[svc("api", "ClusterIP"), svc("ext", "ExternalName")],
            &[],
        );
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].name, "api");
        assert_eq!(alerts[0].category, AlertCategory::Service);
    }

    #[test]
    fn test_pending_claim() {
        let claim = VolumeClaimRecord {
            name: "data".to_string(),
            namespace: "db".to_string(),
            phase: "Pending".to_string(),
            created_at: Some(now() - Duration::minutes(10)),
            ..Default::default()
        };
        let alerts = evaluate(&[], &[], &[], &[claim]);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].category, AlertCategory::Storage);
    }

    #[test]
    fn test_unhealthy_accelerator() {
        let mut node = ready_node("tpu-0");
        node.accelerator = Some(NodeAccelerators {
            capacity: 2,
            chips: vec![
                AcceleratorChip {
                    id: "0".to_string(),
                    healthy: true,
                    ..Default::default()
                },
                AcceleratorChip {
                    id: "1".to_string(),
                    healthy: false,
                    ..Default::default()
                },
            ],
            ..Default::default()
        });
        let alerts = evaluate(&[node], &[], &[], &[]);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::AcceleratorUnhealthy);
        assert_eq!(alerts[0].value, Some(1.0));
    }

    #[test]
    fn test_ordering_severity_then_type_stable() {
        let mut failed = pod("failed", "Failed");
        failed.created_at = None;
        let mut n1 = ready_node("n1");
        n1.disk_pressure = true;
        let mut n2 = ready_node("n2");
        n2.ready = false;
        let svc = ServiceRecord {
            name: "api".to_string(),
            service_type: "ClusterIP".to_string(),
            ..Default::default()
        };

        let alerts = evaluate(&[n1, n2], &[failed], &[svc], &[]);
        let names: Vec<_> = alerts.iter().map(|a| a.name.as_str()).collect();
        // critical first, then warnings by type rank
        assert_eq!(names, vec!["n2", "n1", "failed", "api"]);
        for pair in alerts.windows(2) {
            assert!(pair[0].priority() >= pair[1].priority());
        }
    }
}
