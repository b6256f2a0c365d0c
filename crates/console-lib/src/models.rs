//! Core data models for the cluster console
//!
//! Records are created fresh every refresh cycle from the resource client,
//! enriched in place with live metrics, summarized, and then frozen inside a
//! [`ClusterSnapshot`] that is shared read-only with consumers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::anomaly::Alert;

/// Node identity, capacity and derived usage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    pub internal_ip: Option<String>,
    pub external_ip: Option<String>,
    pub roles: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub kubelet_version: String,
    pub os_image: String,
    pub unschedulable: bool,
    pub ready: bool,
    pub created_at: Option<DateTime<Utc>>,

    pub cpu_capacity_millis: u64,
    pub cpu_allocatable_millis: u64,
    pub memory_capacity_bytes: u64,
    pub memory_allocatable_bytes: u64,
    pub pod_capacity: u64,
    pub pod_allocatable: u64,

    pub memory_pressure: bool,
    pub disk_pressure: bool,
    pub pid_pressure: bool,

    pub cpu_usage_millis: u64,
    pub memory_usage_bytes: u64,
    pub cpu_usage_percent: f64,
    pub memory_usage_percent: f64,
    pub pod_count: u64,
    pub pod_usage_percent: f64,

    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
    /// Observation time reported by the kubelet for the network counters
    pub network_sampled_at: Option<DateTime<Utc>>,

    pub accelerator: Option<NodeAccelerators>,

    pub has_metrics: bool,
    pub metrics_error: Option<String>,
}

impl NodeRecord {
    /// Forget everything the enrichment phase wrote
    pub fn clear_usage(&mut self) {
        self.cpu_usage_millis = 0;
        self.memory_usage_bytes = 0;
        self.cpu_usage_percent = 0.0;
        self.memory_usage_percent = 0.0;
        self.network_rx_bytes = 0;
        self.network_tx_bytes = 0;
        self.network_sampled_at = None;
        self.has_metrics = false;
    }

    pub fn accelerator_capacity(&self) -> u64 {
        self.accelerator.as_ref().map(|a| a.capacity).unwrap_or(0)
    }
}

/// Accelerator resources of a node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeAccelerators {
    pub resource_name: String,
    pub capacity: u64,
    pub allocatable: u64,
    /// Sum of accelerator requests of Running/Pending pods on the node
    pub allocated: u64,
    pub topology: Option<String>,
    /// Mean chip utilization; `None` until exporter telemetry was attached
    pub utilization_percent: Option<f64>,
    pub chips: Vec<AcceleratorChip>,
}

/// Telemetry of a single accelerator chip as reported by the exporter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcceleratorChip {
    pub id: String,
    pub utilization_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub temperature_celsius: Option<f64>,
    pub power_watts: Option<f64>,
    pub healthy: bool,
    pub link_rx_bytes: u64,
    pub link_tx_bytes: u64,
}

/// Pod identity, container states and resource totals
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PodRecord {
    pub name: String,
    pub namespace: String,
    pub node: Option<String>,
    pub phase: String,
    pub labels: BTreeMap<String, String>,
    pub created_at: Option<DateTime<Utc>>,
    pub pod_ip: Option<String>,
    pub containers: Vec<ContainerRecord>,

    pub cpu_request_millis: u64,
    pub cpu_limit_millis: u64,
    pub memory_request_bytes: u64,
    pub memory_limit_bytes: u64,
    pub accelerator_request: u64,

    pub cpu_usage_millis: u64,
    pub memory_usage_bytes: u64,
    pub has_metrics: bool,
}

impl PodRecord {
    /// `namespace/name`, the join key between listings and kubelet metrics
    pub fn key(&self) -> String {
        pod_key(&self.namespace, &self.name)
    }

    pub fn restart_count(&self) -> u32 {
        self.containers.iter().map(|c| c.restart_count).sum()
    }

    /// Last termination reason in container order, not by termination time
    pub fn last_terminated_reason(&self) -> Option<&str> {
        self.containers
            .iter()
            .filter_map(|c| c.last_terminated_reason.as_deref())
            .last()
    }

    /// Running or Pending: the phases that hold scheduled resources
    pub fn is_active(&self) -> bool {
        self.phase == "Running" || self.phase == "Pending"
    }

    pub fn clear_usage(&mut self) {
        self.cpu_usage_millis = 0;
        self.memory_usage_bytes = 0;
        self.has_metrics = false;
        for container in &mut self.containers {
            container.cpu_usage_millis = 0;
            container.memory_usage_bytes = 0;
        }
    }
}

pub fn pod_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

/// Container state as reported in the pod status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Running,
    Waiting,
    Terminated,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub name: String,
    pub image: String,
    pub ready: bool,
    pub restart_count: u32,
    pub state: ContainerState,
    /// Waiting or terminated reason of the current state
    pub reason: Option<String>,
    pub last_terminated_reason: Option<String>,
    pub cpu_request_millis: u64,
    pub cpu_limit_millis: u64,
    pub memory_request_bytes: u64,
    pub memory_limit_bytes: u64,
    pub cpu_usage_millis: u64,
    pub memory_usage_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventRecord {
    pub namespace: String,
    pub object_kind: String,
    pub object_name: String,
    pub event_type: String,
    pub reason: String,
    pub message: String,
    pub count: u32,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    pub namespace: String,
    pub service_type: String,
    pub cluster_ip: Option<String>,
    pub ports: Vec<String>,
    pub ready_endpoints: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeRecord {
    pub name: String,
    pub capacity_bytes: u64,
    pub phase: String,
    pub storage_class: Option<String>,
    /// `namespace/name` of the bound claim
    pub claim: Option<String>,
    pub reclaim_policy: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeClaimRecord {
    pub name: String,
    pub namespace: String,
    pub phase: String,
    pub capacity_bytes: u64,
    /// Filled from kubelet volume stats during enrichment
    pub used_bytes: Option<u64>,
    pub storage_class: Option<String>,
    pub volume_name: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl VolumeClaimRecord {
    pub fn key(&self) -> String {
        pod_key(&self.namespace, &self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
    DaemonSet,
    Job,
    CronJob,
}

impl std::fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkloadKind::Deployment => write!(f, "Deployment"),
            WorkloadKind::StatefulSet => write!(f, "StatefulSet"),
            WorkloadKind::DaemonSet => write!(f, "DaemonSet"),
            WorkloadKind::Job => write!(f, "Job"),
            WorkloadKind::CronJob => write!(f, "CronJob"),
        }
    }
}

/// Workload controller, normalized across the five controller kinds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadRecord {
    pub kind: WorkloadKind,
    pub name: String,
    pub namespace: String,
    pub desired: u32,
    pub ready: u32,
    pub available: u32,
    /// Jobs only
    pub succeeded: u32,
    pub failed: u32,
    /// Cron jobs only
    pub schedule: Option<String>,
    pub suspended: bool,
    pub active: u32,
    pub last_schedule: Option<DateTime<Utc>>,
}

impl WorkloadRecord {
    pub fn new(kind: WorkloadKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: namespace.into(),
            desired: 0,
            ready: 0,
            available: 0,
            succeeded: 0,
            failed: 0,
            schedule: None,
            suspended: false,
            active: 0,
            last_schedule: None,
        }
    }
}

/// Batch job managed by the gang scheduler
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerJob {
    pub name: String,
    pub namespace: String,
    pub queue: String,
    pub phase: String,
    pub min_available: u32,
    pub running: u32,
    pub pending: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerQueue {
    pub name: String,
    pub state: String,
    pub weight: u32,
    pub running: u32,
    pub pending: u32,
}

/// Network topology domain (e.g. a switch tier grouping nodes)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologyDomain {
    pub name: String,
    pub tier: u32,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerResources {
    pub jobs: Vec<SchedulerJob>,
    pub queues: Vec<SchedulerQueue>,
    pub topologies: Vec<TopologyDomain>,
}

/// Pod ranked by container restarts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartingPod {
    pub name: String,
    pub namespace: String,
    pub node: Option<String>,
    pub restart_count: u32,
    pub last_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcceleratorSummary {
    pub resource_name: String,
    pub nodes: u64,
    pub capacity: u64,
    pub allocatable: u64,
    pub allocated: u64,
    pub allocation_percent: f64,
    pub chips_reporting: u64,
    pub unhealthy_chips: u64,
    pub avg_utilization_percent: f64,
    pub topologies: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSummary {
    pub total_jobs: u64,
    pub running_jobs: u64,
    pub pending_jobs: u64,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    pub queues: u64,
    pub open_queues: u64,
    pub topology_domains: u64,
}

/// Cluster-wide derived statistics. Always computed, never edited.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    // nodes
    pub total_nodes: u64,
    pub ready_nodes: u64,
    pub not_ready_nodes: u64,
    pub unschedulable_nodes: u64,
    pub memory_pressure_nodes: u64,
    pub disk_pressure_nodes: u64,
    pub pid_pressure_nodes: u64,
    pub nodes_with_metrics: u64,
    pub nodes_without_metrics: u64,

    // capacity and usage
    pub cpu_capacity_millis: u64,
    pub cpu_allocatable_millis: u64,
    pub cpu_usage_millis: u64,
    pub cpu_requested_millis: u64,
    pub cpu_limits_millis: u64,
    pub memory_capacity_bytes: u64,
    pub memory_allocatable_bytes: u64,
    pub memory_usage_bytes: u64,
    pub memory_requested_bytes: u64,
    pub memory_limits_bytes: u64,
    pub pod_capacity: u64,
    pub pod_allocatable: u64,
    pub cpu_usage_percent: f64,
    pub cpu_requested_percent: f64,
    pub cpu_limits_percent: f64,
    pub memory_usage_percent: f64,
    pub memory_requested_percent: f64,
    pub memory_limits_percent: f64,
    pub pod_usage_percent: f64,

    // network
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
    /// Latest kubelet observation time among the summed counters
    pub network_sampled_at: Option<DateTime<Utc>>,
    /// Filled by the refresher from two successive summaries
    pub network_rx_bytes_per_sec: f64,
    pub network_tx_bytes_per_sec: f64,

    // pods
    pub total_pods: u64,
    pub running_pods: u64,
    pub pending_pods: u64,
    pub failed_pods: u64,
    pub succeeded_pods: u64,
    pub unknown_pods: u64,
    pub oom_killed_pods: u64,
    pub crash_loop_pods: u64,
    pub image_pull_error_pods: u64,
    pub container_creating_pods: u64,
    pub total_restarts: u64,
    pub top_restart_pods: Vec<RestartingPod>,

    // workloads
    pub deployments: u64,
    pub stateful_sets: u64,
    pub daemon_sets: u64,
    pub jobs: u64,
    pub cron_jobs: u64,
    /// True when any count comes from pod labels rather than a controller listing
    pub workloads_inferred: bool,
    /// Kinds whose listing failed and were counted from pod labels instead
    pub inferred_workload_kinds: Vec<WorkloadKind>,

    // events
    pub total_events: u64,
    pub warning_events: u64,
    pub error_events: u64,

    // services
    pub total_services: u64,
    pub services_by_type: BTreeMap<String, u64>,
    pub ready_endpoints: u64,
    pub services_without_endpoints: u64,

    // storage
    pub total_volumes: u64,
    pub volumes_by_phase: BTreeMap<String, u64>,
    pub volume_capacity_bytes: u64,
    pub bound_volume_capacity_bytes: u64,
    pub total_claims: u64,
    pub bound_claims: u64,
    pub pending_claims: u64,
    pub claimed_bytes: u64,
    pub claim_used_bytes: u64,
    pub storage_usage_percent: f64,
    pub avg_volume_capacity_bytes: u64,

    pub accelerators: Option<AcceleratorSummary>,
    pub scheduler: Option<SchedulerSummary>,

    /// Distinct per-node kubelet errors in first-seen order
    pub kubelet_errors: Vec<String>,
    /// Single representative "metrics unavailable" reason
    pub metrics_error: Option<String>,

    pub alerts: Vec<Alert>,
}

/// One immutable, fully enriched view of the cluster
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub namespace: String,
    pub fetched_at: DateTime<Utc>,
    pub nodes: Vec<NodeRecord>,
    pub pods: Vec<PodRecord>,
    pub events: Vec<EventRecord>,
    pub services: Vec<ServiceRecord>,
    pub volumes: Vec<VolumeRecord>,
    pub volume_claims: Vec<VolumeClaimRecord>,
    pub deployments: Vec<WorkloadRecord>,
    pub stateful_sets: Vec<WorkloadRecord>,
    pub daemon_sets: Vec<WorkloadRecord>,
    pub jobs: Vec<WorkloadRecord>,
    pub cron_jobs: Vec<WorkloadRecord>,
    /// Controller kinds whose listing succeeded, even if it came back empty
    pub workloads_listed: Vec<WorkloadKind>,
    pub scheduler: Option<SchedulerResources>,
    pub summary: ClusterSummary,
}

impl ClusterSnapshot {
    pub fn workloads(&self, kind: WorkloadKind) -> &[WorkloadRecord] {
        match kind {
            WorkloadKind::Deployment => &self.deployments,
            WorkloadKind::StatefulSet => &self.stateful_sets,
            WorkloadKind::DaemonSet => &self.daemon_sets,
            WorkloadKind::Job => &self.jobs,
            WorkloadKind::CronJob => &self.cron_jobs,
        }
    }

    /// Store a controller listing; `None` marks the kind for inference
    pub fn set_workloads(&mut self, kind: WorkloadKind, listing: Option<Vec<WorkloadRecord>>) {
        let Some(items) = listing else {
            return;
        };
        let slot = match kind {
            WorkloadKind::Deployment => &mut self.deployments,
            WorkloadKind::StatefulSet => &mut self.stateful_sets,
            WorkloadKind::DaemonSet => &mut self.daemon_sets,
            WorkloadKind::Job => &mut self.jobs,
            WorkloadKind::CronJob => &mut self.cron_jobs,
        };
        *slot = items;
        if !self.workloads_listed.contains(&kind) {
            self.workloads_listed.push(kind);
        }
    }

    pub fn has_workload_listing(&self, kind: WorkloadKind) -> bool {
        self.workloads_listed.contains(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terminated(name: &str, reason: Option<&str>) -> ContainerRecord {
        ContainerRecord {
            name: name.to_string(),
            last_terminated_reason: reason.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_last_terminated_reason_follows_container_order() {
        let pod = PodRecord {
            containers: vec![
                terminated("app", Some("OOMKilled")),
                terminated("sidecar", Some("Error")),
                terminated("proxy", None),
            ],
            ..Default::default()
        };
        assert_eq!(pod.last_terminated_reason(), Some("Error"));
        assert_eq!(PodRecord::default().last_terminated_reason(), None);
    }
}
