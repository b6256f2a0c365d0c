//! Cluster summary derivation
//!
//! A pure function of the snapshot collections. The only time-derived
//! outputs are the pending-duration alerts, which use the injected `now`.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};

use crate::anomaly::{
    classify_pod, is_stuck_creating, AlertInput, AlertRules, ContainerAnomaly,
    HIGH_RESTART_THRESHOLD,
};
use crate::models::{
    AcceleratorSummary, ClusterSnapshot, ClusterSummary, PodRecord, RestartingPod,
    SchedulerResources, SchedulerSummary, WorkloadKind,
};

pub const TOP_RESTART_LIMIT: usize = 5;

pub const METRICS_DISABLED: &str = "node metrics disabled: no kubelet metrics source configured";

/// Everything the summary depends on besides the clock
#[derive(Debug, Clone, Copy)]
pub struct SummaryInput<'a> {
    pub snapshot: &'a ClusterSnapshot,
    /// Whether a node metrics source exists at all
    pub metrics_configured: bool,
    /// Reason recorded by the access check when metrics were skipped
    pub access_denied: Option<&'a str>,
    pub rules: &'a AlertRules,
}

/// `part / whole` as a percentage, 0 when `whole` is 0
pub fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

pub fn build_summary(input: SummaryInput<'_>, now: DateTime<Utc>) -> ClusterSummary {
    let snapshot = input.snapshot;
    let mut s = ClusterSummary::default();

    node_pass(snapshot, &mut s);

    s.metrics_error = if !input.metrics_configured {
        Some(METRICS_DISABLED.to_string())
    } else if let Some(first) = s.kubelet_errors.first() {
        Some(first.clone())
    } else {
        input.access_denied.map(str::to_string)
    };

    pod_pass(&snapshot.pods, &mut s);
    s.cpu_requested_percent = percent(s.cpu_requested_millis, s.cpu_allocatable_millis);
    s.cpu_limits_percent = percent(s.cpu_limits_millis, s.cpu_allocatable_millis);
    s.memory_requested_percent = percent(s.memory_requested_bytes, s.memory_allocatable_bytes);
    s.memory_limits_percent = percent(s.memory_limits_bytes, s.memory_allocatable_bytes);

    workload_pass(snapshot, &mut s);

    s.total_events = snapshot.events.len() as u64;
    s.warning_events = snapshot.events.iter().filter(|e| e.event_type == "Warning").count() as u64;
    s.error_events = snapshot.events.iter().filter(|e| e.event_type == "Error").count() as u64;

    service_pass(snapshot, &mut s);
    storage_pass(snapshot, &mut s);

    s.scheduler = snapshot.scheduler.as_ref().map(scheduler_summary);

    s.alerts = input.rules.evaluate(
        AlertInput {
            nodes: &snapshot.nodes,
            pods: &snapshot.pods,
            services: &snapshot.services,
            claims: &snapshot.volume_claims,
        },
        now,
    );

    s
}

fn node_pass(snapshot: &ClusterSnapshot, s: &mut ClusterSummary) {
    let mut accel: Option<AcceleratorSummary> = None;
    let mut chip_utilization = 0.0;

    for node in &snapshot.nodes {
        s.total_nodes += 1;
        if node.ready {
            s.ready_nodes += 1;
        } else {
            s.not_ready_nodes += 1;
        }
        s.unschedulable_nodes += node.unschedulable as u64;
        s.memory_pressure_nodes += node.memory_pressure as u64;
        s.disk_pressure_nodes += node.disk_pressure as u64;
        s.pid_pressure_nodes += node.pid_pressure as u64;

        s.cpu_capacity_millis += node.cpu_capacity_millis;
        s.cpu_allocatable_millis += node.cpu_allocatable_millis;
        s.memory_capacity_bytes += node.memory_capacity_bytes;
        s.memory_allocatable_bytes += node.memory_allocatable_bytes;
        s.pod_capacity += node.pod_capacity;
        s.pod_allocatable += node.pod_allocatable;

        if node.has_metrics {
            s.nodes_with_metrics += 1;
            s.cpu_usage_millis += node.cpu_usage_millis;
            s.memory_usage_bytes += node.memory_usage_bytes;
            s.network_rx_bytes += node.network_rx_bytes;
            s.network_tx_bytes += node.network_tx_bytes;
            s.network_sampled_at = s.network_sampled_at.max(node.network_sampled_at);
        } else {
            s.nodes_without_metrics += 1;
        }

        if let Some(err) = &node.metrics_error {
            if !s.kubelet_errors.contains(err) {
                s.kubelet_errors.push(err.clone());
            }
        }

        if let Some(a) = &node.accelerator {
            let summary = accel.get_or_insert_with(|| AcceleratorSummary {
                resource_name: a.resource_name.clone(),
                ..Default::default()
            });
            summary.nodes += 1;
            summary.capacity += a.capacity;
            summary.allocatable += a.allocatable;
            summary.allocated += a.allocated;
            summary.chips_reporting += a.chips.len() as u64;
            summary.unhealthy_chips += a.chips.iter().filter(|c| !c.healthy).count() as u64;
            chip_utilization += a.chips.iter().map(|c| c.utilization_percent).sum::<f64>();
            if let Some(topology) = &a.topology {
                if !summary.topologies.contains(topology) {
                    summary.topologies.push(topology.clone());
                }
            }
        }
    }

    // against the whole cluster; nodes without metrics count as idle
    s.cpu_usage_percent = percent(s.cpu_usage_millis, s.cpu_allocatable_millis);
    s.memory_usage_percent = percent(s.memory_usage_bytes, s.memory_allocatable_bytes);

    if let Some(mut a) = accel {
        a.allocation_percent = percent(a.allocated, a.allocatable);
        a.avg_utilization_percent = if a.chips_reporting == 0 {
            0.0
        } else {
            chip_utilization / a.chips_reporting as f64
        };
        s.accelerators = Some(a);
    }
}

fn pod_pass(pods: &[PodRecord], s: &mut ClusterSummary) {
    let mut candidates = Vec::new();
    let mut scheduled_pods = 0u64;

    for pod in pods {
        s.total_pods += 1;
        match pod.phase.as_str() {
            "Running" => s.running_pods += 1,
            "Pending" => s.pending_pods += 1,
            "Failed" => s.failed_pods += 1,
            other => {
                s.unknown_pods += 1;
                if other == "Succeeded" {
                    s.succeeded_pods += 1;
                }
            }
        }

        match classify_pod(pod) {
            Some(ContainerAnomaly::OomKilled) => s.oom_killed_pods += 1,
            Some(ContainerAnomaly::CrashLoopBackOff) => s.crash_loop_pods += 1,
            Some(ContainerAnomaly::ImagePull) => s.image_pull_error_pods += 1,
            Some(ContainerAnomaly::ContainerCreating) | None => {}
        }
        if is_stuck_creating(pod) {
            s.container_creating_pods += 1;
        }

        if pod.is_active() {
            scheduled_pods += 1;
            s.cpu_requested_millis += pod.cpu_request_millis;
            s.cpu_limits_millis += pod.cpu_limit_millis;
            s.memory_requested_bytes += pod.memory_request_bytes;
            s.memory_limits_bytes += pod.memory_limit_bytes;
        }

        let restarts = pod.restart_count();
        s.total_restarts += restarts as u64;
        if restarts >= HIGH_RESTART_THRESHOLD {
            candidates.push(RestartingPod {
                name: pod.name.clone(),
                namespace: pod.namespace.clone(),
                node: pod.node.clone(),
                restart_count: restarts,
                last_reason: pod.last_terminated_reason().map(str::to_string),
            });
        }
    }

    s.pod_usage_percent = percent(scheduled_pods, s.pod_allocatable);
    s.top_restart_pods = top_restarts(candidates);
}

/// Stable descending sort; equal counts keep encounter order
pub fn top_restarts(mut candidates: Vec<RestartingPod>) -> Vec<RestartingPod> {
    candidates.sort_by(|a, b| b.restart_count.cmp(&a.restart_count));
    candidates.truncate(TOP_RESTART_LIMIT);
    candidates
}

/// Listed kinds are counted from their listing; each kind whose listing
/// failed falls back to pod labels on its own
fn workload_pass(snapshot: &ClusterSnapshot, s: &mut ClusterSummary) {
    let mut inferred = None;

    for kind in [
        WorkloadKind::Deployment,
        WorkloadKind::StatefulSet,
        WorkloadKind::DaemonSet,
        WorkloadKind::Job,
        WorkloadKind::CronJob,
    ] {
        let count = if snapshot.has_workload_listing(kind) {
            snapshot.workloads(kind).len() as u64
        } else {
            s.inferred_workload_kinds.push(kind);
            inferred
                .get_or_insert_with(|| infer_workloads(&snapshot.pods))
                .iter()
                .filter(|(k, _)| *k == kind)
                .count() as u64
        };
        match kind {
            WorkloadKind::Deployment => s.deployments = count,
            WorkloadKind::StatefulSet => s.stateful_sets = count,
            WorkloadKind::DaemonSet => s.daemon_sets = count,
            WorkloadKind::Job => s.jobs = count,
            WorkloadKind::CronJob => s.cron_jobs = count,
        }
    }

    s.workloads_inferred = !s.inferred_workload_kinds.is_empty();
}

/// Strip a trailing `-<suffix>` segment
fn trim_suffix(name: &str) -> &str {
    name.rsplit_once('-').map(|(head, _)| head).unwrap_or(name)
}

/// Controllers guessed from pod labels, deduplicated by `namespace/name`
pub fn infer_workloads(pods: &[PodRecord]) -> HashSet<(WorkloadKind, String)> {
    let mut found = HashSet::new();

    for pod in pods {
        let label = |key: &str| pod.labels.get(key).map(String::as_str);
        let app = label("app.kubernetes.io/name").or_else(|| label("app"));
        let key = |name: &str| format!("{}/{}", pod.namespace, name);

        if let (Some(_), Some(app)) = (label("pod-template-hash"), app) {
            found.insert((WorkloadKind::Deployment, key(app)));
        } else if label("statefulset.kubernetes.io/pod-name").is_some() {
            found.insert((WorkloadKind::StatefulSet, key(trim_suffix(&pod.name))));
        } else if label("controller-revision-hash").is_some() {
            let name = app.unwrap_or_else(|| trim_suffix(&pod.name));
            found.insert((WorkloadKind::DaemonSet, key(name)));
        }

        if let Some(job) = label("job-name").or_else(|| label("batch.kubernetes.io/job-name")) {
            found.insert((WorkloadKind::Job, key(job)));
        }
        if let Some(cron) = label("cronjob-name") {
            found.insert((WorkloadKind::CronJob, key(cron)));
        }
    }

    found
}

fn service_pass(snapshot: &ClusterSnapshot, s: &mut ClusterSummary) {
    let mut by_type = BTreeMap::new();
    for service in &snapshot.services {
        s.total_services += 1;
        *by_type.entry(service.service_type.clone()).or_insert(0) += 1;
        s.ready_endpoints += service.ready_endpoints as u64;
        if service.ready_endpoints == 0 && service.service_type != "ExternalName" {
            s.services_without_endpoints += 1;
        }
    }
    s.services_by_type = by_type;
}

fn storage_pass(snapshot: &ClusterSnapshot, s: &mut ClusterSummary) {
    let mut by_phase = BTreeMap::new();
    for volume in &snapshot.volumes {
        s.total_volumes += 1;
        *by_phase.entry(volume.phase.clone()).or_insert(0) += 1;
        s.volume_capacity_bytes += volume.capacity_bytes;
        if volume.phase == "Bound" {
            s.bound_volume_capacity_bytes += volume.capacity_bytes;
        }
    }
    s.volumes_by_phase = by_phase;
    s.avg_volume_capacity_bytes = s
        .volume_capacity_bytes
        .checked_div(s.total_volumes)
        .unwrap_or(0);

    for claim in &snapshot.volume_claims {
        s.total_claims += 1;
        match claim.phase.as_str() {
            "Bound" => {
                s.bound_claims += 1;
                s.claimed_bytes += claim.capacity_bytes;
                s.claim_used_bytes += claim.used_bytes.unwrap_or(0);
            }
            "Pending" => s.pending_claims += 1,
            _ => {}
        }
    }
    s.storage_usage_percent = percent(s.claim_used_bytes, s.claimed_bytes);
}

fn scheduler_summary(resources: &SchedulerResources) -> SchedulerSummary {
    let mut s = SchedulerSummary {
        total_jobs: resources.jobs.len() as u64,
        queues: resources.queues.len() as u64,
        topology_domains: resources.topologies.len() as u64,
        ..Default::default()
    };
    for job in &resources.jobs {
        match job.phase.as_str() {
            "Running" | "Restarting" => s.running_jobs += 1,
            "Pending" | "Inqueue" => s.pending_jobs += 1,
            "Completed" => s.completed_jobs += 1,
            "Failed" | "Aborted" | "Terminated" => s.failed_jobs += 1,
            _ => {}
        }
    }
    s.open_queues = resources.queues.iter().filter(|q| q.state == "Open").count() as u64;
    s
}
