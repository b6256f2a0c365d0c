//! Merging live metrics into listed records

use std::collections::HashMap;

use super::summary::percent;
use crate::models::{pod_key, NodeRecord, PodRecord, VolumeClaimRecord};
use crate::sources::{NodeMetrics, VolumeUsage};

/// `namespace/name` -> position in the pod list
pub fn pod_index(pods: &[PodRecord]) -> HashMap<String, usize> {
    pods.iter()
        .enumerate()
        .map(|(i, p)| (p.key(), i))
        .collect()
}

pub fn apply_node_metrics(node: &mut NodeRecord, metrics: &NodeMetrics) {
    node.cpu_usage_millis = metrics.cpu_usage_millis;
    node.memory_usage_bytes = metrics.memory_working_set_bytes;
    node.cpu_usage_percent = percent(node.cpu_usage_millis, node.cpu_allocatable_millis);
    node.memory_usage_percent = percent(node.memory_usage_bytes, node.memory_allocatable_bytes);
    node.network_rx_bytes = metrics.network_rx_bytes;
    node.network_tx_bytes = metrics.network_tx_bytes;
    node.network_sampled_at = metrics.network_time;
    node.has_metrics = true;
    node.metrics_error = None;
}

/// Copy pod and container usage onto the listed pods. Returns the claim
/// volume usage found along the way.
pub fn apply_pod_metrics(
    pods: &mut [PodRecord],
    index: &HashMap<String, usize>,
    metrics: &NodeMetrics,
) -> Vec<VolumeUsage> {
    let mut volumes = Vec::new();
    for pm in &metrics.pods {
        volumes.extend(pm.volumes.iter().cloned());

        let Some(&i) = index.get(&pod_key(&pm.namespace, &pm.name)) else {
            continue;
        };
        let pod = &mut pods[i];
        pod.cpu_usage_millis = pm.cpu_usage_millis;
        pod.memory_usage_bytes = pm.memory_working_set_bytes;
        pod.has_metrics = true;

        for container in &mut pod.containers {
            if let Some(cm) = pm.containers.iter().find(|c| c.name == container.name) {
                container.cpu_usage_millis = cm.cpu_usage_millis;
                container.memory_usage_bytes = cm.memory_working_set_bytes;
            }
        }
    }
    volumes
}

/// Pods holding resources on each node and the share of its pod slots
pub fn apply_pod_counts(nodes: &mut [NodeRecord], pods: &[PodRecord]) {
    let mut counts: HashMap<&str, u64> = HashMap::new();
    let mut accelerators: HashMap<&str, u64> = HashMap::new();
    for pod in pods.iter().filter(|p| p.is_active()) {
        if let Some(node) = pod.node.as_deref() {
            *counts.entry(node).or_insert(0) += 1;
            *accelerators.entry(node).or_insert(0) += pod.accelerator_request;
        }
    }

    for node in nodes {
        node.pod_count = counts.get(node.name.as_str()).copied().unwrap_or(0);
        node.pod_usage_percent = percent(node.pod_count, node.pod_allocatable);
        if let Some(accel) = node.accelerator.as_mut() {
            accel.allocated = accelerators.get(node.name.as_str()).copied().unwrap_or(0);
        }
    }
}

pub fn apply_volume_usage(claims: &mut [VolumeClaimRecord], usages: &[VolumeUsage]) {
    let by_claim: HashMap<String, u64> = usages
        .iter()
        .map(|u| (pod_key(&u.claim_namespace, &u.claim_name), u.used_bytes))
        .collect();
    for claim in claims {
        if let Some(used) = by_claim.get(&claim.key()) {
            claim.used_bytes = Some(*used);
        }
    }
}

/// Drop every usage value, used when metrics may not be read
pub fn clear_usage(nodes: &mut [NodeRecord], pods: &mut [PodRecord]) {
    for node in nodes {
        node.clear_usage();
    }
    for pod in pods {
        pod.clear_usage();
    }
}
