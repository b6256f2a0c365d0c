//! Kubelet summary API client
//!
//! Reads `/api/v1/nodes/{node}/proxy/stats/summary` through the API server
//! proxy, the same data `kubectl top` is built on.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kube::Client;
use serde::Deserialize;
use tracing::debug;

use super::quantity::nanocores_to_millis;
use super::{ContainerMetrics, NodeMetrics, NodeMetricsSource, PodMetrics, VolumeUsage};
use crate::error::MetricsError;

#[derive(Debug, Deserialize)]
struct Summary {
    node: NodeStats,
    #[serde(default)]
    pods: Vec<PodStats>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeStats {
    node_name: String,
    cpu: Option<CpuStats>,
    memory: Option<MemoryStats>,
    network: Option<NetworkStats>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CpuStats {
    usage_nano_cores: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemoryStats {
    working_set_bytes: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkStats {
    time: Option<DateTime<Utc>>,
    rx_bytes: Option<u64>,
    tx_bytes: Option<u64>,
    #[serde(default)]
    interfaces: Vec<InterfaceStats>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InterfaceStats {
    rx_bytes: Option<u64>,
    tx_bytes: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ObjectRef {
    name: String,
    namespace: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodStats {
    pod_ref: ObjectRef,
    cpu: Option<CpuStats>,
    memory: Option<MemoryStats>,
    network: Option<NetworkStats>,
    #[serde(default)]
    containers: Vec<ContainerStats>,
    #[serde(default, rename = "volume")]
    volumes: Vec<VolumeStats>,
}

#[derive(Debug, Deserialize)]
struct ContainerStats {
    name: String,
    cpu: Option<CpuStats>,
    memory: Option<MemoryStats>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VolumeStats {
    used_bytes: Option<u64>,
    capacity_bytes: Option<u64>,
    pvc_ref: Option<ObjectRef>,
}

fn cpu_millis(cpu: Option<&CpuStats>) -> u64 {
    cpu.and_then(|c| c.usage_nano_cores)
        .map(nanocores_to_millis)
        .unwrap_or(0)
}

fn working_set(memory: Option<&MemoryStats>) -> u64 {
    memory.and_then(|m| m.working_set_bytes).unwrap_or(0)
}

/// Totals fall back to the per-interface sums when absent
fn network(net: Option<&NetworkStats>) -> (u64, u64) {
    let Some(net) = net else {
        return (0, 0);
    };
    let rx = net
        .rx_bytes
        .unwrap_or_else(|| net.interfaces.iter().filter_map(|i| i.rx_bytes).sum());
    let tx = net
        .tx_bytes
        .unwrap_or_else(|| net.interfaces.iter().filter_map(|i| i.tx_bytes).sum());
    (rx, tx)
}

impl From<Summary> for NodeMetrics {
    fn from(summary: Summary) -> Self {
        let (network_rx_bytes, network_tx_bytes) = network(summary.node.network.as_ref());
        let pods = summary
            .pods
            .into_iter()
            .map(|pod| {
                let (network_rx_bytes, network_tx_bytes) = network(pod.network.as_ref());
                PodMetrics {
                    cpu_usage_millis: cpu_millis(pod.cpu.as_ref()),
                    memory_working_set_bytes: working_set(pod.memory.as_ref()),
                    network_rx_bytes,
                    network_tx_bytes,
                    containers: pod
                        .containers
                        .iter()
                        .map(|c| ContainerMetrics {
                            name: c.name.clone(),
                            cpu_usage_millis: cpu_millis(c.cpu.as_ref()),
                            memory_working_set_bytes: working_set(c.memory.as_ref()),
                        })
                        .collect(),
                    volumes: pod
                        .volumes
                        .into_iter()
                        .filter_map(|v| {
                            let claim = v.pvc_ref?;
                            Some(VolumeUsage {
                                claim_namespace: claim.namespace,
                                claim_name: claim.name,
                                used_bytes: v.used_bytes.unwrap_or(0),
                                capacity_bytes: v.capacity_bytes.unwrap_or(0),
                            })
                        })
                        .collect(),
                    namespace: pod.pod_ref.namespace,
                    name: pod.pod_ref.name,
                }
            })
            .collect();

        NodeMetrics {
            cpu_usage_millis: cpu_millis(summary.node.cpu.as_ref()),
            memory_working_set_bytes: working_set(summary.node.memory.as_ref()),
            network_rx_bytes,
            network_tx_bytes,
            network_time: summary.node.network.as_ref().and_then(|n| n.time),
            node_name: summary.node.node_name,
            pods,
        }
    }
}

/// Node metrics through the API server's node proxy
#[derive(Clone)]
pub struct KubeletSummaryClient {
    client: Client,
    timeout: Duration,
}

impl KubeletSummaryClient {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl NodeMetricsSource for KubeletSummaryClient {
    async fn node_metrics(&self, node: &str) -> Result<NodeMetrics, MetricsError> {
        let url = format!("/api/v1/nodes/{}/proxy/stats/summary", node);
        let req = http::Request::get(url)
            .body(Default::default())
            .map_err(|e| MetricsError::Unavailable(e.to_string()))?;

        let summary = tokio::time::timeout(self.timeout, self.client.request::<Summary>(req))
            .await
            .map_err(|_| MetricsError::Timeout(self.timeout))?
            .map_err(MetricsError::from_kube)?;

        debug!(node, pods = summary.pods.len(), "Fetched kubelet summary");
        Ok(summary.into())
    }
}
