//! Data sources feeding the aggregator
//!
//! Every source sits behind a narrow async trait so the aggregator can be
//! exercised against in-memory fakes:
//! - [`ResourceLister`]: nodes, pods, events, access self-check, logs
//! - [`ExtendedResourceLister`]: services, storage and workload controllers
//! - [`NodeMetricsSource`]: kubelet summary API, one node per call
//! - [`AcceleratorSource`]: accelerator exporter scrape
//! - [`SchedulerSource`]: gang-scheduler custom resources

mod accelerator;
mod convert;
mod kube_client;
mod kubelet;
pub mod quantity;
mod scheduler;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MetricsError;
use crate::models::{
    AcceleratorChip, EventRecord, NodeRecord, PodRecord, SchedulerResources, ServiceRecord,
    VolumeClaimRecord, VolumeRecord, WorkloadRecord,
};

pub use accelerator::{distribute_chips, parse_exposition, AcceleratorExporter, ExporterTarget};
pub use convert::ConvertOptions;
pub use kube_client::{connect, ClusterConnection, KubeResourceClient};
pub use kubelet::KubeletSummaryClient;
pub use scheduler::VolcanoClient;

/// Result of the "may I read node metrics" self-check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessStatus {
    Allowed,
    Denied(String),
}

impl AccessStatus {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessStatus::Allowed)
    }
}

/// Mandatory cluster listings
#[async_trait]
pub trait ResourceLister: Send + Sync {
    async fn list_nodes(&self) -> anyhow::Result<Vec<NodeRecord>>;

    /// Empty namespace lists across all namespaces
    async fn list_pods(&self, namespace: &str) -> anyhow::Result<Vec<PodRecord>>;

    /// Events filtered by type (empty filter keeps all), newest first,
    /// truncated to `limit`
    async fn list_events(
        &self,
        namespace: &str,
        types: &[String],
        limit: usize,
    ) -> anyhow::Result<Vec<EventRecord>>;

    /// Whether the caller may `get nodes/proxy`
    async fn check_metrics_access(&self) -> anyhow::Result<AccessStatus>;

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        tail_lines: Option<i64>,
    ) -> anyhow::Result<String>;
}

/// Optional listings beyond nodes and pods
#[async_trait]
pub trait ExtendedResourceLister: Send + Sync {
    async fn list_services(&self, namespace: &str) -> anyhow::Result<Vec<ServiceRecord>>;
    async fn list_volumes(&self) -> anyhow::Result<Vec<VolumeRecord>>;
    async fn list_volume_claims(&self, namespace: &str) -> anyhow::Result<Vec<VolumeClaimRecord>>;
    async fn list_deployments(&self, namespace: &str) -> anyhow::Result<Vec<WorkloadRecord>>;
    async fn list_stateful_sets(&self, namespace: &str) -> anyhow::Result<Vec<WorkloadRecord>>;
    async fn list_daemon_sets(&self, namespace: &str) -> anyhow::Result<Vec<WorkloadRecord>>;
    async fn list_jobs(&self, namespace: &str) -> anyhow::Result<Vec<WorkloadRecord>>;
    async fn list_cron_jobs(&self, namespace: &str) -> anyhow::Result<Vec<WorkloadRecord>>;
}

/// Live usage of one node and everything scheduled on it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeMetrics {
    pub node_name: String,
    pub cpu_usage_millis: u64,
    pub memory_working_set_bytes: u64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
    /// Observation time of the network counters as reported by the kubelet
    pub network_time: Option<DateTime<Utc>>,
    pub pods: Vec<PodMetrics>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PodMetrics {
    pub namespace: String,
    pub name: String,
    pub cpu_usage_millis: u64,
    pub memory_working_set_bytes: u64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
    pub containers: Vec<ContainerMetrics>,
    pub volumes: Vec<VolumeUsage>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerMetrics {
    pub name: String,
    pub cpu_usage_millis: u64,
    pub memory_working_set_bytes: u64,
}

/// Used bytes of a volume backed by a claim
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeUsage {
    pub claim_namespace: String,
    pub claim_name: String,
    pub used_bytes: u64,
    pub capacity_bytes: u64,
}

#[async_trait]
pub trait NodeMetricsSource: Send + Sync {
    async fn node_metrics(&self, node: &str) -> Result<NodeMetrics, MetricsError>;
}

#[async_trait]
pub trait AcceleratorSource: Send + Sync {
    /// Extended resource name the chips are advertised under
    fn resource_name(&self) -> &str;

    /// Flat chip telemetry in exporter order
    async fn scrape(&self) -> Result<Vec<AcceleratorChip>, MetricsError>;
}

#[async_trait]
pub trait SchedulerSource: Send + Sync {
    async fn scheduler_resources(&self, namespace: &str) -> anyhow::Result<SchedulerResources>;
}

/// The sources handed to the aggregator. Only the resource lister is
/// mandatory.
#[derive(Clone)]
pub struct Sources {
    pub resources: Arc<dyn ResourceLister>,
    pub extended: Option<Arc<dyn ExtendedResourceLister>>,
    pub node_metrics: Option<Arc<dyn NodeMetricsSource>>,
    pub accelerator: Option<Arc<dyn AcceleratorSource>>,
    pub scheduler: Option<Arc<dyn SchedulerSource>>,
}

impl Sources {
    pub fn new(resources: Arc<dyn ResourceLister>) -> Self {
        Self {
            resources,
            extended: None,
            node_metrics: None,
            accelerator: None,
            scheduler: None,
        }
    }

    pub fn with_extended(mut self, extended: Arc<dyn ExtendedResourceLister>) -> Self {
        self.extended = Some(extended);
        self
    }

    pub fn with_node_metrics(mut self, source: Arc<dyn NodeMetricsSource>) -> Self {
        self.node_metrics = Some(source);
        self
    }

    pub fn with_accelerator(mut self, source: Arc<dyn AcceleratorSource>) -> Self {
        self.accelerator = Some(source);
        self
    }

    pub fn with_scheduler(mut self, source: Arc<dyn SchedulerSource>) -> Self {
        self.scheduler = Some(source);
        self
    }
}
