//! In-memory sources and record builders shared by unit tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::error::MetricsError;
use crate::models::{
    AcceleratorChip, ContainerRecord, ContainerState, EventRecord, NodeAccelerators, NodeRecord,
    PodRecord, SchedulerResources, ServiceRecord, VolumeClaimRecord, VolumeRecord, WorkloadRecord,
};
use crate::sources::{
    AcceleratorSource, AccessStatus, ExtendedResourceLister, NodeMetrics, NodeMetricsSource,
    ResourceLister, SchedulerSource,
};

pub fn node(name: &str) -> NodeRecord {
    NodeRecord {
        name: name.to_string(),
        ready: true,
        cpu_capacity_millis: 4000,
        cpu_allocatable_millis: 4000,
        memory_capacity_bytes: 8 << 30,
        memory_allocatable_bytes: 8 << 30,
        pod_capacity: 110,
        pod_allocatable: 110,
        ..Default::default()
    }
}

pub fn accelerator_node(name: &str, capacity: u64) -> NodeRecord {
    NodeRecord {
        accelerator: Some(NodeAccelerators {
            resource_name: "google.com/tpu".to_string(),
            capacity,
            allocatable: capacity,
            ..Default::default()
        }),
        ..node(name)
    }
}

pub fn pod(namespace: &str, name: &str, node: &str, phase: &str) -> PodRecord {
    PodRecord {
        name: name.to_string(),
        namespace: namespace.to_string(),
        node: Some(node.to_string()),
        phase: phase.to_string(),
        created_at: Some(chrono::Utc::now()),
        containers: vec![container("app")],
        ..Default::default()
    }
}

pub fn container(name: &str) -> ContainerRecord {
    ContainerRecord {
        name: name.to_string(),
        image: format!("registry.local/{}:1.0", name),
        ready: true,
        state: ContainerState::Running,
        ..Default::default()
    }
}

pub fn event(event_type: &str, reason: &str) -> EventRecord {
    EventRecord {
        namespace: "default".to_string(),
        object_kind: "Pod".to_string(),
        object_name: "web".to_string(),
        event_type: event_type.to_string(),
        reason: reason.to_string(),
        count: 1,
        last_seen: Some(chrono::Utc::now()),
        ..Default::default()
    }
}

pub fn chip(id: &str, utilization: f64) -> AcceleratorChip {
    AcceleratorChip {
        id: id.to_string(),
        utilization_percent: utilization,
        healthy: true,
        ..Default::default()
    }
}

/// Node/pod/event listings with switchable failures
#[derive(Default)]
pub struct FakeResources {
    pub nodes: Mutex<Vec<NodeRecord>>,
    pub pods: Mutex<Vec<PodRecord>>,
    pub events: Vec<EventRecord>,
    pub access: Mutex<Option<AccessStatus>>,
    pub fail_nodes: AtomicBool,
    pub fail_pods: AtomicBool,
    pub fail_events: AtomicBool,
    pub node_calls: AtomicUsize,
    pub access_checks: AtomicUsize,
}

impl FakeResources {
    pub fn new(nodes: Vec<NodeRecord>, pods: Vec<PodRecord>) -> Self {
        Self {
            nodes: Mutex::new(nodes),
            pods: Mutex::new(pods),
            access: Mutex::new(Some(AccessStatus::Allowed)),
            ..Default::default()
        }
    }

    pub fn with_events(mut self, events: Vec<EventRecord>) -> Self {
        self.events = events;
        self
    }

    /// `None` makes the access check itself fail
    pub fn set_access(&self, access: Option<AccessStatus>) {
        *self.access.lock().unwrap() = access;
    }
}

#[async_trait]
impl ResourceLister for FakeResources {
    async fn list_nodes(&self) -> Result<Vec<NodeRecord>> {
        self.node_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_nodes.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }
        Ok(self.nodes.lock().unwrap().clone())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodRecord>> {
        if self.fail_pods.load(Ordering::SeqCst) {
            return Err(anyhow!("pods is forbidden"));
        }
        let pods = self.pods.lock().unwrap();
        Ok(pods
            .iter()
            .filter(|p| namespace.is_empty() || p.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn list_events(
        &self,
        _namespace: &str,
        _types: &[String],
        limit: usize,
    ) -> Result<Vec<EventRecord>> {
        if self.fail_events.load(Ordering::SeqCst) {
            return Err(anyhow!("events unavailable"));
        }
        Ok(self.events.iter().take(limit).cloned().collect())
    }

    async fn check_metrics_access(&self) -> Result<AccessStatus> {
        self.access_checks.fetch_add(1, Ordering::SeqCst);
        self.access
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow!("selfsubjectaccessreviews unavailable"))
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        tail_lines: Option<i64>,
    ) -> Result<String> {
        Ok(format!(
            "{}/{} container={} tail={}",
            namespace,
            pod,
            container.unwrap_or("-"),
            tail_lines.unwrap_or(-1)
        ))
    }
}

/// Extended listings; cron jobs always fail, the rest only when asked to
#[derive(Default)]
pub struct FakeExtended {
    pub services: Vec<ServiceRecord>,
    pub volumes: Vec<VolumeRecord>,
    pub claims: Vec<VolumeClaimRecord>,
    pub deployments: Vec<WorkloadRecord>,
    pub stateful_sets: Vec<WorkloadRecord>,
    pub fail_services: bool,
    pub fail_deployments: bool,
}

#[async_trait]
impl ExtendedResourceLister for FakeExtended {
    async fn list_services(&self, _namespace: &str) -> Result<Vec<ServiceRecord>> {
        if self.fail_services {
            return Err(anyhow!("services unavailable"));
        }
        Ok(self.services.clone())
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeRecord>> {
        Ok(self.volumes.clone())
    }

    async fn list_volume_claims(&self, _namespace: &str) -> Result<Vec<VolumeClaimRecord>> {
        Ok(self.claims.clone())
    }

    async fn list_deployments(&self, _namespace: &str) -> Result<Vec<WorkloadRecord>> {
        if self.fail_deployments {
            return Err(anyhow!("deployments.apps is forbidden"));
        }
        Ok(self.deployments.clone())
    }

    async fn list_stateful_sets(&self, _namespace: &str) -> Result<Vec<WorkloadRecord>> {
        Ok(self.stateful_sets.clone())
    }

    async fn list_daemon_sets(&self, _namespace: &str) -> Result<Vec<WorkloadRecord>> {
        Ok(Vec::new())
    }

    async fn list_jobs(&self, _namespace: &str) -> Result<Vec<WorkloadRecord>> {
        Ok(Vec::new())
    }

    async fn list_cron_jobs(&self, _namespace: &str) -> Result<Vec<WorkloadRecord>> {
        Err(anyhow!("the server could not find the requested resource"))
    }
}

/// Per-node canned responses, tracking how many fetches overlap
#[derive(Default)]
pub struct FakeNodeMetrics {
    responses: Mutex<HashMap<String, Result<NodeMetrics, MetricsError>>>,
    delay: Duration,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub calls: AtomicUsize,
}

impl FakeNodeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn respond(&self, node: &str, response: Result<NodeMetrics, MetricsError>) {
        self.responses
            .lock()
            .unwrap()
            .insert(node.to_string(), response);
    }
}

#[async_trait]
impl NodeMetricsSource for FakeNodeMetrics {
    async fn node_metrics(&self, node: &str) -> Result<NodeMetrics, MetricsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let response = self.responses.lock().unwrap().get(node).cloned();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        response.unwrap_or_else(|| {
            Ok(NodeMetrics {
                node_name: node.to_string(),
                ..Default::default()
            })
        })
    }
}

pub struct FakeAccelerator {
    pub chips: Result<Vec<AcceleratorChip>, MetricsError>,
}

#[async_trait]
impl AcceleratorSource for FakeAccelerator {
    fn resource_name(&self) -> &str {
        "google.com/tpu"
    }

    async fn scrape(&self) -> Result<Vec<AcceleratorChip>, MetricsError> {
        self.chips.clone()
    }
}

pub struct FakeScheduler {
    pub resources: Option<SchedulerResources>,
}

#[async_trait]
impl SchedulerSource for FakeScheduler {
    async fn scheduler_resources(&self, _namespace: &str) -> Result<SchedulerResources> {
        self.resources
            .clone()
            .ok_or_else(|| anyhow!("jobs.batch.volcano.sh is forbidden"))
    }
}
