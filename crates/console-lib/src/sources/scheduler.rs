//! Volcano gang-scheduler resources
//!
//! Jobs, queues and hypernodes are custom resources, read as
//! `DynamicObject`s. The resource types are discovered once; a cluster
//! without Volcano never gets a client.

use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, ListParams};
use kube::{discovery, Client, ResourceExt};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::SchedulerSource;
use crate::models::{SchedulerJob, SchedulerQueue, SchedulerResources, TopologyDomain};

fn u32_at(value: &Value, pointer: &str) -> u32 {
    value
        .pointer(pointer)
        .and_then(Value::as_u64)
        .map(|v| v.min(u32::MAX as u64) as u32)
        .unwrap_or(0)
}

fn str_at(value: &Value, pointer: &str) -> String {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

pub(crate) fn job_from(obj: &DynamicObject) -> SchedulerJob {
    SchedulerJob {
        name: obj.name_any(),
        namespace: obj.namespace().unwrap_or_default(),
        queue: str_at(&obj.data, "/spec/queue"),
        phase: str_at(&obj.data, "/status/state/phase"),
        min_available: u32_at(&obj.data, "/spec/minAvailable"),
        running: u32_at(&obj.data, "/status/running"),
        pending: u32_at(&obj.data, "/status/pending"),
    }
}

pub(crate) fn queue_from(obj: &DynamicObject) -> SchedulerQueue {
    SchedulerQueue {
        name: obj.name_any(),
        state: str_at(&obj.data, "/status/state"),
        weight: u32_at(&obj.data, "/spec/weight"),
        running: u32_at(&obj.data, "/status/running"),
        pending: u32_at(&obj.data, "/status/pending"),
    }
}

pub(crate) fn topology_from(obj: &DynamicObject) -> TopologyDomain {
    let members = obj
        .data
        .pointer("/spec/members")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|m| {
            m.pointer("/selector/exactMatch/name")
                .or_else(|| m.pointer("/selector/regexMatch/pattern"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .collect();

    TopologyDomain {
        name: obj.name_any(),
        tier: u32_at(&obj.data, "/spec/tier"),
        members,
    }
}

/// Scheduler source backed by Volcano custom resources
#[derive(Clone)]
pub struct VolcanoClient {
    client: Client,
    timeout: Duration,
    jobs: ApiResource,
    queues: Option<ApiResource>,
    hypernodes: Option<ApiResource>,
}

impl VolcanoClient {
    /// Discover the Volcano resource types. Returns `None` when the job
    /// type is not served by the cluster.
    pub async fn detect(client: Client, timeout: Duration) -> Option<Self> {
        let jobs = Self::discover(&client, timeout, "batch.volcano.sh", "v1alpha1", "Job").await;
        let Some(jobs) = jobs else {
            info!("Volcano job resource not found; scheduler view disabled");
            return None;
        };
        let queues =
            Self::discover(&client, timeout, "scheduling.volcano.sh", "v1beta1", "Queue").await;
        let hypernodes =
            Self::discover(&client, timeout, "topology.volcano.sh", "v1alpha1", "HyperNode").await;

        info!(
            queues = queues.is_some(),
            hypernodes = hypernodes.is_some(),
            "Volcano scheduler resources discovered"
        );
        Some(Self {
            client,
            timeout,
            jobs,
            queues,
            hypernodes,
        })
    }

    async fn discover(
        client: &Client,
        timeout: Duration,
        group: &str,
        version: &str,
        kind: &str,
    ) -> Option<ApiResource> {
        let gvk = GroupVersionKind::gvk(group, version, kind);
        match tokio::time::timeout(timeout, discovery::pinned_kind(client, &gvk)).await {
            Ok(Ok((ar, _caps))) => Some(ar),
            Ok(Err(e)) => {
                debug!(group, kind, error = %e, "Resource type not available");
                None
            }
            Err(_) => {
                warn!(group, kind, "Resource discovery timed out");
                None
            }
        }
    }

    async fn list(&self, api: Api<DynamicObject>, what: &str) -> anyhow::Result<Vec<DynamicObject>> {
        let list = tokio::time::timeout(self.timeout, api.list(&ListParams::default()))
            .await
            .map_err(|_| anyhow!("listing {} timed out after {:?}", what, self.timeout))?
            .with_context(|| format!("Failed to list {}", what))?;
        Ok(list.items)
    }
}

#[async_trait]
impl SchedulerSource for VolcanoClient {
    async fn scheduler_resources(&self, namespace: &str) -> anyhow::Result<SchedulerResources> {
        let jobs_api = if namespace.is_empty() {
            Api::<DynamicObject>::all_with(self.client.clone(), &self.jobs)
        } else {
            Api::<DynamicObject>::namespaced_with(self.client.clone(), namespace, &self.jobs)
        };
        let jobs = self.list(jobs_api, "volcano jobs").await?;

        let mut resources = SchedulerResources {
            jobs: jobs.iter().map(job_from).collect(),
            ..Default::default()
        };

        // queues and hypernodes are cluster scoped
        if let Some(ar) = &self.queues {
            let api = Api::<DynamicObject>::all_with(self.client.clone(), ar);
            match self.list(api, "volcano queues").await {
                Ok(items) => resources.queues = items.iter().map(queue_from).collect(),
                Err(e) => warn!(error = %e, "Failed to list scheduler queues"),
            }
        }
        if let Some(ar) = &self.hypernodes {
            let api = Api::<DynamicObject>::all_with(self.client.clone(), ar);
            match self.list(api, "volcano hypernodes").await {
                Ok(items) => resources.topologies = items.iter().map(topology_from).collect(),
                Err(e) => warn!(error = %e, "Failed to list topology domains"),
            }
        }

        Ok(resources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;
    use serde_json::json;

    fn object(name: &str, namespace: Option<&str>, data: Value) -> DynamicObject {
        DynamicObject {
            types: None,
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: namespace.map(str::to_string),
                ..Default::default()
            },
            data,
        }
    }

    #[test]
    fn test_job_fields() {
        let job = job_from(&object(
            "train",
            Some("ml"),
            json!({
                "spec": {"queue": "research", "minAvailable": 4},
                "status": {"state": {"phase": "Running"}, "running": 4, "pending": 1}
            }),
        ));
        assert_eq!(job.namespace, "ml");
        assert_eq!(job.queue, "research");
        assert_eq!(job.phase, "Running");
        assert_eq!(job.min_available, 4);
        assert_eq!((job.running, job.pending), (4, 1));
    }

    #[test]
    fn test_queue_with_missing_status() {
        let queue = queue_from(&object("default", None, json!({"spec": {"weight": 2}})));
        assert_eq!(queue.weight, 2);
        assert_eq!(queue.state, "");
        assert_eq!(queue.running, 0);
    }

    #[test]
    fn test_topology_members() {
        let domain = topology_from(&object(
            "s0",
            None,
            json!({
                "spec": {
                    "tier": 1,
                    "members": [
                        {"type": "Node", "selector": {"exactMatch": {"name": "node-a"}}},
                        {"type": "Node", "selector": {"regexMatch": {"pattern": "node-b.*"}}}
                    ]
                }
            }),
        ));
        assert_eq!(domain.tier, 1);
        assert_eq!(domain.members, vec!["node-a".to_string(), "node-b.*".to_string()]);
    }
}
