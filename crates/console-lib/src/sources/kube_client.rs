//! API server access through `kube`

use std::fmt::Debug;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{
    Endpoints, Event, Node, PersistentVolume, PersistentVolumeClaim, Pod, Service,
};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, ListParams, LogParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::convert::{self, ConvertOptions};
use super::{AccessStatus, ExtendedResourceLister, ResourceLister};
use crate::models::{
    EventRecord, NodeRecord, PodRecord, ServiceRecord, VolumeClaimRecord, VolumeRecord,
    WorkloadRecord,
};

/// How to reach the cluster
#[derive(Debug, Clone, Default)]
pub struct ClusterConnection {
    /// Explicit kubeconfig; otherwise in-cluster or `~/.kube/config`
    pub kubeconfig: Option<PathBuf>,
    pub context: Option<String>,
    pub insecure_skip_tls_verify: bool,
}

/// Build a kube client from a connection description
pub async fn connect(conn: &ClusterConnection) -> anyhow::Result<Client> {
    let options = KubeConfigOptions {
        context: conn.context.clone(),
        ..Default::default()
    };

    let mut config = match (&conn.kubeconfig, &conn.context) {
        (Some(path), _) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("Failed to read kubeconfig file: {}", path.display()))?;
            Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .with_context(|| {
                    format!("Failed to create config from kubeconfig: {}", path.display())
                })?
        }
        (None, Some(_)) => Config::from_kubeconfig(&options)
            .await
            .context("Failed to load the requested kubeconfig context")?,
        (None, None) => Config::infer()
            .await
            .context("Failed to infer Kubernetes configuration")?,
    };

    if conn.insecure_skip_tls_verify {
        config.accept_invalid_certs = true;
    }

    info!(cluster_url = %config.cluster_url, "Connecting to Kubernetes API server");
    Client::try_from(config).context("Failed to create Kubernetes client")
}

/// Resource lister over the API server
#[derive(Clone)]
pub struct KubeResourceClient {
    client: Client,
    timeout: Duration,
    options: ConvertOptions,
}

impl KubeResourceClient {
    pub fn new(client: Client, timeout: Duration, options: ConvertOptions) -> Self {
        Self {
            client,
            timeout,
            options,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Run one API call under the request timeout
    async fn bounded<T, F>(&self, what: &str, fut: F) -> anyhow::Result<T>
    where
        F: Future<Output = Result<T, kube::Error>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| anyhow!("listing {} timed out after {:?}", what, self.timeout))?
            .with_context(|| format!("Failed to list {}", what))
    }

    fn scoped<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        if namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), namespace)
        }
    }

    async fn list_scoped<K>(&self, what: &str, namespace: &str) -> anyhow::Result<Vec<K>>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        let api: Api<K> = self.scoped(namespace);
        let list = self.bounded(what, api.list(&ListParams::default())).await?;
        debug!(resource = what, namespace, count = list.items.len(), "Listed resources");
        Ok(list.items)
    }
}

#[async_trait]
impl ResourceLister for KubeResourceClient {
    async fn list_nodes(&self) -> anyhow::Result<Vec<NodeRecord>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let list = self.bounded("nodes", api.list(&ListParams::default())).await?;
        Ok(list
            .items
            .iter()
            .map(|n| convert::node_record(n, &self.options))
            .collect())
    }

    async fn list_pods(&self, namespace: &str) -> anyhow::Result<Vec<PodRecord>> {
        let pods: Vec<Pod> = self.list_scoped("pods", namespace).await?;
        Ok(pods
            .iter()
            .map(|p| convert::pod_record(p, &self.options))
            .collect())
    }

    async fn list_events(
        &self,
        namespace: &str,
        types: &[String],
        limit: usize,
    ) -> anyhow::Result<Vec<EventRecord>> {
        let events: Vec<Event> = self.list_scoped("events", namespace).await?;
        let records = events.iter().map(convert::event_record).collect();
        Ok(convert::select_events(records, types, limit))
    }

    async fn check_metrics_access(&self) -> anyhow::Result<AccessStatus> {
        let review = SelfSubjectAccessReview {
            spec: SelfSubjectAccessReviewSpec {
                resource_attributes: Some(ResourceAttributes {
                    verb: Some("get".to_string()),
                    resource: Some("nodes".to_string()),
                    subresource: Some("proxy".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        let api: Api<SelfSubjectAccessReview> = Api::all(self.client.clone());
        let response = tokio::time::timeout(
            self.timeout,
            api.create(&PostParams::default(), &review),
        )
        .await
        .map_err(|_| anyhow!("access review timed out after {:?}", self.timeout))?
        .context("Failed to create SelfSubjectAccessReview")?;

        let status = response.status.unwrap_or_default();
        if status.allowed {
            Ok(AccessStatus::Allowed)
        } else {
            let reason = status
                .reason
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| "not allowed to get nodes/proxy".to_string());
            Ok(AccessStatus::Denied(reason))
        }
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        tail_lines: Option<i64>,
    ) -> anyhow::Result<String> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            container: container.map(str::to_string),
            tail_lines,
            ..Default::default()
        };
        tokio::time::timeout(self.timeout, api.logs(pod, &params))
            .await
            .map_err(|_| anyhow!("fetching logs timed out after {:?}", self.timeout))?
            .with_context(|| format!("Failed to fetch logs for {}/{}", namespace, pod))
    }
}

#[async_trait]
impl ExtendedResourceLister for KubeResourceClient {
    async fn list_services(&self, namespace: &str) -> anyhow::Result<Vec<ServiceRecord>> {
        let services: Vec<Service> = self.list_scoped("services", namespace).await?;
        // one bulk listing, joined by namespace/name
        let endpoints: Vec<Endpoints> = self.list_scoped("endpoints", namespace).await?;
        let ready = convert::ready_endpoint_counts(&endpoints);
        Ok(services
            .iter()
            .map(|s| convert::service_record(s, &ready))
            .collect())
    }

    async fn list_volumes(&self) -> anyhow::Result<Vec<VolumeRecord>> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        let list = self
            .bounded("persistent volumes", api.list(&ListParams::default()))
            .await?;
        Ok(list.items.iter().map(convert::volume_record).collect())
    }

    async fn list_volume_claims(&self, namespace: &str) -> anyhow::Result<Vec<VolumeClaimRecord>> {
        let claims: Vec<PersistentVolumeClaim> =
            self.list_scoped("persistent volume claims", namespace).await?;
        Ok(claims.iter().map(convert::volume_claim_record).collect())
    }

    async fn list_deployments(&self, namespace: &str) -> anyhow::Result<Vec<WorkloadRecord>> {
        let items: Vec<Deployment> = self.list_scoped("deployments", namespace).await?;
        Ok(items.iter().map(convert::deployment_record).collect())
    }

    async fn list_stateful_sets(&self, namespace: &str) -> anyhow::Result<Vec<WorkloadRecord>> {
        let items: Vec<StatefulSet> = self.list_scoped("stateful sets", namespace).await?;
        Ok(items.iter().map(convert::stateful_set_record).collect())
    }

    async fn list_daemon_sets(&self, namespace: &str) -> anyhow::Result<Vec<WorkloadRecord>> {
        let items: Vec<DaemonSet> = self.list_scoped("daemon sets", namespace).await?;
        Ok(items.iter().map(convert::daemon_set_record).collect())
    }

    async fn list_jobs(&self, namespace: &str) -> anyhow::Result<Vec<WorkloadRecord>> {
        let items: Vec<Job> = self.list_scoped("jobs", namespace).await?;
        Ok(items.iter().map(convert::job_record).collect())
    }

    async fn list_cron_jobs(&self, namespace: &str) -> anyhow::Result<Vec<WorkloadRecord>> {
        let items: Vec<CronJob> = self.list_scoped("cron jobs", namespace).await?;
        Ok(items.iter().map(convert::cron_job_record).collect())
    }
}
