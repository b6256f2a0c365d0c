//! Cluster data aggregation
//!
//! Builds one [`ClusterSnapshot`] per call:
//! - nodes and pods (mandatory), events and extended listings (best effort)
//! - node metrics access check, cached for a short TTL
//! - bounded per-node enrichment from the kubelet summary API
//! - accelerator chip distribution and scheduler resources
//! - the derived summary and alerts

mod access;
mod enrich;
mod summary;


use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

pub use access::AccessCache;
pub use enrich::{
    apply_node_metrics, apply_pod_counts, apply_pod_metrics, apply_volume_usage, clear_usage,
    pod_index,
};
pub use summary::{
    build_summary, infer_workloads, percent, top_restarts, SummaryInput, METRICS_DISABLED,
    TOP_RESTART_LIMIT,
};

use crate::anomaly::AlertRules;
use crate::error::{ClusterError, MetricsError};
use crate::health::{components, HealthRegistry};
use crate::models::{ClusterSnapshot, NodeRecord, PodRecord, SchedulerResources, WorkloadKind};
use crate::observability::{ConsoleMetrics, StructuredLogger};
use crate::sources::{distribute_chips, AccessStatus, NodeMetricsSource, Sources, VolumeUsage};

/// Configuration for cluster aggregation
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Upper bound for the access check (default: 10 seconds)
    pub request_timeout: Duration,
    /// Node metrics fetches in flight at once (default: 10)
    pub max_concurrent_fetches: usize,
    /// How long an access verdict is reused (default: 60 seconds)
    pub access_ttl: Duration,
    /// Most recent events kept per snapshot
    pub event_limit: usize,
    /// Event types kept; empty keeps all
    pub event_types: Vec<String>,
    pub alert_rules: AlertRules,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_concurrent_fetches: 10,
            access_ttl: Duration::from_secs(60),
            event_limit: 200,
            event_types: Vec::new(),
            alert_rules: AlertRules::default(),
        }
    }
}

/// Node and pod collections shared by the enrichment tasks
#[derive(Debug, Clone, Default)]
struct Collections {
    nodes: Vec<NodeRecord>,
    pods: Vec<PodRecord>,
    index: HashMap<String, usize>,
    volumes: Vec<VolumeUsage>,
}

/// Orchestrates every source into a cluster snapshot
pub struct Aggregator {
    sources: Sources,
    config: AggregatorConfig,
    access: AccessCache,
    /// Last verdict logged, so only changes are reported
    last_access: Mutex<Option<bool>>,
    health: HealthRegistry,
    metrics: ConsoleMetrics,
    logger: StructuredLogger,
}

impl Aggregator {
    pub fn new(sources: Sources, config: AggregatorConfig) -> Self {
        Self::with_parts(
            sources,
            config,
            HealthRegistry::new(),
            StructuredLogger::new("default"),
        )
    }

    fn with_parts(
        sources: Sources,
        config: AggregatorConfig,
        health: HealthRegistry,
        logger: StructuredLogger,
    ) -> Self {
        let access = AccessCache::new(config.access_ttl);
        Self {
            sources,
            config,
            access,
            last_access: Mutex::new(None),
            health,
            metrics: ConsoleMetrics::new(),
            logger,
        }
    }

    pub fn builder() -> AggregatorBuilder {
        AggregatorBuilder::new()
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    /// Whether a node metrics source was supplied at all
    pub fn metrics_configured(&self) -> bool {
        self.sources.node_metrics.is_some()
    }

    /// Cached verdict of the metrics access check, if still fresh
    pub fn access_status(&self) -> Option<AccessStatus> {
        self.access.get()
    }

    /// Build a fresh snapshot. Only the node and pod listings are fatal.
    pub async fn cluster_data(&self, namespace: &str) -> Result<ClusterSnapshot, ClusterError> {
        let resources = &self.sources.resources;

        let nodes = match resources.list_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                self.health
                    .set_unhealthy(components::API_SERVER, e.to_string())
                    .await;
                return Err(ClusterError::Nodes(e));
            }
        };
        let pods = match resources.list_pods(namespace).await {
            Ok(pods) => pods,
            Err(e) => {
                self.health
                    .set_unhealthy(components::API_SERVER, e.to_string())
                    .await;
                return Err(ClusterError::Pods(e));
            }
        };
        self.health.set_healthy(components::API_SERVER).await;

        let mut snapshot = ClusterSnapshot {
            namespace: namespace.to_string(),
            events: best_effort(
                "events",
                resources.list_events(namespace, &self.config.event_types, self.config.event_limit),
            )
            .await,
            ..Default::default()
        };

        if let Some(extended) = &self.sources.extended {
            snapshot.services = best_effort("services", extended.list_services(namespace)).await;
            snapshot.volumes = best_effort("persistent volumes", extended.list_volumes()).await;
            snapshot.volume_claims =
                best_effort("volume claims", extended.list_volume_claims(namespace)).await;
            snapshot.set_workloads(
                WorkloadKind::Deployment,
                optional("deployments", extended.list_deployments(namespace)).await,
            );
            snapshot.set_workloads(
                WorkloadKind::StatefulSet,
                optional("stateful sets", extended.list_stateful_sets(namespace)).await,
            );
            snapshot.set_workloads(
                WorkloadKind::DaemonSet,
                optional("daemon sets", extended.list_daemon_sets(namespace)).await,
            );
            snapshot.set_workloads(
                WorkloadKind::Job,
                optional("jobs", extended.list_jobs(namespace)).await,
            );
            snapshot.set_workloads(
                WorkloadKind::CronJob,
                optional("cron jobs", extended.list_cron_jobs(namespace)).await,
            );
        }

        let mut access_denied = None;
        let collections = match self.sources.node_metrics.clone() {
            Some(source) => match self.metrics_access().await {
                AccessStatus::Allowed => self.enrich(source, nodes, pods).await,
                AccessStatus::Denied(reason) => {
                    let (mut nodes, mut pods) = (nodes, pods);
                    clear_usage(&mut nodes, &mut pods);
                    self.health
                        .set_degraded(components::KUBELET_METRICS, reason.clone())
                        .await;
                    access_denied = Some(reason);
                    Collections {
                        nodes,
                        pods,
                        ..Default::default()
                    }
                }
            },
            None => Collections {
                nodes,
                pods,
                ..Default::default()
            },
        };

        snapshot.nodes = collections.nodes;
        snapshot.pods = collections.pods;
        apply_pod_counts(&mut snapshot.nodes, &snapshot.pods);
        apply_volume_usage(&mut snapshot.volume_claims, &collections.volumes);

        self.accelerator_pass(&mut snapshot.nodes).await;
        snapshot.scheduler = self.scheduler_pass(namespace).await;

        let now = Utc::now();
        snapshot.fetched_at = now;
        snapshot.summary = build_summary(
            SummaryInput {
                snapshot: &snapshot,
                metrics_configured: self.metrics_configured(),
                access_denied: access_denied.as_deref(),
                rules: &self.config.alert_rules,
            },
            now,
        );

        Ok(snapshot)
    }

    pub async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        tail_lines: Option<i64>,
    ) -> Result<String> {
        self.sources
            .resources
            .pod_logs(namespace, pod, container, tail_lines)
            .await
    }

    /// Cached verdict, or a fresh check. A failed check counts as denied.
    async fn metrics_access(&self) -> AccessStatus {
        if let Some(status) = self.access.get() {
            return status;
        }

        let timeout = self.config.request_timeout;
        let status = match tokio::time::timeout(
            timeout,
            self.sources.resources.check_metrics_access(),
        )
        .await
        {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => AccessStatus::Denied(format!("metrics access check failed: {:#}", e)),
            Err(_) => {
                AccessStatus::Denied(format!("metrics access check timed out after {:?}", timeout))
            }
        };
        self.record_access(status.clone());
        status
    }

    fn record_access(&self, status: AccessStatus) {
        let allowed = status.is_allowed();
        let changed = {
            let mut last = self
                .last_access
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            last.replace(allowed) != Some(allowed)
        };
        if changed {
            let reason = match &status {
                AccessStatus::Denied(reason) => Some(reason.as_str()),
                AccessStatus::Allowed => None,
            };
            self.logger.log_metrics_access(allowed, reason);
        }
        self.access.record(status);
    }

    /// Per-node fan-out, at most `max_concurrent_fetches` in flight
    async fn enrich(
        &self,
        source: Arc<dyn NodeMetricsSource>,
        nodes: Vec<NodeRecord>,
        pods: Vec<PodRecord>,
    ) -> Collections {
        let names: Vec<String> = nodes.iter().map(|n| n.name.clone()).collect();
        let index = pod_index(&pods);
        let shared = Arc::new(RwLock::new(Collections {
            nodes,
            pods,
            index,
            volumes: Vec::new(),
        }));

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_fetches.max(1)));
        let mut tasks = JoinSet::new();

        for (i, name) in names.into_iter().enumerate() {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let source = source.clone();
            let shared = shared.clone();

            tasks.spawn(async move {
                let _permit = permit;
                let result = source.node_metrics(&name).await;

                let mut guard = shared.write().await;
                let c = &mut *guard;
                match &result {
                    Ok(metrics) => {
                        apply_node_metrics(&mut c.nodes[i], metrics);
                        let volumes = apply_pod_metrics(&mut c.pods, &c.index, metrics);
                        c.volumes.extend(volumes);
                    }
                    Err(e) => {
                        c.nodes[i].has_metrics = false;
                        c.nodes[i].metrics_error = Some(e.to_string());
                    }
                }
                drop(guard);

                (name, result.err())
            });
        }

        let mut failures: Vec<(String, MetricsError)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, None)) => {}
                Ok((node, Some(err))) => failures.push((node, err)),
                Err(e) => warn!(error = %e, "Node metrics task failed"),
            }
        }

        for (node, err) in &failures {
            debug!(node = %node, error = %err, "Node metrics unavailable");
            self.metrics.inc_node_metrics_failure(err);
        }
        if let Some((node, err)) = failures.iter().find(|(_, e)| e.is_permission_denied()) {
            warn!(node = %node, error = %err, "Node metrics forbidden; skipping metrics until the access check expires");
            self.record_access(AccessStatus::Denied(err.to_string()));
        }

        let collections = match Arc::try_unwrap(shared) {
            Ok(lock) => lock.into_inner(),
            Err(shared) => shared.read().await.clone(),
        };

        let fetched = collections.nodes.len();
        if failures.is_empty() {
            self.health.set_healthy(components::KUBELET_METRICS).await;
        } else if failures.len() < fetched {
            self.health
                .set_degraded(
                    components::KUBELET_METRICS,
                    format!("{} of {} nodes without metrics", failures.len(), fetched),
                )
                .await;
        } else {
            self.health
                .set_unhealthy(components::KUBELET_METRICS, "no node metrics available")
                .await;
        }

        collections
    }

    async fn accelerator_pass(&self, nodes: &mut [NodeRecord]) {
        let Some(source) = &self.sources.accelerator else {
            return;
        };
        match source.scrape().await {
            Ok(chips) => {
                debug!(chips = chips.len(), resource = source.resource_name(), "Scraped accelerator exporter");
                distribute_chips(nodes, chips);
                self.health.set_healthy(components::ACCELERATOR_EXPORTER).await;
            }
            Err(e) => {
                warn!(error = %e, "Accelerator telemetry unavailable");
                self.health
                    .set_unhealthy(components::ACCELERATOR_EXPORTER, e.to_string())
                    .await;
            }
        }
    }

    async fn scheduler_pass(&self, namespace: &str) -> Option<SchedulerResources> {
        let source = self.sources.scheduler.as_ref()?;
        match source.scheduler_resources(namespace).await {
            Ok(resources) => {
                self.health.set_healthy(components::SCHEDULER).await;
                Some(resources)
            }
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Scheduler resources unavailable");
                self.health
                    .set_unhealthy(components::SCHEDULER, e.to_string())
                    .await;
                None
            }
        }
    }
}

/// Await an optional listing, logging its failure as `None`
async fn optional<T>(what: &str, fetch: impl Future<Output = Result<T>>) -> Option<T> {
    match fetch.await {
        Ok(items) => Some(items),
        Err(e) => {
            warn!(resource = what, error = %format!("{:#}", e), "Optional listing failed");
            None
        }
    }
}

/// Like [`optional`], with a failed listing read as empty
async fn best_effort<T: Default>(what: &str, fetch: impl Future<Output = Result<T>>) -> T {
    optional(what, fetch).await.unwrap_or_default()
}

/// Builder for an [`Aggregator`]
pub struct AggregatorBuilder {
    sources: Option<Sources>,
    config: AggregatorConfig,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
}

impl AggregatorBuilder {
    pub fn new() -> Self {
        Self {
            sources: None,
            config: AggregatorConfig::default(),
            health: None,
            logger: None,
        }
    }

    pub fn sources(mut self, sources: Sources) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn config(mut self, config: AggregatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn max_concurrent_fetches(mut self, max: usize) -> Self {
        self.config.max_concurrent_fetches = max;
        self
    }

    pub fn access_ttl(mut self, ttl: Duration) -> Self {
        self.config.access_ttl = ttl;
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> Result<Aggregator> {
        let sources = self
            .sources
            .ok_or_else(|| anyhow::anyhow!("Sources are required"))?;
        if self.config.max_concurrent_fetches == 0 {
            anyhow::bail!("max_concurrent_fetches must be at least 1");
        }

        Ok(Aggregator::with_parts(
            sources,
            self.config,
            self.health.unwrap_or_default(),
            self.logger.unwrap_or_else(|| StructuredLogger::new("default")),
        ))
    }
}

impl Default for AggregatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
