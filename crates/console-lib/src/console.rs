//! Entry point for consumers of the console core
//!
//! Wires sources, aggregator, cache and refresher together. Reads go to the
//! cache first and fall through to a direct aggregation on a miss; only the
//! refresher writes the cache.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::aggregator::Aggregator;
use crate::cache::TtlCache;
use crate::error::{ClusterError, RefreshError};
use crate::health::HealthRegistry;
use crate::models::ClusterSnapshot;
use crate::observability::{ConsoleMetrics, StructuredLogger};
use crate::refresher::{Refresher, RefresherStatus};
use crate::settings::Settings;
use crate::sources::{
    connect, AcceleratorExporter, KubeResourceClient, KubeletSummaryClient, Sources, VolcanoClient,
};

pub struct Console {
    aggregator: Arc<Aggregator>,
    cache: Arc<TtlCache>,
    refresher: Refresher,
    metrics: ConsoleMetrics,
    logger: StructuredLogger,
    settings: Settings,
}

impl Console {
    pub fn builder() -> ConsoleBuilder {
        ConsoleBuilder::new()
    }

    /// Connect to the cluster described by `settings` and wire every
    /// configured source
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let client = connect(&settings.connection()).await?;
        let timeout = settings.request_timeout();

        let resources = Arc::new(KubeResourceClient::new(
            client.clone(),
            timeout,
            settings.convert_options(),
        ));
        let mut sources = Sources::new(resources.clone()).with_extended(resources);

        if settings.node_metrics {
            sources = sources
                .with_node_metrics(Arc::new(KubeletSummaryClient::new(client.clone(), timeout)));
        }

        let accel = &settings.accelerator;
        if accel.is_enabled() {
            let exporter = AcceleratorExporter::new(
                accel.target(settings.insecure_skip_tls_verify),
                client.clone(),
                accel.resource_name.clone(),
                Duration::from_secs(accel.timeout_secs),
            )
            .context("Failed to set up accelerator exporter client")?
            .with_cooldown(Duration::from_secs(accel.cooldown_secs));
            sources = sources.with_accelerator(Arc::new(exporter));
        }

        if settings.scheduler {
            if let Some(volcano) = VolcanoClient::detect(client.clone(), timeout).await {
                sources = sources.with_scheduler(Arc::new(volcano));
            }
        }

        let cluster = settings.context.as_deref().unwrap_or("current-context");
        info!(
            cluster = %cluster,
            node_metrics = sources.node_metrics.is_some(),
            accelerator = sources.accelerator.is_some(),
            scheduler = sources.scheduler.is_some(),
            "Connected to cluster"
        );

        Self::builder()
            .sources(sources)
            .settings(settings.clone())
            .logger(StructuredLogger::new(cluster))
            .build()
    }

    /// Start the background refresher
    pub async fn start(&self) -> Result<(), RefreshError> {
        self.refresher.start().await?;
        self.logger.log_startup(
            env!("CARGO_PKG_VERSION"),
            &self.refresher.namespace(),
            self.settings.refresh_interval_secs,
        );
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.refresher.stop().await;
        self.logger.log_shutdown("requested");
    }

    /// The cached snapshot when fresh, otherwise a direct aggregation.
    /// The second value reports whether the cache answered.
    pub async fn cluster_data(&self) -> Result<(Arc<ClusterSnapshot>, bool), ClusterError> {
        if let Some(snapshot) = self.cache.get() {
            self.metrics.record_cache_lookup(true);
            return Ok((snapshot, true));
        }
        self.metrics.record_cache_lookup(false);

        let namespace = self.refresher.namespace();
        let snapshot = self.aggregator.cluster_data(&namespace).await?;
        Ok((Arc::new(snapshot), false))
    }

    /// Last published snapshot, even if past its TTL
    pub fn latest(&self) -> Option<Arc<ClusterSnapshot>> {
        self.cache.latest()
    }

    pub async fn force_refresh(&self) -> Result<Arc<ClusterSnapshot>, RefreshError> {
        self.refresher.refresh_now().await
    }

    pub async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        tail_lines: Option<i64>,
    ) -> Result<String> {
        self.aggregator
            .pod_logs(namespace, pod, container, tail_lines)
            .await
    }

    pub fn refresher_status(&self) -> RefresherStatus {
        self.refresher.status()
    }

    pub fn set_namespace(&self, namespace: impl Into<String>) {
        let namespace = namespace.into();
        info!(namespace = %namespace, "Switching namespace filter");
        self.refresher.set_namespace(namespace);
    }

    pub fn health(&self) -> &HealthRegistry {
        self.aggregator.health()
    }
}

/// Builder for a [`Console`]
pub struct ConsoleBuilder {
    sources: Option<Sources>,
    settings: Settings,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
}

impl ConsoleBuilder {
    pub fn new() -> Self {
        Self {
            sources: None,
            settings: Settings::default(),
            health: None,
            logger: None,
        }
    }

    pub fn sources(mut self, sources: Sources) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
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

    pub fn build(self) -> Result<Console> {
        let sources = self
            .sources
            .ok_or_else(|| anyhow::anyhow!("Sources are required"))?;
        let settings = self.settings;
        settings.validate()?;

        if settings.cache_ttl() < settings.refresh_interval() {
            warn!(
                cache_ttl_secs = settings.cache_ttl_secs,
                refresh_interval_secs = settings.refresh_interval_secs,
                "Cache TTL shorter than the refresh interval; reads will often miss"
            );
        }

        let logger = self
            .logger
            .unwrap_or_else(|| StructuredLogger::new("default"));
        let aggregator = Arc::new(
            Aggregator::builder()
                .sources(sources)
                .config(settings.aggregator_config())
                .health(self.health.unwrap_or_default())
                .logger(logger.clone())
                .build()?,
        );
        let cache = Arc::new(TtlCache::new(settings.cache_ttl()));
        let refresher = Refresher::builder()
            .aggregator(aggregator.clone())
            .cache(cache.clone())
            .interval(settings.refresh_interval())
            .namespace(settings.namespace.clone())
            .logger(logger.clone())
            .build()?;

        Ok(Console {
            aggregator,
            cache,
            refresher,
            metrics: ConsoleMetrics::new(),
            logger,
            settings,
        })
    }
}

impl Default for ConsoleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use std::sync::atomic::Ordering;

    fn console(resources: Arc<FakeResources>) -> Console {
        Console::builder()
            .sources(Sources::new(resources))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_miss_falls_through_without_writing_cache() {
        let resources = Arc::new(FakeResources::new(vec![node("n1")], Vec::new()));
        let console = console(resources.clone());

        let (snapshot, from_cache) = console.cluster_data().await.unwrap();
        assert!(!from_cache);
        assert_eq!(snapshot.summary.total_nodes, 1);

        let (_, from_cache) = console.cluster_data().await.unwrap();
        assert!(!from_cache);
        assert_eq!(resources.node_calls.load(Ordering::SeqCst), 2);
        assert!(console.latest().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_snapshot_outlives_failed_refreshes() {
        let resources = Arc::new(FakeResources::new(vec![node("n1")], Vec::new()));
        let console = console(resources.clone());
        console.start().await.unwrap();
        console.force_refresh().await.unwrap();

        resources.fail_nodes.store(true, Ordering::SeqCst);
        tokio::time::advance(std::time::Duration::from_secs(3600)).await;

        assert!(console.cluster_data().await.is_err());
        let stale = console.latest().unwrap();
        assert_eq!(stale.summary.total_nodes, 1);

        console.shutdown().await;
    }

    #[tokio::test]
    async fn test_hit_after_refresh() {
        let resources = Arc::new(FakeResources::new(vec![node("n1")], Vec::new()));
        let console = console(resources.clone());
        console.start().await.unwrap();

        console.force_refresh().await.unwrap();
        let (snapshot, from_cache) = console.cluster_data().await.unwrap();
        assert!(from_cache);
        assert_eq!(snapshot.summary.total_nodes, 1);
        assert!(console.refresher_status().refreshes >= 1);

        console.shutdown().await;
        assert!(!console.refresher_status().running);
    }

    #[tokio::test]
    async fn test_force_refresh_when_stopped() {
        let resources = Arc::new(FakeResources::new(vec![node("n1")], Vec::new()));
        let console = console(resources);
        assert!(matches!(
            console.force_refresh().await,
            Err(RefreshError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn test_namespace_switch_drops_cached_snapshot() {
        let resources = Arc::new(FakeResources::new(
            vec![node("n1")],
            vec![pod("a", "web", "n1", "Running"), pod("b", "db", "n1", "Running")],
        ));
        let console = console(resources);
        console.start().await.unwrap();
        console.force_refresh().await.unwrap();

        console.set_namespace("a");
        let (snapshot, _) = console.cluster_data().await.unwrap();
        assert_eq!(snapshot.namespace, "a");
        assert_eq!(snapshot.pods.len(), 1);
        console.shutdown().await;
    }

    #[tokio::test]
    async fn test_pod_logs() {
        let resources = Arc::new(FakeResources::new(Vec::new(), Vec::new()));
        let logs = console(resources)
            .pod_logs("default", "web", None, Some(5))
            .await
            .unwrap();
        assert_eq!(logs, "default/web container=- tail=5");
    }

    #[test]
    fn test_builder_validates_settings() {
        let resources = Arc::new(FakeResources::new(Vec::new(), Vec::new()));
        let settings = Settings {
            refresh_interval_secs: 0,
            ..Default::default()
        };
        let result = Console::builder()
            .sources(Sources::new(resources))
            .settings(settings)
            .build();
        assert!(result.is_err());
    }
}
