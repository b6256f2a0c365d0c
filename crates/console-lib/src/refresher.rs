//! Periodic snapshot refresh
//!
//! One spawned task owns the cadence: an immediate refresh on start, then
//! one per interval tick until shutdown. Out-of-band refreshes share the
//! same routine and the same refresh lock, so there is never more than one
//! writer to the cache.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::aggregator::Aggregator;
use crate::cache::TtlCache;
use crate::error::RefreshError;
use crate::health::{components, HealthRegistry};
use crate::models::ClusterSnapshot;
use crate::observability::{ConsoleMetrics, StructuredLogger};

/// Configuration for the refresh loop
#[derive(Debug, Clone)]
pub struct RefresherConfig {
    /// Time between refreshes (default: 10 seconds)
    pub interval: Duration,
    /// Namespace filter; empty means all namespaces
    pub namespace: String,
}

impl Default for RefresherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            namespace: String::new(),
        }
    }
}

/// Point-in-time copy of the refresher state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefresherStatus {
    pub running: bool,
    pub last_update: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub interval_secs: u64,
    pub namespace: String,
    pub refreshes: u64,
    pub failures: u64,
}

/// Cumulative network counters and their observation time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSample {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub at: DateTime<Utc>,
}

impl RateSample {
    /// `None` when no node reported network counters
    pub fn from_snapshot(snapshot: &ClusterSnapshot) -> Option<Self> {
        let summary = &snapshot.summary;
        summary.network_sampled_at.map(|at| Self {
            rx_bytes: summary.network_rx_bytes,
            tx_bytes: summary.network_tx_bytes,
            at,
        })
    }
}

/// Bytes per second between two samples as `(rx, tx)`. A counter that went
/// down was reset and yields 0, as does a non-positive interval.
pub fn network_rate(prev: &RateSample, cur: &RateSample) -> (f64, f64) {
    let secs = (cur.at - prev.at).num_milliseconds() as f64 / 1000.0;
    if secs <= 0.0 {
        return (0.0, 0.0);
    }
    let rate = |cur: u64, prev: u64| {
        if cur < prev {
            0.0
        } else {
            (cur - prev) as f64 / secs
        }
    };
    (rate(cur.rx_bytes, prev.rx_bytes), rate(cur.tx_bytes, prev.tx_bytes))
}

struct RefresherState {
    running: bool,
    last_update: Option<DateTime<Utc>>,
    last_error: Option<String>,
    last_sample: Option<RateSample>,
    interval: Duration,
    namespace: String,
    refreshes: u64,
    failures: u64,
}

struct Inner {
    aggregator: Arc<Aggregator>,
    cache: Arc<TtlCache>,
    /// Held for the whole refresh routine
    refresh_lock: tokio::sync::Mutex<()>,
    state: Mutex<RefresherState>,
    health: HealthRegistry,
    metrics: ConsoleMetrics,
    logger: StructuredLogger,
}

impl Inner {
    fn state(&self) -> std::sync::MutexGuard<'_, RefresherState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetch, derive rates, publish. A failure leaves the cached snapshot
    /// untouched.
    async fn refresh(&self) -> Result<Arc<ClusterSnapshot>, RefreshError> {
        let _writer = self.refresh_lock.lock().await;
        let namespace = self.state().namespace.clone();
        let start = Instant::now();

        match self.aggregator.cluster_data(&namespace).await {
            Ok(mut snapshot) => {
                let sample = RateSample::from_snapshot(&snapshot);
                {
                    let mut state = self.state();
                    if state.namespace != namespace {
                        // filter switched mid-fetch; keep the result off the cache
                        return Ok(Arc::new(snapshot));
                    }
                    if let (Some(prev), Some(cur)) = (&state.last_sample, &sample) {
                        let (rx, tx) = network_rate(prev, cur);
                        snapshot.summary.network_rx_bytes_per_sec = rx;
                        snapshot.summary.network_tx_bytes_per_sec = tx;
                    }
                    state.last_sample = sample;
                    state.last_update = Some(snapshot.fetched_at);
                    state.last_error = None;
                    state.refreshes += 1;
                }

                let snapshot = Arc::new(snapshot);
                self.cache.set(snapshot.clone());

                let elapsed = start.elapsed();
                let summary = &snapshot.summary;
                self.metrics.observe_refresh(elapsed.as_secs_f64(), true);
                self.metrics.set_cluster_size(
                    summary.total_nodes,
                    summary.nodes_without_metrics,
                    summary.total_pods,
                );
                self.metrics.set_alerts(&summary.alerts);
                self.logger.log_refresh(
                    summary.total_nodes,
                    summary.total_pods,
                    summary.alerts.len(),
                    elapsed.as_millis(),
                );
                self.health.set_healthy(components::REFRESHER).await;
                self.health.set_ready(true).await;

                Ok(snapshot)
            }
            Err(e) => {
                let message = e.to_string();
                {
                    let mut state = self.state();
                    state.last_error = Some(message.clone());
                    state.failures += 1;
                }
                self.metrics
                    .observe_refresh(start.elapsed().as_secs_f64(), false);
                self.logger.log_refresh_failed(&message);
                self.health
                    .set_degraded(components::REFRESHER, format!("serving stale data: {}", message))
                    .await;
                Err(e.into())
            }
        }
    }
}

struct Running {
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Background driver keeping the cache fresh
pub struct Refresher {
    inner: Arc<Inner>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl Refresher {
    pub fn new(aggregator: Arc<Aggregator>, cache: Arc<TtlCache>, config: RefresherConfig) -> Self {
        Self::with_logger(aggregator, cache, config, StructuredLogger::new("default"))
    }

    fn with_logger(
        aggregator: Arc<Aggregator>,
        cache: Arc<TtlCache>,
        config: RefresherConfig,
        logger: StructuredLogger,
    ) -> Self {
        let health = aggregator.health().clone();
        let state = RefresherState {
            running: false,
            last_update: None,
            last_error: None,
            last_sample: None,
            interval: config.interval,
            namespace: config.namespace,
            refreshes: 0,
            failures: 0,
        };
        Self {
            inner: Arc::new(Inner {
                aggregator,
                cache,
                refresh_lock: tokio::sync::Mutex::new(()),
                state: Mutex::new(state),
                health,
                metrics: ConsoleMetrics::new(),
                logger,
            }),
            running: tokio::sync::Mutex::new(None),
        }
    }

    pub fn builder() -> RefresherBuilder {
        RefresherBuilder::new()
    }

    /// Spawn the refresh loop. The first refresh runs immediately.
    pub async fn start(&self) -> Result<(), RefreshError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(RefreshError::AlreadyRunning);
        }

        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let period = {
            let mut state = self.inner.state();
            state.running = true;
            state.interval
        };
        let handle = tokio::spawn(run(self.inner.clone(), period, shutdown_rx));
        *running = Some(Running { shutdown, handle });
        Ok(())
    }

    /// Signal the loop and wait for it to exit. An in-flight refresh
    /// completes first.
    pub async fn stop(&self) {
        let Some(Running { shutdown, handle }) = self.running.lock().await.take() else {
            return;
        };
        let _ = shutdown.send(());
        if let Err(e) = handle.await {
            debug!(error = %e, "Refresh task ended abnormally");
        }
        self.inner.state().running = false;
    }

    /// Refresh on the caller's task through the same routine as the loop
    pub async fn refresh_now(&self) -> Result<Arc<ClusterSnapshot>, RefreshError> {
        if !self.inner.state().running {
            return Err(RefreshError::NotRunning);
        }
        self.inner.refresh().await
    }

    pub fn status(&self) -> RefresherStatus {
        let state = self.inner.state();
        RefresherStatus {
            running: state.running,
            last_update: state.last_update,
            last_error: state.last_error.clone(),
            interval_secs: state.interval.as_secs(),
            namespace: state.namespace.clone(),
            refreshes: state.refreshes,
            failures: state.failures,
        }
    }

    pub fn namespace(&self) -> String {
        self.inner.state().namespace.clone()
    }

    /// Switch the namespace filter. The cached snapshot belongs to the old
    /// filter, so it is dropped along with the rate baseline.
    pub fn set_namespace(&self, namespace: impl Into<String>) {
        {
            let mut state = self.inner.state();
            state.namespace = namespace.into();
            state.last_sample = None;
        }
        self.inner.cache.invalidate();
    }
}

async fn run(inner: Arc<Inner>, period: Duration, mut shutdown: broadcast::Receiver<()>) {
    info!(interval_secs = period.as_secs(), "Starting snapshot refresh loop");

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // failures are recorded in the state and logged
                let _ = inner.refresh().await;
            }
            _ = shutdown.recv() => {
                info!("Shutting down snapshot refresh loop");
                break;
            }
        }
    }
}

/// Builder for a [`Refresher`]
pub struct RefresherBuilder {
    aggregator: Option<Arc<Aggregator>>,
    cache: Option<Arc<TtlCache>>,
    config: RefresherConfig,
    logger: Option<StructuredLogger>,
}

impl RefresherBuilder {
    pub fn new() -> Self {
        Self {
            aggregator: None,
            cache: None,
            config: RefresherConfig::default(),
            logger: None,
        }
    }

    pub fn aggregator(mut self, aggregator: Arc<Aggregator>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    pub fn cache(mut self, cache: Arc<TtlCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.namespace = namespace.into();
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> anyhow::Result<Refresher> {
        let aggregator = self
            .aggregator
            .ok_or_else(|| anyhow::anyhow!("Aggregator is required"))?;
        let cache = self
            .cache
            .ok_or_else(|| anyhow::anyhow!("Cache is required"))?;
        if self.config.interval.is_zero() {
            anyhow::bail!("Refresh interval must be positive");
        }

        Ok(Refresher::with_logger(
            aggregator,
            cache,
            self.config,
            self.logger.unwrap_or_else(|| StructuredLogger::new("default")),
        ))
    }
}

impl Default for RefresherBuilder {
    fn default() -> Self {
        Self::new()
    }
}
