//! Accelerator exporter scraping and chip distribution
//!
//! The exporter publishes Prometheus text exposition with one series per
//! chip. The metrics carry no node label, so chips are spread over the
//! accelerator nodes by expected capacity.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use kube::Client;
use prometheus_parse::{Scrape, Value};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::AcceleratorSource;
use crate::error::MetricsError;
use crate::models::{AcceleratorChip, NodeRecord};

/// Pause after a failed scrape before the exporter is tried again
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// Labels that identify a chip, in lookup order
const CHIP_LABELS: &[&str] = &["chip", "accelerator_id", "device", "tpu"];

/// Where the exporter lives
#[derive(Debug, Clone)]
pub enum ExporterTarget {
    /// Scraped directly, e.g. a port-forward or node-local address
    Direct { url: String, skip_tls_verify: bool },
    /// Scraped through the API server's service proxy
    ServiceProxy {
        namespace: String,
        service: String,
        port: u16,
        path: String,
    },
}

impl ExporterTarget {
    fn proxy_path(namespace: &str, service: &str, port: u16, path: &str) -> String {
        format!(
            "/api/v1/namespaces/{}/services/{}:{}/proxy{}",
            namespace, service, port, path
        )
    }
}

/// Remembers the last failure and refuses attempts during the cool-down
#[derive(Debug)]
struct Backoff {
    cooldown: Duration,
    last_failure: Mutex<Option<Instant>>,
}

impl Backoff {
    fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_failure: Mutex::new(None),
        }
    }

    /// Time left before the next attempt is allowed
    fn remaining(&self) -> Option<Duration> {
        let last = *self.last_failure.lock().unwrap_or_else(PoisonError::into_inner);
        last.and_then(|at| self.cooldown.checked_sub(at.elapsed()))
            .filter(|left| !left.is_zero())
    }

    fn failed(&self) {
        *self.last_failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    fn succeeded(&self) {
        *self.last_failure.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

enum Transport {
    Http(reqwest::Client, String),
    Proxy(Client, String),
}

/// Accelerator telemetry scraped from a Prometheus-format exporter
pub struct AcceleratorExporter {
    transport: Transport,
    resource_name: String,
    timeout: Duration,
    backoff: Backoff,
}

impl AcceleratorExporter {
    pub fn new(
        target: ExporterTarget,
        kube: Client,
        resource_name: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let transport = match target {
            ExporterTarget::Direct {
                url,
                skip_tls_verify,
            } => {
                let http = reqwest::Client::builder()
                    .danger_accept_invalid_certs(skip_tls_verify)
                    .timeout(timeout)
                    .build()?;
                Transport::Http(http, url)
            }
            ExporterTarget::ServiceProxy {
                namespace,
                service,
                port,
                path,
            } => Transport::Proxy(
                kube,
                ExporterTarget::proxy_path(&namespace, &service, port, &path),
            ),
        };

        Ok(Self {
            transport,
            resource_name: resource_name.into(),
            timeout,
            backoff: Backoff::new(DEFAULT_COOLDOWN),
        })
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.backoff = Backoff::new(cooldown);
        self
    }

    async fn fetch(&self) -> Result<String, MetricsError> {
        match &self.transport {
            Transport::Http(http, url) => {
                let response = http
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| classify_reqwest(e, self.timeout))?;
                let status = response.status();
                if status == reqwest::StatusCode::UNAUTHORIZED
                    || status == reqwest::StatusCode::FORBIDDEN
                {
                    return Err(MetricsError::PermissionDenied(format!(
                        "exporter returned {}",
                        status
                    )));
                }
                if !status.is_success() {
                    return Err(MetricsError::Unavailable(format!(
                        "exporter returned {}",
                        status
                    )));
                }
                response.text().await.map_err(|e| classify_reqwest(e, self.timeout))
            }
            Transport::Proxy(client, path) => {
                let req = http::Request::get(path.as_str())
                    .body(Default::default())
                    .map_err(|e| MetricsError::Unavailable(e.to_string()))?;
                tokio::time::timeout(self.timeout, client.request_text(req))
                    .await
                    .map_err(|_| MetricsError::Timeout(self.timeout))?
                    .map_err(MetricsError::from_kube)
            }
        }
    }
}

fn classify_reqwest(err: reqwest::Error, timeout: Duration) -> MetricsError {
    if err.is_timeout() {
        MetricsError::Timeout(timeout)
    } else if err.is_decode() {
        MetricsError::Decode(err.to_string())
    } else {
        MetricsError::Unavailable(err.to_string())
    }
}

#[async_trait]
impl AcceleratorSource for AcceleratorExporter {
    fn resource_name(&self) -> &str {
        &self.resource_name
    }

    async fn scrape(&self) -> Result<Vec<AcceleratorChip>, MetricsError> {
        if let Some(left) = self.backoff.remaining() {
            return Err(MetricsError::Unavailable(format!(
                "exporter cooling down for another {}s after a failure",
                left.as_secs()
            )));
        }

        match self.fetch().await {
            Ok(body) => {
                self.backoff.succeeded();
                let chips = parse_exposition(&body)?;
                debug!(chips = chips.len(), "Scraped accelerator exporter");
                Ok(chips)
            }
            Err(e) => {
                self.backoff.failed();
                Err(e)
            }
        }
    }
}

fn scalar(value: &Value) -> Option<f64> {
    match value {
        Value::Counter(v) | Value::Gauge(v) | Value::Untyped(v) => Some(*v),
        _ => None,
    }
}

/// Flatten an exposition body into per-chip telemetry, in first-seen order
pub fn parse_exposition(body: &str) -> Result<Vec<AcceleratorChip>, MetricsError> {
    let scrape = Scrape::parse(body.lines().map(|l| Ok(l.to_string())))
        .map_err(|e| MetricsError::Decode(format!("invalid exposition: {}", e)))?;

    let mut chips: Vec<AcceleratorChip> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for sample in &scrape.samples {
        let Some(value) = scalar(&sample.value) else {
            continue;
        };
        let Some(id) = CHIP_LABELS.iter().find_map(|l| sample.labels.get(*l)) else {
            continue;
        };

        let slot = *index.entry(id.to_string()).or_insert_with(|| {
            chips.push(AcceleratorChip {
                id: id.to_string(),
                healthy: true,
                ..Default::default()
            });
            chips.len() - 1
        });
        let chip = &mut chips[slot];

        match sample.metric.as_str() {
            "accelerator_duty_cycle" => chip.utilization_percent = value,
            "accelerator_memory_used" => chip.memory_used_bytes = value as u64,
            "accelerator_memory_total" => chip.memory_total_bytes = value as u64,
            "accelerator_temperature" => chip.temperature_celsius = Some(value),
            "accelerator_power" => chip.power_watts = Some(value),
            "accelerator_healthy" => chip.healthy = value >= 1.0,
            "accelerator_link_rx_bytes" => chip.link_rx_bytes = value as u64,
            "accelerator_link_tx_bytes" => chip.link_tx_bytes = value as u64,
            _ => {}
        }
    }

    Ok(chips)
}

/// Attach chips to accelerator nodes.
///
/// One accelerator node takes everything. With several nodes, a scrape that
/// fits in the first node's capacity is assumed to come from that node
/// alone; otherwise nodes are filled in order up to their capacity.
pub fn distribute_chips(nodes: &mut [NodeRecord], chips: Vec<AcceleratorChip>) {
    let targets: Vec<usize> = nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.accelerator_capacity() > 0)
        .map(|(i, _)| i)
        .collect();

    let Some(&first) = targets.first() else {
        if !chips.is_empty() {
            warn!(chips = chips.len(), "Accelerator telemetry but no accelerator nodes");
        }
        return;
    };

    let mut chips = chips.into_iter();
    if targets.len() == 1 {
        assign(&mut nodes[first], chips.collect());
        return;
    }

    let total = chips.len() as u64;
    if total <= nodes[first].accelerator_capacity() {
        warn!(
            node = %nodes[first].name,
            chips = total,
            accelerator_nodes = targets.len(),
            "Single exporter endpoint in a multi-node cluster; assigning all chips to the first node"
        );
        assign(&mut nodes[first], chips.collect());
        return;
    }

    for &i in &targets {
        let take = nodes[i].accelerator_capacity() as usize;
        let batch: Vec<_> = chips.by_ref().take(take).collect();
        assign(&mut nodes[i], batch);
    }

    let left = chips.count();
    if left > 0 {
        warn!(chips = left, "Accelerator chips left over after filling every node");
    }
}

fn assign(node: &mut NodeRecord, chips: Vec<AcceleratorChip>) {
    let Some(accel) = node.accelerator.as_mut() else {
        return;
    };
    accel.utilization_percent = if chips.is_empty() {
        None
    } else {
        Some(chips.iter().map(|c| c.utilization_percent).sum::<f64>() / chips.len() as f64)
    };
    accel.chips = chips;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeAccelerators;

    const EXPOSITION: &str = r#"
# HELP accelerator_duty_cycle Percent of time the chip was busy
# TYPE accelerator_duty_cycle gauge
accelerator_duty_cycle{chip="0",model="v5e"} 80
accelerator_duty_cycle{chip="1",model="v5e"} 40 1704067200000
accelerator_memory_used{chip="0"} 1.6e+10
accelerator_memory_total{chip="0"} 17179869184
accelerator_temperature{chip="0"} 61.5
accelerator_healthy{chip="1"} 0
accelerator_link_rx_bytes{chip="1"} 2048
process_start_time_seconds 1.7e9
"#;

    fn accel_node(name: &str, capacity: u64) -> NodeRecord {
        NodeRecord {
            name: name.to_string(),
            accelerator: Some(NodeAccelerators {
                capacity,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn chips(n: usize) -> Vec<AcceleratorChip> {
        (0..n)
            .map(|i| AcceleratorChip {
                id: i.to_string(),
                utilization_percent: 50.0,
                healthy: true,
                ..Default::default()
            })
            .collect()
    }

    fn chip_counts(nodes: &[NodeRecord]) -> Vec<usize> {
        nodes
            .iter()
            .map(|n| n.accelerator.as_ref().map(|a| a.chips.len()).unwrap_or(0))
            .collect()
    }

    #[test]
    fn test_parse_exposition() {
        let chips = parse_exposition(EXPOSITION).unwrap();
        assert_eq!(chips.len(), 2);

        assert_eq!(chips[0].id, "0");
        assert_eq!(chips[0].utilization_percent, 80.0);
        assert_eq!(chips[0].memory_used_bytes, 16_000_000_000);
        assert_eq!(chips[0].memory_total_bytes, 17_179_869_184);
        assert_eq!(chips[0].temperature_celsius, Some(61.5));
        assert!(chips[0].healthy);

        assert_eq!(chips[1].utilization_percent, 40.0);
        assert!(!chips[1].healthy);
        assert_eq!(chips[1].link_rx_bytes, 2048);
    }

    #[test]
    fn test_parse_exposition_label_variants() {
        let body = r#"
# HELP accelerator_power Board power draw
# TYPE accelerator_power gauge
accelerator_power{accelerator_id="tpu-3",pod="ns/train job",slice="v5e 2x2"} 170.25
# TYPE accelerator_link_tx_bytes counter
accelerator_link_tx_bytes{accelerator_id="tpu-3",path="/dev/accel3"} 4096 1704067200000
accelerator_duty_cycle{device="gpu0"} 12
accelerator_duty_cycle{host="no-chip-label"} 99
"#;
        let chips = parse_exposition(body).unwrap();
        assert_eq!(chips.len(), 2);

        assert_eq!(chips[0].id, "tpu-3");
        assert_eq!(chips[0].power_watts, Some(170.25));
        assert_eq!(chips[0].link_tx_bytes, 4096);

        assert_eq!(chips[1].id, "gpu0");
        assert_eq!(chips[1].utilization_percent, 12.0);
    }

    #[test]
    fn test_parse_exposition_empty_body() {
        assert!(parse_exposition("").unwrap().is_empty());
        assert!(parse_exposition("# just a comment\n").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_slow_exporter_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // accept and never answer
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let timeout = Duration::from_millis(200);
        let http = reqwest::Client::builder().timeout(timeout).build().unwrap();
        let exporter = AcceleratorExporter {
            transport: Transport::Http(http, format!("http://{}/metrics", addr)),
            resource_name: "google.com/tpu".to_string(),
            timeout,
            backoff: Backoff::new(DEFAULT_COOLDOWN),
        };

        match exporter.scrape().await {
            Err(MetricsError::Timeout(d)) => assert_eq!(d, timeout),
            other => panic!("expected a timeout, got {:?}", other.map(|c| c.len())),
        }
        // the failure starts the cool-down
        assert!(exporter.backoff.remaining().is_some());
    }

    #[test]
    fn test_single_node_gets_everything() {
        let mut nodes = vec![NodeRecord::default(), accel_node("a", 4)];
        distribute_chips(&mut nodes, chips(8));
        assert_eq!(chip_counts(&nodes), vec![0, 8]);
        let accel = nodes[1].accelerator.as_ref().unwrap();
        assert_eq!(accel.utilization_percent, Some(50.0));
    }

    #[test]
    fn test_small_scrape_goes_to_first_node() {
        let mut nodes = vec![accel_node("a", 4), accel_node("b", 4)];
        distribute_chips(&mut nodes, chips(4));
        assert_eq!(chip_counts(&nodes), vec![4, 0]);
    }

    #[test]
    fn test_large_scrape_fills_in_order() {
        let mut nodes = vec![accel_node("a", 4), accel_node("b", 2), accel_node("c", 4)];
        distribute_chips(&mut nodes, chips(7));
        assert_eq!(chip_counts(&nodes), vec![4, 2, 1]);
        assert_eq!(nodes[1].accelerator.as_ref().unwrap().chips[0].id, "4");
    }

    #[test]
    fn test_remainder_is_dropped() {
        let mut nodes = vec![accel_node("a", 2), accel_node("b", 2)];
        distribute_chips(&mut nodes, chips(5));
        assert_eq!(chip_counts(&nodes), vec![2, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_cooldown() {
        let backoff = Backoff::new(Duration::from_secs(60));
        assert!(backoff.remaining().is_none());

        backoff.failed();
        assert!(backoff.remaining().is_some());

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(backoff.remaining().is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(backoff.remaining().is_none());

        backoff.failed();
        backoff.succeeded();
        assert!(backoff.remaining().is_none());
    }
}
