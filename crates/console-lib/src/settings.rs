//! Console settings
//!
//! Loaded from an optional file (format by extension) and then `KCON_*`
//! environment variables, nested keys separated by `__`:
//!
//! ```text
//! KCON_NAMESPACE=payments
//! KCON_REFRESH_INTERVAL_SECS=5
//! KCON_ACCELERATOR__ENDPOINT=http://localhost:2112/metrics
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::aggregator::AggregatorConfig;
use crate::anomaly::AlertRules;
use crate::refresher::RefresherConfig;
use crate::sources::{ClusterConnection, ConvertOptions, ExporterTarget};

pub const ENV_PREFIX: &str = "KCON";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Kubeconfig path; in-cluster config or `~/.kube/config` otherwise
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,

    #[serde(default)]
    pub context: Option<String>,

    /// Namespace filter, empty for all namespaces
    #[serde(default)]
    pub namespace: String,

    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Per-call timeout for API server and kubelet requests
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    #[serde(default)]
    pub insecure_skip_tls_verify: bool,

    /// Read node usage from the kubelet summary API
    #[serde(default = "default_true")]
    pub node_metrics: bool,

    /// Look for gang-scheduler resources at startup
    #[serde(default = "default_true")]
    pub scheduler: bool,

    #[serde(default)]
    pub accelerator: AcceleratorSettings,

    #[serde(default)]
    pub events: EventSettings,

    #[serde(default)]
    pub alerts: AlertSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceleratorSettings {
    #[serde(default)]
    pub enabled: bool,

    /// Direct exporter URL; implies `enabled`
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_accelerator_resource")]
    pub resource_name: String,

    #[serde(default = "default_topology_label")]
    pub topology_label: String,

    #[serde(default = "default_exporter_namespace")]
    pub service_namespace: String,

    #[serde(default = "default_exporter_service")]
    pub service_name: String,

    #[serde(default = "default_exporter_port")]
    pub service_port: u16,

    #[serde(default = "default_exporter_path")]
    pub path: String,

    #[serde(default = "default_exporter_timeout")]
    pub timeout_secs: u64,

    /// Wait after a failed scrape before trying again
    #[serde(default = "default_exporter_cooldown")]
    pub cooldown_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSettings {
    #[serde(default = "default_event_limit")]
    pub limit: usize,

    /// Kept event types; empty keeps all
    #[serde(default)]
    pub types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertSettings {
    #[serde(default = "default_warning_percent")]
    pub cpu_warning_percent: f64,
    #[serde(default = "default_critical_percent")]
    pub cpu_critical_percent: f64,
    #[serde(default = "default_warning_percent")]
    pub memory_warning_percent: f64,
    #[serde(default = "default_critical_percent")]
    pub memory_critical_percent: f64,
    #[serde(default = "default_restart_threshold")]
    pub restart_threshold: u32,
    #[serde(default = "default_pending_minutes")]
    pub pending_minutes: i64,
}

fn default_refresh_interval() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    10
}

fn default_cache_ttl() -> u64 {
    60
}

fn default_max_concurrent_fetches() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_accelerator_resource() -> String {
    ConvertOptions::default().accelerator_resource
}

fn default_topology_label() -> String {
    ConvertOptions::default().topology_label
}

fn default_exporter_namespace() -> String {
    "kube-system".to_string()
}

fn default_exporter_service() -> String {
    "tpu-metrics-exporter".to_string()
}

fn default_exporter_port() -> u16 {
    2112
}

fn default_exporter_path() -> String {
    "/metrics".to_string()
}

fn default_exporter_timeout() -> u64 {
    3
}

fn default_exporter_cooldown() -> u64 {
    60
}

fn default_event_limit() -> usize {
    200
}

fn default_warning_percent() -> f64 {
    80.0
}

fn default_critical_percent() -> f64 {
    90.0
}

fn default_restart_threshold() -> u32 {
    5
}

fn default_pending_minutes() -> i64 {
    5
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            context: None,
            namespace: String::new(),
            refresh_interval_secs: default_refresh_interval(),
            request_timeout_secs: default_request_timeout(),
            cache_ttl_secs: default_cache_ttl(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            insecure_skip_tls_verify: false,
            node_metrics: true,
            scheduler: true,
            accelerator: AcceleratorSettings::default(),
            events: EventSettings::default(),
            alerts: AlertSettings::default(),
        }
    }
}

impl Default for AcceleratorSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            resource_name: default_accelerator_resource(),
            topology_label: default_topology_label(),
            service_namespace: default_exporter_namespace(),
            service_name: default_exporter_service(),
            service_port: default_exporter_port(),
            path: default_exporter_path(),
            timeout_secs: default_exporter_timeout(),
            cooldown_secs: default_exporter_cooldown(),
        }
    }
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            limit: default_event_limit(),
            types: Vec::new(),
        }
    }
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            cpu_warning_percent: default_warning_percent(),
            cpu_critical_percent: default_critical_percent(),
            memory_warning_percent: default_warning_percent(),
            memory_critical_percent: default_critical_percent(),
            restart_threshold: default_restart_threshold(),
            pending_minutes: default_pending_minutes(),
        }
    }
}

impl AcceleratorSettings {
    pub fn is_enabled(&self) -> bool {
        self.enabled || self.endpoint.is_some()
    }

    /// Direct scrape when an endpoint is set, the service proxy otherwise
    pub fn target(&self, skip_tls_verify: bool) -> ExporterTarget {
        match &self.endpoint {
            Some(url) => ExporterTarget::Direct {
                url: url.clone(),
                skip_tls_verify,
            },
            None => ExporterTarget::ServiceProxy {
                namespace: self.service_namespace.clone(),
                service: self.service_name.clone(),
                port: self.service_port,
                path: self.path.clone(),
            },
        }
    }
}

impl Settings {
    /// Load from an optional file, then `KCON_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("events.types"),
        );

        let settings: Settings = builder
            .build()
            .context("Failed to read settings")?
            .try_deserialize()
            .context("Invalid settings")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.refresh_interval_secs == 0 {
            anyhow::bail!("refresh_interval_secs must be positive");
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be positive");
        }
        if self.cache_ttl_secs == 0 {
            anyhow::bail!("cache_ttl_secs must be positive");
        }
        if self.max_concurrent_fetches == 0 {
            anyhow::bail!("max_concurrent_fetches must be at least 1");
        }
        let a = &self.alerts;
        if a.cpu_warning_percent > a.cpu_critical_percent
            || a.memory_warning_percent > a.memory_critical_percent
        {
            anyhow::bail!("alert warning thresholds must not exceed critical thresholds");
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn connection(&self) -> ClusterConnection {
        ClusterConnection {
            kubeconfig: self.kubeconfig.clone(),
            context: self.context.clone(),
            insecure_skip_tls_verify: self.insecure_skip_tls_verify,
        }
    }

    pub fn convert_options(&self) -> ConvertOptions {
        ConvertOptions {
            accelerator_resource: self.accelerator.resource_name.clone(),
            topology_label: self.accelerator.topology_label.clone(),
        }
    }

    pub fn alert_rules(&self) -> AlertRules {
        let a = &self.alerts;
        AlertRules {
            cpu_warning_percent: a.cpu_warning_percent,
            cpu_critical_percent: a.cpu_critical_percent,
            memory_warning_percent: a.memory_warning_percent,
            memory_critical_percent: a.memory_critical_percent,
            restart_threshold: a.restart_threshold,
            pending_after: chrono::Duration::minutes(a.pending_minutes),
        }
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            request_timeout: self.request_timeout(),
            max_concurrent_fetches: self.max_concurrent_fetches,
            event_limit: self.events.limit,
            event_types: self.events.types.clone(),
            alert_rules: self.alert_rules(),
            ..Default::default()
        }
    }

    pub fn refresher_config(&self) -> RefresherConfig {
        RefresherConfig {
            interval: self.refresh_interval(),
            namespace: self.namespace.clone(),
        }
    }
}
