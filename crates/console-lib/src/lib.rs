//! Core library for the Kubernetes monitoring console
//!
//! This crate provides:
//! - Snapshot aggregation over the API server, kubelet and accelerator metrics
//! - Cluster summaries and threshold alerts
//! - A TTL cache kept warm by a background refresher
//! - Health checks and observability

pub mod aggregator;
pub mod anomaly;
pub mod cache;
pub mod console;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod refresher;
pub mod settings;
pub mod sources;

#[cfg(test)]
mod test_support;

pub use aggregator::{Aggregator, AggregatorBuilder, AggregatorConfig};
pub use anomaly::{Alert, AlertRules, AlertSeverity};
pub use cache::TtlCache;
pub use console::{Console, ConsoleBuilder};
pub use error::{ClusterError, MetricsError, RefreshError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ConsoleMetrics, StructuredLogger};
pub use refresher::{Refresher, RefresherConfig, RefresherStatus};
pub use settings::Settings;
pub use sources::Sources;
