//! Kubernetes console CLI
//!
//! A command-line view of cluster health: nodes, pods, alerts and events
//! from one aggregated snapshot, plus pod logs and a live watch mode.

mod commands;
mod config;
mod output;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use console_lib::{AlertSeverity, ClusterSnapshot, Console};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{cluster, logs, watch};
use output::OutputFormat;

/// Kubernetes cluster console
#[derive(Parser)]
#[command(name = "kcon")]
#[command(author, version, about = "Terminal console for Kubernetes cluster health", long_about = None)]
pub struct Cli {
    /// Namespace filter (all namespaces if not specified)
    #[arg(long, short, global = true, env = "KCON_NAMESPACE")]
    pub namespace: Option<String>,

    /// Path to kubeconfig file (uses default if not specified)
    #[arg(long, global = true, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use
    #[arg(long, global = true)]
    pub context: Option<String>,

    /// Settings file (YAML, TOML or JSON)
    #[arg(long, global = true, env = "KCON_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub format: OutputFormat,

    /// Skip TLS verification for direct exporter scrapes
    #[arg(long, global = true)]
    pub insecure_skip_tls_verify: bool,

    /// Accelerator metrics exporter URL
    #[arg(long, global = true)]
    pub accelerator_endpoint: Option<String>,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Cluster-wide health summary
    Summary,

    /// List nodes with usage
    Nodes,

    /// List pods
    Pods {
        /// Only pods that are not running cleanly
        #[arg(long)]
        problems: bool,
    },

    /// List active alerts
    Alerts {
        /// Minimum severity to show
        #[arg(long, default_value = "info")]
        severity: Severity,
    },

    /// List recent events
    Events {
        /// Hide Normal events
        #[arg(long)]
        warnings: bool,
    },

    /// Print a pod's logs
    Logs {
        /// Pod namespace
        namespace: String,

        /// Pod name
        pod: String,

        /// Container name (the pod's only container if omitted)
        #[arg(long, short)]
        container: Option<String>,

        /// Number of trailing lines
        #[arg(long)]
        tail: Option<i64>,
    },

    /// Redraw the summary until interrupted
    Watch {
        /// Redraw period in seconds
        #[arg(long, default_value_t = 5)]
        interval: u64,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl From<Severity> for AlertSeverity {
    fn from(s: Severity) -> Self {
        match s {
            Severity::Info => AlertSeverity::Info,
            Severity::Warning => AlertSeverity::Warning,
            Severity::Critical => AlertSeverity::Critical,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::registry()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }

    let overrides = config::Overrides {
        namespace: cli.namespace.clone(),
        kubeconfig: cli.kubeconfig.clone(),
        context: cli.context.clone(),
        insecure_skip_tls_verify: cli.insecure_skip_tls_verify,
        accelerator_endpoint: cli.accelerator_endpoint.clone(),
    };
    let settings = config::load_settings(cli.config.as_deref(), &overrides)?;
    let rules = settings.alert_rules();

    let console = Console::connect(&settings)
        .await
        .context("Failed to connect to cluster")?;

    // Execute command
    match cli.command {
        Commands::Logs {
            namespace,
            pod,
            container,
            tail,
        } => {
            logs::show_logs(&console, &namespace, &pod, container.as_deref(), tail, cli.format)
                .await?;
        }
        Commands::Watch { interval } => {
            watch::watch(&console, &rules, Duration::from_secs(interval.max(1)), cli.format)
                .await?;
        }
        Commands::Summary => {
            cluster::show_summary(&*snapshot(&console).await?, &rules, cli.format)?;
        }
        Commands::Nodes => {
            cluster::show_nodes(&*snapshot(&console).await?, &rules, cli.format)?;
        }
        Commands::Pods { problems } => {
            cluster::show_pods(&*snapshot(&console).await?, problems, cli.format)?;
        }
        Commands::Alerts { severity } => {
            cluster::show_alerts(&*snapshot(&console).await?, severity.into(), cli.format)?;
        }
        Commands::Events { warnings } => {
            cluster::show_events(&*snapshot(&console).await?, warnings, cli.format)?;
        }
    }

    Ok(())
}

/// One-shot aggregation; nothing is cached between invocations
async fn snapshot(console: &Console) -> Result<Arc<ClusterSnapshot>> {
    let (snapshot, _) = console.cluster_data().await?;
    Ok(snapshot)
}
