//! Monitor configuration

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use console_lib::Settings;

/// Command line of the headless monitor. Flags override the settings file
/// and `KCON_*` environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "kube-monitor", version, about = "Headless Kubernetes cluster monitor")]
pub struct MonitorConfig {
    /// Port for health, metrics and snapshot endpoints
    #[arg(long, env = "KCON_API_PORT", default_value_t = default_api_port())]
    pub api_port: u16,

    /// Settings file (YAML, TOML or JSON)
    #[arg(long, env = "KCON_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    #[arg(long)]
    pub context: Option<String>,

    /// Namespace filter, all namespaces when empty
    #[arg(short, long)]
    pub namespace: Option<String>,

    #[arg(long)]
    pub refresh_interval_secs: Option<u64>,

    #[arg(long)]
    pub insecure_skip_tls_verify: bool,
}

fn default_api_port() -> u16 {
    8080
}

impl MonitorConfig {
    /// Resolve the console settings: file, then environment, then flags
    pub fn settings(&self) -> Result<Settings> {
        let mut settings = Settings::load(self.config.as_deref())?;
        if let Some(kubeconfig) = &self.kubeconfig {
            settings.kubeconfig = Some(kubeconfig.clone());
        }
        if let Some(context) = &self.context {
            settings.context = Some(context.clone());
        }
        if let Some(namespace) = &self.namespace {
            settings.namespace = namespace.clone();
        }
        if let Some(secs) = self.refresh_interval_secs {
            settings.refresh_interval_secs = secs;
        }
        if self.insecure_skip_tls_verify {
            settings.insecure_skip_tls_verify = true;
        }
        settings.validate()?;
        Ok(settings)
    }
}
