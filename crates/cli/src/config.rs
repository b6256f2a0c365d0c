//! Configuration management for the CLI

use std::path::{Path, PathBuf};

use anyhow::Result;
use console_lib::Settings;

/// Flag values layered over the settings file and environment
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub namespace: Option<String>,
    pub kubeconfig: Option<PathBuf>,
    pub context: Option<String>,
    pub insecure_skip_tls_verify: bool,
    pub accelerator_endpoint: Option<String>,
}

/// Resolve settings: explicit `--config`, otherwise the per-user file when
/// present, then `KCON_*` variables, then flags
pub fn load_settings(config: Option<&Path>, overrides: &Overrides) -> Result<Settings> {
    let default_path = default_config_path().filter(|p| p.exists());
    let path = config.map(Path::to_path_buf).or(default_path);

    let mut settings = Settings::load(path.as_deref())?;
    apply_overrides(&mut settings, overrides);
    settings.validate()?;
    Ok(settings)
}

pub fn apply_overrides(settings: &mut Settings, overrides: &Overrides) {
    if let Some(namespace) = &overrides.namespace {
        settings.namespace = namespace.clone();
    }
    if let Some(kubeconfig) = &overrides.kubeconfig {
        settings.kubeconfig = Some(kubeconfig.clone());
    }
    if let Some(context) = &overrides.context {
        settings.context = Some(context.clone());
    }
    if overrides.insecure_skip_tls_verify {
        settings.insecure_skip_tls_verify = true;
    }
    if let Some(endpoint) = &overrides.accelerator_endpoint {
        settings.accelerator.endpoint = Some(endpoint.clone());
    }
}

/// `~/.config/kcon/config.yaml` or the platform equivalent
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|dir| dir.join("kcon").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_overrides_win() {
        let mut settings = Settings::default();
        apply_overrides(
            &mut settings,
            &Overrides {
                namespace: Some("payments".to_string()),
                context: Some("staging".to_string()),
                insecure_skip_tls_verify: true,
                accelerator_endpoint: Some("http://localhost:2112/metrics".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(settings.namespace, "payments");
        assert_eq!(settings.context.as_deref(), Some("staging"));
        assert!(settings.insecure_skip_tls_verify);
        assert!(settings.accelerator.is_enabled());
    }

    #[test]
    fn test_empty_overrides_keep_settings() {
        let mut settings = Settings {
            namespace: "ops".to_string(),
            ..Default::default()
        };
        apply_overrides(&mut settings, &Overrides::default());
        assert_eq!(settings.namespace, "ops");
        assert!(settings.kubeconfig.is_none());
    }

    #[test]
    fn test_load_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "namespace = \"batch\"\ncache_ttl_secs = 120").unwrap();

        let settings = load_settings(Some(file.path()), &Overrides::default()).unwrap();
        assert_eq!(settings.namespace, "batch");
        assert_eq!(settings.cache_ttl_secs, 120);
    }
}
