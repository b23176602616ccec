//! Configuration for the `hamail` binary.

use std::path::{Path, PathBuf};

use hamail_common::ProviderRegistry;
use hamail_smtp::{SmtpConfig, SmtpProvider};
use hamail_transport::{PoolConfig, ProxyError, TransportProxy};
use serde::Deserialize;

pub const CONFIG_ENV: &str = "HAMAIL_CONFIG";

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
}

impl Config {
    /// # Errors
    /// If the file cannot be read or is not a valid configuration.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config from {}: {}", path.display(), e)
        })?;

        ron::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config in {}: {}", path.display(), e))
    }

    /// Every transport provider this binary knows about.
    #[must_use]
    pub fn registry(&self) -> ProviderRegistry {
        ProviderRegistry::new().with(std::sync::Arc::new(SmtpProvider::new(self.smtp.clone())))
    }

    /// # Errors
    /// If the pool configuration is invalid or names an unknown protocol.
    pub fn proxy(&self) -> Result<TransportProxy, ProxyError> {
        TransportProxy::new(self.pool.clone(), &self.registry())
    }
}

/// Find the configuration file using the following precedence:
/// 1. `HAMAIL_CONFIG` environment variable
/// 2. ./hamail.config.ron (current working directory)
/// 3. /etc/hamail/hamail.config.ron (system-wide config)
///
/// # Errors
/// If `HAMAIL_CONFIG` names a missing file, or no candidate exists.
pub fn find_config_file() -> anyhow::Result<PathBuf> {
    let default_paths = [
        PathBuf::from("./hamail.config.ron"),
        PathBuf::from("/etc/hamail/hamail.config.ron"),
    ];

    locate(std::env::var_os(CONFIG_ENV).map(PathBuf::from), &default_paths)
}

fn locate(env_path: Option<PathBuf>, default_paths: &[PathBuf]) -> anyhow::Result<PathBuf> {
    if let Some(path) = env_path {
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "{CONFIG_ENV} points to non-existent file: {}",
            path.display()
        );
    }

    if let Some(path) = default_paths.iter().find(|p| p.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}
