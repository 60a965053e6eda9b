//! Runtime settings, read once at startup.
//!
//! Settings come from an optional JSON file; every field has a default so a
//! partial file (or none at all) still yields a working configuration. The
//! `BASTIONDB_CONFIG` environment variable names the file for the bundled
//! binary.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::backoff::RetryPolicy;

/// Which secret backend resolves the named bundles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SecretBackendConfig {
    /// Bundles assembled from `{PREFIX}_{BUNDLE}_{FIELD}` environment
    /// variables.
    Env { prefix: String },
    /// Bundles fetched as JSON maps from `{base_url}/{bundle}`.
    Http { base_url: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretSettings {
    pub backend: SecretBackendConfig,
    /// Bundle holding database host/port/username/password/database.
    pub database_bundle: String,
    /// Bundle holding bastion host/username/private key.
    pub bastion_bundle: String,
}

impl Default for SecretSettings {
    fn default() -> Self {
        Self {
            backend: SecretBackendConfig::Env {
                prefix: "BASTIONDB".to_string(),
            },
            database_bundle: "database".to_string(),
            bastion_bundle: "bastion".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelSettings {
    /// Address the forwarded port binds on.
    pub local_bind_host: String,
    /// Upper bound for establishing the ssh session and forward.
    pub connect_timeout_ms: u64,
    /// Upper bound for a single liveness probe.
    pub probe_timeout_ms: u64,
    /// Interval between background health checks.
    pub health_interval_ms: u64,
    /// Retry budget for one reconnection window.
    pub rebuild: RetryPolicy,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            local_bind_host: "127.0.0.1".to_string(),
            connect_timeout_ms: 10_000,
            probe_timeout_ms: 5_000,
            health_interval_ms: 30_000,
            rebuild: RetryPolicy::default(),
        }
    }
}

impl TunnelSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Connection URL template. `{host}` and `{port}` are rewritten to the
    /// tunnel's local endpoint; the rest come from the database bundle.
    pub url_template: String,
    pub pool_max_connections: u32,
    pub pool_min_connections: u32,
    pub acquire_timeout_ms: u64,
    /// Retry budget for one `acquire` call.
    pub retry: RetryPolicy,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url_template: "mysql://{username}:{password}@{host}:{port}/{database}".to_string(),
            pool_max_connections: 5,
            pool_min_connections: 0,
            acquire_timeout_ms: 5_000,
            retry: RetryPolicy::default(),
        }
    }
}

impl DatabaseSettings {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub secrets: SecretSettings,
    pub tunnel: TunnelSettings,
    pub database: DatabaseSettings,
}

impl Settings {
    /// Load settings from a JSON file, falling back to defaults if the file
    /// does not exist.
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = smol::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read settings file {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse settings file {}", path.display()))
    }

    /// Load from the file named by `BASTIONDB_CONFIG`, or defaults when the
    /// variable is unset.
    pub async fn from_env() -> Result<Self> {
        match std::env::var("BASTIONDB_CONFIG") {
            Ok(path) => Self::load(Path::new(&path)).await,
            Err(_) => Ok(Self::default()),
        }
    }
}
