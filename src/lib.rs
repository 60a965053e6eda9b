//! Tunnel-backed database connectivity.
//!
//! The database lives behind a bastion host, so every connection runs
//! through an ssh local forward. This crate owns that forward end to end:
//! it resolves secrets, builds and supervises a single tunnel process,
//! derives connection URLs pointed at the forwarded local port, and hands
//! out validated connections with bounded retries when the tunnel drops.
//!
//! ```no_run
//! use bastiondb::config::Settings;
//!
//! # fn main() -> anyhow::Result<()> {
//! smol::block_on(async {
//!     let settings = Settings::from_env().await?;
//!     let provider = bastiondb::wire(settings);
//!     provider.supervisor().start_health_loop();
//!
//!     let pool = provider.acquire().await?;
//!     sqlx::query("SELECT 1").fetch_one(&pool).await?;
//!
//!     provider.shutdown().await;
//!     Ok(())
//! })
//! # }
//! ```

use std::sync::Arc;

pub mod backoff;
pub mod config;
pub mod db;
pub mod error;
pub mod secrets;
pub mod ssh;
mod util;

#[cfg(test)]
pub(crate) mod testutil;

pub use db::{AcquireStats, ConnectionProvider, MySqlProvider};
pub use error::{AcquireError, FactoryError, SecretError, TunnelError};
pub use ssh::{HealthEvent, TunnelSupervisor};

use config::{SecretBackendConfig, Settings};
use db::{ConnectionFactory, SqlxOpener};
use secrets::{EnvSource, HttpSource, SecretSource};
use ssh::SshTransport;

/// Assemble the production stack from settings.
///
/// The provider is ready to use immediately; the first `acquire` builds the
/// tunnel. Call `start_health_loop` on the supervisor if background probing
/// is wanted.
pub fn wire(settings: Settings) -> Arc<MySqlProvider> {
    let secrets: Arc<dyn SecretSource> = match &settings.secrets.backend {
        SecretBackendConfig::Env { prefix } => Arc::new(EnvSource::new(prefix)),
        SecretBackendConfig::Http { base_url } => Arc::new(HttpSource::new(base_url)),
    };

    let factory = Arc::new(ConnectionFactory::new(
        Arc::clone(&secrets),
        settings.database.clone(),
        settings.secrets.database_bundle.clone(),
    ));

    let supervisor = Arc::new(TunnelSupervisor::new(
        Arc::new(SshTransport),
        secrets,
        Arc::clone(&factory),
        settings.tunnel.clone(),
        settings.secrets.clone(),
    ));

    Arc::new(ConnectionProvider::new(
        supervisor,
        factory,
        SqlxOpener,
        settings.database.retry.clone(),
    ))
}
