//! Process-wide owner of the single database tunnel.
//!
//! At most one live tunnel exists at any instant; every build or teardown
//! happens under one exclusive build lock, and a generation id ties derived
//! state (the cached connection descriptor) to the tunnel it came from.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use async_channel::{Receiver, Sender};
use async_lock::{Mutex, RwLock};
use smol::net::TcpStream;
use uuid::Uuid;

use super::transport::{TunnelLink, TunnelTransport};
use super::types::{SshAuth, TunnelSpec};
use crate::config::{SecretSettings, TunnelSettings};
use crate::db::ConnectionFactory;
use crate::error::TunnelError;
use crate::secrets::SecretSource;
use crate::util;

/// Result of one background health probe.
#[derive(Debug, Clone)]
pub struct HealthEvent {
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub generation: Uuid,
    pub error: Option<String>,
    pub timestamp: SystemTime,
}

struct ActiveTunnel {
    link: Box<dyn TunnelLink>,
    generation: Uuid,
    healthy: bool,
}

/// Clears the reconnection-in-progress flag even if a rebuild panics.
struct ClearOnDrop<'a>(&'a AtomicBool);

impl Drop for ClearOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct TunnelSupervisor {
    transport: Arc<dyn TunnelTransport>,
    secrets: Arc<dyn SecretSource>,
    factory: Arc<ConnectionFactory>,
    settings: TunnelSettings,
    bundles: SecretSettings,

    slot: RwLock<Option<ActiveTunnel>>,
    build_lock: Mutex<()>,
    reconnecting: AtomicBool,
    health_running: AtomicBool,
    consecutive_failures: AtomicU32,
    build_attempts: AtomicU64,
    rebuilds: AtomicU64,

    health_tx: Sender<HealthEvent>,
    health_rx: Receiver<HealthEvent>,
}

impl TunnelSupervisor {
    pub fn new(
        transport: Arc<dyn TunnelTransport>,
        secrets: Arc<dyn SecretSource>,
        factory: Arc<ConnectionFactory>,
        settings: TunnelSettings,
        bundles: SecretSettings,
    ) -> Self {
        let (health_tx, health_rx) = async_channel::bounded(256);
        Self {
            transport,
            secrets,
            factory,
            settings,
            bundles,
            slot: RwLock::new(None),
            build_lock: Mutex::new(()),
            reconnecting: AtomicBool::new(false),
            health_running: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            build_attempts: AtomicU64::new(0),
            rebuilds: AtomicU64::new(0),
            health_tx,
            health_rx,
        }
    }

    /// Make sure a live tunnel exists, building one if necessary.
    ///
    /// Fast path is a single read of the liveness flag. The slow path takes
    /// the build lock and re-checks before building, so callers racing on a
    /// cold start produce exactly one build between them.
    pub async fn ensure_ready(&self) -> Result<(), TunnelError> {
        if self.is_ready().await {
            return Ok(());
        }

        let _build = self.build_lock.lock().await;
        if self.is_ready().await {
            return Ok(());
        }
        self.rebuild_locked().await
    }

    /// Tear down the current tunnel and build a fresh one, retrying with
    /// backoff up to the configured budget.
    ///
    /// Single-flight: a second caller arriving while a reconnection is in
    /// progress waits for it to finish and reports its outcome instead of
    /// starting another rebuild.
    pub async fn reconnect(&self) -> Result<(), TunnelError> {
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            let guard = self.build_lock.lock().await;
            drop(guard);
            return if self.is_ready().await {
                Ok(())
            } else {
                Err(TunnelError::NotReady)
            };
        }
        let _clear = ClearOnDrop(&self.reconnecting);
        let _build = self.build_lock.lock().await;

        let mut backoff = crate::backoff::ExponentialBackoff::new(self.settings.rebuild.clone());
        loop {
            match self.rebuild_locked().await {
                Ok(()) => {
                    self.rebuilds.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => match backoff.next_delay() {
                    Some(delay) => {
                        tracing::warn!(
                            "rebuild attempt {} failed, retrying in {:?}: {}",
                            backoff.attempt(),
                            delay,
                            e
                        );
                        smol::Timer::after(delay).await;
                    }
                    None => {
                        tracing::error!("rebuild gave up after {} attempts: {}", backoff.attempt(), e);
                        return Err(TunnelError::Exhausted {
                            attempts: backoff.attempt(),
                            last: Box::new(e),
                        });
                    }
                },
            }
        }
    }

    /// Launch the background health loop. No-op if already running.
    pub fn start_health_loop(self: &Arc<Self>) {
        if self.health_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let sup = Arc::clone(self);
        smol::spawn(async move {
            let interval = sup.settings.health_interval();
            loop {
                smol::Timer::after(interval).await;
                if !sup.health_running.load(Ordering::SeqCst) {
                    break;
                }
                if sup.reconnecting.load(Ordering::SeqCst) {
                    tracing::debug!("health tick skipped, reconnection in progress");
                    continue;
                }
                sup.health_tick().await;
            }
            tracing::debug!("health loop stopped");
        })
        .detach();
    }

    /// Stop the health loop and tear down the tunnel. Idempotent.
    pub async fn shutdown(&self) {
        self.health_running.store(false, Ordering::SeqCst);

        let _build = self.build_lock.lock().await;
        if let Some(mut active) = self.slot.write().await.take() {
            active.link.close().await;
            tracing::info!(generation = %active.generation, "tunnel supervisor shut down");
        }
        self.factory.invalidate().await;
    }

    /// Generation and local endpoint of the active tunnel, if any.
    pub async fn current(&self) -> Option<(Uuid, String)> {
        self.slot
            .read()
            .await
            .as_ref()
            .map(|active| (active.generation, active.link.local_addr()))
    }

    /// Health probe results, one event per background tick.
    pub fn subscribe_health(&self) -> Receiver<HealthEvent> {
        self.health_rx.clone()
    }

    /// Total tunnel build attempts, successful or not.
    pub fn build_attempts(&self) -> u64 {
        self.build_attempts.load(Ordering::Relaxed)
    }

    /// Completed reconnection cycles.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds.load(Ordering::Relaxed)
    }

    async fn is_ready(&self) -> bool {
        self.slot
            .read()
            .await
            .as_ref()
            .is_some_and(|active| active.healthy)
    }

    /// Full teardown-and-build cycle. Caller must hold `build_lock`.
    async fn rebuild_locked(&self) -> Result<(), TunnelError> {
        self.factory.invalidate().await;
        if let Some(mut stale) = self.slot.write().await.take() {
            tracing::debug!(generation = %stale.generation, "tearing down stale tunnel");
            stale.link.close().await;
        }

        self.build_attempts.fetch_add(1, Ordering::Relaxed);

        let spec = self.tunnel_spec().await?;
        let connect_timeout = self.settings.connect_timeout();
        // Outer bound in case a transport does not enforce its own.
        let limit = connect_timeout + Duration::from_secs(2);
        let mut link = util::timeout(limit, self.transport.open(spec, connect_timeout))
            .await
            .ok_or(TunnelError::Timeout(limit))??;

        // Round-trip through the forwarded port before declaring readiness.
        let addr = link.local_addr();
        if let Err(e) = probe_endpoint(&addr, link.local_port(), self.settings.probe_timeout()).await
        {
            link.close().await;
            return Err(e);
        }

        let generation = Uuid::new_v4();
        *self.slot.write().await = Some(ActiveTunnel {
            link,
            generation,
            healthy: true,
        });
        self.factory.invalidate().await;
        self.consecutive_failures.store(0, Ordering::SeqCst);

        tracing::info!(%generation, %addr, "tunnel ready");
        Ok(())
    }

    /// Assemble the tunnel spec from the bastion and database bundles.
    async fn tunnel_spec(&self) -> Result<TunnelSpec, TunnelError> {
        let bastion = self.secrets.get_bundle(&self.bundles.bastion_bundle).await?;
        let database = self
            .secrets
            .get_bundle(&self.bundles.database_bundle)
            .await?;

        let auth = match bastion.get("private_key").or_else(|| bastion.get("key")) {
            Some(pem) => SshAuth::KeyMaterial(pem.to_string()),
            None => {
                return Err(crate::error::SecretError::MissingField {
                    bundle: bastion.name().to_string(),
                    field: "private_key".to_string(),
                }
                .into());
            }
        };
        let bastion_port = match bastion.get("port") {
            Some(_) => bastion.require_port("port")?,
            None => 22,
        };

        Ok(TunnelSpec {
            bastion_host: bastion.require("host")?.to_string(),
            bastion_port,
            bastion_user: bastion.require("username")?.to_string(),
            auth,
            target_host: database.require("host")?.to_string(),
            target_port: database.require_port("port")?,
            local_bind_host: self.settings.local_bind_host.clone(),
        })
    }

    /// One probe of the active tunnel; reconnects on failure.
    async fn health_tick(&self) {
        let (generation, addr, port, process_alive) = {
            let mut slot = self.slot.write().await;
            match slot.as_mut() {
                // Nothing built yet; nothing to heal.
                None => return,
                Some(active) => (
                    active.generation,
                    active.link.local_addr(),
                    active.link.local_port(),
                    active.link.is_alive(),
                ),
            }
        };

        let result = if process_alive {
            probe_endpoint(&addr, port, self.settings.probe_timeout()).await
        } else {
            Err(TunnelError::Build("ssh session exited".to_string()))
        };
        let healthy = result.is_ok();

        if let Some(active) = self.slot.write().await.as_mut() {
            if active.generation == generation {
                active.healthy = healthy;
            }
        }

        let failures = if healthy {
            self.consecutive_failures.store(0, Ordering::SeqCst);
            0
        } else {
            self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1
        };

        let _ = self.health_tx.try_send(HealthEvent {
            healthy,
            consecutive_failures: failures,
            generation,
            error: result.as_ref().err().map(|e| e.to_string()),
            timestamp: SystemTime::now(),
        });

        if let Err(e) = result {
            tracing::warn!(failures, "tunnel probe failed: {}", e);
            if let Err(e) = self.reconnect().await {
                tracing::error!("background reconnect failed: {}", e);
            }
        }
    }
}

async fn probe_endpoint(addr: &str, port: u16, limit: Duration) -> Result<(), TunnelError> {
    match util::timeout(limit, TcpStream::connect(addr)).await {
        Some(Ok(_)) => Ok(()),
        Some(Err(e)) => Err(TunnelError::ForwardDead {
            port,
            message: e.to_string(),
        }),
        None => Err(TunnelError::Timeout(limit)),
    }
}
