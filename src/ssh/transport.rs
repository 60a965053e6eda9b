//! Seams between the supervisor and the concrete tunnel implementation.
//!
//! The supervisor only ever talks to these traits; production wires in
//! [`SshTransport`], tests substitute an in-memory transport.

use std::time::Duration;

use async_trait::async_trait;

use super::tunnel::SshTunnel;
use super::types::TunnelSpec;
use crate::error::TunnelError;

/// One live tunnel session.
#[async_trait]
pub trait TunnelLink: Send + Sync {
    /// Local `host:port` endpoint the database must be dialed through.
    fn local_addr(&self) -> String;

    fn local_port(&self) -> u16;

    /// Cheap local liveness check of the underlying session.
    fn is_alive(&mut self) -> bool;

    /// Tear the session down and release all resources, key material
    /// included. Must be safe to call more than once.
    async fn close(&mut self);
}

/// Capability to open tunnel sessions.
#[async_trait]
pub trait TunnelTransport: Send + Sync {
    async fn open(
        &self,
        spec: TunnelSpec,
        connect_timeout: Duration,
    ) -> Result<Box<dyn TunnelLink>, TunnelError>;
}

#[async_trait]
impl TunnelLink for SshTunnel {
    fn local_addr(&self) -> String {
        SshTunnel::local_addr(self)
    }

    fn local_port(&self) -> u16 {
        SshTunnel::local_port(self)
    }

    fn is_alive(&mut self) -> bool {
        SshTunnel::is_alive(self)
    }

    async fn close(&mut self) {
        self.shutdown().await;
    }
}

/// Production transport: spawns the system ssh binary.
pub struct SshTransport;

#[async_trait]
impl TunnelTransport for SshTransport {
    async fn open(
        &self,
        spec: TunnelSpec,
        connect_timeout: Duration,
    ) -> Result<Box<dyn TunnelLink>, TunnelError> {
        let tunnel = SshTunnel::start(spec, connect_timeout).await?;
        Ok(Box::new(tunnel))
    }
}
