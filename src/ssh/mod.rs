//! Tunnel lifecycle: endpoint types, the system-ssh tunnel, the transport
//! seam, and the supervisor that owns the single live tunnel.

mod supervisor;
mod transport;
mod tunnel;
mod types;

pub use supervisor::{HealthEvent, TunnelSupervisor};
pub use transport::{SshTransport, TunnelLink, TunnelTransport};
pub use tunnel::SshTunnel;
pub use types::{SshAuth, TunnelSpec};
