//! Error taxonomy for tunnel and connection management.
//!
//! Retryability is a property of the error type, not something recovered by
//! matching message strings after the fact: transient network failures report
//! `is_retryable() == true`, while configuration, credential, and auth
//! problems never do and must surface immediately.

use std::time::Duration;

use thiserror::Error;

/// Errors resolving secret bundles.
///
/// Never retried: a missing or malformed bundle is a misconfiguration, not a
/// transient condition.
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secret bundle '{0}' not found")]
    BundleNotFound(String),

    #[error("secret bundle '{bundle}' is missing field '{field}'")]
    MissingField { bundle: String, field: String },

    #[error("secret bundle '{bundle}' is malformed: {message}")]
    Malformed { bundle: String, message: String },

    #[error("secret store request failed: {0}")]
    Store(String),
}

/// Errors establishing or maintaining the SSH tunnel.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error(transparent)]
    Secret(#[from] SecretError),

    /// The ssh client could not be started at all (binary missing, exec
    /// failure). Not retryable: nothing transient about a missing binary.
    #[error("failed to spawn ssh: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("bastion rejected authentication: {0}")]
    Auth(String),

    #[error("tunnel build failed: {0}")]
    Build(String),

    #[error("forwarded port {port} is not accepting connections: {message}")]
    ForwardDead { port: u16, message: String },

    #[error("tunnel operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("no tunnel is ready")]
    NotReady,

    /// The rebuild retry budget was spent. Terminal for the attempt window
    /// that observed it; a later `ensure_ready` starts over from scratch, so
    /// retryability delegates to the last underlying cause.
    #[error("gave up after {attempts} rebuild attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<TunnelError>,
    },
}

impl TunnelError {
    pub fn is_retryable(&self) -> bool {
        match self {
            TunnelError::Build(_)
            | TunnelError::ForwardDead { .. }
            | TunnelError::Timeout(_)
            | TunnelError::NotReady => true,
            TunnelError::Exhausted { last, .. } => last.is_retryable(),
            TunnelError::Secret(_) | TunnelError::Spawn(_) | TunnelError::Auth(_) => false,
        }
    }
}

/// Errors deriving the connection descriptor. Never retried.
#[derive(Debug, Error)]
pub enum FactoryError {
    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error("unresolved placeholder '{0}' in connection template")]
    Template(String),

    #[error("invalid tunnel endpoint '{0}'")]
    Endpoint(String),
}

/// Errors surfaced by `ConnectionProvider::acquire`.
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error(transparent)]
    Factory(#[from] FactoryError),

    /// Opening the database connection failed. Classified at construction
    /// time: network-class failures are retryable, credential and
    /// configuration failures are not.
    #[error("database connect failed: {message}")]
    Connect { message: String, retryable: bool },

    /// The connection opened but failed the liveness probe. Retryable, and a
    /// signal that the tunnel behind it needs a rebuild.
    #[error("connection failed validation probe: {0}")]
    Validation(String),

    #[error("all {attempts} acquire attempts failed: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<AcquireError>,
    },
}

impl AcquireError {
    pub fn is_retryable(&self) -> bool {
        match self {
            AcquireError::Tunnel(e) => e.is_retryable(),
            AcquireError::Factory(_) => false,
            AcquireError::Connect { retryable, .. } => *retryable,
            AcquireError::Validation(_) => true,
            AcquireError::Exhausted { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_errors_are_terminal() {
        let err = AcquireError::Factory(FactoryError::Secret(SecretError::MissingField {
            bundle: "database".into(),
            field: "password".into(),
        }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn auth_rejection_is_terminal() {
        let err = TunnelError::Auth("Permission denied (publickey)".into());
        assert!(!err.is_retryable());
        assert!(!AcquireError::Tunnel(err).is_retryable());
    }

    #[test]
    fn build_failures_are_retryable() {
        assert!(TunnelError::Build("connection refused".into()).is_retryable());
        assert!(TunnelError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(
            TunnelError::ForwardDead {
                port: 43210,
                message: "connection refused".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn exhausted_delegates_to_last_cause() {
        let transient = TunnelError::Exhausted {
            attempts: 3,
            last: Box::new(TunnelError::Build("refused".into())),
        };
        assert!(transient.is_retryable());

        let terminal = TunnelError::Exhausted {
            attempts: 3,
            last: Box::new(TunnelError::Auth("denied".into())),
        };
        assert!(!terminal.is_retryable());
    }

    #[test]
    fn validation_is_retryable_exhaustion_is_not() {
        assert!(AcquireError::Validation("probe failed".into()).is_retryable());
        let err = AcquireError::Exhausted {
            attempts: 3,
            last: Box::new(AcquireError::Validation("probe failed".into())),
        };
        assert!(!err.is_retryable());
    }
}
