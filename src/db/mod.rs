//! Database side of the tunnel: descriptor derivation and the acquisition
//! path built on top of it.

mod factory;
mod provider;

pub use factory::{ConnectionDescriptor, ConnectionFactory, PoolParams};
pub use provider::{
    AcquireStats, ConnectionOpener, ConnectionProvider, MySqlProvider, SqlxOpener,
};
