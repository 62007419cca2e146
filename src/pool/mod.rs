// src/pool/mod.rs
mod connection;
mod pool;

pub use connection::{Connection, ConnectionError, ConnectionState};
pub use pool::{ConnectionPool, PoolError, PoolSettings, PoolStats, PooledConnection};
