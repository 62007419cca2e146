// src/lib.rs
pub mod admin;
pub mod config;
pub mod dispatch;
pub mod events;
pub mod metrics;
pub mod monitor;
pub mod pool;
pub mod selector;
pub mod topology;
pub mod transport;

mod error;

pub use config::TopologyConfig;
pub use dispatch::OperationResult;
pub use error::TopologyError;
pub use events::TopologyEvent;
pub use topology::{ProxyEndpoint, ProxyStatus, Topology, TopologyPhase};
pub use transport::{Command, CommandReply, Connector, ProbeReply, ProxyChannel, TcpConnector};
