// src/transport/mod.rs
//
// The seam between the topology and whatever actually speaks to a proxy.
mod message;
mod tcp;

pub use message::{Command, CommandReply, ProbeReply, Request, ROUTER_MSG};
pub use tcp::TcpConnector;

use crate::topology::ProxyEndpoint;
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed reply: {0}")]
    Malformed(String),

    #[error("Connection closed by peer")]
    Closed,
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Malformed(err.to_string())
    }
}

/// Opens transport handles to proxies.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &ProxyEndpoint) -> Result<Box<dyn ProxyChannel>, TransportError>;
}

/// One established transport handle. Requests are strictly sequential.
#[async_trait]
pub trait ProxyChannel: Send {
    async fn probe(&mut self) -> Result<ProbeReply, TransportError>;

    async fn command(&mut self, command: &Command) -> Result<CommandReply, TransportError>;
}
