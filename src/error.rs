// src/error.rs
use crate::selector::SelectionError;
use crate::topology::ProxyEndpoint;
use std::time::Duration;

/// Failures surfaced to callers of the topology.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    #[error("No server available: no proxy is currently up")]
    NoServerAvailable,

    #[error("All proxies unavailable after {attempts} attempts")]
    AllProxiesUnavailable { attempts: u32 },

    #[error("Topology is closed")]
    Closed,

    #[error("No proxy came up within {timeout:?}")]
    ConnectTimeout { timeout: Duration },

    #[error("Command failed on {proxy}: {message}")]
    CommandFailed {
        proxy: ProxyEndpoint,
        message: String,
    },
}

impl From<SelectionError> for TopologyError {
    fn from(err: SelectionError) -> Self {
        match err {
            SelectionError::NoEligibleServers => TopologyError::NoServerAvailable,
        }
    }
}

impl TopologyError {
    /// Short label for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            TopologyError::NoServerAvailable => "no_server_available",
            TopologyError::AllProxiesUnavailable { .. } => "all_proxies_unavailable",
            TopologyError::Closed => "closed",
            TopologyError::ConnectTimeout { .. } => "connect_timeout",
            TopologyError::CommandFailed { .. } => "command_failed",
        }
    }
}
