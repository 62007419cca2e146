// src/topology/mod.rs
mod controller;
mod endpoint;
mod record;
mod state;

pub use controller::{Readiness, Topology, TopologyPhase};
pub use endpoint::{EndpointParseError, ProxyEndpoint};
pub use record::{ProxyCapabilities, ProxyRecord, ProxyStatus};
pub use state::{ProxySnapshot, StatusTransition, TopologyState};
