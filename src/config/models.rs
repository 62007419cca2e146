// src/config/models.rs
use crate::topology::ProxyEndpoint;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    pub seeds: Vec<ProxyEndpoint>,

    /// Bounds each connect attempt, each heartbeat probe, the wait for a
    /// free pool slot and initial discovery.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    #[serde(default = "default_socket_timeout_ms")]
    pub socket_timeout_ms: u64,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Width of the latency window above the fastest proxy.
    #[serde(default = "default_local_threshold_ms")]
    pub local_threshold_ms: u64,

    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Defaults to the number of seeds.
    #[serde(default)]
    pub max_dispatch_attempts: Option<u32>,

    #[serde(default)]
    pub selection: SelectionStrategy,

    #[serde(default)]
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    #[default]
    RoundRobin,
    Nearest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_admin_listen")]
    pub listen: SocketAddr,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_admin_listen(),
        }
    }
}

fn default_connection_timeout_ms() -> u64 {
    10_000
}

fn default_socket_timeout_ms() -> u64 {
    10_000
}

fn default_heartbeat_interval_ms() -> u64 {
    10_000
}

fn default_local_threshold_ms() -> u64 {
    15
}

fn default_pool_size() -> usize {
    5
}

fn default_failure_threshold() -> u32 {
    1
}

fn default_admin_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9100))
}

impl TopologyConfig {
    pub fn new(seeds: Vec<ProxyEndpoint>) -> Self {
        Self {
            seeds,
            connection_timeout_ms: default_connection_timeout_ms(),
            socket_timeout_ms: default_socket_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            local_threshold_ms: default_local_threshold_ms(),
            pool_size: default_pool_size(),
            failure_threshold: default_failure_threshold(),
            max_dispatch_attempts: None,
            selection: SelectionStrategy::default(),
            admin: AdminConfig::default(),
        }
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn local_threshold(&self) -> Duration {
        Duration::from_millis(self.local_threshold_ms)
    }

    pub fn dispatch_attempts(&self) -> u32 {
        let distinct = self.seeds.iter().collect::<HashSet<_>>().len() as u32;
        self.max_dispatch_attempts.unwrap_or(distinct).max(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.seeds.is_empty() {
            bail!("at least one seed proxy is required");
        }
        if self.connection_timeout_ms == 0 {
            bail!("connection_timeout_ms must be greater than zero");
        }
        if self.socket_timeout_ms == 0 {
            bail!("socket_timeout_ms must be greater than zero");
        }
        if self.heartbeat_interval_ms == 0 {
            bail!("heartbeat_interval_ms must be greater than zero");
        }
        if self.pool_size == 0 {
            bail!("pool_size must be greater than zero");
        }
        if self.failure_threshold == 0 {
            bail!("failure_threshold must be greater than zero");
        }
        if self.max_dispatch_attempts == Some(0) {
            bail!("max_dispatch_attempts must be greater than zero");
        }
        Ok(())
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_local_threshold(mut self, window: Duration) -> Self {
        self.local_threshold_ms = window.as_millis() as u64;
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_selection(mut self, selection: SelectionStrategy) -> Self {
        self.selection = selection;
        self
    }
}
