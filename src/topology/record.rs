// src/topology/record.rs
use super::ProxyEndpoint;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyStatus {
    Connecting,
    Up,
    Down,
}

/// Protocol limits a proxy advertised in its last successful probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyCapabilities {
    pub min_wire_version: i32,
    pub max_wire_version: i32,
    pub max_bson_object_size: u64,
    pub max_message_size_bytes: u64,
    pub max_write_batch_size: u64,
    pub local_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ProxyRecord {
    pub endpoint: ProxyEndpoint,
    pub status: ProxyStatus,
    pub last_rtt: Option<Duration>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub capabilities: Option<ProxyCapabilities>,
    pub last_error: Option<String>,
}

impl ProxyRecord {
    pub fn new(endpoint: ProxyEndpoint) -> Self {
        Self {
            endpoint,
            status: ProxyStatus::Connecting,
            last_rtt: None,
            last_seen_at: None,
            consecutive_failures: 0,
            capabilities: None,
            last_error: None,
        }
    }

    pub fn is_up(&self) -> bool {
        self.status == ProxyStatus::Up
    }

    /// Up or Down, as opposed to still waiting on the first probe.
    pub fn is_reported(&self) -> bool {
        self.status != ProxyStatus::Connecting
    }

    pub fn last_rtt_ms(&self) -> Option<f64> {
        self.last_rtt.map(|rtt| rtt.as_secs_f64() * 1000.0)
    }

    pub(crate) fn succeeded(&self, rtt: Duration, capabilities: ProxyCapabilities) -> Self {
        Self {
            endpoint: self.endpoint.clone(),
            status: ProxyStatus::Up,
            last_rtt: Some(rtt),
            last_seen_at: Some(Utc::now()),
            consecutive_failures: 0,
            capabilities: Some(capabilities),
            last_error: None,
        }
    }

    pub(crate) fn failed(&self, threshold: u32, error: &str) -> Self {
        let consecutive_failures = self.consecutive_failures.saturating_add(1);
        let status = if consecutive_failures >= threshold {
            ProxyStatus::Down
        } else {
            self.status
        };

        Self {
            status,
            consecutive_failures,
            last_error: Some(error.to_string()),
            ..self.clone()
        }
    }

    pub(crate) fn marked_down(&self, reason: &str) -> Self {
        Self {
            status: ProxyStatus::Down,
            last_error: Some(reason.to_string()),
            ..self.clone()
        }
    }
}
