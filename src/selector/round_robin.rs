// src/selector/round_robin.rs
use super::algorithm::{eligible_set, SelectionError, ServerSelector};
use crate::topology::{ProxyEndpoint, ProxySnapshot};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Cycles through the latency window instead of always hitting the
/// fastest proxy.
pub struct RoundRobinSelector {
    window: Duration,
    counter: AtomicUsize,
}

impl RoundRobinSelector {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            counter: AtomicUsize::new(0),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

impl ServerSelector for RoundRobinSelector {
    fn select(&self, snapshot: &[ProxySnapshot]) -> Result<ProxyEndpoint, SelectionError> {
        let eligible = eligible_set(snapshot, self.window);
        if eligible.is_empty() {
            return Err(SelectionError::NoEligibleServers);
        }

        let index = self.counter.fetch_add(1, Ordering::Relaxed) % eligible.len();
        Ok(eligible[index].endpoint().clone())
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}
