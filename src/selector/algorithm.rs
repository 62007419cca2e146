// src/selector/algorithm.rs
use crate::topology::{ProxyEndpoint, ProxySnapshot};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("No eligible servers: no proxy is currently up")]
    NoEligibleServers,
}

pub trait ServerSelector: Send + Sync {
    /// Pick one proxy from a fresh snapshot of the topology.
    fn select(&self, snapshot: &[ProxySnapshot]) -> Result<ProxyEndpoint, SelectionError>;

    fn name(&self) -> &'static str;
}

/// Up proxies whose latency is within `window` of the fastest Up proxy,
/// fastest first, ties kept in seed order.
pub fn eligible_set(snapshot: &[ProxySnapshot], window: Duration) -> Vec<ProxySnapshot> {
    let up: Vec<(Duration, &ProxySnapshot)> = snapshot
        .iter()
        .filter(|proxy| proxy.record.is_up())
        .filter_map(|proxy| proxy.rtt().map(|rtt| (rtt, proxy)))
        .collect();

    let Some(fastest) = up.iter().map(|(rtt, _)| *rtt).min() else {
        return Vec::new();
    };
    let ceiling = fastest.saturating_add(window);

    let mut eligible: Vec<(Duration, &ProxySnapshot)> =
        up.into_iter().filter(|(rtt, _)| *rtt <= ceiling).collect();
    eligible.sort_by_key(|(rtt, proxy)| (*rtt, proxy.seed_order));

    eligible.into_iter().map(|(_, proxy)| proxy.clone()).collect()
}
