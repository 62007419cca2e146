// src/topology/state.rs
use super::{ProxyCapabilities, ProxyEndpoint, ProxyRecord, ProxyStatus};
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// One record as seen at selection time, plus its position in the seed list.
#[derive(Debug, Clone)]
pub struct ProxySnapshot {
    pub seed_order: usize,
    pub record: Arc<ProxyRecord>,
}

impl ProxySnapshot {
    pub fn endpoint(&self) -> &ProxyEndpoint {
        &self.record.endpoint
    }

    pub fn status(&self) -> ProxyStatus {
        self.record.status
    }

    pub fn rtt(&self) -> Option<Duration> {
        self.record.last_rtt
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTransition {
    pub previous: ProxyStatus,
    pub current: ProxyStatus,
}

impl StatusTransition {
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }

    pub fn became_up(&self) -> bool {
        self.changed() && self.current == ProxyStatus::Up
    }

    pub fn became_down(&self) -> bool {
        self.changed() && self.current == ProxyStatus::Down
    }
}

/// Registry of every seed proxy and its last known health.
///
/// Each record is swapped as a whole, so readers never observe a half
/// written record and concurrent writers to the same record cannot lose
/// each other's updates.
pub struct TopologyState {
    records: Vec<ArcSwap<ProxyRecord>>,
    index: HashMap<ProxyEndpoint, usize>,
    changes: watch::Sender<u64>,
}

impl TopologyState {
    pub fn new(seeds: &[ProxyEndpoint]) -> Self {
        let mut records = Vec::with_capacity(seeds.len());
        let mut index = HashMap::with_capacity(seeds.len());

        for endpoint in seeds {
            if index.contains_key(endpoint) {
                tracing::warn!(proxy = %endpoint, "Ignoring duplicate seed");
                continue;
            }
            index.insert(endpoint.clone(), records.len());
            records.push(ArcSwap::from_pointee(ProxyRecord::new(endpoint.clone())));
        }

        let (changes, _) = watch::channel(0);

        Self {
            records,
            index,
            changes,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Endpoints in seed order.
    pub fn endpoints(&self) -> Vec<ProxyEndpoint> {
        self.records
            .iter()
            .map(|slot| slot.load().endpoint.clone())
            .collect()
    }

    pub fn record(&self, endpoint: &ProxyEndpoint) -> Option<Arc<ProxyRecord>> {
        self.index
            .get(endpoint)
            .map(|&idx| self.records[idx].load_full())
    }

    pub fn snapshot(&self) -> Vec<ProxySnapshot> {
        self.records
            .iter()
            .enumerate()
            .map(|(seed_order, slot)| ProxySnapshot {
                seed_order,
                record: slot.load_full(),
            })
            .collect()
    }

    pub fn record_success(
        &self,
        endpoint: &ProxyEndpoint,
        rtt: Duration,
        capabilities: ProxyCapabilities,
    ) -> Option<StatusTransition> {
        self.update(endpoint, |record| record.succeeded(rtt, capabilities.clone()))
    }

    pub fn record_failure(
        &self,
        endpoint: &ProxyEndpoint,
        threshold: u32,
        error: &str,
    ) -> Option<StatusTransition> {
        self.update(endpoint, |record| record.failed(threshold, error))
    }

    /// Take a proxy out of selection until its monitor sees it answer again.
    pub fn mark_down(&self, endpoint: &ProxyEndpoint, reason: &str) -> Option<StatusTransition> {
        self.update(endpoint, |record| record.marked_down(reason))
    }

    pub fn up_count(&self) -> usize {
        self.records.iter().filter(|slot| slot.load().is_up()).count()
    }

    pub fn any_up(&self) -> bool {
        self.records.iter().any(|slot| slot.load().is_up())
    }

    pub fn all_reported(&self) -> bool {
        self.records.iter().all(|slot| slot.load().is_reported())
    }

    /// Ticks once per record update.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    fn update<F>(&self, endpoint: &ProxyEndpoint, mut f: F) -> Option<StatusTransition>
    where
        F: FnMut(&ProxyRecord) -> ProxyRecord,
    {
        let slot = &self.records[*self.index.get(endpoint)?];

        let mut current = ProxyStatus::Connecting;
        let previous = slot.rcu(|record| {
            let next = f(record);
            current = next.status;
            next
        });

        self.changes.send_modify(|version| *version = version.wrapping_add(1));

        Some(StatusTransition {
            previous: previous.status,
            current,
        })
    }
}
