// src/selector/nearest.rs
use super::algorithm::{eligible_set, SelectionError, ServerSelector};
use crate::topology::{ProxyEndpoint, ProxySnapshot};
use std::time::Duration;

/// Always the fastest Up proxy (seed order breaks ties).
pub struct NearestSelector;

impl ServerSelector for NearestSelector {
    fn select(&self, snapshot: &[ProxySnapshot]) -> Result<ProxyEndpoint, SelectionError> {
        eligible_set(snapshot, Duration::ZERO)
            .first()
            .map(|proxy| proxy.endpoint().clone())
            .ok_or(SelectionError::NoEligibleServers)
    }

    fn name(&self) -> &'static str {
        "nearest"
    }
}
