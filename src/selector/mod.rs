// src/selector/mod.rs
mod algorithm;
mod nearest;
mod round_robin;

pub use algorithm::{eligible_set, SelectionError, ServerSelector};
pub use nearest::NearestSelector;
pub use round_robin::RoundRobinSelector;
pub use crate::config::SelectionStrategy;

use std::sync::Arc;
use std::time::Duration;

pub fn create_selector(strategy: SelectionStrategy, window: Duration) -> Arc<dyn ServerSelector> {
    match strategy {
        SelectionStrategy::RoundRobin => Arc::new(RoundRobinSelector::new(window)),
        SelectionStrategy::Nearest => Arc::new(NearestSelector),
    }
}
