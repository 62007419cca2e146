// src/events/mod.rs
use crate::topology::ProxyEndpoint;
use crate::TopologyError;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

/// Notifications a topology publishes to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum TopologyEvent {
    /// The first proxy reached Up.
    Connect,
    /// Every seed has reported Up or Down at least once.
    FullSetup,
    /// Startup failed: no proxy came up within the connection timeout.
    Error(TopologyError),
    /// The topology was destroyed.
    Close,
    ProxyJoined(ProxyEndpoint),
    ProxyLeft(ProxyEndpoint),
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<TopologyEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TopologyEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: TopologyEvent) {
        tracing::debug!(?event, "Topology event");
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Log every event until the bus is dropped. A slow reader that falls
/// behind skips the overwritten events and keeps going. Returns how many
/// events were logged.
pub async fn log_events(mut events: broadcast::Receiver<TopologyEvent>) -> u64 {
    let mut logged = 0;
    loop {
        match events.recv().await {
            Ok(event) => {
                logged += 1;
                match event {
                    TopologyEvent::Error(e) => tracing::error!("Topology error: {}", e),
                    TopologyEvent::ProxyLeft(proxy) => tracing::warn!("Proxy left: {}", proxy),
                    TopologyEvent::ProxyJoined(proxy) => tracing::info!("Proxy joined: {}", proxy),
                    other => tracing::info!("Topology event: {:?}", other),
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event logger fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    logged
}
