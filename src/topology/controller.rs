// src/topology/controller.rs
use super::{ProxyEndpoint, ProxySnapshot, TopologyState};
use crate::config::TopologyConfig;
use crate::dispatch::{OperationDispatcher, OperationResult};
use crate::events::{EventBus, TopologyEvent};
use crate::metrics::MetricsCollector;
use crate::monitor::{HeartbeatMonitor, MonitorHandle, MonitorSettings};
use crate::pool::PoolStats;
use crate::selector::{create_selector, eligible_set};
use crate::transport::{Command, Connector};
use crate::TopologyError;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyPhase {
    Disconnected,
    Connecting,
    Connected,
    FailedToConnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Readiness {
    pub phase: TopologyPhase,
    /// Every seed has reported a definitive status and at least one is up.
    pub full_setup: bool,
    pub closed: bool,
}

/// Client view of a set of interchangeable routing proxies.
///
/// Cheap to clone; clones share the same monitors, pools and state.
#[derive(Clone)]
pub struct Topology {
    inner: Arc<Inner>,
}

struct Inner {
    config: TopologyConfig,
    state: Arc<TopologyState>,
    connector: Arc<dyn Connector>,
    events: EventBus,
    dispatcher: OperationDispatcher,
    readiness: Arc<watch::Sender<Readiness>>,
    shutdown: watch::Sender<bool>,
    started: AtomicBool,
    closed: AtomicBool,
    monitors: Mutex<Vec<MonitorHandle>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Topology {
    pub fn new(config: TopologyConfig, connector: Arc<dyn Connector>) -> anyhow::Result<Self> {
        Self::with_metrics(config, connector, None)
    }

    pub fn with_metrics(
        config: TopologyConfig,
        connector: Arc<dyn Connector>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let state = Arc::new(TopologyState::new(&config.seeds));
        let events = EventBus::new();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (readiness, _) = watch::channel(Readiness {
            phase: TopologyPhase::Disconnected,
            full_setup: false,
            closed: false,
        });

        let selector = create_selector(config.selection, config.local_threshold());
        let dispatcher = OperationDispatcher::new(
            &config,
            state.clone(),
            selector,
            connector.clone(),
            events.clone(),
            shutdown_rx,
            metrics.clone(),
        );

        if let Some(metrics) = &metrics {
            metrics.update_proxy_counts(0, state.len());
        }

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                state,
                connector,
                events,
                dispatcher,
                readiness: Arc::new(readiness),
                shutdown,
                started: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                monitors: Mutex::new(Vec::new()),
                supervisor: Mutex::new(None),
                metrics,
            }),
        })
    }

    /// Start one heartbeat monitor per seed. Returns immediately; use
    /// [`Topology::wait_connected`] or [`Topology::wait_full_setup`] to wait
    /// for discovery.
    pub async fn connect(&self) -> Result<(), TopologyError> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            return Err(TopologyError::Closed);
        }
        if inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        inner.readiness.send_if_modified(|r| {
            if r.closed {
                return false;
            }
            r.phase = TopologyPhase::Connecting;
            true
        });

        info!(
            seeds = inner.state.len(),
            heartbeat = ?inner.config.heartbeat_interval(),
            window = ?inner.config.local_threshold(),
            pool_size = inner.config.pool_size,
            "Connecting topology"
        );

        let settings = MonitorSettings::from(&inner.config);
        // destroy() sets `closed` before taking this lock, so either it sees
        // the monitors pushed below or we see the flag and spawn nothing.
        let mut monitors = inner.monitors.lock().await;
        if inner.closed.load(Ordering::SeqCst) {
            return Err(TopologyError::Closed);
        }
        for endpoint in inner.state.endpoints() {
            let monitor = HeartbeatMonitor::new(
                endpoint,
                inner.connector.clone(),
                inner.state.clone(),
                inner.events.clone(),
                settings.clone(),
                inner.metrics.clone(),
            );
            monitors.push(monitor.spawn());
        }

        let supervisor = tokio::spawn(supervise(
            inner.state.clone(),
            inner.readiness.clone(),
            inner.events.clone(),
            inner.config.connection_timeout(),
            inner.shutdown.subscribe(),
        ));
        *inner.supervisor.lock().await = Some(supervisor);
        drop(monitors);

        Ok(())
    }

    /// Resolves once a proxy is up, or fails if none came up within the
    /// connection timeout.
    pub async fn wait_connected(&self) -> Result<(), TopologyError> {
        let mut rx = self.inner.readiness.subscribe();
        let readiness = *rx
            .wait_for(|r| {
                r.closed
                    || matches!(
                        r.phase,
                        TopologyPhase::Connected | TopologyPhase::FailedToConnect
                    )
            })
            .await
            .map_err(|_| TopologyError::Closed)?;

        self.readiness_result(readiness)
    }

    /// Like [`Topology::wait_connected`], but also waits until every seed
    /// has reported at least once.
    pub async fn wait_full_setup(&self) -> Result<(), TopologyError> {
        let mut rx = self.inner.readiness.subscribe();
        let readiness = *rx
            .wait_for(|r| r.closed || r.full_setup || r.phase == TopologyPhase::FailedToConnect)
            .await
            .map_err(|_| TopologyError::Closed)?;

        self.readiness_result(readiness)
    }

    pub async fn execute(&self, command: Command) -> Result<OperationResult, TopologyError> {
        if self.is_closed() {
            return Err(TopologyError::Closed);
        }
        self.inner.dispatcher.execute(command).await
    }

    pub async fn insert(
        &self,
        namespace: &str,
        documents: Vec<Value>,
    ) -> Result<OperationResult, TopologyError> {
        self.execute(Command::insert(namespace, documents)).await
    }

    /// Stop monitoring, close every pool and fail all further operations.
    pub async fn destroy(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        inner.shutdown.send_replace(true);
        inner.readiness.send_modify(|r| {
            r.closed = true;
            r.phase = TopologyPhase::Disconnected;
        });

        let monitors = std::mem::take(&mut *inner.monitors.lock().await);
        for monitor in &monitors {
            monitor.stop();
        }
        futures::future::join_all(monitors.into_iter().map(MonitorHandle::join)).await;

        if let Some(supervisor) = inner.supervisor.lock().await.take() {
            supervisor.abort();
        }

        inner.dispatcher.close_pools().await;

        info!("Topology destroyed");
        inner.events.emit(TopologyEvent::Close);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TopologyEvent> {
        self.inner.events.subscribe()
    }

    pub fn readiness(&self) -> Readiness {
        *self.inner.readiness.borrow()
    }

    pub fn phase(&self) -> TopologyPhase {
        self.readiness().phase
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &TopologyConfig {
        &self.inner.config
    }

    pub fn state(&self) -> &Arc<TopologyState> {
        &self.inner.state
    }

    pub fn snapshot(&self) -> Vec<ProxySnapshot> {
        self.inner.state.snapshot()
    }

    /// Proxies currently inside the latency window, in selection order.
    pub fn eligible(&self) -> Vec<ProxySnapshot> {
        eligible_set(&self.inner.state.snapshot(), self.inner.config.local_threshold())
    }

    pub async fn pool_stats(&self, endpoint: &ProxyEndpoint) -> Option<PoolStats> {
        let pool = self
            .inner
            .dispatcher
            .pools()
            .into_iter()
            .find(|pool| pool.endpoint() == endpoint)?;
        Some(pool.stats().await)
    }

    fn readiness_result(&self, readiness: Readiness) -> Result<(), TopologyError> {
        if readiness.closed {
            return Err(TopologyError::Closed);
        }
        match readiness.phase {
            TopologyPhase::FailedToConnect => Err(TopologyError::ConnectTimeout {
                timeout: self.inner.config.connection_timeout(),
            }),
            _ => Ok(()),
        }
    }
}

/// Drives the Connecting → Connected / FailedToConnect transitions and the
/// fullsetup notification from record updates.
async fn supervise(
    state: Arc<TopologyState>,
    readiness: Arc<watch::Sender<Readiness>>,
    events: EventBus,
    connect_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut changes = state.subscribe();
    let deadline = sleep(connect_timeout);
    tokio::pin!(deadline);
    let mut deadline_passed = false;

    loop {
        if state.any_up() {
            let connected = readiness.send_if_modified(|r| {
                if r.closed || r.phase == TopologyPhase::Connected {
                    return false;
                }
                r.phase = TopologyPhase::Connected;
                true
            });
            if connected {
                info!(up = state.up_count(), total = state.len(), "Topology connected");
                events.emit(TopologyEvent::Connect);
            }

            if state.all_reported() {
                let full_setup = readiness.send_if_modified(|r| {
                    if r.closed || r.full_setup {
                        return false;
                    }
                    r.full_setup = true;
                    true
                });
                if full_setup {
                    info!(up = state.up_count(), total = state.len(), "Topology fully set up");
                    events.emit(TopologyEvent::FullSetup);
                }
                break;
            }
        }

        tokio::select! {
            biased;
            _ = shutdown.wait_for(|closed| *closed) => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = &mut deadline, if !deadline_passed => {
                deadline_passed = true;
                if !state.any_up() {
                    let failed = readiness.send_if_modified(|r| {
                        if r.closed || r.phase != TopologyPhase::Connecting {
                            return false;
                        }
                        r.phase = TopologyPhase::FailedToConnect;
                        true
                    });
                    if failed {
                        error!(timeout = ?connect_timeout, "No proxy came up in time");
                        events.emit(TopologyEvent::Error(TopologyError::ConnectTimeout {
                            timeout: connect_timeout,
                        }));
                    }
                }
            }
        }
    }
}
