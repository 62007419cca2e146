// src/monitor/heartbeat.rs
use crate::config::TopologyConfig;
use crate::events::{EventBus, TopologyEvent};
use crate::metrics::MetricsCollector;
use crate::pool::{Connection, ConnectionError};
use crate::topology::{ProxyEndpoint, ProxyStatus, TopologyState};
use crate::transport::{Connector, ProbeReply};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Id used for the dedicated monitoring connection in logs.
const MONITOR_CONNECTION_ID: u64 = 0;

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub interval: Duration,
    /// Bounds connecting and waiting for each probe reply. A proxy that goes
    /// silent with no traffic is marked Down after at most
    /// `failure_threshold * (interval + connect_timeout)`; size the two
    /// together when detection time matters.
    pub connect_timeout: Duration,
    pub failure_threshold: u32,
}

impl From<&TopologyConfig> for MonitorSettings {
    fn from(config: &TopologyConfig) -> Self {
        Self {
            interval: config.heartbeat_interval(),
            connect_timeout: config.connection_timeout(),
            failure_threshold: config.failure_threshold,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HeartbeatError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("{endpoint} did not answer as a routing proxy (ok={ok}, msg={msg:?})")]
    NotRouter {
        endpoint: ProxyEndpoint,
        ok: bool,
        msg: Option<String>,
    },
}

/// Probes one proxy forever and keeps its record current.
pub struct HeartbeatMonitor {
    endpoint: ProxyEndpoint,
    connector: Arc<dyn Connector>,
    state: Arc<TopologyState>,
    events: EventBus,
    settings: MonitorSettings,
    metrics: Option<Arc<MetricsCollector>>,
    connection: Option<Connection>,
}

pub struct MonitorHandle {
    endpoint: ProxyEndpoint,
    stop_flag: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn endpoint(&self) -> &ProxyEndpoint {
        &self.endpoint
    }

    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!(proxy = %self.endpoint, "Heartbeat monitor task failed: {}", e);
        }
    }
}

impl HeartbeatMonitor {
    pub fn new(
        endpoint: ProxyEndpoint,
        connector: Arc<dyn Connector>,
        state: Arc<TopologyState>,
        events: EventBus,
        settings: MonitorSettings,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        Self {
            endpoint,
            connector,
            state,
            events,
            settings,
            metrics,
            connection: None,
        }
    }

    pub fn spawn(self) -> MonitorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stop_flag = Arc::new(AtomicBool::new(false));
        let endpoint = self.endpoint.clone();
        let task = tokio::spawn(self.run(stop_flag.clone(), shutdown_rx));

        MonitorHandle {
            endpoint,
            stop_flag,
            shutdown_tx,
            task,
        }
    }

    async fn run(mut self, stop: Arc<AtomicBool>, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            proxy = %self.endpoint,
            interval = ?self.settings.interval,
            "Starting heartbeat monitor"
        );

        loop {
            if stop.load(Ordering::SeqCst) {
                break;
            }

            let outcome = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                outcome = self.heartbeat() => outcome,
            };
            self.apply(outcome);

            if stop.load(Ordering::SeqCst) {
                break;
            }

            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                _ = sleep(self.settings.interval) => {}
            }
        }

        if let Some(mut conn) = self.connection.take() {
            conn.close();
        }
        info!(proxy = %self.endpoint, "Heartbeat monitor stopped");
    }

    async fn heartbeat(&mut self) -> Result<(Duration, ProbeReply), HeartbeatError> {
        let mut conn = match self.connection.take() {
            Some(conn) if conn.is_open() => conn,
            _ => {
                Connection::open(
                    self.connector.as_ref(),
                    &self.endpoint,
                    MONITOR_CONNECTION_ID,
                    self.settings.connect_timeout,
                    self.settings.connect_timeout,
                )
                .await?
            }
        };

        let started = Instant::now();
        let reply = conn.probe().await?;
        let rtt = started.elapsed();
        self.connection = Some(conn);

        if !reply.is_router() {
            return Err(HeartbeatError::NotRouter {
                endpoint: self.endpoint.clone(),
                ok: reply.ok,
                msg: reply.msg,
            });
        }

        Ok((rtt, reply))
    }

    fn apply(&self, outcome: Result<(Duration, ProbeReply), HeartbeatError>) {
        let proxy = self.endpoint.to_string();

        let transition = match outcome {
            Ok((rtt, reply)) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_heartbeat(&proxy, Some(rtt));
                }
                let transition = self
                    .state
                    .record_success(&self.endpoint, rtt, reply.capabilities());

                match transition {
                    Some(t) if t.became_up() => {
                        info!(proxy = %self.endpoint, rtt_ms = rtt.as_millis() as u64, "Proxy is up");
                        self.events
                            .emit(TopologyEvent::ProxyJoined(self.endpoint.clone()));
                    }
                    _ => debug!(proxy = %self.endpoint, rtt_ms = rtt.as_millis() as u64, "Heartbeat ok"),
                }
                transition
            }
            Err(e) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_heartbeat(&proxy, None);
                }
                let transition = self.state.record_failure(
                    &self.endpoint,
                    self.settings.failure_threshold,
                    &e.to_string(),
                );

                match transition {
                    Some(t) if t.became_down() => {
                        warn!(proxy = %self.endpoint, error = %e, "Proxy is down");
                        if t.previous == ProxyStatus::Up {
                            self.events
                                .emit(TopologyEvent::ProxyLeft(self.endpoint.clone()));
                        }
                    }
                    _ => debug!(proxy = %self.endpoint, error = %e, "Heartbeat failed"),
                }
                transition
            }
        };

        if let (Some(metrics), Some(t)) = (&self.metrics, transition) {
            metrics.update_proxy_status(&proxy, t.current);
            metrics.update_proxy_counts(self.state.up_count(), self.state.len());
        }
    }
}
