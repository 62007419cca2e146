// src/dispatch/dispatcher.rs
use crate::config::TopologyConfig;
use crate::events::{EventBus, TopologyEvent};
use crate::metrics::MetricsCollector;
use crate::pool::{ConnectionPool, PoolError, PoolSettings};
use crate::selector::ServerSelector;
use crate::topology::{ProxyEndpoint, ProxyStatus, TopologyState};
use crate::transport::{Command, CommandReply, Connector};
use crate::TopologyError;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

/// A successful operation and the proxy that served it.
#[derive(Debug, Clone)]
pub struct OperationResult {
    pub request_id: Uuid,
    pub proxy: ProxyEndpoint,
    pub reply: CommandReply,
    pub attempts: u32,
    pub duration: Duration,
}

enum Attempt {
    Served(CommandReply),
    /// The proxy could not serve the command; try another one.
    ProxyFailed(String),
    Fatal(TopologyError),
}

/// Runs commands against the topology, moving on to another proxy when the
/// selected one fails.
pub struct OperationDispatcher {
    state: Arc<TopologyState>,
    selector: Arc<dyn ServerSelector>,
    connector: Arc<dyn Connector>,
    pools: DashMap<ProxyEndpoint, Arc<ConnectionPool>>,
    pool_settings: PoolSettings,
    max_attempts: u32,
    events: EventBus,
    shutdown: watch::Receiver<bool>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl OperationDispatcher {
    pub fn new(
        config: &TopologyConfig,
        state: Arc<TopologyState>,
        selector: Arc<dyn ServerSelector>,
        connector: Arc<dyn Connector>,
        events: EventBus,
        shutdown: watch::Receiver<bool>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        Self {
            state,
            selector,
            connector,
            pools: DashMap::new(),
            pool_settings: PoolSettings::from(config),
            max_attempts: config.dispatch_attempts(),
            events,
            shutdown,
            metrics,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Pool for `endpoint`, created on first use.
    pub fn pool(&self, endpoint: &ProxyEndpoint) -> Arc<ConnectionPool> {
        self.pools
            .entry(endpoint.clone())
            .or_insert_with(|| {
                Arc::new(ConnectionPool::new(
                    endpoint.clone(),
                    self.connector.clone(),
                    self.pool_settings.clone(),
                    self.metrics.clone(),
                ))
            })
            .clone()
    }

    pub fn pools(&self) -> Vec<Arc<ConnectionPool>> {
        self.pools.iter().map(|entry| entry.value().clone()).collect()
    }

    pub async fn close_pools(&self) {
        let pools = self.pools();
        futures::future::join_all(pools.iter().map(|pool| pool.close())).await;
    }

    pub async fn execute(&self, command: Command) -> Result<OperationResult, TopologyError> {
        let request_id = Uuid::new_v4();
        let span = info_span!("execute", %request_id, command = %command.name);

        let result = self.execute_inner(request_id, &command).instrument(span).await;
        if let (Err(e), Some(metrics)) = (&result, &self.metrics) {
            metrics.record_dispatch_failure(e.reason());
        }
        result
    }

    async fn execute_inner(
        &self,
        request_id: Uuid,
        command: &Command,
    ) -> Result<OperationResult, TopologyError> {
        let started = Instant::now();
        let mut shutdown = self.shutdown.clone();
        if *shutdown.borrow() {
            return Err(TopologyError::Closed);
        }

        for attempt in 1..=self.max_attempts {
            // One fresh snapshot per selection.
            let snapshot = self.state.snapshot();
            let proxy = self.selector.select(&snapshot)?;
            debug!(%proxy, attempt, "Selected proxy");

            let outcome = tokio::select! {
                biased;
                _ = shutdown.wait_for(|closed| *closed) => Attempt::Fatal(TopologyError::Closed),
                outcome = self.attempt(&proxy, command) => outcome,
            };

            match outcome {
                Attempt::Served(reply) => {
                    let duration = started.elapsed();
                    if let Some(metrics) = &self.metrics {
                        metrics.record_attempt(&proxy.to_string(), true);
                        metrics.record_operation(&proxy.to_string(), duration);
                    }

                    if !reply.ok {
                        return Err(TopologyError::CommandFailed {
                            proxy,
                            message: reply
                                .errmsg
                                .unwrap_or_else(|| "command returned ok=false".to_string()),
                        });
                    }

                    return Ok(OperationResult {
                        request_id,
                        proxy,
                        reply,
                        attempts: attempt,
                        duration,
                    });
                }
                Attempt::ProxyFailed(reason) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_attempt(&proxy.to_string(), false);
                    }
                    warn!(%proxy, attempt, error = %reason, "Proxy failed, trying another");
                    self.mark_down(&proxy, &reason);
                }
                Attempt::Fatal(e) => return Err(e),
            }
        }

        Err(TopologyError::AllProxiesUnavailable {
            attempts: self.max_attempts,
        })
    }

    async fn attempt(&self, proxy: &ProxyEndpoint, command: &Command) -> Attempt {
        let pool = self.pool(proxy);

        let mut conn = match pool.checkout().await {
            Ok(conn) => conn,
            Err(PoolError::Closed(_)) => return Attempt::Fatal(TopologyError::Closed),
            Err(e) => return Attempt::ProxyFailed(e.to_string()),
        };

        match conn.command(command).await {
            Ok(reply) => {
                pool.checkin(conn, true).await;
                Attempt::Served(reply)
            }
            Err(e) => {
                pool.checkin(conn, false).await;
                Attempt::ProxyFailed(e.to_string())
            }
        }
    }

    fn mark_down(&self, proxy: &ProxyEndpoint, reason: &str) {
        if let Some(t) = self.state.mark_down(proxy, reason) {
            if t.became_down() && t.previous == ProxyStatus::Up {
                self.events.emit(TopologyEvent::ProxyLeft(proxy.clone()));
            }
            if let Some(metrics) = &self.metrics {
                metrics.update_proxy_status(&proxy.to_string(), t.current);
                metrics.update_proxy_counts(self.state.up_count(), self.state.len());
            }
        }
    }
}
