// src/pool/pool.rs
use super::connection::{Connection, ConnectionError};
use crate::config::TopologyConfig;
use crate::metrics::MetricsCollector;
use crate::topology::ProxyEndpoint;
use crate::transport::Connector;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Connection pool for {endpoint} exhausted after waiting {timeout:?}")]
    PoolExhausted {
        endpoint: ProxyEndpoint,
        timeout: Duration,
    },

    #[error(transparent)]
    Connect(#[from] ConnectionError),

    #[error("Connection pool for {0} is closed")]
    Closed(ProxyEndpoint),
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub size: usize,
    /// Bounds both a single connect and the wait for a free slot.
    pub connect_timeout: Duration,
    pub socket_timeout: Duration,
}

impl From<&TopologyConfig> for PoolSettings {
    fn from(config: &TopologyConfig) -> Self {
        Self {
            size: config.pool_size,
            connect_timeout: config.connection_timeout(),
            socket_timeout: config.socket_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub created: u64,
    pub reused: u64,
    pub closed: u64,
    pub exhausted: u64,
    pub checked_out: usize,
    pub idle: usize,
}

#[derive(Debug, Default)]
struct PoolCounters {
    created: AtomicU64,
    reused: AtomicU64,
    closed: AtomicU64,
    exhausted: AtomicU64,
}

/// Bounded set of connections to one proxy.
pub struct ConnectionPool {
    endpoint: ProxyEndpoint,
    connector: Arc<dyn Connector>,
    settings: PoolSettings,
    idle: Mutex<VecDeque<Connection>>,
    permits: Arc<Semaphore>,
    checked_out: Arc<AtomicUsize>,
    closed: AtomicBool,
    next_id: AtomicU64,
    counters: PoolCounters,
    metrics: Option<Arc<MetricsCollector>>,
}

/// Holds one unit of pool capacity; dropping it gives the capacity back.
#[derive(Debug)]
struct Slot {
    checked_out: Arc<AtomicUsize>,
    _permit: OwnedSemaphorePermit,
}

impl Slot {
    fn new(permit: OwnedSemaphorePermit, checked_out: Arc<AtomicUsize>) -> Self {
        checked_out.fetch_add(1, Ordering::SeqCst);
        Self {
            checked_out,
            _permit: permit,
        }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.checked_out.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A checked-out connection. Hand it back with [`ConnectionPool::checkin`];
/// dropping it instead closes the connection and frees the slot.
#[derive(Debug)]
pub struct PooledConnection {
    conn: Connection,
    slot: Slot,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

impl ConnectionPool {
    pub fn new(
        endpoint: ProxyEndpoint,
        connector: Arc<dyn Connector>,
        settings: PoolSettings,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(settings.size)),
            idle: Mutex::new(VecDeque::with_capacity(settings.size)),
            endpoint,
            connector,
            settings,
            checked_out: Arc::new(AtomicUsize::new(0)),
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            counters: PoolCounters::default(),
            metrics,
        }
    }

    pub fn endpoint(&self) -> &ProxyEndpoint {
        &self.endpoint
    }

    pub fn size(&self) -> usize {
        self.settings.size
    }

    pub fn checked_out(&self) -> usize {
        self.checked_out.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn checkout(&self) -> Result<PooledConnection, PoolError> {
        if self.is_closed() {
            return Err(PoolError::Closed(self.endpoint.clone()));
        }

        let permit = match timeout(
            self.settings.connect_timeout,
            self.permits.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed(self.endpoint.clone())),
            Err(_) => {
                self.counters.exhausted.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.record_pool_exhausted(&self.endpoint.to_string());
                }
                tracing::warn!(
                    proxy = %self.endpoint,
                    size = self.settings.size,
                    "Connection pool exhausted"
                );
                return Err(PoolError::PoolExhausted {
                    endpoint: self.endpoint.clone(),
                    timeout: self.settings.connect_timeout,
                });
            }
        };

        let slot = Slot::new(permit, self.checked_out.clone());
        self.report_checked_out();

        if let Some(mut conn) = self.take_idle().await {
            conn.mark_in_use();
            self.counters.reused.fetch_add(1, Ordering::Relaxed);
            return Ok(PooledConnection { conn, slot });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut conn = Connection::open(
            self.connector.as_ref(),
            &self.endpoint,
            id,
            self.settings.connect_timeout,
            self.settings.socket_timeout,
        )
        .await?;
        self.counters.created.fetch_add(1, Ordering::Relaxed);

        if self.is_closed() {
            conn.close();
            self.counters.closed.fetch_add(1, Ordering::Relaxed);
            return Err(PoolError::Closed(self.endpoint.clone()));
        }

        conn.mark_in_use();
        Ok(PooledConnection { conn, slot })
    }

    pub async fn checkin(&self, pooled: PooledConnection, healthy: bool) {
        let PooledConnection { mut conn, slot } = pooled;

        if healthy && conn.is_open() {
            let mut idle = self.idle.lock().await;
            if !self.is_closed() {
                conn.mark_idle();
                idle.push_back(conn);
                drop(idle);
                drop(slot);
                self.report_checked_out();
                return;
            }
        }

        conn.close();
        self.counters.closed.fetch_add(1, Ordering::Relaxed);
        drop(slot);
        self.report_checked_out();
    }

    /// Close idle connections and refuse further checkouts. Connections
    /// still checked out are closed as they come back.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.permits.close();

        let mut idle = self.idle.lock().await;
        let drained = idle.len();
        for mut conn in idle.drain(..) {
            conn.close();
        }
        self.counters
            .closed
            .fetch_add(drained as u64, Ordering::Relaxed);

        tracing::debug!(proxy = %self.endpoint, closed = drained, "Connection pool closed");
    }

    pub async fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.counters.created.load(Ordering::Relaxed),
            reused: self.counters.reused.load(Ordering::Relaxed),
            closed: self.counters.closed.load(Ordering::Relaxed),
            exhausted: self.counters.exhausted.load(Ordering::Relaxed),
            checked_out: self.checked_out(),
            idle: self.idle.lock().await.len(),
        }
    }

    async fn take_idle(&self) -> Option<Connection> {
        let mut idle = self.idle.lock().await;
        while let Some(conn) = idle.pop_front() {
            if conn.is_open() {
                return Some(conn);
            }
        }
        None
    }

    fn report_checked_out(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.update_pool_checked_out(&self.endpoint.to_string(), self.checked_out());
        }
    }
}
