// tests/common/mod.rs
//
// In-memory stand-ins for routing proxies, scripted per test.
#![allow(dead_code)]

use async_trait::async_trait;
use proxy_topology::transport::TransportError;
use proxy_topology::{
    Command, CommandReply, Connector, ProbeReply, ProxyChannel, ProxyEndpoint, TopologyConfig,
};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

pub const BASE_PORT: u16 = 52000;

pub struct MockProxy {
    pub endpoint: ProxyEndpoint,
    latency: Mutex<Duration>,
    responding: AtomicBool,
    refusing: AtomicBool,
    command_ok: AtomicBool,
    pub probes: AtomicUsize,
    pub commands: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl MockProxy {
    fn new(endpoint: ProxyEndpoint) -> Self {
        Self {
            endpoint,
            latency: Mutex::new(Duration::ZERO),
            responding: AtomicBool::new(true),
            refusing: AtomicBool::new(false),
            command_ok: AtomicBool::new(true),
            probes: AtomicUsize::new(0),
            commands: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// Keep accepting requests but never answer until resumed.
    pub fn stop_responding(&self) {
        self.responding.store(false, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.responding.store(true, Ordering::SeqCst);
        self.refusing.store(false, Ordering::SeqCst);
    }

    pub fn refuse_connections(&self) {
        self.refusing.store(true, Ordering::SeqCst);
    }

    pub fn fail_commands(&self) {
        self.command_ok.store(false, Ordering::SeqCst);
    }

    fn latency(&self) -> Duration {
        *self.latency.lock().unwrap()
    }

    async fn answer_when_responsive(&self) {
        while !self.responding.load(Ordering::SeqCst) {
            sleep(Duration::from_millis(10)).await;
        }
        let latency = self.latency();
        if !latency.is_zero() {
            sleep(latency).await;
        }
    }
}

pub struct MockCluster {
    proxies: Vec<Arc<MockProxy>>,
}

impl MockCluster {
    pub fn new(size: usize) -> Arc<Self> {
        let proxies = (0..size)
            .map(|i| Arc::new(MockProxy::new(ProxyEndpoint::new("localhost", BASE_PORT + i as u16))))
            .collect();
        Arc::new(Self { proxies })
    }

    pub fn proxy(&self, index: usize) -> &Arc<MockProxy> {
        &self.proxies[index]
    }

    pub fn endpoints(&self) -> Vec<ProxyEndpoint> {
        self.proxies.iter().map(|p| p.endpoint.clone()).collect()
    }

    /// Settings from the multi-proxy failover scenarios: 3s connect, 1s
    /// socket deadline, 1s heartbeat, one connection per proxy.
    pub fn config(&self, window_ms: u64) -> TopologyConfig {
        TopologyConfig::new(self.endpoints())
            .with_connection_timeout(Duration::from_millis(3000))
            .with_socket_timeout(Duration::from_millis(1000))
            .with_heartbeat_interval(Duration::from_millis(1000))
            .with_local_threshold(Duration::from_millis(window_ms))
            .with_pool_size(1)
    }
}

#[async_trait]
impl Connector for MockCluster {
    async fn connect(&self, endpoint: &ProxyEndpoint) -> Result<Box<dyn ProxyChannel>, TransportError> {
        let proxy = self
            .proxies
            .iter()
            .find(|p| &p.endpoint == endpoint)
            .cloned()
            .ok_or_else(|| TransportError::Io(io::Error::new(io::ErrorKind::NotFound, "unknown proxy")))?;

        if proxy.refusing.load(Ordering::SeqCst) {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }

        Ok(Box::new(MockChannel { proxy }))
    }
}

struct MockChannel {
    proxy: Arc<MockProxy>,
}

#[async_trait]
impl ProxyChannel for MockChannel {
    async fn probe(&mut self) -> Result<ProbeReply, TransportError> {
        self.proxy.probes.fetch_add(1, Ordering::SeqCst);
        self.proxy.answer_when_responsive().await;
        Ok(ProbeReply::router())
    }

    async fn command(&mut self, command: &Command) -> Result<CommandReply, TransportError> {
        let proxy = &self.proxy;
        let now = proxy.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        proxy.max_in_flight.fetch_max(now, Ordering::SeqCst);

        proxy.answer_when_responsive().await;

        proxy.in_flight.fetch_sub(1, Ordering::SeqCst);
        proxy.commands.fetch_add(1, Ordering::SeqCst);

        if proxy.command_ok.load(Ordering::SeqCst) {
            Ok(CommandReply::success(command.documents.len() as u64))
        } else {
            Ok(CommandReply::failure("write rejected"))
        }
    }
}
