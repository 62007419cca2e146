// src/metrics/collector.rs
use crate::topology::ProxyStatus;
use anyhow::Result;
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn gather(&self) -> Vec<u8> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
        }
        buffer
    }
}

pub struct MetricsCollector {
    // Proxy health
    pub proxy_status: IntGaugeVec,
    pub proxy_rtt_seconds: GaugeVec,
    pub heartbeats_total: IntCounterVec,

    // Dispatch
    pub operations_total: IntCounterVec,
    pub operation_duration_seconds: HistogramVec,
    pub dispatch_failures_total: IntCounterVec,

    // Pools
    pub pool_checked_out: IntGaugeVec,
    pub pool_exhausted_total: IntCounterVec,

    // Topology
    pub up_proxies: IntGauge,
    pub total_proxies: IntGauge,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let proxy_status = IntGaugeVec::new(
            Opts::new(
                "topology_proxy_status",
                "Proxy status (0=connecting, 1=up, 2=down)",
            ),
            &["proxy"],
        )?;
        registry.register(Box::new(proxy_status.clone()))?;

        let proxy_rtt_seconds = GaugeVec::new(
            Opts::new(
                "topology_proxy_rtt_seconds",
                "Round-trip time of the last successful heartbeat",
            ),
            &["proxy"],
        )?;
        registry.register(Box::new(proxy_rtt_seconds.clone()))?;

        let heartbeats_total = IntCounterVec::new(
            Opts::new("topology_heartbeats_total", "Heartbeat probes sent"),
            &["proxy", "outcome"],
        )?;
        registry.register(Box::new(heartbeats_total.clone()))?;

        let operations_total = IntCounterVec::new(
            Opts::new("topology_operations_total", "Operation attempts per proxy"),
            &["proxy", "outcome"],
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        let operation_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "topology_operation_duration_seconds",
                "End-to-end operation duration including retries",
            ),
            &["proxy"],
        )?;
        registry.register(Box::new(operation_duration_seconds.clone()))?;

        let dispatch_failures_total = IntCounterVec::new(
            Opts::new(
                "topology_dispatch_failures_total",
                "Operations that failed back to the caller",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(dispatch_failures_total.clone()))?;

        let pool_checked_out = IntGaugeVec::new(
            Opts::new(
                "topology_pool_checked_out",
                "Connections currently checked out of each proxy pool",
            ),
            &["proxy"],
        )?;
        registry.register(Box::new(pool_checked_out.clone()))?;

        let pool_exhausted_total = IntCounterVec::new(
            Opts::new(
                "topology_pool_exhausted_total",
                "Checkouts that gave up waiting for a free connection",
            ),
            &["proxy"],
        )?;
        registry.register(Box::new(pool_exhausted_total.clone()))?;

        let up_proxies = IntGauge::new("topology_up_proxies", "Proxies currently up")?;
        registry.register(Box::new(up_proxies.clone()))?;

        let total_proxies = IntGauge::new("topology_total_proxies", "Seed proxies")?;
        registry.register(Box::new(total_proxies.clone()))?;

        Ok(Self {
            proxy_status,
            proxy_rtt_seconds,
            heartbeats_total,
            operations_total,
            operation_duration_seconds,
            dispatch_failures_total,
            pool_checked_out,
            pool_exhausted_total,
            up_proxies,
            total_proxies,
        })
    }

    pub fn record_heartbeat(&self, proxy: &str, rtt: Option<Duration>) {
        let outcome = if rtt.is_some() { "success" } else { "failure" };
        self.heartbeats_total
            .with_label_values(&[proxy, outcome])
            .inc();

        if let Some(rtt) = rtt {
            self.proxy_rtt_seconds
                .with_label_values(&[proxy])
                .set(rtt.as_secs_f64());
        }
    }

    pub fn update_proxy_status(&self, proxy: &str, status: ProxyStatus) {
        let value = match status {
            ProxyStatus::Connecting => 0,
            ProxyStatus::Up => 1,
            ProxyStatus::Down => 2,
        };
        self.proxy_status.with_label_values(&[proxy]).set(value);
    }

    pub fn record_attempt(&self, proxy: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.operations_total
            .with_label_values(&[proxy, outcome])
            .inc();
    }

    pub fn record_operation(&self, proxy: &str, duration: Duration) {
        self.operation_duration_seconds
            .with_label_values(&[proxy])
            .observe(duration.as_secs_f64());
    }

    pub fn record_dispatch_failure(&self, reason: &str) {
        self.dispatch_failures_total
            .with_label_values(&[reason])
            .inc();
    }

    pub fn update_pool_checked_out(&self, proxy: &str, count: usize) {
        self.pool_checked_out
            .with_label_values(&[proxy])
            .set(count as i64);
    }

    pub fn record_pool_exhausted(&self, proxy: &str) {
        self.pool_exhausted_total.with_label_values(&[proxy]).inc();
    }

    pub fn update_proxy_counts(&self, up: usize, total: usize) {
        self.up_proxies.set(up as i64);
        self.total_proxies.set(total as i64);
    }
}
