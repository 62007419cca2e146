// tests/topology_tests.rs
mod common;

use common::{MockCluster, BASE_PORT};
use proxy_topology::{ProxyStatus, Topology, TopologyError, TopologyEvent, TopologyPhase};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

const NS: &str = "test.proxies";

async fn insert_port(topology: &Topology) -> u16 {
    let result = topology
        .insert(NS, vec![json!({"a": 1})])
        .await
        .expect("insert should succeed");
    assert!(result.reply.ok);
    result.proxy.port()
}

async fn next_event(
    rx: &mut broadcast::Receiver<TopologyEvent>,
    wanted: impl Fn(&TopologyEvent) -> bool,
) -> TopologyEvent {
    timeout(Duration::from_secs(30), async {
        loop {
            match rx.recv().await {
                Ok(event) if wanted(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("event not published in time")
}

#[tokio::test(start_paused = true)]
async fn test_round_robin_over_equal_latency_proxies() {
    let cluster = MockCluster::new(2);
    let topology = Topology::new(cluster.config(50), cluster.clone()).unwrap();
    let mut events = topology.subscribe();

    topology.connect().await.unwrap();
    topology.wait_full_setup().await.unwrap();

    let first = next_event(&mut events, |e| matches!(e, TopologyEvent::Connect | TopologyEvent::FullSetup)).await;
    assert_eq!(first, TopologyEvent::Connect);
    let second = next_event(&mut events, |e| matches!(e, TopologyEvent::Connect | TopologyEvent::FullSetup)).await;
    assert_eq!(second, TopologyEvent::FullSetup);
    assert_eq!(topology.phase(), TopologyPhase::Connected);

    let picks = vec![
        insert_port(&topology).await,
        insert_port(&topology).await,
        insert_port(&topology).await,
    ];
    assert_eq!(picks, vec![BASE_PORT, BASE_PORT + 1, BASE_PORT]);

    topology.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_slow_proxy_outside_window_is_never_picked() {
    let cluster = MockCluster::new(2);
    cluster.proxy(1).set_latency(Duration::from_millis(100));

    let topology = Topology::new(cluster.config(50), cluster.clone()).unwrap();
    topology.connect().await.unwrap();
    topology.wait_full_setup().await.unwrap();

    for _ in 0..10 {
        assert_eq!(insert_port(&topology).await, BASE_PORT);
    }

    // Still monitored and up, just not eligible.
    let slow = topology.state().record(&cluster.proxy(1).endpoint).unwrap();
    assert_eq!(slow.status, ProxyStatus::Up);
    assert_eq!(slow.last_rtt, Some(Duration::from_millis(100)));
    assert_eq!(cluster.proxy(1).commands.load(Ordering::SeqCst), 0);

    topology.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_wide_window_alternates_between_fast_and_slow() {
    let cluster = MockCluster::new(2);
    cluster.proxy(1).set_latency(Duration::from_millis(100));

    let topology = Topology::new(cluster.config(500), cluster.clone()).unwrap();
    topology.connect().await.unwrap();
    topology.wait_full_setup().await.unwrap();

    let mut picks = Vec::new();
    for _ in 0..4 {
        picks.push(insert_port(&topology).await);
    }
    assert_eq!(picks, vec![BASE_PORT, BASE_PORT + 1, BASE_PORT, BASE_PORT + 1]);

    topology.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_failover_and_recovery_of_silent_proxy() {
    let cluster = MockCluster::new(2);
    let topology = Topology::new(cluster.config(50), cluster.clone()).unwrap();
    let mut events = topology.subscribe();
    topology.connect().await.unwrap();
    topology.wait_full_setup().await.unwrap();

    let silent = cluster.proxy(0).endpoint.clone();
    cluster.proxy(0).stop_responding();

    // The first insert lands on the silent proxy, times out and is
    // retried on the other one without surfacing an error.
    let first = topology.insert(NS, vec![json!({"a": 1})]).await.unwrap();
    assert_eq!(first.proxy.port(), BASE_PORT + 1);
    assert_eq!(first.attempts, 2);

    let left = next_event(&mut events, |e| matches!(e, TopologyEvent::ProxyLeft(_))).await;
    assert_eq!(left, TopologyEvent::ProxyLeft(silent.clone()));
    assert_eq!(topology.state().record(&silent).unwrap().status, ProxyStatus::Down);

    for _ in 0..4 {
        assert_eq!(insert_port(&topology).await, BASE_PORT + 1);
    }

    cluster.proxy(0).resume();
    sleep(Duration::from_millis(1100)).await;

    let joined = next_event(&mut events, |e| matches!(e, TopologyEvent::ProxyJoined(_))).await;
    assert_eq!(joined, TopologyEvent::ProxyJoined(silent.clone()));
    assert_eq!(topology.state().record(&silent).unwrap().status, ProxyStatus::Up);

    let mut ports = Vec::new();
    for _ in 0..4 {
        ports.push(insert_port(&topology).await);
    }
    assert!(ports.contains(&BASE_PORT));
    assert!(ports.contains(&(BASE_PORT + 1)));

    topology.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_monitor_marks_silent_proxy_down_without_traffic() {
    let cluster = MockCluster::new(2);
    let config = cluster
        .config(50)
        .with_connection_timeout(Duration::from_millis(500));
    let topology = Topology::new(config, cluster.clone()).unwrap();
    topology.connect().await.unwrap();
    topology.wait_full_setup().await.unwrap();

    cluster.proxy(0).stop_responding();

    // Next beat plus the probe deadline.
    sleep(Duration::from_millis(1600)).await;

    let record = topology.state().record(&cluster.proxy(0).endpoint).unwrap();
    assert_eq!(record.status, ProxyStatus::Down);
    assert!(record.last_error.is_some());
    assert_eq!(topology.eligible().len(), 1);

    topology.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_to_connect_then_late_recovery() {
    let cluster = MockCluster::new(2);
    cluster.proxy(0).refuse_connections();
    cluster.proxy(1).refuse_connections();

    let topology = Topology::new(cluster.config(50), cluster.clone()).unwrap();
    let mut events = topology.subscribe();
    topology.connect().await.unwrap();

    let err = topology.wait_connected().await.unwrap_err();
    assert_eq!(
        err,
        TopologyError::ConnectTimeout {
            timeout: Duration::from_millis(3000)
        }
    );
    assert_eq!(topology.phase(), TopologyPhase::FailedToConnect);

    let error = next_event(&mut events, |e| matches!(e, TopologyEvent::Error(_))).await;
    assert!(matches!(error, TopologyEvent::Error(TopologyError::ConnectTimeout { .. })));

    let err = topology.insert(NS, vec![json!({"a": 1})]).await.unwrap_err();
    assert_eq!(err, TopologyError::NoServerAvailable);

    cluster.proxy(1).resume();
    next_event(&mut events, |e| matches!(e, TopologyEvent::Connect)).await;
    assert_eq!(topology.phase(), TopologyPhase::Connected);
    assert_eq!(insert_port(&topology).await, BASE_PORT + 1);

    topology.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_no_server_available_when_every_proxy_is_down() {
    let cluster = MockCluster::new(2);
    let topology = Topology::new(cluster.config(50), cluster.clone()).unwrap();
    topology.connect().await.unwrap();
    topology.wait_full_setup().await.unwrap();

    for i in 0..2 {
        topology.state().mark_down(&cluster.proxy(i).endpoint, "test");
    }

    let err = topology.insert(NS, vec![json!({"a": 1})]).await.unwrap_err();
    assert_eq!(err, TopologyError::NoServerAvailable);
    assert_eq!(cluster.proxy(0).commands.load(Ordering::SeqCst), 0);
    assert_eq!(cluster.proxy(1).commands.load(Ordering::SeqCst), 0);

    topology.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_attempts_are_bounded() {
    let cluster = MockCluster::new(2);
    let mut config = cluster.config(50);
    config.max_dispatch_attempts = Some(1);

    let topology = Topology::new(config, cluster.clone()).unwrap();
    topology.connect().await.unwrap();
    topology.wait_full_setup().await.unwrap();

    cluster.proxy(0).stop_responding();

    let err = topology.insert(NS, vec![json!({"a": 1})]).await.unwrap_err();
    assert_eq!(err, TopologyError::AllProxiesUnavailable { attempts: 1 });
    assert_eq!(cluster.proxy(1).commands.load(Ordering::SeqCst), 0);

    topology.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_command_failure_is_not_retried() {
    let cluster = MockCluster::new(2);
    let topology = Topology::new(cluster.config(50), cluster.clone()).unwrap();
    topology.connect().await.unwrap();
    topology.wait_full_setup().await.unwrap();

    cluster.proxy(0).fail_commands();

    let err = topology.insert(NS, vec![json!({"a": 1})]).await.unwrap_err();
    match err {
        TopologyError::CommandFailed { proxy, message } => {
            assert_eq!(proxy.port(), BASE_PORT);
            assert_eq!(message, "write rejected");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(cluster.proxy(1).commands.load(Ordering::SeqCst), 0);
    let record = topology.state().record(&cluster.proxy(0).endpoint).unwrap();
    assert_eq!(record.status, ProxyStatus::Up);

    topology.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_pool_bounds_concurrent_operations() {
    let cluster = MockCluster::new(1);
    cluster.proxy(0).set_latency(Duration::from_millis(50));
    let config = cluster.config(50).with_pool_size(2);

    let topology = Topology::new(config, cluster.clone()).unwrap();
    topology.connect().await.unwrap();
    topology.wait_full_setup().await.unwrap();

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let topology = topology.clone();
            tokio::spawn(async move { topology.insert(NS, vec![json!({ "i": i })]).await })
        })
        .collect();

    for task in tasks {
        let result = task.await.unwrap().unwrap();
        assert_eq!(result.reply.n, 1);
    }

    let proxy = cluster.proxy(0);
    assert_eq!(proxy.commands.load(Ordering::SeqCst), 20);
    assert!(proxy.max_in_flight.load(Ordering::SeqCst) <= 2);

    let stats = topology.pool_stats(&proxy.endpoint).await.unwrap();
    assert!(stats.created <= 2);
    assert_eq!(stats.checked_out, 0);

    topology.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_destroy_fails_in_flight_and_later_operations() {
    let cluster = MockCluster::new(2);
    let topology = Topology::new(cluster.config(50), cluster.clone()).unwrap();
    let mut events = topology.subscribe();
    topology.connect().await.unwrap();
    topology.wait_full_setup().await.unwrap();

    cluster.proxy(0).stop_responding();
    cluster.proxy(1).stop_responding();

    let pending = {
        let topology = topology.clone();
        tokio::spawn(async move { topology.insert(NS, vec![json!({"a": 1})]).await })
    };
    sleep(Duration::from_millis(100)).await;

    topology.destroy().await;

    assert_eq!(pending.await.unwrap().unwrap_err(), TopologyError::Closed);
    assert_eq!(
        topology.insert(NS, vec![json!({"a": 2})]).await.unwrap_err(),
        TopologyError::Closed
    );
    assert!(topology.is_closed());
    assert_eq!(topology.phase(), TopologyPhase::Disconnected);
    next_event(&mut events, |e| matches!(e, TopologyEvent::Close)).await;

    // Monitors are gone: no more probes.
    let probes: Vec<_> = (0..2)
        .map(|i| cluster.proxy(i).probes.load(Ordering::SeqCst))
        .collect();
    sleep(Duration::from_secs(5)).await;
    for (i, before) in probes.into_iter().enumerate() {
        assert_eq!(cluster.proxy(i).probes.load(Ordering::SeqCst), before);
    }

    assert_eq!(topology.connect().await.unwrap_err(), TopologyError::Closed);
    assert_eq!(topology.wait_connected().await.unwrap_err(), TopologyError::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_connect_twice_is_a_no_op() {
    let cluster = MockCluster::new(2);
    let topology = Topology::new(cluster.config(50), cluster.clone()).unwrap();

    topology.connect().await.unwrap();
    topology.connect().await.unwrap();
    topology.wait_full_setup().await.unwrap();

    // One monitoring connection per proxy, one probe on the first beat.
    for i in 0..2 {
        assert_eq!(cluster.proxy(i).probes.load(Ordering::SeqCst), 1);
    }

    topology.destroy().await;
    topology.destroy().await;
    assert!(topology.is_closed());
}
