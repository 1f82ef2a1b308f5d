//! Performance benchmarks for the relay hot path

use bincode::serialize;
use relay::dispatcher::Dispatcher;
use relay::metrics::RelayMetrics;
use relay::registry::SubscriptionRegistry;
use relay::session::SessionTable;
use shared::{spatial, GridAddress, Packet, Vector3};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// Benchmarks Morton encoding throughput
#[test]
fn benchmark_spatial_encoding() {
    let iterations = 1_000_000u64;
    let mut accumulator = 0u64;

    let start = Instant::now();
    for i in 0..iterations {
        let x = (i % 10_000) as f32 - 5_000.0;
        let z = (i % 7_000) as f32 - 3_500.0;
        accumulator ^= spatial::encode(x, z).unwrap().spatial_hash;
    }
    let duration = start.elapsed();

    println!(
        "Spatial encoding: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert_ne!(accumulator, u64::MAX); // keep the loop observable
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks subscribe/unsubscribe churn across many cells
#[test]
fn benchmark_registry_churn() {
    let registry = SubscriptionRegistry::new();
    let iterations = 10_000u64;

    let start = Instant::now();
    for i in 0..iterations {
        let connection_id = (i % 64) as u32;
        let cell = GridAddress {
            spatial_hash: i % 128,
        };
        registry.subscribe(connection_id, cell);
    }
    for i in 0..iterations {
        let connection_id = (i % 64) as u32;
        let cell = GridAddress {
            spatial_hash: i % 128,
        };
        registry.unsubscribe(connection_id, cell);
    }
    let duration = start.elapsed();

    println!(
        "Registry churn: {} subscribe+unsubscribe pairs in {:?} ({:.2} ns/op)",
        iterations,
        duration,
        duration.as_nanos() as f64 / (iterations * 2) as f64
    );

    // Empty-topic cleanup must leave nothing behind.
    assert_eq!(registry.topic_count(), 0);
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks telemetry fan-out through the dispatcher
#[test]
fn benchmark_fanout_dispatch() {
    let sessions = Arc::new(SessionTable::new());
    let registry = Arc::new(SubscriptionRegistry::new());
    let metrics = Arc::new(RelayMetrics::new());
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let (control_tx, _control_rx) = mpsc::unbounded_channel();

    let dispatcher = Dispatcher::new(
        Arc::clone(&sessions),
        Arc::clone(&registry),
        Arc::clone(&metrics),
        outbound_tx,
        control_tx,
    );

    // One sender, 100 watchers on the sender's cell.
    let sender = 999u32;
    sessions.insert(sender, 10_999);
    let cell = spatial::encode(0.0, 0.0).unwrap();
    for watcher in 1..=100u32 {
        registry.subscribe(watcher, cell);
    }

    let telemetry = serialize(&Packet::Telemetry {
        position: Vector3::new(0.0, 0.0, 0.0),
    })
    .unwrap();

    let iterations = 1_000;
    let start = Instant::now();
    for _ in 0..iterations {
        dispatcher.on_packet_received(sender, &telemetry);
    }
    let duration = start.elapsed();

    let mut delivered = 0u64;
    while outbound_rx.try_recv().is_ok() {
        delivered += 1;
    }

    println!(
        "Fan-out dispatch: {} packets × 100 watchers in {:?} ({:.2} µs/packet)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(delivered, iterations as u64 * 100);
    assert_eq!(metrics.snapshot().telemetry_routed, iterations as u64);
    assert!(duration.as_millis() < 5000);
}
