//! Observability counters for the dispatch hot loop.

use std::sync::atomic::{AtomicU64, Ordering};

/// Drop and routing counters. All relaxed atomics: counters must never
/// become a point of contention on the packet path.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    telemetry_routed: AtomicU64,
    datagrams_relayed: AtomicU64,
    decode_failures: AtomicU64,
    unknown_connection_drops: AtomicU64,
    out_of_range_drops: AtomicU64,
    send_failures: AtomicU64,
}

/// Point-in-time copy of every counter, for the stats log and for tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub telemetry_routed: u64,
    pub datagrams_relayed: u64,
    pub decode_failures: u64,
    pub unknown_connection_drops: u64,
    pub out_of_range_drops: u64,
    pub send_failures: u64,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Telemetry packet accepted and routed to a subscriber snapshot.
    pub fn record_telemetry_routed(&self) {
        self.telemetry_routed.fetch_add(1, Ordering::Relaxed);
    }

    /// One datagram queued toward one recipient.
    pub fn record_datagram_relayed(&self) {
        self.datagrams_relayed.fetch_add(1, Ordering::Relaxed);
    }

    /// Raw bytes that failed envelope decoding.
    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Packet from an address or id with no live session.
    pub fn record_unknown_connection(&self) {
        self.unknown_connection_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Telemetry position outside the encodable world range.
    pub fn record_out_of_range(&self) {
        self.out_of_range_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Failed send toward one recipient (queue or socket).
    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            telemetry_routed: self.telemetry_routed.load(Ordering::Relaxed),
            datagrams_relayed: self.datagrams_relayed.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            unknown_connection_drops: self.unknown_connection_drops.load(Ordering::Relaxed),
            out_of_range_drops: self.out_of_range_drops.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }
}
