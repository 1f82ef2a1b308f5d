//! Packet dispatch: decode, classify, mutate subscriptions, fan out.

use crate::metrics::RelayMetrics;
use crate::network::{ControlMessage, OutboundMessage};
use crate::registry::SubscriptionRegistry;
use crate::session::SessionTable;
use bincode::deserialize;
use log::{debug, warn};
use shared::{spatial, ConnectionId, GridAddress, Packet, Vector3};
use std::sync::Arc;
use tokio::sync::mpsc;

/// The long-lived routing service.
///
/// One instance owns (via `Arc`) the subscription registry and session
/// table and is shared by every per-datagram task. Nothing here blocks:
/// outbound datagrams are queued onto a channel the sender task drains, so
/// a slow recipient never delays the rest of a broadcast or the next
/// inbound packet.
pub struct Dispatcher {
    sessions: Arc<SessionTable>,
    registry: Arc<SubscriptionRegistry>,
    metrics: Arc<RelayMetrics>,
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
    control_tx: mpsc::UnboundedSender<ControlMessage>,
}

impl Dispatcher {
    pub fn new(
        sessions: Arc<SessionTable>,
        registry: Arc<SubscriptionRegistry>,
        metrics: Arc<RelayMetrics>,
        outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
        control_tx: mpsc::UnboundedSender<ControlMessage>,
    ) -> Self {
        Self {
            sessions,
            registry,
            metrics,
            outbound_tx,
            control_tx,
        }
    }

    /// Entry point for one raw datagram from an established connection.
    ///
    /// Nothing on this path is fatal: undecodable bytes and packets from
    /// unknown connections are counted, dropped, and the loop moves on.
    pub fn on_packet_received(&self, connection_id: ConnectionId, raw: &[u8]) {
        let packet = match deserialize::<Packet>(raw) {
            Ok(packet) => packet,
            Err(e) => {
                self.metrics.record_decode_failure();
                debug!(
                    "Dropping undecodable datagram from connection {}: {}",
                    connection_id, e
                );
                return;
            }
        };

        if !self.sessions.contains(connection_id) {
            // Expected race around connect/disconnect bookkeeping.
            self.metrics.record_unknown_connection();
            return;
        }
        self.sessions.touch(connection_id);

        match packet {
            Packet::Telemetry { position } => self.handle_telemetry(connection_id, position),
            Packet::GridSubscription {
                subscribe_cells,
                unsubscribe_cells,
            } => self.handle_grid_subscription(connection_id, &subscribe_cells, &unsubscribe_cells),
            Packet::Disconnect => {
                let _ = self
                    .control_tx
                    .send(ControlMessage::Disconnect { connection_id });
            }
            _ => {
                warn!(
                    "Unexpected packet type from connection {}",
                    connection_id
                );
            }
        }
    }

    /// Routes one telemetry update: encode the sender's cell, snapshot its
    /// subscribers, relay to everyone but the sender.
    ///
    /// The relay does no geometric neighbor reasoning — interested parties
    /// have already subscribed to this exact cell (clients watch their own
    /// cell plus its eight neighbors). Self-exclusion is unconditional: a
    /// sender subscribed to its own cell still hears nothing back.
    fn handle_telemetry(&self, connection_id: ConnectionId, position: Vector3) {
        let address = match spatial::encode_position(&position) {
            Ok(address) => address,
            Err(e) => {
                self.metrics.record_out_of_range();
                debug!(
                    "Dropping telemetry from connection {}: {}",
                    connection_id, e
                );
                return;
            }
        };

        self.sessions.set_current_cell(connection_id, address);

        // The sender's entity id rides along so recipients know whose
        // state this is.
        let entity_id = match self.sessions.entity_id(connection_id) {
            Some(entity_id) => entity_id,
            None => return, // session vanished mid-dispatch
        };

        let recipients = self.registry.subscribers(address);
        self.metrics.record_telemetry_routed();

        for recipient in recipients {
            if recipient == connection_id {
                continue; // never echo back to the sender
            }
            self.send_datagram(
                recipient,
                Packet::TelemetryState {
                    entity_id,
                    position,
                },
            );
        }
    }

    /// Applies a subscription change batch: all unsubscribes first in
    /// listed order, then all subscribes in listed order, each entry on its
    /// own. A cell listed on both sides of one message (a re-subscribe)
    /// therefore ends subscribed, and no single entry can discard the rest
    /// of the batch.
    fn handle_grid_subscription(
        &self,
        connection_id: ConnectionId,
        subscribe_cells: &[GridAddress],
        unsubscribe_cells: &[GridAddress],
    ) {
        for cell in unsubscribe_cells {
            self.registry.unsubscribe(connection_id, *cell);
        }
        for cell in subscribe_cells {
            self.registry.subscribe(connection_id, *cell);
        }
    }

    /// Fire-and-forget send: no acknowledgment, no backpressure. A
    /// recipient that cannot be queued is counted and skipped; the rest of
    /// the broadcast proceeds.
    fn send_datagram(&self, target: ConnectionId, packet: Packet) {
        self.metrics.record_datagram_relayed();
        if self
            .outbound_tx
            .send(OutboundMessage::Send { target, packet })
            .is_err()
        {
            self.metrics.record_send_failure();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bincode::serialize;
    use shared::spatial::WORLD_HALF_EXTENT;

    struct Harness {
        dispatcher: Dispatcher,
        sessions: Arc<SessionTable>,
        registry: Arc<SubscriptionRegistry>,
        metrics: Arc<RelayMetrics>,
        outbound_rx: mpsc::UnboundedReceiver<OutboundMessage>,
        control_rx: mpsc::UnboundedReceiver<ControlMessage>,
    }

    fn harness() -> Harness {
        let sessions = Arc::new(SessionTable::new());
        let registry = Arc::new(SubscriptionRegistry::new());
        let metrics = Arc::new(RelayMetrics::new());
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let dispatcher = Dispatcher::new(
            Arc::clone(&sessions),
            Arc::clone(&registry),
            Arc::clone(&metrics),
            outbound_tx,
            control_tx,
        );

        Harness {
            dispatcher,
            sessions,
            registry,
            metrics,
            outbound_rx,
            control_rx,
        }
    }

    fn telemetry_bytes(x: f32, z: f32) -> Vec<u8> {
        serialize(&Packet::Telemetry {
            position: Vector3::new(x, 0.0, z),
        })
        .unwrap()
    }

    fn cell(hash: u64) -> GridAddress {
        GridAddress { spatial_hash: hash }
    }

    #[test]
    fn telemetry_reaches_subscribers_but_never_the_sender() {
        let mut h = harness();
        h.sessions.insert(1, 7001);
        h.sessions.insert(2, 7002);

        let address = spatial::encode(100.0, 100.0).unwrap();
        h.registry.subscribe(1, address);
        h.registry.subscribe(2, address);

        h.dispatcher.on_packet_received(1, &telemetry_bytes(100.0, 100.0));

        match h.outbound_rx.try_recv().unwrap() {
            OutboundMessage::Send { target, packet } => {
                assert_eq!(target, 2);
                match packet {
                    Packet::TelemetryState {
                        entity_id,
                        position,
                    } => {
                        assert_eq!(entity_id, 7001);
                        assert_eq!(position, Vector3::new(100.0, 0.0, 100.0));
                    }
                    _ => panic!("Unexpected relayed packet type"),
                }
            }
        }
        // Exactly one recipient: the sender got nothing.
        assert!(h.outbound_rx.try_recv().is_err());

        // Last observed cell recorded on the sender's session.
        assert_eq!(h.sessions.current_cell(1), Some(address));
    }

    #[test]
    fn unsubscribed_sender_still_relays_to_watchers() {
        let mut h = harness();
        h.sessions.insert(1, 7001);
        h.sessions.insert(2, 7002);

        // Only the watcher is subscribed.
        let address = spatial::encode(-64.0, 32.0).unwrap();
        h.registry.subscribe(2, address);

        h.dispatcher.on_packet_received(1, &telemetry_bytes(-64.0, 32.0));

        match h.outbound_rx.try_recv().unwrap() {
            OutboundMessage::Send { target, .. } => assert_eq!(target, 2),
        }
    }

    #[test]
    fn malformed_bytes_are_counted_and_dropped() {
        let mut h = harness();
        h.sessions.insert(1, 7001);

        h.dispatcher.on_packet_received(1, &[0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);

        assert_eq!(h.metrics.snapshot().decode_failures, 1);
        assert!(h.outbound_rx.try_recv().is_err());
    }

    #[test]
    fn packets_from_unknown_connections_are_dropped_silently() {
        let mut h = harness();

        h.dispatcher.on_packet_received(9, &telemetry_bytes(0.0, 0.0));

        assert_eq!(h.metrics.snapshot().unknown_connection_drops, 1);
        assert_eq!(h.metrics.snapshot().telemetry_routed, 0);
        assert!(h.outbound_rx.try_recv().is_err());
    }

    #[test]
    fn out_of_range_telemetry_is_counted_and_dropped() {
        let mut h = harness();
        h.sessions.insert(1, 7001);

        h.dispatcher
            .on_packet_received(1, &telemetry_bytes(WORLD_HALF_EXTENT * 2.0, 0.0));

        assert_eq!(h.metrics.snapshot().out_of_range_drops, 1);
        assert!(h.outbound_rx.try_recv().is_err());
        // The hot loop survives; a valid packet still routes afterwards.
        h.dispatcher.on_packet_received(1, &telemetry_bytes(0.0, 0.0));
        assert_eq!(h.metrics.snapshot().telemetry_routed, 1);
    }

    #[test]
    fn resubscribe_in_one_message_stays_subscribed() {
        let h = harness();
        h.sessions.insert(1, 7001);

        for hash in [1, 2, 3] {
            h.registry.subscribe(1, cell(hash));
        }

        let batch = serialize(&Packet::GridSubscription {
            subscribe_cells: vec![cell(2), cell(4)],
            unsubscribe_cells: vec![cell(2)],
        })
        .unwrap();
        h.dispatcher.on_packet_received(1, &batch);

        for hash in [1, 2, 3, 4] {
            assert_eq!(
                h.registry.subscribers(cell(hash)),
                vec![1],
                "expected connection 1 in cell {}",
                hash
            );
        }
    }

    #[test]
    fn disconnect_packet_forwards_a_control_event() {
        let mut h = harness();
        h.sessions.insert(1, 7001);

        let bytes = serialize(&Packet::Disconnect).unwrap();
        h.dispatcher.on_packet_received(1, &bytes);

        match h.control_rx.try_recv().unwrap() {
            ControlMessage::Disconnect { connection_id } => assert_eq!(connection_id, 1),
        }
    }
}
