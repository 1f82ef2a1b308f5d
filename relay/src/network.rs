//! Relay network layer: UDP transport, connection lifecycle, liveness sweep.

use crate::config::RelayConfig;
use crate::dispatcher::Dispatcher;
use crate::metrics::RelayMetrics;
use crate::registry::SubscriptionRegistry;
use crate::session::SessionTable;
use bincode::{deserialize, serialize};
use dashmap::DashMap;
use log::{debug, error, info};
use shared::{ConnectionId, Packet, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::interval;

/// Lifecycle events funneled to the main loop, from dispatch tasks (client
/// `Disconnect` packets) and from the liveness sweep.
#[derive(Debug)]
pub enum ControlMessage {
    Disconnect { connection_id: ConnectionId },
}

/// Outgoing datagrams queued by the dispatcher for the sender task.
#[derive(Debug)]
pub enum OutboundMessage {
    Send {
        target: ConnectionId,
        packet: Packet,
    },
}

/// Address↔id maps for live connections. Ids are opaque to clients and
/// never reused within a process run.
pub struct ConnectionTable {
    by_addr: DashMap<SocketAddr, ConnectionId>,
    by_id: DashMap<ConnectionId, SocketAddr>,
    next_id: AtomicU32,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self {
            by_addr: DashMap::new(),
            by_id: DashMap::new(),
            next_id: AtomicU32::new(1),
        }
    }

    /// Assigns a fresh connection id to `addr` and records both mappings.
    pub fn register(&self, addr: SocketAddr) -> ConnectionId {
        let connection_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.by_id.insert(connection_id, addr);
        self.by_addr.insert(addr, connection_id);
        connection_id
    }

    pub fn id_for(&self, addr: SocketAddr) -> Option<ConnectionId> {
        self.by_addr.get(&addr).map(|entry| *entry)
    }

    pub fn addr_for(&self, connection_id: ConnectionId) -> Option<SocketAddr> {
        self.by_id.get(&connection_id).map(|entry| *entry)
    }

    /// Drops both mappings; returns the address if the id was live.
    pub fn remove(&self, connection_id: ConnectionId) -> Option<SocketAddr> {
        let addr = self.by_id.remove(&connection_id).map(|(_, addr)| addr);
        if let Some(addr) = addr {
            self.by_addr.remove(&addr);
        }
        addr
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// The relay server: owns the socket, the shared routing state, and the
/// channel plumbing between receiver, sender, sweep, and lifecycle tasks.
pub struct RelayServer {
    socket: Arc<UdpSocket>,
    config: RelayConfig,
    connections: Arc<ConnectionTable>,
    sessions: Arc<SessionTable>,
    registry: Arc<SubscriptionRegistry>,
    metrics: Arc<RelayMetrics>,
    dispatcher: Arc<Dispatcher>,

    // Communication channels
    control_tx: mpsc::UnboundedSender<ControlMessage>,
    control_rx: mpsc::UnboundedReceiver<ControlMessage>,
    outbound_rx: mpsc::UnboundedReceiver<OutboundMessage>,
}

impl RelayServer {
    pub async fn new(addr: &str, config: RelayConfig) -> Result<Self, Box<dyn std::error::Error>> {
        config.validate()?;

        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Relay listening on {}", socket.local_addr()?);

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let sessions = Arc::new(SessionTable::new());
        let registry = Arc::new(SubscriptionRegistry::new());
        let metrics = Arc::new(RelayMetrics::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&sessions),
            Arc::clone(&registry),
            Arc::clone(&metrics),
            outbound_tx,
            control_tx.clone(),
        ));

        Ok(RelayServer {
            socket,
            config,
            connections: Arc::new(ConnectionTable::new()),
            sessions,
            registry,
            metrics,
            dispatcher,
            control_tx,
            control_rx,
            outbound_rx,
        })
    }

    /// Local socket address; useful when bound to port 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn sessions(&self) -> Arc<SessionTable> {
        Arc::clone(&self.sessions)
    }

    pub fn registry(&self) -> Arc<SubscriptionRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn metrics(&self) -> Arc<RelayMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Spawns the task that receives datagrams and hands each one from an
    /// established connection to its own dispatch task — one unit of work
    /// per datagram, with no shared serialization point for decoding or
    /// routing. Unknown source addresses go through the handshake path.
    fn spawn_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let connections = Arc::clone(&self.connections);
        let sessions = Arc::clone(&self.sessions);
        let metrics = Arc::clone(&self.metrics);
        let dispatcher = Arc::clone(&self.dispatcher);
        let max_sessions = self.config.max_sessions;

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Some(connection_id) = connections.id_for(addr) {
                            let dispatcher = Arc::clone(&dispatcher);
                            let data = buffer[..len].to_vec();
                            tokio::spawn(async move {
                                dispatcher.on_packet_received(connection_id, &data);
                            });
                        } else {
                            Self::handle_handshake(
                                &socket,
                                &connections,
                                &sessions,
                                &metrics,
                                max_sessions,
                                addr,
                                &buffer[..len],
                            )
                            .await;
                        }
                    }
                    Err(e) => {
                        error!("Error receiving datagram: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// First contact from an unknown address. Only a well-formed `Connect`
    /// with a matching protocol version opens a session; anything else is
    /// the expected connect/disconnect race and is dropped.
    async fn handle_handshake(
        socket: &UdpSocket,
        connections: &ConnectionTable,
        sessions: &SessionTable,
        metrics: &RelayMetrics,
        max_sessions: usize,
        addr: SocketAddr,
        raw: &[u8],
    ) {
        let packet = match deserialize::<Packet>(raw) {
            Ok(packet) => packet,
            Err(_) => {
                metrics.record_decode_failure();
                debug!("Undecodable datagram from unknown address {}", addr);
                return;
            }
        };

        let (client_version, entity_id) = match packet {
            Packet::Connect {
                client_version,
                entity_id,
            } => (client_version, entity_id),
            _ => {
                metrics.record_unknown_connection();
                return;
            }
        };

        if client_version != PROTOCOL_VERSION {
            info!(
                "Rejecting {} (unsupported protocol version {})",
                addr, client_version
            );
            let reject = Packet::Disconnected {
                reason: format!("Unsupported protocol version {}", client_version),
            };
            if let Err(e) = Self::send_to_addr(socket, &reject, addr).await {
                error!("Failed to send reject to {}: {}", addr, e);
            }
            return;
        }

        if sessions.len() >= max_sessions {
            info!("Rejecting {} (relay full)", addr);
            let reject = Packet::Disconnected {
                reason: "Relay full".to_string(),
            };
            if let Err(e) = Self::send_to_addr(socket, &reject, addr).await {
                error!("Failed to send reject to {}: {}", addr, e);
            }
            return;
        }

        let connection_id = connections.register(addr);
        sessions.insert(connection_id, entity_id);
        info!(
            "Connection {} established from {} (entity {})",
            connection_id, addr, entity_id
        );

        let accept = Packet::Connected { connection_id };
        if let Err(e) = Self::send_to_addr(socket, &accept, addr).await {
            error!("Failed to send accept to {}: {}", addr, e);
        }
    }

    /// Spawns the task that drains the outbound queue. A target whose
    /// address mapping is already gone is mid-teardown; its datagram is
    /// silently discarded, so broadcasts never reach a half-removed
    /// connection. A failed send toward one recipient is counted and the
    /// queue keeps draining.
    fn spawn_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let connections = Arc::clone(&self.connections);
        let metrics = Arc::clone(&self.metrics);
        let mut outbound_rx = std::mem::replace(&mut self.outbound_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                match message {
                    OutboundMessage::Send { target, packet } => {
                        let addr = match connections.addr_for(target) {
                            Some(addr) => addr,
                            None => continue,
                        };

                        if let Err(e) = Self::send_to_addr(&socket, &packet, addr).await {
                            metrics.record_send_failure();
                            error!("Failed to send to connection {}: {}", target, e);
                        }
                    }
                }
            }
        });
    }

    /// Spawns the watchdog that funnels idle sessions into the normal
    /// disconnect path.
    fn spawn_sweeper(&self) {
        let sessions = Arc::clone(&self.sessions);
        let control_tx = self.control_tx.clone();
        let session_timeout = self.config.session_timeout;
        let sweep_interval = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut interval = interval(sweep_interval);

            loop {
                interval.tick().await;

                for connection_id in sessions.stale_ids(session_timeout) {
                    debug!("Session {} timed out", connection_id);
                    if control_tx
                        .send(ControlMessage::Disconnect { connection_id })
                        .is_err()
                    {
                        return;
                    }
                }
            }
        });
    }

    async fn send_to_addr(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    /// Disconnect bookkeeping. The address mapping goes first so in-flight
    /// broadcasts can no longer resolve the target, then the session and
    /// all of its subscriptions.
    fn teardown(&self, connection_id: ConnectionId) {
        let addr = self.connections.remove(connection_id);
        if self.sessions.remove(connection_id, &self.registry) {
            match addr {
                Some(addr) => info!("Connection {} from {} closed", connection_id, addr),
                None => info!("Connection {} closed", connection_id),
            }
        }
    }

    /// Main lifecycle loop: spawns the worker tasks, then consumes
    /// disconnect events and emits the periodic stats line.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_receiver();
        self.spawn_sender();
        self.spawn_sweeper();

        let mut stats_interval = interval(self.config.stats_interval);

        info!("Relay started");

        loop {
            tokio::select! {
                message = self.control_rx.recv() => {
                    match message {
                        Some(ControlMessage::Disconnect { connection_id }) => {
                            self.teardown(connection_id);
                        }
                        None => {
                            info!("Relay shutting down");
                            break;
                        }
                    }
                },

                _ = stats_interval.tick() => {
                    let snapshot = self.metrics.snapshot();
                    debug!(
                        "{} sessions, {} topics | routed {} telemetry, relayed {} datagrams | \
                         dropped: {} undecodable, {} unknown, {} out-of-range, {} send failures",
                        self.sessions.len(),
                        self.registry.topic_count(),
                        snapshot.telemetry_routed,
                        snapshot.datagrams_relayed,
                        snapshot.decode_failures,
                        snapshot.unknown_connection_drops,
                        snapshot.out_of_range_drops,
                        snapshot.send_failures,
                    );
                },
            }
        }

        Ok(())
    }
}
