//! Session bookkeeping for connected clients.

use crate::registry::SubscriptionRegistry;
use dashmap::DashMap;
use log::info;
use shared::{ConnectionId, GridAddress};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock milliseconds; the domain of activity timestamps.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

/// Metadata for one connected client.
///
/// Topic subscriber sets hold connection ids, never references to this
/// struct, so tearing a session down can at worst leave a stale id behind —
/// which [`SessionTable::remove`] actively purges.
#[derive(Debug)]
pub struct Session {
    pub connection_id: ConnectionId,
    pub entity_id: u64,
    /// Last cell this session was observed in; unset until the first
    /// routed telemetry packet.
    pub current_cell: Option<GridAddress>,
    /// Milliseconds timestamp of the last received packet. Written on
    /// every routed packet, so it is a lock-free atomic rather than a
    /// field behind the map's write lock.
    pub last_activity: AtomicU64,
}

impl Session {
    pub fn new(connection_id: ConnectionId, entity_id: u64) -> Self {
        Self {
            connection_id,
            entity_id,
            current_cell: None,
            last_activity: AtomicU64::new(now_millis()),
        }
    }

    /// Refreshes the activity timestamp.
    pub fn touch(&self) {
        self.last_activity.store(now_millis(), Ordering::Relaxed);
    }

    /// True when no packet has arrived within `threshold` of `now`.
    pub fn is_stale(&self, now: u64, threshold: Duration) -> bool {
        now.saturating_sub(self.last_activity.load(Ordering::Relaxed)) > threshold.as_millis() as u64
    }
}

/// Concurrent mapping from connection id to session, sharded by id.
pub struct SessionTable {
    sessions: DashMap<ConnectionId, Session>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Registers a session for a freshly established connection.
    pub fn insert(&self, connection_id: ConnectionId, entity_id: u64) {
        info!(
            "Session {} opened for entity {}",
            connection_id, entity_id
        );
        self.sessions
            .insert(connection_id, Session::new(connection_id, entity_id));
    }

    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.sessions.contains_key(&connection_id)
    }

    pub fn entity_id(&self, connection_id: ConnectionId) -> Option<u64> {
        self.sessions
            .get(&connection_id)
            .map(|session| session.entity_id)
    }

    /// Updates the activity timestamp; called on every routed packet.
    /// Unknown ids are ignored (the connect/disconnect race).
    pub fn touch(&self, connection_id: ConnectionId) {
        if let Some(session) = self.sessions.get(&connection_id) {
            session.touch();
        }
    }

    /// Records the cell a telemetry packet was observed in.
    pub fn set_current_cell(&self, connection_id: ConnectionId, address: GridAddress) {
        if let Some(mut session) = self.sessions.get_mut(&connection_id) {
            session.current_cell = Some(address);
        }
    }

    pub fn current_cell(&self, connection_id: ConnectionId) -> Option<GridAddress> {
        self.sessions
            .get(&connection_id)
            .and_then(|session| session.current_cell)
    }

    /// Tears the session down. Every topic subscription is purged first,
    /// then the record is dropped: a removed session must never survive as
    /// a broadcast target. Returns whether a session existed.
    pub fn remove(&self, connection_id: ConnectionId, registry: &SubscriptionRegistry) -> bool {
        registry.unsubscribe_all(connection_id);
        match self.sessions.remove(&connection_id) {
            Some((_, session)) => {
                info!(
                    "Session {} closed (entity {})",
                    connection_id, session.entity_id
                );
                true
            }
            None => false,
        }
    }

    /// Ids of sessions idle longer than `threshold`, for the liveness
    /// sweep. The threshold and the sweep cadence are configuration owned
    /// by the caller.
    pub fn stale_ids(&self, threshold: Duration) -> Vec<ConnectionId> {
        let now = now_millis();
        self.sessions
            .iter()
            .filter(|entry| entry.value().is_stale(now, threshold))
            .map(|entry| *entry.key())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
