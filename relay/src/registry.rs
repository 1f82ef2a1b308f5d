//! Cell-keyed topic registry: which connections hear about which parcels.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use shared::{ConnectionId, GridAddress};
use std::collections::HashSet;

/// Concurrent mapping from parcel address to its subscriber set.
///
/// A topic exists iff its subscriber set is non-empty: entries are created
/// lazily on first subscribe and deleted the instant the last subscriber
/// leaves, so the map is bounded by currently-watched cells rather than
/// world size or client count. A reverse index tracks each connection's
/// cells so disconnect can purge without scanning every topic.
///
/// Both maps are sharded; operations on one cell serialize against each
/// other and against snapshot reads of that cell, while unrelated cells
/// never contend. Lock order is always membership entry first, then topic
/// entry — snapshot reads touch only the topic map, so no cycle exists.
pub struct SubscriptionRegistry {
    topics: DashMap<GridAddress, HashSet<ConnectionId>>,
    memberships: DashMap<ConnectionId, HashSet<GridAddress>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
            memberships: DashMap::new(),
        }
    }

    /// Adds `connection_id` to the cell's subscriber set, creating the
    /// topic if absent. Subscribing twice has no additional effect.
    pub fn subscribe(&self, connection_id: ConnectionId, address: GridAddress) {
        let mut cells = self.memberships.entry(connection_id).or_default();
        cells.insert(address);
        self.topics
            .entry(address)
            .or_default()
            .insert(connection_id);
    }

    /// Removes `connection_id` from the cell's subscriber set. Unknown
    /// topics and non-member connections are a no-op, never an error.
    pub fn unsubscribe(&self, connection_id: ConnectionId, address: GridAddress) {
        match self.memberships.entry(connection_id) {
            Entry::Occupied(mut cells) => {
                cells.get_mut().remove(&address);
                self.remove_from_topic(connection_id, address);
                if cells.get().is_empty() {
                    cells.remove();
                }
            }
            Entry::Vacant(_) => {
                // Nothing tracked for this connection; still tolerate a
                // stray unsubscribe against the topic map.
                self.remove_from_topic(connection_id, address);
            }
        }
    }

    /// Read-consistent snapshot of the cell's current subscribers. Reflects
    /// every subscribe/unsubscribe that completed before the call; the
    /// caller is responsible for filtering itself out.
    pub fn subscribers(&self, address: GridAddress) -> Vec<ConnectionId> {
        self.topics
            .get(&address)
            .map(|subscribers| subscribers.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Drops every subscription held by `connection_id`. The membership
    /// entry stays locked for the whole purge, so concurrent subscription
    /// changes for the same connection land strictly before or after it.
    pub fn unsubscribe_all(&self, connection_id: ConnectionId) {
        if let Entry::Occupied(cells) = self.memberships.entry(connection_id) {
            for address in cells.get() {
                self.remove_from_topic(connection_id, *address);
            }
            cells.remove();
        }
    }

    /// Number of live (non-empty) topics.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    fn remove_from_topic(&self, connection_id: ConnectionId, address: GridAddress) {
        if let Entry::Occupied(mut subscribers) = self.topics.entry(address) {
            subscribers.get_mut().remove(&connection_id);
            if subscribers.get().is_empty() {
                subscribers.remove();
            }
        }
    }
}
