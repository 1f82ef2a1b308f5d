use serde::{Deserialize, Serialize};

pub mod spatial;

/// Opaque connection identifier, assigned by the relay's connection manager.
pub type ConnectionId = u32;

pub const PROTOCOL_VERSION: u32 = 1;

/// Side length of one routing parcel in world units. Telemetry is routed by
/// the parcel the sender stands in.
pub const PARCEL_SIZE: f32 = 32.0;
/// City-block granularity, 1 km.
pub const BLOCK_SIZE: f32 = 1_000.0;
/// Sector granularity, 10 km.
pub const SECTOR_SIZE: f32 = 10_000.0;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Spatial hash of one parcel. Two addresses name the same cell iff the
/// hashes are equal; the relay treats client-supplied hashes as opaque topic
/// keys and never checks them against a real position.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridAddress {
    pub spatial_hash: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    // Client -> relay
    Connect {
        client_version: u32,
        entity_id: u64,
    },
    Telemetry {
        position: Vector3,
    },
    GridSubscription {
        subscribe_cells: Vec<GridAddress>,
        unsubscribe_cells: Vec<GridAddress>,
    },
    Disconnect,

    // Relay -> client
    Connected {
        connection_id: ConnectionId,
    },
    TelemetryState {
        entity_id: u64,
        position: Vector3,
    },
    Disconnected {
        reason: String,
    },
}
