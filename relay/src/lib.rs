//! # Spatial Interest Relay
//!
//! This library implements the relay server for position telemetry: it
//! accepts per-connection updates from many simultaneous clients, works out
//! which other clients declared interest in the sender's location, and fans
//! each update out to exactly that subscriber set.
//!
//! ## Core Responsibilities
//!
//! ### Interest-Managed Routing
//! Clients subscribe to spatial cells (their own parcel plus its eight
//! neighbors, computed client-side). The relay encodes each telemetry
//! packet's position to a Morton-coded parcel address and forwards the
//! update to that cell's subscribers, never back to the sender. The relay
//! performs no geometric reasoning of its own; subscriptions are the only
//! source of truth for who hears what.
//!
//! ### Session Management
//! Handles the bookkeeping around each connection:
//! - Session creation on connect and teardown on disconnect
//! - Activity timestamps updated on every routed packet
//! - A liveness sweep that reaps silent sessions
//! - Subscription purging on teardown, so dead connections never linger
//!   in topic sets
//!
//! ### Best-Effort Delivery
//! The transport is unreliable datagrams. Sends are fire-and-forget: no
//! acknowledgments, no backpressure, and a failure toward one recipient
//! never delays the rest of a broadcast or the next inbound packet.
//!
//! ## Module Organization
//!
//! - [`registry`] — the cell-keyed topic map (subscribe, unsubscribe,
//!   snapshot reads, disconnect purge), sharded so unrelated cells never
//!   contend.
//! - [`session`] — per-connection metadata with lock-free activity
//!   timestamps and the stale-session scan.
//! - [`dispatcher`] — decodes packets, classifies by payload, mutates the
//!   registry, and fans telemetry out.
//! - [`network`] — UDP socket tasks, connection handshake and teardown,
//!   and the liveness sweep.
//! - [`metrics`] — drop and routing counters for the hot loop.
//! - [`config`] — startup configuration with validation.
//!
//! ## Concurrency Model
//!
//! Every inbound datagram is one unit of work; dispatch tasks share the
//! registry and session table through `Arc` and per-shard locks, so packets
//! from distinct connections route in parallel and operations on one cell
//! serialize against each other. Nothing on the dispatch path blocks on
//! network I/O.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use relay::config::RelayConfig;
//! use relay::network::RelayServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = RelayServer::new("0.0.0.0:4433", RelayConfig::default()).await?;
//!
//!     // Runs the accept/dispatch/sweep loops until the process exits.
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatcher;
pub mod metrics;
pub mod network;
pub mod registry;
pub mod session;
