//! Rehab Relay Service
//!
//! Keeps the set of live WebSocket connections and forwards every text
//! message received from one connection, verbatim, to all the others. There
//! is no framing, no rooms and no replay for late joiners; clients use it as
//! a shared signalling channel.

pub mod config;
pub mod hub;
pub mod socket;

pub use config::Config;
pub use hub::{BroadcastReport, ConnectionId, Registration, RelayError, RelayHub};
pub use socket::{create_router, start_relay_server};
