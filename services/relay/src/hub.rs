//! Active connection set and one-to-all fan-out.
//!
//! Each connection owns a bounded outbound queue drained by its own writer
//! task. A broadcast snapshots the current members under a short read lock
//! and enqueues outside of it, so joins and leaves never wait on delivery and
//! a stalled receiver only loses its own messages.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// Why a message could not be handed to a connection
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayError {
    #[error("outbound queue full")]
    QueueFull,

    #[error("connection closed")]
    Closed,
}

/// Sending half of a connection's outbound queue
#[derive(Clone)]
struct ConnectionHandle {
    tx: mpsc::Sender<String>,
}

impl ConnectionHandle {
    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    fn deliver(&self, message: String) -> Result<(), RelayError> {
        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => RelayError::QueueFull,
            TrySendError::Closed(_) => RelayError::Closed,
        })
    }
}

/// Per-broadcast delivery counts
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// The set of live connections
pub struct RelayHub {
    connections: RwLock<HashMap<ConnectionId, ConnectionHandle>>,
    outbound_buffer: usize,
}

impl RelayHub {
    pub fn new(outbound_buffer: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            outbound_buffer: outbound_buffer.max(1),
        }
    }

    /// Add a new connection to the active set.
    ///
    /// The connection stays a member until the returned [`Registration`] is
    /// dropped. The receiver yields every message relayed to it.
    pub fn register(self: &Arc<Self>) -> (Registration, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.outbound_buffer);
        let id = Uuid::new_v4();

        let active = {
            let mut connections = self.connections.write();
            connections.insert(id, ConnectionHandle { tx });
            connections.len()
        };

        metrics::counter!("relay.connections.opened").increment(1);
        metrics::gauge!("relay.connections.active").set(active as f64);
        debug!(connection_id = %id, active, "Connection registered");

        (
            Registration {
                hub: Arc::clone(self),
                id,
            },
            rx,
        )
    }

    fn remove(&self, id: ConnectionId) {
        let (removed, active) = {
            let mut connections = self.connections.write();
            let removed = connections.remove(&id).is_some();
            (removed, connections.len())
        };

        if removed {
            metrics::counter!("relay.connections.closed").increment(1);
            metrics::gauge!("relay.connections.active").set(active as f64);
            debug!(connection_id = %id, active, "Connection removed");
        }
    }

    /// Forward `message` to every open connection other than `from`
    pub fn broadcast(&self, from: ConnectionId, message: &str) -> BroadcastReport {
        let targets: Vec<(ConnectionId, ConnectionHandle)> = self
            .connections
            .read()
            .iter()
            .filter(|(id, _)| **id != from)
            .map(|(id, handle)| (*id, handle.clone()))
            .collect();

        let mut report = BroadcastReport::default();

        for (id, handle) in targets {
            if !handle.is_open() {
                continue;
            }
            match handle.deliver(message.to_string()) {
                Ok(()) => report.delivered += 1,
                Err(RelayError::QueueFull) => {
                    report.dropped += 1;
                    warn!(connection_id = %id, "Outbound queue full, dropping message");
                }
                // Closed between the check and the send
                Err(RelayError::Closed) => {}
            }
        }

        metrics::counter!("relay.messages.forwarded").increment(report.delivered as u64);
        if report.dropped > 0 {
            metrics::counter!("relay.messages.dropped").increment(report.dropped as u64);
        }

        report
    }

    /// Number of connections in the active set
    pub fn active_connections(&self) -> usize {
        self.connections.read().len()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().contains_key(&id)
    }
}

/// Membership of one connection in the active set; leaving on drop
pub struct Registration {
    hub: Arc<RelayHub>,
    id: ConnectionId,
}

impl Registration {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.hub.remove(self.id);
    }
}
