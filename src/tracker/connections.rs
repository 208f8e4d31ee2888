//! Transport connection tracking.
//!
//! Every accepted socket is registered with a cancellation token. Stopping the
//! tracker cancels all tokens: each connection task then stops reading new
//! requests, finishes the response in flight and closes the socket. The accept
//! loop refuses sockets once the tracker is stopped.

use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;

use crate::lifecycle::shutdown::StopReason;
use crate::tracker::{Registration, Registry, TrackerClosed};

struct ConnectionEntry {
    peer: SocketAddr,
    close: CancellationToken,
}

/// A tracked connection; dropping it unregisters the connection.
#[derive(Debug)]
pub struct TrackedConnection {
    registration: Registration<ConnectionEntry>,
    close: CancellationToken,
}

impl TrackedConnection {
    /// Resolves when the connection has been asked to close.
    pub async fn closing(&self) {
        self.close.cancelled().await
    }

    pub fn is_closing(&self) -> bool {
        self.close.is_cancelled()
    }

    pub fn id(&self) -> crate::tracker::ResourceId {
        self.registration.id()
    }
}

/// Tracks open transport connections.
#[derive(Clone, Default)]
pub struct ConnectionTracker {
    registry: Registry<ConnectionEntry>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an accepted connection.
    pub fn track(&self, peer: SocketAddr) -> Result<TrackedConnection, TrackerClosed> {
        let close = CancellationToken::new();
        let registration = self.registry.add(ConnectionEntry {
            peer,
            close: close.clone(),
        })?;
        tracing::trace!(connection_id = %registration.id(), peer_addr = %peer, "Connection tracked");
        Ok(TrackedConnection { registration, close })
    }

    /// Refuse new connections and ask every open one to close.
    pub fn stop(&self, reason: &StopReason) {
        let open = self.registry.stop(reason);
        tracing::debug!(count = open.len(), reason = %reason, "Closing connections");
        for entry in open {
            tracing::trace!(peer_addr = %entry.peer, "Connection asked to close");
            entry.close.cancel();
        }
    }

    pub fn active_count(&self) -> usize {
        self.registry.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.registry.is_stopped()
    }
}
