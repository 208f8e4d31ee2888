//! In-flight resource tracking.
//!
//! # Data Flow
//! ```text
//! accept loop        → connections.rs (one entry per transport connection)
//! request service    → clients.rs     (one entry per request awaiting a response)
//! dispatch           → handlers.rs    (one entry per running handler invocation)
//!
//! natural completion → Registration dropped → entry removed
//! shutdown           → tracker.stop(reason) → every entry terminated,
//!                      later registrations rejected
//! ```
//!
//! # Design Decisions
//! - Each tracker owns an arena of records keyed by an opaque `ResourceId`
//! - Removal is idempotent and tied to `Drop`, so panics cannot leak entries
//! - A stopped registry stays closed; there is no reopen

pub mod clients;
pub mod connections;
pub mod handlers;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use thiserror::Error;

use crate::lifecycle::shutdown::StopReason;

pub use clients::ClientTracker;
pub use connections::ConnectionTracker;
pub use handlers::RequestHandlerTracker;

/// Relaxed ordering is enough: ids only need to be unique.
static RESOURCE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of a tracked resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(u64);

impl ResourceId {
    fn next() -> Self {
        Self(RESOURCE_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "res-{}", self.0)
    }
}

/// Registration refused because the tracker was stopped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("tracker stopped: {reason}")]
pub struct TrackerClosed {
    pub reason: StopReason,
}

struct RegistryInner<T> {
    entries: DashMap<ResourceId, T>,
    closed: OnceLock<StopReason>,
}

/// Arena of live resources of one kind.
pub struct Registry<T> {
    inner: Arc<RegistryInner<T>>,
}

impl<T> Clone for Registry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                entries: DashMap::new(),
                closed: OnceLock::new(),
            }),
        }
    }

    /// Register a resource. Fails once `stop` has been called.
    pub fn add(&self, entry: T) -> Result<Registration<T>, TrackerClosed> {
        if let Some(reason) = self.inner.closed.get() {
            return Err(TrackerClosed { reason: reason.clone() });
        }

        let id = ResourceId::next();
        self.inner.entries.insert(id, entry);

        // `stop` may have closed and drained between the check and the insert.
        if let Some(reason) = self.inner.closed.get() {
            self.inner.entries.remove(&id);
            return Err(TrackerClosed { reason: reason.clone() });
        }

        Ok(Registration {
            id,
            registry: Arc::downgrade(&self.inner),
        })
    }

    /// Close the registry and hand back every live entry for termination.
    ///
    /// Only the first call records its reason; later calls drain whatever is
    /// left (normally nothing).
    pub fn stop(&self, reason: &StopReason) -> Vec<T> {
        let _ = self.inner.closed.set(reason.clone());
        let ids: Vec<ResourceId> = self.inner.entries.iter().map(|entry| *entry.key()).collect();
        ids.into_iter()
            .filter_map(|id| self.inner.entries.remove(&id).map(|(_, entry)| entry))
            .collect()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.closed.get().is_some()
    }

    /// Reason recorded by the first `stop`.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.inner.closed.get().cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }
}

/// Handle to one registered resource; removes it on drop.
pub struct Registration<T> {
    id: ResourceId,
    registry: Weak<RegistryInner<T>>,
}

impl<T> Registration<T> {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Remove the entry. Safe to call any number of times.
    pub fn unregister(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.entries.remove(&self.id);
        }
    }
}

impl<T> fmt::Debug for Registration<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration").field("id", &self.id).finish()
    }
}

impl<T> Drop for Registration<T> {
    fn drop(&mut self) {
        self.unregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_ids_unique() {
        assert_ne!(ResourceId::next(), ResourceId::next());
    }

    #[test]
    fn registration_removed_on_drop() {
        let registry: Registry<&str> = Registry::new();
        let first = registry.add("a").unwrap();
        let second = registry.add("b").unwrap();
        assert_eq!(registry.len(), 2);

        drop(first);
        assert_eq!(registry.len(), 1);

        second.unregister();
        second.unregister();
        assert!(registry.is_empty());
    }

    #[test]
    fn stop_drains_and_rejects() {
        let registry: Registry<u32> = Registry::new();
        let _a = registry.add(1).unwrap();
        let _b = registry.add(2).unwrap();

        let mut drained = registry.stop(&StopReason::ProcessInterrupt);
        drained.sort();
        assert_eq!(drained, vec![1, 2]);
        assert!(registry.is_empty());

        let err = registry.add(3).unwrap_err();
        assert_eq!(err.reason, StopReason::ProcessInterrupt);
    }

    #[test]
    fn first_stop_reason_is_kept() {
        let registry: Registry<()> = Registry::new();
        registry.stop(&StopReason::InternalError);
        registry.stop(&StopReason::ProcessExit);
        assert_eq!(registry.stop_reason(), Some(StopReason::InternalError));
    }
}
