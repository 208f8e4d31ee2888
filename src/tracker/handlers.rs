//! Request-handler invocation tracking.
//!
//! Handler invocations run as their own tasks so a panic is contained and the
//! invocation can outlive (or be cut off from) the request that started it.
//! Once stopped, no new invocation is accepted; in-flight ones either run to
//! completion or are abandoned, and `stop` waits for them either way.

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::lifecycle::shutdown::StopReason;
use crate::tracker::{Registry, TrackerClosed};

/// Tracks running handler invocations.
#[derive(Clone, Default)]
pub struct RequestHandlerTracker {
    registry: Registry<CancellationToken>,
    tasks: TaskTracker,
}

impl RequestHandlerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a handler invocation.
    ///
    /// The task resolves to `None` when the invocation was abandoned by `stop`.
    pub fn spawn<F>(&self, invocation: F) -> Result<JoinHandle<Option<F::Output>>, TrackerClosed>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let abandon = CancellationToken::new();
        let registration = self.registry.add(abandon.clone())?;

        Ok(self.tasks.spawn(async move {
            let _registration = registration;
            tokio::select! {
                output = invocation => Some(output),
                _ = abandon.cancelled() => None,
            }
        }))
    }

    /// Reject new invocations, then wait for the in-flight ones.
    ///
    /// With `abandon`, in-flight invocations are cancelled instead of being
    /// allowed to finish.
    pub async fn stop(&self, reason: &StopReason, abandon: bool) {
        let in_flight = self.registry.stop(reason);
        tracing::debug!(count = in_flight.len(), abandon, reason = %reason, "Stopping request handlers");
        if abandon {
            for token in in_flight {
                token.cancel();
            }
        }
        self.tasks.close();
        self.tasks.wait().await;
    }

    pub fn active_count(&self) -> usize {
        self.registry.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.registry.is_stopped()
    }

    /// Reason the tracker was stopped with, if any.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.registry.stop_reason()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn invocation_runs_and_unregisters() {
        let tracker = RequestHandlerTracker::new();
        let handle = tracker.spawn(async { 42 }).unwrap();
        assert_eq!(handle.await.unwrap(), Some(42));
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn stop_rejects_new_invocations() {
        let tracker = RequestHandlerTracker::new();
        tracker.stop(&StopReason::ProcessExit, false).await;
        let err = tracker.spawn(async {}).unwrap_err();
        assert_eq!(err.reason, StopReason::ProcessExit);
    }

    #[tokio::test]
    async fn stop_waits_for_in_flight_invocations() {
        let tracker = RequestHandlerTracker::new();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let handle = tracker
            .spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                flag.store(true, Ordering::SeqCst);
                "done"
            })
            .unwrap();

        tracker.stop(&StopReason::NotSpecified, false).await;
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(handle.await.unwrap(), Some("done"));
    }

    #[tokio::test]
    async fn stop_can_abandon_in_flight_invocations() {
        let tracker = RequestHandlerTracker::new();
        let handle = tracker
            .spawn(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                "never"
            })
            .unwrap();

        tracker.stop(&StopReason::NotSpecified, true).await;
        assert_eq!(handle.await.unwrap(), None);
    }

    #[tokio::test]
    async fn panics_are_contained_in_the_task() {
        let tracker = RequestHandlerTracker::new();
        let handle = tracker
            .spawn(async {
                let missing: Option<u8> = None;
                missing.expect("boom")
            })
            .unwrap();
        let err = handle.await.unwrap_err();
        assert!(err.is_panic());
        assert_eq!(tracker.active_count(), 0);
    }
}
