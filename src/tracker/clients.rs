//! Client tracking: requests that are still waiting for their response.
//!
//! When stopped, every waiting client receives a final synthetic response
//! (500 for an internal-error shutdown, 503 otherwise) whose status text is
//! the stop reason.

use tokio::sync::oneshot;

use crate::http::response::ResponseProperties;
use crate::lifecycle::shutdown::StopReason;
use crate::tracker::{Registration, Registry, TrackerClosed};

/// Response sent to a client cut off by shutdown.
pub fn shutdown_response(reason: &StopReason) -> ResponseProperties {
    ResponseProperties::new()
        .status(reason.terminal_status())
        .status_text(reason.to_string())
        .header("content-length", 0)
}

/// A tracked client; dropping it unregisters the client.
#[derive(Debug)]
pub struct TrackedClient {
    _registration: Registration<oneshot::Sender<ResponseProperties>>,
    /// Fires with the synthetic response if shutdown reaches this client first.
    pub interrupted: oneshot::Receiver<ResponseProperties>,
}

/// Tracks clients awaiting a response.
#[derive(Clone, Default)]
pub struct ClientTracker {
    registry: Registry<oneshot::Sender<ResponseProperties>>,
}

impl ClientTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self) -> Result<TrackedClient, TrackerClosed> {
        let (tx, rx) = oneshot::channel();
        let registration = self.registry.add(tx)?;
        Ok(TrackedClient {
            _registration: registration,
            interrupted: rx,
        })
    }

    /// Answer every waiting client with the shutdown response.
    pub fn stop(&self, reason: &StopReason) {
        let waiting = self.registry.stop(reason);
        tracing::debug!(
            count = waiting.len(),
            status = reason.terminal_status(),
            reason = %reason,
            "Answering waiting clients"
        );
        for client in waiting {
            // The client may have completed on its own in the meantime.
            let _ = client.send(shutdown_response(reason));
        }
    }

    pub fn active_count(&self) -> usize {
        self.registry.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_answers_with_503() {
        let tracker = ClientTracker::new();
        let client = tracker.track().unwrap();

        tracker.stop(&StopReason::ProcessInterrupt);
        let response = client.interrupted.await.unwrap();
        assert_eq!(response.status, Some(503));
        assert_eq!(response.status_text.as_deref(), Some("process-interrupt"));
    }

    #[tokio::test]
    async fn internal_error_answers_with_500() {
        let tracker = ClientTracker::new();
        let client = tracker.track().unwrap();

        tracker.stop(&StopReason::InternalError);
        let response = client.interrupted.await.unwrap();
        assert_eq!(response.status, Some(500));
    }

    #[test]
    fn completed_clients_are_not_answered() {
        let tracker = ClientTracker::new();
        let client = tracker.track().unwrap();
        drop(client);
        assert_eq!(tracker.active_count(), 0);
        tracker.stop(&StopReason::NotSpecified);
        assert!(tracker.track().is_err());
    }
}
