//! Server status state machine.
//!
//! ```text
//! Starting → Opened → Closing → Stopped
//! ```
//! Transitions only move forward; a request to move backwards is ignored.

use std::fmt;
use std::sync::{Arc, OnceLock};

use tokio::sync::watch;

use crate::lifecycle::shutdown::StopReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Status {
    Starting,
    Opened,
    Closing,
    Stopped,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Starting => "starting",
            Status::Opened => "opened",
            Status::Closing => "closing",
            Status::Stopped => "stopped",
        })
    }
}

/// Observable, monotonic status.
#[derive(Debug)]
pub struct StatusCell {
    tx: watch::Sender<Status>,
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Status::Starting);
        Self { tx }
    }

    pub fn get(&self) -> Status {
        *self.tx.borrow()
    }

    /// Move to `next` if it is ahead of the current status.
    pub fn advance(&self, next: Status) -> bool {
        self.tx.send_if_modified(|current| {
            if next > *current {
                *current = next;
                true
            } else {
                false
            }
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.tx.subscribe()
    }
}

/// Read side of the lifecycle handed to the request path.
#[derive(Debug, Clone)]
pub struct ServingState {
    status: watch::Receiver<Status>,
    stop_reason: Arc<OnceLock<StopReason>>,
}

impl ServingState {
    pub fn new(status: watch::Receiver<Status>, stop_reason: Arc<OnceLock<StopReason>>) -> Self {
        Self { status, stop_reason }
    }

    /// `None` while requests may be dispatched, otherwise the reason they may not.
    pub fn refusal(&self) -> Option<StopReason> {
        let reason = self.stop_reason.get();
        if *self.status.borrow() == Status::Opened && reason.is_none() {
            return None;
        }
        Some(reason.cloned().unwrap_or_default())
    }
}
