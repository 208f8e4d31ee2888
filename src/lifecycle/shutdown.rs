//! Shutdown coordination for the server.
//!
//! # Responsibilities
//! - Classify why the server stops (`StopReason`)
//! - Hold the cleanup callbacks registered during startup and run them
//!   concurrently, exactly once, when the server stops

use std::fmt;
use std::sync::Mutex;

use futures_util::future::{join_all, BoxFuture};

/// Why the server stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum StopReason {
    /// A handler failed while `stop_on_internal_error` was enabled.
    InternalError,
    /// SIGINT / Ctrl+C.
    ProcessInterrupt,
    ProcessBeforeExit,
    /// SIGHUP.
    ProcessHangupOrDeath,
    /// SIGTERM.
    ProcessDeath,
    ProcessExit,
    #[default]
    NotSpecified,
    /// Any reason supplied explicitly by a caller.
    Other(String),
}

impl StopReason {
    pub fn as_str(&self) -> &str {
        match self {
            StopReason::InternalError => "internal-error",
            StopReason::ProcessInterrupt => "process-interrupt",
            StopReason::ProcessBeforeExit => "process-before-exit",
            StopReason::ProcessHangupOrDeath => "process-hangup-or-death",
            StopReason::ProcessDeath => "process-death",
            StopReason::ProcessExit => "process-exit",
            StopReason::NotSpecified => "not-specified",
            StopReason::Other(reason) => reason,
        }
    }

    /// Status of the final response sent to clients cut off by this stop.
    pub fn terminal_status(&self) -> u16 {
        match self {
            StopReason::InternalError => 500,
            _ => 503,
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for StopReason {
    fn from(reason: &str) -> Self {
        match reason {
            "internal-error" => StopReason::InternalError,
            "process-interrupt" => StopReason::ProcessInterrupt,
            "process-before-exit" => StopReason::ProcessBeforeExit,
            "process-hangup-or-death" => StopReason::ProcessHangupOrDeath,
            "process-death" => StopReason::ProcessDeath,
            "process-exit" => StopReason::ProcessExit,
            "not-specified" => StopReason::NotSpecified,
            other => StopReason::Other(other.to_string()),
        }
    }
}

impl From<String> for StopReason {
    fn from(reason: String) -> Self {
        StopReason::from(reason.as_str())
    }
}

type CleanupCallback = Box<dyn FnOnce(StopReason) -> BoxFuture<'static, ()> + Send>;

/// Callbacks run when the server stops.
///
/// Callbacks run concurrently; `run` resolves once all of them have finished.
#[derive(Default)]
pub struct Cleanup {
    callbacks: Mutex<Vec<CleanupCallback>>,
}

impl Cleanup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback. Callbacks registered after `run` never execute.
    pub fn register<F>(&self, callback: F)
    where
        F: FnOnce(StopReason) -> BoxFuture<'static, ()> + Send + 'static,
    {
        if let Ok(mut callbacks) = self.callbacks.lock() {
            callbacks.push(Box::new(callback));
        }
    }

    /// Number of callbacks still pending.
    pub fn len(&self) -> usize {
        self.callbacks.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every registered callback concurrently and wait for all of them.
    pub async fn run(&self, reason: &StopReason) {
        let callbacks = match self.callbacks.lock() {
            Ok(mut callbacks) => std::mem::take(&mut *callbacks),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        join_all(callbacks.into_iter().map(|callback| callback(reason.clone()))).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[test]
    fn reason_names_round_trip() {
        for reason in [
            StopReason::InternalError,
            StopReason::ProcessInterrupt,
            StopReason::ProcessBeforeExit,
            StopReason::ProcessHangupOrDeath,
            StopReason::ProcessDeath,
            StopReason::ProcessExit,
            StopReason::NotSpecified,
        ] {
            assert_eq!(StopReason::from(reason.as_str()), reason);
        }
        assert_eq!(StopReason::from("maintenance"), StopReason::Other("maintenance".into()));
    }

    #[test]
    fn terminal_status_depends_on_reason() {
        assert_eq!(StopReason::InternalError.terminal_status(), 500);
        assert_eq!(StopReason::ProcessInterrupt.terminal_status(), 503);
        assert_eq!(StopReason::Other("x".into()).terminal_status(), 503);
    }

    #[tokio::test]
    async fn callbacks_run_concurrently_once() {
        let cleanup = Cleanup::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            cleanup.register(move |_reason| {
                async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    calls.fetch_add(1, Ordering::SeqCst);
                }
                .boxed()
            });
        }

        let started = Instant::now();
        cleanup.run(&StopReason::NotSpecified).await;
        assert!(started.elapsed() < Duration::from_millis(290));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        cleanup.run(&StopReason::NotSpecified).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(cleanup.is_empty());
    }

    #[tokio::test]
    async fn callbacks_receive_the_reason() {
        let cleanup = Cleanup::new();
        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        cleanup.register(move |reason| {
            async move {
                *slot.lock().unwrap() = Some(reason);
            }
            .boxed()
        });
        cleanup.run(&StopReason::ProcessDeath).await;
        assert_eq!(*seen.lock().unwrap(), Some(StopReason::ProcessDeath));
    }
}
