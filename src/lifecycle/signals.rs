//! Process lifecycle events.
//!
//! # Responsibilities
//! - Translate OS signals into `ProcessEvent`s
//! - Let the host announce events the OS does not signal (before-exit, exit)
//! - Deliver events to each server instance through its own subscription
//!
//! # Design Decisions
//! - Sources are injected per server, never process-wide singletons, so
//!   independent servers coexist and unsubscribe on their own
//! - Uses Tokio's signal handling (async-safe)
//! - SIGINT → interrupt, SIGHUP → hangup-or-death, SIGTERM → death

use std::fmt;
use std::io;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::lifecycle::shutdown::StopReason;

/// Something that happened to the host process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessEvent {
    Interrupt,
    BeforeExit,
    HangupOrDeath,
    Death,
    Exit,
}

impl ProcessEvent {
    pub fn stop_reason(self) -> StopReason {
        match self {
            ProcessEvent::Interrupt => StopReason::ProcessInterrupt,
            ProcessEvent::BeforeExit => StopReason::ProcessBeforeExit,
            ProcessEvent::HangupOrDeath => StopReason::ProcessHangupOrDeath,
            ProcessEvent::Death => StopReason::ProcessDeath,
            ProcessEvent::Exit => StopReason::ProcessExit,
        }
    }

    /// Teardown events, as opposed to an interactive interrupt.
    pub fn is_teardown(self) -> bool {
        !matches!(self, ProcessEvent::Interrupt)
    }
}

impl fmt::Display for ProcessEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProcessEvent::Interrupt => "interrupt",
            ProcessEvent::BeforeExit => "before-exit",
            ProcessEvent::HangupOrDeath => "hangup-or-death",
            ProcessEvent::Death => "death",
            ProcessEvent::Exit => "exit",
        })
    }
}

/// A source of process events.
pub trait ProcessEvents: Send + Sync + 'static {
    fn subscribe(&self) -> broadcast::Receiver<ProcessEvent>;
}

impl<T: ProcessEvents + ?Sized> ProcessEvents for Arc<T> {
    fn subscribe(&self) -> broadcast::Receiver<ProcessEvent> {
        (**self).subscribe()
    }
}

/// Events announced by hand; used by hosts and tests.
#[derive(Debug, Clone)]
pub struct ManualEvents {
    tx: broadcast::Sender<ProcessEvent>,
}

impl Default for ManualEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualEvents {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    /// Deliver `event` to every subscriber. Returns how many received it.
    pub fn notify(&self, event: ProcessEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}

impl ProcessEvents for ManualEvents {
    fn subscribe(&self) -> broadcast::Receiver<ProcessEvent> {
        self.tx.subscribe()
    }
}

/// OS signals, plus host-announced events.
///
/// Signal listeners stop when this value is dropped.
#[derive(Debug)]
pub struct OsSignals {
    events: ManualEvents,
    listener: JoinHandle<()>,
}

impl OsSignals {
    /// Register the signal listeners. Must be called inside a Tokio runtime.
    #[cfg(unix)]
    pub fn install() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sighup = signal(SignalKind::hangup())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        let events = ManualEvents::new();
        let tx = events.clone();
        let listener = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    Some(()) = sigint.recv() => ProcessEvent::Interrupt,
                    Some(()) = sighup.recv() => ProcessEvent::HangupOrDeath,
                    Some(()) = sigterm.recv() => ProcessEvent::Death,
                    else => break,
                };
                tracing::debug!(event = %event, "Process signal received");
                tx.notify(event);
            }
        });

        Ok(Self { events, listener })
    }

    /// Windows fallback: only Ctrl+C is observed.
    #[cfg(not(unix))]
    pub fn install() -> io::Result<Self> {
        let events = ManualEvents::new();
        let tx = events.clone();
        let listener = tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                tx.notify(ProcessEvent::Interrupt);
            }
        });
        Ok(Self { events, listener })
    }

    /// Announce an event the OS does not signal, such as an orderly exit.
    pub fn notify(&self, event: ProcessEvent) -> usize {
        self.events.notify(event)
    }
}

impl ProcessEvents for OsSignals {
    fn subscribe(&self) -> broadcast::Receiver<ProcessEvent> {
        self.events.subscribe()
    }
}

impl Drop for OsSignals {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// Wait on `events` and call `on_event` for the first one `accept` admits.
pub fn on_first_event<A, F>(
    mut events: broadcast::Receiver<ProcessEvent>,
    accept: A,
    on_event: F,
) -> JoinHandle<()>
where
    A: Fn(ProcessEvent) -> bool + Send + 'static,
    F: FnOnce(ProcessEvent) + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) if accept(event) => {
                    on_event(event);
                    return;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Missed process events");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[test]
    fn events_map_to_stop_reasons() {
        assert_eq!(ProcessEvent::Interrupt.stop_reason(), StopReason::ProcessInterrupt);
        assert_eq!(ProcessEvent::HangupOrDeath.stop_reason(), StopReason::ProcessHangupOrDeath);
        assert_eq!(ProcessEvent::Exit.stop_reason().as_str(), "process-exit");
        assert!(!ProcessEvent::Interrupt.is_teardown());
        assert!(ProcessEvent::BeforeExit.is_teardown());
    }

    #[tokio::test]
    async fn first_accepted_event_is_delivered_once() {
        let events = ManualEvents::new();
        let (tx, rx) = oneshot::channel();
        let watcher = on_first_event(events.subscribe(), ProcessEvent::is_teardown, move |event| {
            let _ = tx.send(event);
        });

        events.notify(ProcessEvent::Interrupt);
        events.notify(ProcessEvent::Death);
        events.notify(ProcessEvent::Exit);

        assert_eq!(rx.await.unwrap(), ProcessEvent::Death);
        watcher.await.unwrap();
    }

    #[tokio::test]
    async fn aborted_watcher_never_fires() {
        let events = ManualEvents::new();
        let (tx, mut rx) = oneshot::channel::<ProcessEvent>();
        let watcher = on_first_event(events.subscribe(), |_| true, move |event| {
            let _ = tx.send(event);
        });
        watcher.abort();
        let _ = watcher.await;

        assert_eq!(events.notify(ProcessEvent::Interrupt), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn notify_without_subscribers_is_harmless() {
        assert_eq!(ManualEvents::new().notify(ProcessEvent::Exit), 0);
    }
}
