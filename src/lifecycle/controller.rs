//! The running server: accept loop, request service and the stop sequence.
//!
//! # Responsibilities
//! - Accept sockets, wrap them in TLS when configured, hand them to hyper
//! - Turn dispatch outcomes into shutdown triggers (internal error, crash)
//! - Run the single, memoized stop sequence
//!
//! # Stop Sequence
//! ```text
//! stop(reason) (first caller only)
//!     → status: closing
//!     → cleanup callbacks, concurrently
//!         (connections → clients → request handlers; event subscriptions)
//!     → stop listening: end the accept loop, wait for connection tasks
//!     → status: stopped
//!     → stopped callback
//!     → every waiting caller resolves with the same reason
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use hyper::body::Incoming;
use hyper::service::service_fn;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::http::dispatch::{Dispatcher, Outcome};
use crate::http::request::adapt;
use crate::http::response::TransportBody;
use crate::lifecycle::shutdown::{Cleanup, StopReason};
use crate::lifecycle::status::{Status, StatusCell};
use crate::net::serve_connection;
use crate::tracker::ConnectionTracker;

pub(crate) type StoppedCallback = Box<dyn FnOnce(&StopReason) + Send>;

pub(crate) struct Controller {
    origin: String,
    local_addr: SocketAddr,
    status: StatusCell,
    stop_reason: Arc<OnceLock<StopReason>>,
    cleanup: Cleanup,
    stop_started: AtomicBool,
    stopped: watch::Sender<Option<StopReason>>,
    accept_shutdown: CancellationToken,
    accept_loop: Mutex<Option<JoinHandle<()>>>,
    connection_tasks: TaskTracker,
    stopped_callback: Mutex<Option<StoppedCallback>>,
}

pub(crate) struct ControllerParts {
    pub origin: String,
    pub local_addr: SocketAddr,
    pub status: StatusCell,
    pub stop_reason: Arc<OnceLock<StopReason>>,
    pub cleanup: Cleanup,
    pub stopped_callback: Option<StoppedCallback>,
}

impl Controller {
    pub(crate) fn new(parts: ControllerParts) -> Arc<Self> {
        let (stopped, _) = watch::channel(None);
        Arc::new(Self {
            origin: parts.origin,
            local_addr: parts.local_addr,
            status: parts.status,
            stop_reason: parts.stop_reason,
            cleanup: parts.cleanup,
            stop_started: AtomicBool::new(false),
            stopped,
            accept_shutdown: CancellationToken::new(),
            accept_loop: Mutex::new(None),
            connection_tasks: TaskTracker::new(),
            stopped_callback: Mutex::new(parts.stopped_callback),
        })
    }

    pub(crate) fn cleanup(&self) -> &Cleanup {
        &self.cleanup
    }

    pub(crate) fn status_cell(&self) -> &StatusCell {
        &self.status
    }

    /// Start accepting connections.
    pub(crate) fn listen(
        self: &Arc<Self>,
        listener: TcpListener,
        tls: Option<TlsAcceptor>,
        connections: ConnectionTracker,
        service: RequestService,
    ) {
        let accept = AcceptLoop {
            listener,
            tls,
            connections,
            service: Arc::new(service),
            shutdown: self.accept_shutdown.clone(),
            tasks: self.connection_tasks.clone(),
        };
        let handle = tokio::spawn(accept.run());
        *self.accept_loop.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Stop the server. Only the first call runs the stop sequence; every
    /// caller resolves with the first caller's reason.
    pub(crate) async fn stop(self: &Arc<Self>, reason: StopReason) -> StopReason {
        self.begin_stop(reason);
        self.stopped().await
    }

    /// Start the stop sequence without waiting for it. Status is `closing`
    /// when this returns, so no request dispatched afterwards reaches the
    /// handler.
    pub(crate) fn begin_stop(self: &Arc<Self>, reason: StopReason) {
        if !self.stop_started.swap(true, Ordering::SeqCst) {
            let _ = self.stop_reason.set(reason.clone());
            self.status.advance(Status::Closing);
            let controller = Arc::clone(self);
            tokio::spawn(async move { controller.run_stop(reason).await });
        }
    }

    pub(crate) fn stopped_receiver(&self) -> watch::Receiver<Option<StopReason>> {
        self.stopped.subscribe()
    }

    pub(crate) async fn stopped(&self) -> StopReason {
        let mut stopped = self.stopped.subscribe();
        let reason = stopped.wait_for(Option::is_some).await;
        reason.ok().and_then(|reason| reason.clone()).unwrap_or_default()
    }

    async fn run_stop(&self, reason: StopReason) {
        tracing::info!(origin = %self.origin, reason = %reason, "Server stopping");

        self.cleanup.run(&reason).await;
        self.stop_listening().await;

        self.status.advance(Status::Stopped);
        let callback = self
            .stopped_callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(callback) = callback {
            callback(&reason);
        }
        tracing::info!(origin = %self.origin, reason = %reason, "Server stopped");
        self.stopped.send_replace(Some(reason));
    }

    async fn stop_listening(&self) {
        self.accept_shutdown.cancel();
        let accept_loop = self.accept_loop.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(accept_loop) = accept_loop {
            if let Err(e) = accept_loop.await {
                tracing::error!(error = %e, "Accept loop failed");
            }
        }
        self.connection_tasks.close();
        self.connection_tasks.wait().await;
    }

    pub(crate) fn origin(&self) -> &str {
        &self.origin
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub(crate) fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason.get().cloned()
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.accept_shutdown.cancel();
    }
}

/// How long-lived tasks refer to the controller.
///
/// A strong reference keeps the server running without any `ServerHandle`.
#[derive(Clone)]
pub(crate) enum ControllerRef {
    Strong(Arc<Controller>),
    Weak(Weak<Controller>),
}

impl ControllerRef {
    pub(crate) fn new(controller: &Arc<Controller>, keep_alive: bool) -> Self {
        if keep_alive {
            ControllerRef::Strong(Arc::clone(controller))
        } else {
            ControllerRef::Weak(Arc::downgrade(controller))
        }
    }

    pub(crate) fn get(&self) -> Option<Arc<Controller>> {
        match self {
            ControllerRef::Strong(controller) => Some(Arc::clone(controller)),
            ControllerRef::Weak(controller) => controller.upgrade(),
        }
    }

    /// Trigger a stop without waiting for it.
    pub(crate) fn trigger_stop(&self, reason: StopReason) {
        if let Some(controller) = self.get() {
            controller.begin_stop(reason);
        }
    }
}

/// Per-request entry point shared by every connection.
pub(crate) struct RequestService {
    pub origin: String,
    pub dispatcher: Dispatcher,
    pub controller: ControllerRef,
    pub stop_on_internal_error: bool,
    pub stop_on_crash: bool,
}

impl RequestService {
    async fn call(&self, request: hyper::Request<Incoming>) -> hyper::Response<TransportBody> {
        let dispatched = self.dispatcher.dispatch(adapt(request, &self.origin)).await;

        if let Outcome::Failed { panic: Some(message) } = &dispatched.outcome {
            if self.stop_on_crash {
                self.controller.trigger_stop(StopReason::Other(message.clone()));
            }
        }
        if self.stop_on_internal_error && dispatched.is_internal_error() {
            self.controller.trigger_stop(StopReason::InternalError);
        }

        dispatched.into_transport()
    }
}

struct AcceptLoop {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    connections: ConnectionTracker,
    service: Arc<RequestService>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl AcceptLoop {
    async fn run(self) {
        loop {
            let (stream, peer) = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
            };

            let connection = match self.connections.track(peer) {
                Ok(connection) => connection,
                Err(closed) => {
                    tracing::debug!(peer_addr = %peer, reason = %closed.reason, "Connection refused while stopping");
                    continue;
                }
            };

            let service = Arc::clone(&self.service);
            let hyper_service = service_fn(move |request| {
                let service = Arc::clone(&service);
                async move { Ok::<_, Infallible>(service.call(request).await) }
            });

            match self.tls.clone() {
                None => {
                    self.tasks.spawn(serve_connection(stream, hyper_service, connection));
                }
                Some(acceptor) => {
                    self.tasks.spawn(async move {
                        let handshake = tokio::select! {
                            handshake = acceptor.accept(stream) => handshake,
                            _ = connection.closing() => return,
                        };
                        match handshake {
                            Ok(stream) => serve_connection(stream, hyper_service, connection).await,
                            Err(e) => tracing::debug!(peer_addr = %peer, error = %e, "TLS handshake failed"),
                        }
                    });
                }
            }
        }
        tracing::debug!("Accept loop stopped");
    }
}
