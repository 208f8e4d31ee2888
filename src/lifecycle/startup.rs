//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration before anything is created
//! - Free the port, build TLS material, install trackers and cleanup hooks
//! - Bind the listener and begin accepting traffic
//! - Return the `ServerHandle` used to observe and stop the server
//!
//! # Design Decisions
//! - Fail fast: any startup error rejects `start`, nothing is retried
//! - Cancellation before `opened` aborts the start; after `opened` it is one
//!   more way to call `stop`
//! - Listeners start last (traffic only when ready)

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use futures_util::FutureExt;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::{validate_config, Protocol, ServerConfig, ValidationError};
use crate::http::dispatch::{error_renderer_for, not_implemented, Dispatcher, ErrorRenderer, InternalError, RequestToResponse};
use crate::http::response::ResponseProperties;
use crate::lifecycle::controller::{Controller, ControllerParts, ControllerRef, RequestService};
use crate::lifecycle::shutdown::{Cleanup, StopReason};
use crate::lifecycle::signals::{on_first_event, OsSignals, ProcessEvent, ProcessEvents};
use crate::lifecycle::status::{ServingState, Status, StatusCell};
use crate::net::port::EvictError;
use crate::net::{bind, build_acceptor, origin_as_string, KillPort, ListenerError, PortEvictor, TlsError};
use crate::tracker::{ClientTracker, ConnectionTracker, RequestHandlerTracker};

/// Reason used when the cancellation token fires after the server opened.
pub const CANCELLED_REASON: &str = "cancelled";

/// Errors that reject `Server::start`.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("invalid configuration: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))]
    Config(Vec<ValidationError>),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("failed to free port {port}: {source}")]
    Evict {
        port: u16,
        #[source]
        source: EvictError,
    },

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("failed to listen for process events: {0}")]
    ProcessEvents(#[source] std::io::Error),

    #[error("start cancelled")]
    Cancelled,
}

type StartedCallback = Box<dyn FnOnce(&str) + Send>;

/// Builder for a server instance.
///
/// Serializable options come from `ServerConfig`; code-only options (handler,
/// callbacks, collaborators) are set here.
pub struct Server {
    config: ServerConfig,
    handler: Arc<dyn RequestToResponse>,
    error_renderer: Option<ErrorRenderer>,
    started_callback: Option<StartedCallback>,
    stopped_callback: Option<Box<dyn FnOnce(&StopReason) + Send>>,
    cancellation: CancellationToken,
    process_events: Option<Arc<dyn ProcessEvents>>,
    port_evictor: Arc<dyn PortEvictor>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let error_renderer = error_renderer_for(&config.errors);
        Self {
            config,
            handler: Arc::new(not_implemented),
            error_renderer,
            started_callback: None,
            stopped_callback: None,
            cancellation: CancellationToken::new(),
            process_events: None,
            port_evictor: Arc::new(KillPort),
        }
    }

    /// The application handler. Defaults to answering every request with 501.
    pub fn request_to_response(mut self, handler: impl RequestToResponse) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    /// Override how a caught handler failure is rendered.
    pub fn internal_error_to_response_properties<F>(mut self, renderer: F) -> Self
    where
        F: Fn(&InternalError) -> ResponseProperties + Send + Sync + 'static,
    {
        self.error_renderer = Some(Arc::new(renderer));
        self
    }

    /// Called with the origin once the server is opened.
    pub fn started_callback(mut self, callback: impl FnOnce(&str) + Send + 'static) -> Self {
        self.started_callback = Some(Box::new(callback));
        self
    }

    /// Called with the stop reason once the server is stopped.
    pub fn stopped_callback(mut self, callback: impl FnOnce(&StopReason) + Send + 'static) -> Self {
        self.stopped_callback = Some(Box::new(callback));
        self
    }

    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Source of process events. Defaults to OS signals when the lifecycle
    /// configuration listens to any.
    pub fn process_events(mut self, events: impl ProcessEvents) -> Self {
        self.process_events = Some(Arc::new(events));
        self
    }

    /// Strategy used to free the port when `force_port` is set.
    pub fn port_evictor(mut self, evictor: impl PortEvictor) -> Self {
        self.port_evictor = Arc::new(evictor);
        self
    }

    /// Start the server.
    pub async fn start(self) -> Result<ServerHandle, StartError> {
        validate_config(&self.config).map_err(StartError::Config)?;
        let listener_config = &self.config.listener;
        let lifecycle = &self.config.lifecycle;
        let protocol: Protocol = listener_config
            .protocol
            .parse()
            .map_err(|e| StartError::Config(vec![e]))?;
        if self.cancellation.is_cancelled() {
            return Err(StartError::Cancelled);
        }

        let tls = match (protocol, &listener_config.tls) {
            (Protocol::Http, _) => None,
            (Protocol::Https, Some(tls)) => Some(build_acceptor(tls)?),
            (Protocol::Https, None) => return Err(TlsError::Missing("private key and certificate").into()),
        };

        if listener_config.force_port {
            let port = listener_config.port;
            tokio::select! {
                _ = self.cancellation.cancelled() => return Err(StartError::Cancelled),
                evicted = self.port_evictor.evict(port) => {
                    evicted.map_err(|source| StartError::Evict { port, source })?;
                }
            }
        }

        let status = StatusCell::new();
        let stop_reason = Arc::new(OnceLock::new());
        let connections = ConnectionTracker::new();
        let clients = ClientTracker::new();
        let handlers = RequestHandlerTracker::new();

        let cleanup = Cleanup::new();
        {
            let connections = connections.clone();
            let clients = clients.clone();
            let handlers = handlers.clone();
            let abandon = lifecycle.abandon_in_flight_handlers;
            cleanup.register(move |reason| {
                async move {
                    connections.stop(&reason);
                    clients.stop(&reason);
                    handlers.stop(&reason, abandon).await;
                }
                .boxed()
            });
        }

        // Subscribe now so events raised while binding are not lost.
        let event_source = match (&self.process_events, lifecycle.stop_on_sigint || lifecycle.stop_on_exit) {
            (_, false) => None,
            (Some(events), true) => Some(Arc::clone(events)),
            (None, true) => Some(Arc::new(OsSignals::install().map_err(StartError::ProcessEvents)?) as Arc<dyn ProcessEvents>),
        };
        let event_subscription = event_source.as_ref().map(|source| source.subscribe());

        let (listener, local_addr) = tokio::select! {
            _ = self.cancellation.cancelled() => return Err(StartError::Cancelled),
            bound = bind(listener_config) => bound?,
        };
        let origin = origin_as_string(protocol, local_addr.ip(), local_addr.port());

        let dispatcher = Dispatcher::new(self.handler, ServingState::new(status.subscribe(), Arc::clone(&stop_reason)))
            .with_policy(self.config.access_control.clone())
            .with_error_renderer(self.error_renderer)
            .with_trackers(clients, handlers);

        let controller = Controller::new(ControllerParts {
            origin: origin.clone(),
            local_addr,
            status,
            stop_reason,
            cleanup,
            stopped_callback: self.stopped_callback,
        });
        let keep_alive = listener_config.keep_process_alive;

        if let (Some(source), Some(subscription)) = (event_source, event_subscription) {
            subscribe_process_events(&controller, source, subscription, lifecycle.stop_on_sigint, lifecycle.stop_on_exit);
        }

        controller.status_cell().advance(Status::Opened);
        controller.listen(
            listener,
            tls,
            connections,
            RequestService {
                origin: origin.clone(),
                dispatcher,
                controller: ControllerRef::new(&controller, keep_alive),
                stop_on_internal_error: lifecycle.stop_on_internal_error,
                stop_on_crash: lifecycle.stop_on_crash,
            },
        );

        tracing::info!(origin = %origin, "Server started");
        watch_cancellation(&controller, self.cancellation);
        if let Some(callback) = self.started_callback {
            callback(&origin);
        }

        Ok(ServerHandle {
            inner: Arc::new(HandleGuard {
                controller,
                stop_on_drop: !keep_alive,
            }),
        })
    }
}

/// Route process events to `stop`, and unsubscribe during cleanup.
fn subscribe_process_events(
    controller: &Arc<Controller>,
    source: Arc<dyn ProcessEvents>,
    subscription: tokio::sync::broadcast::Receiver<ProcessEvent>,
    stop_on_sigint: bool,
    stop_on_exit: bool,
) {
    let target = Arc::downgrade(controller);
    let watcher = on_first_event(
        subscription,
        move |event| match event {
            ProcessEvent::Interrupt => stop_on_sigint,
            _ => stop_on_exit,
        },
        move |event| {
            if let Some(controller) = target.upgrade() {
                controller.begin_stop(event.stop_reason());
            }
        },
    );
    controller.cleanup().register(move |_reason| {
        watcher.abort();
        drop(source);
        futures_util::future::ready(()).boxed()
    });
}

/// Cancellation after `opened` is a stop request.
fn watch_cancellation(controller: &Arc<Controller>, cancellation: CancellationToken) {
    let target = Arc::downgrade(controller);
    let mut stopped = controller.stopped_receiver();
    tokio::spawn(async move {
        tokio::select! {
            _ = cancellation.cancelled() => {}
            _ = async { let _ = stopped.wait_for(Option::is_some).await; } => return,
        }
        if let Some(controller) = target.upgrade() {
            controller.begin_stop(StopReason::Other(CANCELLED_REASON.to_string()));
        }
    });
}

struct HandleGuard {
    controller: Arc<Controller>,
    stop_on_drop: bool,
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        if !self.stop_on_drop || self.controller.status_cell().get() >= Status::Closing {
            return;
        }
        if tokio::runtime::Handle::try_current().is_ok() {
            self.controller.begin_stop(StopReason::NotSpecified);
        }
    }
}

/// A started server.
///
/// Cloning is cheap. With `keep_process_alive = false` the server stops when
/// the last clone is dropped.
#[derive(Clone)]
pub struct ServerHandle {
    inner: Arc<HandleGuard>,
}

impl ServerHandle {
    pub fn status(&self) -> Status {
        self.inner.controller.status_cell().get()
    }

    /// Observe status transitions.
    pub fn subscribe_status(&self) -> watch::Receiver<Status> {
        self.inner.controller.status_cell().subscribe()
    }

    /// `protocol://host:port` the server is reachable at.
    pub fn origin(&self) -> &str {
        self.inner.controller.origin()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.controller.local_addr()
    }

    /// Reason of the stop in progress or completed, if any.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.inner.controller.stop_reason()
    }

    /// Stop the server and wait until it is stopped.
    ///
    /// Concurrent and repeated calls share one stop sequence; all of them
    /// resolve with the reason of the first call.
    pub async fn stop(&self, reason: impl Into<StopReason>) -> StopReason {
        self.inner.controller.stop(reason.into()).await
    }

    /// Resolves once the server is stopped.
    pub async fn stopped(&self) -> StopReason {
        self.inner.controller.stopped().await
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("origin", &self.origin())
            .field("status", &self.status())
            .finish()
    }
}
