//! Per-connection HTTP/1.1 serving with graceful close.
//!
//! # Responsibilities
//! - Drive hyper's connection state machine over any byte stream (plain TCP
//!   or TLS)
//! - Switch the connection to graceful shutdown once its tracker asks it to
//!   close: the response in flight is finished, nothing new is read
//!
//! # Design Decisions
//! - Connection errors are logged, never propagated: one broken client must
//!   not affect the accept loop

use std::error::Error as StdError;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::HttpService;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::http::response::TransportBody;
use crate::tracker::connections::TrackedConnection;

/// Serve HTTP/1.1 on `io` until the peer hangs up or `connection` is closed.
pub async fn serve_connection<I, S>(io: I, service: S, connection: TrackedConnection)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    S: HttpService<Incoming, ResBody = TransportBody>,
    S::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    let conn = http1::Builder::new()
        .keep_alive(true)
        .serve_connection(TokioIo::new(io), service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = connection.closing() => {
            tracing::trace!(connection_id = %connection.id(), "Closing connection gracefully");
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };

    if let Err(e) = result {
        if !e.is_incomplete_message() {
            tracing::debug!(connection_id = %connection.id(), error = %e, "Connection error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::response::{Response, ResponseProperties};
    use crate::lifecycle::shutdown::StopReason;
    use crate::tracker::ConnectionTracker;
    use hyper::service::service_fn;
    use std::convert::Infallible;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn serves_then_closes_on_stop() {
        let tracker = ConnectionTracker::new();
        let connection = tracker.track("127.0.0.1:1".parse().unwrap()).unwrap();
        let (mut client, server) = tokio::io::duplex(4096);

        let service = service_fn(|_req: hyper::Request<Incoming>| async {
            let response = Response::from(ResponseProperties::new().status(200).body("ok"));
            Ok::<_, Infallible>(response.into_transport(false).unwrap())
        });
        let task = tokio::spawn(serve_connection(server, service, connection));

        client
            .write_all(b"GET / HTTP/1.1\r\nhost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut buf = vec![0u8; 1024];
        let n = client.read(&mut buf).await.unwrap();
        let head = String::from_utf8_lossy(&buf[..n]);
        assert!(head.starts_with("HTTP/1.1 200 OK"), "{head}");

        tracker.stop(&StopReason::NotSpecified);
        task.await.unwrap();
        assert_eq!(tracker.active_count(), 0);
    }
}
