//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use serve_core::config::{ServerConfig, TlsConfig};
use serve_core::http::RequestToResponse;
use serve_core::lifecycle::{Server, ServerHandle};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Config for tests: ephemeral port, no OS signal listeners.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.lifecycle.stop_on_sigint = false;
    config.lifecycle.stop_on_exit = false;
    config
}

/// Start a server with `handler` on an ephemeral port.
pub async fn start_server(config: ServerConfig, handler: impl RequestToResponse) -> ServerHandle {
    Server::new(config)
        .request_to_response(handler)
        .start()
        .await
        .unwrap()
}

/// Send raw bytes and read the whole response (the request should ask the
/// server to close the connection).
pub async fn raw_request(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

/// Wait (bounded) until `condition` holds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Inline self-signed key and certificate for `localhost` / `127.0.0.1`.
pub fn self_signed_tls() -> TlsConfig {
    let rcgen::CertifiedKey { cert, signing_key } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string(), "127.0.0.1".to_string()]).unwrap();
    TlsConfig {
        certificate: Some(cert.pem()),
        private_key: Some(signing_key.serialize_pem()),
        ..TlsConfig::default()
    }
}
