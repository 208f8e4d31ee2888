//! TCP listener binding and origin formatting.
//!
//! # Responsibilities
//! - Bind the configured ip/port
//! - Report the origin string handlers see in `Request::origin`
//!
//! # Design Decisions
//! - An empty ip binds every IPv4 interface
//! - The origin of an unspecified address points at the loopback so it is
//!   usable as a URL from the same host

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::validation::{parse_ip, ValidationError};
use crate::config::{ListenerConfig, Protocol};

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error(transparent)]
    Address(#[from] ValidationError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Address the listener binds for `config`.
pub fn bind_address(config: &ListenerConfig) -> Result<SocketAddr, ValidationError> {
    Ok(SocketAddr::new(parse_ip(&config.ip)?, config.port))
}

/// Bind the listener socket; returns it with the address actually bound.
pub async fn bind(config: &ListenerConfig) -> Result<(TcpListener, SocketAddr), ListenerError> {
    let addr = bind_address(config)?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ListenerError::Bind { addr, source })?;
    let local_addr = listener
        .local_addr()
        .map_err(|source| ListenerError::Bind { addr, source })?;

    tracing::debug!(address = %local_addr, "Listener bound");
    Ok((listener, local_addr))
}

/// `protocol://host:port`, with unspecified hosts replaced by the loopback.
pub fn origin_as_string(protocol: Protocol, ip: IpAddr, port: u16) -> String {
    let host = match ip {
        ip if ip.is_unspecified() && ip.is_ipv4() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        ip if ip.is_unspecified() => IpAddr::V6(std::net::Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    match host {
        IpAddr::V4(v4) => format!("{protocol}://{v4}:{port}"),
        IpAddr::V6(v6) => format!("{protocol}://[{v6}]:{port}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_formats() {
        let ip = |s: &str| s.parse::<IpAddr>().unwrap();
        assert_eq!(origin_as_string(Protocol::Http, ip("0.0.0.0"), 80), "http://127.0.0.1:80");
        assert_eq!(origin_as_string(Protocol::Https, ip("10.0.0.2"), 443), "https://10.0.0.2:443");
        assert_eq!(origin_as_string(Protocol::Http, ip("::1"), 8080), "http://[::1]:8080");
        assert_eq!(origin_as_string(Protocol::Http, ip("::"), 8080), "http://[::1]:8080");
    }

    #[tokio::test]
    async fn binds_ephemeral_port() {
        let config = ListenerConfig::default();
        let (listener, local_addr) = bind(&config).await.unwrap();
        assert_ne!(local_addr.port(), 0);
        assert_eq!(listener.local_addr().unwrap(), local_addr);
    }

    #[tokio::test]
    async fn port_in_use_is_bind_error() {
        let (_first, first_addr) = bind(&ListenerConfig::default()).await.unwrap();
        let config = ListenerConfig {
            port: first_addr.port(),
            ..ListenerConfig::default()
        };
        assert!(matches!(bind(&config).await, Err(ListenerError::Bind { .. })));
    }

    #[test]
    fn empty_ip_binds_every_interface() {
        let config = ListenerConfig {
            ip: String::new(),
            port: 9000,
            ..ListenerConfig::default()
        };
        assert_eq!(bind_address(&config).unwrap(), "0.0.0.0:9000".parse().unwrap());
    }
}
