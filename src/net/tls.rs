//! TLS configuration and certificate loading.
//!
//! Key and certificate come either inline (PEM text) or from PEM files.
//! Inline material wins when both are given.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use thiserror::Error;
use tokio_rustls::TlsAcceptor;

use crate::config::TlsConfig;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {what}: {source}")]
    Read {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("no {0} provided")]
    Missing(&'static str),

    #[error("invalid TLS material: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Build the acceptor used to wrap accepted sockets.
pub fn build_acceptor(config: &TlsConfig) -> Result<TlsAcceptor, TlsError> {
    let certs = load_certs(config)?;
    let key = load_key(config)?;

    let mut server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    server_config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

fn open(
    inline: Option<&String>,
    path: Option<&String>,
    what: &'static str,
) -> Result<Box<dyn BufRead>, TlsError> {
    if let Some(pem) = inline {
        return Ok(Box::new(io::Cursor::new(pem.clone().into_bytes())));
    }
    match path {
        Some(path) => {
            let file = File::open(path).map_err(|source| TlsError::Read { what, source })?;
            Ok(Box::new(BufReader::new(file)))
        }
        None => Err(TlsError::Missing(what)),
    }
}

fn load_certs(config: &TlsConfig) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let what = "certificate";
    let mut reader = open(config.certificate.as_ref(), config.cert_path.as_ref(), what)?;
    let certs = rustls_pemfile::certs(&mut *reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read { what, source })?;
    if certs.is_empty() {
        return Err(TlsError::Missing(what));
    }
    Ok(certs)
}

fn load_key(config: &TlsConfig) -> Result<PrivateKeyDer<'static>, TlsError> {
    let what = "private key";
    let mut reader = open(config.private_key.as_ref(), config.key_path.as_ref(), what)?;
    rustls_pemfile::private_key(&mut *reader)
        .map_err(|source| TlsError::Read { what, source })?
        .ok_or(TlsError::Missing(what))
}
