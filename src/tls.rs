use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;

use pgwire::tokio::TlsAcceptor;
use pgwire::tokio::tokio_rustls::rustls::ServerConfig;

use crate::config::Config;

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("both BILLBOARD_TLS_CERT and BILLBOARD_TLS_KEY must be set, or neither")]
    HalfConfigured,
    #[error("{path}: {source}")]
    Read { path: String, source: io::Error },
    #[error("{0}: no private key found")]
    NoKey(String),
    #[error("rejected certificate or key: {0}")]
    Rustls(#[from] pgwire::tokio::tokio_rustls::rustls::Error),
}

/// TLS acceptor for the configured certificate pair, or `None` when TLS is
/// off.
pub fn load_tls_acceptor(config: &Config) -> Result<Option<TlsAcceptor>, TlsError> {
    let (cert_path, key_path) = match (config.tls_cert.as_deref(), config.tls_key.as_deref()) {
        (None, None) => return Ok(None),
        (Some(c), Some(k)) => (c, k),
        _ => return Err(TlsError::HalfConfigured),
    };
    let read_err = |path: &str| {
        let path = path.to_string();
        move |source: io::Error| TlsError::Read { path, source }
    };

    let certs: Vec<_> = rustls_pemfile::certs(&mut open(cert_path).map_err(read_err(cert_path))?)
        .collect::<Result<_, _>>()
        .map_err(read_err(cert_path))?;

    let key = rustls_pemfile::private_key(&mut open(key_path).map_err(read_err(key_path))?)
        .map_err(read_err(key_path))?
        .ok_or_else(|| TlsError::NoKey(key_path.to_string()))?;

    let mut server = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    server.alpn_protocols = vec![b"postgresql".to_vec()];

    Ok(Some(TlsAcceptor::from(Arc::new(server))))
}

fn open(path: &str) -> io::Result<BufReader<File>> {
    File::open(Path::new(path)).map(BufReader::new)
}
