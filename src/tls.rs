//! TLS certificate configuration: a path to a PEM certificate and key,
//! self-signed certificates allowed, peer verification left off. Only
//! compiled with the `tls` feature. Built directly on
//! `rustls::ServerConfig` (see DESIGN.md for why `native-tls` is dropped
//! from the dependency stack).

use crate::error::{Error, Result, TlsError};
use std::path::Path;
use std::sync::Arc;

/// Where to load the server certificate chain and private key from.
#[derive(Debug, Clone)]
pub struct TlsCertConfig {
    pub cert_path: std::path::PathBuf,
    pub key_path: std::path::PathBuf,
}

/// Build a `rustls::ServerConfig` from a PEM certificate chain and PEM
/// private key. No client certificate verification is performed — server
/// mode here never authenticates the peer.
pub fn load_server_config(config: &TlsCertConfig) -> Result<Arc<rustls::ServerConfig>> {
    let cert_file = std::fs::File::open(&config.cert_path)
        .map_err(|e| Error::Tls(TlsError::Cert(format!("{}: {e}", config.cert_path.display()))))?;
    let key_file = std::fs::File::open(&config.key_path)
        .map_err(|e| Error::Tls(TlsError::Cert(format!("{}: {e}", config.key_path.display()))))?;

    let certs = rustls_pemfile::certs(&mut std::io::BufReader::new(cert_file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(TlsError::Cert(e.to_string())))?;
    if certs.is_empty() {
        return Err(Error::Tls(TlsError::Cert("no certificates found in PEM file".into())));
    }

    let key = rustls_pemfile::private_key(&mut std::io::BufReader::new(key_file))
        .map_err(|e| Error::Tls(TlsError::Cert(e.to_string())))?
        .ok_or_else(|| Error::Tls(TlsError::Cert("no private key found in PEM file".into())))?;

    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::Tls(TlsError::Rustls(e)))?;

    Ok(Arc::new(server_config))
}

/// Is `path` non-empty, i.e. does the configuration request TLS at all?
pub fn cert_config_from_paths(
    cert: impl AsRef<Path>,
    key: impl AsRef<Path>,
) -> TlsCertConfig {
    TlsCertConfig { cert_path: cert.as_ref().to_path_buf(), key_path: key.as_ref().to_path_buf() }
}
