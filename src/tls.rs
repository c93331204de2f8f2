use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::sync::Arc;

use pgwire::tokio::tokio_rustls::rustls::ServerConfig;
use pgwire::tokio::TlsAcceptor;

pub const CERT_ENV: &str = "ROOMCAL_TLS_CERT";
pub const KEY_ENV: &str = "ROOMCAL_TLS_KEY";

/// Build the acceptor from `ROOMCAL_TLS_CERT` / `ROOMCAL_TLS_KEY`.
pub fn acceptor_from_env() -> io::Result<Option<TlsAcceptor>> {
    let cert = std::env::var(CERT_ENV).ok();
    let key = std::env::var(KEY_ENV).ok();
    load_tls_acceptor(cert.as_deref(), key.as_deref())
}

/// PEM certificate chain plus private key. Both paths or neither.
pub fn load_tls_acceptor(
    cert_path: Option<&str>,
    key_path: Option<&str>,
) -> io::Result<Option<TlsAcceptor>> {
    let (cert_path, key_path) = match (cert_path, key_path) {
        (None, None) => return Ok(None),
        (Some(c), Some(k)) => (c, k),
        _ => {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("both {CERT_ENV} and {KEY_ENV} must be set, or neither"),
            ));
        }
    };

    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
        .collect::<Result<_, _>>()?;
    if certs.is_empty() {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("no certificates found in {cert_path}"),
        ));
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "no private key found in key file"))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;

    config.alpn_protocols = vec![b"postgresql".to_vec()];
    tracing::info!("TLS certificate loaded from {cert_path}");

    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}
