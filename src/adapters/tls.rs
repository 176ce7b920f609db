//! TLS acceptor construction for the secure protocols.
use std::{fs::File, io::BufReader, path::Path, sync::Arc};

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;

use crate::{
    config::ServerSettings,
    ports::{ServerPortError, ServerPortResult},
};

/// Build the acceptor for `settings`, `None` for cleartext protocols.
///
/// ALPN follows the protocol: `http/1.1` for HTTPS, `h2` then `http/1.1` for HTTP/2.
pub fn build_acceptor(settings: &ServerSettings) -> ServerPortResult<Option<TlsAcceptor>> {
    if !settings.protocol.is_secure() {
        return Ok(None);
    }
    let tls = settings.tls.as_ref().ok_or_else(|| {
        ServerPortError::Tls(format!(
            "protocol {} requires a certificate and key",
            settings.protocol
        ))
    })?;

    let certs = load_certs(&tls.cert_path)?;
    let key = load_key(&tls.key_path)?;

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ServerPortError::Tls(format!("unsupported protocol versions: {e}")))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerPortError::Tls(format!("invalid certificate or key: {e}")))?;
    config.alpn_protocols = settings.protocol.alpn_protocols();

    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}

fn open(path: &Path, what: &str) -> ServerPortResult<BufReader<File>> {
    File::open(path).map(BufReader::new).map_err(|e| {
        ServerPortError::Tls(format!("failed to open {what} {}: {e}", path.display()))
    })
}

fn load_certs(path: &Path) -> ServerPortResult<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut open(path, "certificate")?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            ServerPortError::Tls(format!("failed to parse certificate {}: {e}", path.display()))
        })?;
    if certs.is_empty() {
        return Err(ServerPortError::Tls(format!(
            "no certificate found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> ServerPortResult<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut open(path, "private key")?)
        .map_err(|e| {
            ServerPortError::Tls(format!("failed to parse private key {}: {e}", path.display()))
        })?
        .ok_or_else(|| {
            ServerPortError::Tls(format!("no private key found in {}", path.display()))
        })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;
    use crate::config::Protocol;

    fn pem_files() -> (NamedTempFile, NamedTempFile) {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let mut cert_file = NamedTempFile::new().unwrap();
        cert_file.write_all(cert.cert.pem().as_bytes()).unwrap();
        let mut key_file = NamedTempFile::new().unwrap();
        key_file
            .write_all(cert.signing_key.serialize_pem().as_bytes())
            .unwrap();
        (cert_file, key_file)
    }

    #[test]
    fn test_cleartext_has_no_acceptor() {
        let settings = ServerSettings::default();
        assert!(build_acceptor(&settings).unwrap().is_none());
    }

    #[test]
    fn test_builds_acceptor_for_secure_protocols() {
        let (cert, key) = pem_files();
        for protocol in [Protocol::Https, Protocol::Http2] {
            let settings = ServerSettings::builder()
                .protocol(protocol)
                .tls(cert.path(), key.path())
                .build()
                .unwrap();
            assert!(build_acceptor(&settings).unwrap().is_some());
        }
    }

    #[test]
    fn test_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ServerSettings::builder()
            .protocol(Protocol::Https)
            .tls(dir.path().join("cert.pem"), dir.path().join("key.pem"))
            .build()
            .unwrap();
        assert!(matches!(
            build_acceptor(&settings),
            Err(ServerPortError::Tls(_))
        ));
    }

    #[test]
    fn test_file_without_key() {
        let (cert, _key) = pem_files();
        let settings = ServerSettings::builder()
            .protocol(Protocol::Https)
            .tls(cert.path(), cert.path())
            .build()
            .unwrap();
        assert!(matches!(
            build_acceptor(&settings),
            Err(ServerPortError::Tls(message)) if message.contains("no private key")
        ));
    }
}
