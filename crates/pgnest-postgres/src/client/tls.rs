//! TLS material for server connections.
//!
//! PEM files are read synchronously whenever a pool or a dedicated connection
//! is built. Without the `tls` feature, configured TLS material is rejected.

#[cfg(not(feature = "tls"))]
pub(crate) use disabled::make_tls_connector;
#[cfg(feature = "tls")]
pub(crate) use enabled::make_tls_connector;

#[cfg(feature = "tls")]
mod enabled {
    use std::fs::File;
    use std::io::BufReader;
    use std::path::Path;

    use rustls::pki_types::{CertificateDer, PrivateKeyDer};
    use rustls::{ClientConfig, RootCertStore};
    use tokio_postgres_rustls::MakeRustlsConnect;

    use crate::client::PgConfig;
    use crate::{PgError, PgResult, TRACING_TARGET_CONNECTION};

    fn open(path: &Path) -> PgResult<BufReader<File>> {
        let file = File::open(path).map_err(|source| PgError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(BufReader::new(file))
    }

    fn read_certs(path: &Path) -> PgResult<Vec<CertificateDer<'static>>> {
        let certs = rustls_pemfile::certs(&mut open(path)?)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| PgError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        if certs.is_empty() {
            return Err(PgError::Config(format!(
                "no certificate found in {}",
                path.display()
            )));
        }

        Ok(certs)
    }

    fn read_key(path: &Path) -> PgResult<PrivateKeyDer<'static>> {
        rustls_pemfile::private_key(&mut open(path)?)
            .map_err(|source| PgError::Io {
                path: path.to_path_buf(),
                source,
            })?
            .ok_or_else(|| PgError::Config(format!("no private key found in {}", path.display())))
    }

    /// Builds a rustls connector from the configured PEM files.
    ///
    /// Returns `None` when no TLS material is configured.
    pub(crate) fn make_tls_connector(config: &PgConfig) -> PgResult<Option<MakeRustlsConnect>> {
        if !config.has_tls_material() {
            return Ok(None);
        }

        let Some(root_cert) = &config.ssl_root_cert else {
            return Err(PgError::Config(
                "ssl_root_cert is required when a client certificate or key is set".into(),
            ));
        };

        let mut roots = RootCertStore::empty();
        for cert in read_certs(root_cert)? {
            roots
                .add(cert)
                .map_err(|e| PgError::Config(format!("invalid root certificate: {e}")))?;
        }

        let builder = ClientConfig::builder().with_root_certificates(roots);
        let tls_config = match (&config.ssl_cert, &config.ssl_key) {
            (Some(cert), Some(key)) => builder
                .with_client_auth_cert(read_certs(cert)?, read_key(key)?)
                .map_err(|e| PgError::Config(format!("invalid client certificate: {e}")))?,
            (None, None) => builder.with_no_client_auth(),
            _ => {
                return Err(PgError::Config(
                    "ssl_cert and ssl_key must be set together".into(),
                ));
            }
        };

        tracing::debug!(
            target: TRACING_TARGET_CONNECTION,
            client_auth = config.ssl_cert.is_some(),
            "TLS connector configured"
        );

        Ok(Some(MakeRustlsConnect::new(tls_config)))
    }
}

#[cfg(not(feature = "tls"))]
mod disabled {
    use crate::client::PgConfig;
    use crate::{PgError, PgResult};

    /// Rejects TLS material, which requires the `tls` feature.
    pub(crate) fn make_tls_connector(config: &PgConfig) -> PgResult<Option<tokio_postgres::NoTls>> {
        if config.has_tls_material() {
            return Err(PgError::Config(
                "TLS material is configured but the `tls` feature is disabled".into(),
            ));
        }

        Ok(None)
    }

    #[cfg(test)]
    mod tests {
        use std::path::PathBuf;

        use super::*;

        #[test]
        fn test_tls_material_requires_feature() {
            let config = PgConfig::default().with_ssl_root_cert(PathBuf::from("/tmp/ca.pem"));
            assert!(matches!(make_tls_connector(&config), Err(PgError::Config(_))));
            assert!(make_tls_connector(&PgConfig::default()).unwrap().is_none());
        }
    }
}
