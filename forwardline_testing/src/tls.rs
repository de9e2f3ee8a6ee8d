//! Throw-away TLS identities.

use std::{
    fs,
    io,
    path::{Path, PathBuf},
    process,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use forwardline::{TlsConfig, TlsIdentity};
use rcgen::generate_simple_self_signed;
use rustls::{
    ClientConfig,
    RootCertStore,
    pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer},
};

/// Self-signed certificate for `localhost` with its private key.
pub struct TestIdentity {
    cert: CertificateDer<'static>,
    key: PrivatePkcs8KeyDer<'static>,
    cert_pem: String,
    key_pem: String,
}

impl TestIdentity {
    /// Generate a fresh identity.
    ///
    /// # Panics
    ///
    /// Panics if key generation fails.
    #[must_use]
    pub fn generate() -> Self {
        let certified = generate_simple_self_signed(vec!["localhost".into()])
            .expect("generate self-signed certificate");
        Self {
            cert: CertificateDer::from(certified.cert.der().to_vec()),
            key: PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()),
            cert_pem: certified.cert.pem(),
            key_pem: certified.key_pair.serialize_pem(),
        }
    }

    /// DER certificate, usable as a trust root.
    #[must_use]
    pub fn certificate(&self) -> CertificateDer<'static> { self.cert.clone() }

    /// Server TLS settings presenting this identity from memory.
    #[must_use]
    pub fn server_config(&self) -> TlsConfig {
        TlsConfig::new(TlsIdentity::Der {
            chain: vec![self.cert.clone()],
            key: PrivateKeyDer::Pkcs8(self.key.clone_key()),
        })
    }

    /// Client settings trusting only this identity.
    ///
    /// # Panics
    ///
    /// Panics if the certificate cannot be added to the root store.
    #[must_use]
    pub fn client_config(&self) -> Arc<ClientConfig> {
        let mut roots = RootCertStore::empty();
        roots.add(self.cert.clone()).expect("trust test certificate");
        let config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .expect("client protocol versions")
        .with_root_certificates(roots)
        .with_no_client_auth();
        Arc::new(config)
    }

    /// Write the certificate and key as PEM files into a fresh directory
    /// under the system temp dir.
    ///
    /// # Errors
    ///
    /// Returns any filesystem error.
    pub fn write_pem_files(&self) -> io::Result<PemFiles> {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        let dir = std::env::temp_dir().join(format!(
            "forwardline-tls-{}-{}",
            process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir_all(&dir)?;
        let cert = dir.join("server.crt");
        let key = dir.join("server.key");
        fs::write(&cert, &self.cert_pem)?;
        fs::write(&key, &self.key_pem)?;
        Ok(PemFiles { dir, cert, key })
    }
}

/// PEM files removed when dropped.
pub struct PemFiles {
    dir: PathBuf,
    cert: PathBuf,
    key: PathBuf,
}

impl PemFiles {
    #[must_use]
    pub fn cert(&self) -> &Path { &self.cert }

    #[must_use]
    pub fn key(&self) -> &Path { &self.key }
}

impl Drop for PemFiles {
    fn drop(&mut self) { let _ = fs::remove_dir_all(&self.dir); }
}
