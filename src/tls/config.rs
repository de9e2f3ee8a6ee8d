//! TLS configuration and its compilation into a `rustls` server config.

use std::{
    fmt,
    fs,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::debug;
use rustls::{
    RootCertStore,
    SupportedProtocolVersion,
    crypto::{CryptoProvider, ring},
    pki_types::{CertificateDer, PrivateKeyDer},
    server::WebPkiClientVerifier,
};
use thiserror::Error;

/// Protocol versions the server may negotiate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TlsVersion {
    /// TLS 1.2.
    Tls12,
    /// TLS 1.3.
    Tls13,
}

impl TlsVersion {
    fn rustls(self) -> &'static SupportedProtocolVersion {
        match self {
            Self::Tls12 => &rustls::version::TLS12,
            Self::Tls13 => &rustls::version::TLS13,
        }
    }
}

/// Certificate chain and private key presented to clients.
pub enum TlsIdentity {
    /// PEM files on disk, read when the configuration is validated.
    PemFiles {
        /// Certificate chain, leaf first.
        cert: PathBuf,
        /// Private key (PKCS#8, PKCS#1 or SEC1).
        key: PathBuf,
    },
    /// DER material already in memory.
    Der {
        /// Certificate chain, leaf first.
        chain: Vec<CertificateDer<'static>>,
        /// Private key matching the leaf certificate.
        key: PrivateKeyDer<'static>,
    },
}

impl Clone for TlsIdentity {
    fn clone(&self) -> Self {
        match self {
            Self::PemFiles { cert, key } => Self::PemFiles {
                cert: cert.clone(),
                key: key.clone(),
            },
            Self::Der { chain, key } => Self::Der {
                chain: chain.clone(),
                key: key.clone_key(),
            },
        }
    }
}

impl fmt::Debug for TlsIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PemFiles { cert, key } => f
                .debug_struct("PemFiles")
                .field("cert", cert)
                .field("key", key)
                .finish(),
            Self::Der { chain, .. } => f
                .debug_struct("Der")
                .field("chain_len", &chain.len())
                .finish_non_exhaustive(),
        }
    }
}

/// Client certificate policy.
#[derive(Clone, Debug, Default)]
pub enum ClientAuth {
    /// Clients are not asked for a certificate.
    #[default]
    None,
    /// Clients must present a certificate chaining to one of these roots.
    Required(Vec<CertificateDer<'static>>),
}

/// TLS settings for a Forward server.
///
/// ```
/// use forwardline::tls::{TlsConfig, TlsVersion};
///
/// let config = TlsConfig::from_pem_files("server.crt", "server.key");
/// assert_eq!(config.min_version, TlsVersion::Tls12);
/// assert_eq!(config.max_version, TlsVersion::Tls13);
/// ```
#[derive(Clone, Debug)]
pub struct TlsConfig {
    /// Server identity.
    pub identity: TlsIdentity,
    /// Lowest protocol version accepted.
    pub min_version: TlsVersion,
    /// Highest protocol version accepted.
    pub max_version: TlsVersion,
    /// IANA names of the permitted cipher suites, e.g.
    /// `TLS13_AES_256_GCM_SHA384`. `None` keeps the provider defaults.
    pub cipher_suites: Option<Vec<String>>,
    /// Client certificate policy.
    pub client_auth: ClientAuth,
}

impl TlsConfig {
    /// Configuration with default constraints for the given identity.
    #[must_use]
    pub fn new(identity: TlsIdentity) -> Self {
        Self {
            identity,
            min_version: TlsVersion::Tls12,
            max_version: TlsVersion::Tls13,
            cipher_suites: None,
            client_auth: ClientAuth::None,
        }
    }

    /// Configuration reading its identity from PEM files.
    #[must_use]
    pub fn from_pem_files(cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        Self::new(TlsIdentity::PemFiles {
            cert: cert.into(),
            key: key.into(),
        })
    }

    /// Compile into a `rustls` server configuration using the `ring`
    /// provider.
    ///
    /// # Errors
    ///
    /// Returns a [`TlsConfigError`] if the identity cannot be loaded, the
    /// version range is inverted, no cipher suite survives filtering, or
    /// `rustls` rejects the resulting combination.
    pub fn compile(&self) -> Result<Arc<rustls::ServerConfig>, TlsConfigError> {
        if self.min_version > self.max_version {
            return Err(TlsConfigError::VersionRange {
                min: self.min_version,
                max: self.max_version,
            });
        }
        let versions: Vec<&'static SupportedProtocolVersion> = [TlsVersion::Tls12, TlsVersion::Tls13]
            .into_iter()
            .filter(|v| (self.min_version..=self.max_version).contains(v))
            .map(TlsVersion::rustls)
            .collect();

        let mut provider = ring::default_provider();
        if let Some(names) = &self.cipher_suites {
            provider
                .cipher_suites
                .retain(|suite| names.iter().any(|n| *n == format!("{:?}", suite.suite())));
        }
        provider
            .cipher_suites
            .retain(|suite| versions.iter().any(|v| suite.version().version == v.version));
        if provider.cipher_suites.is_empty() {
            return Err(TlsConfigError::NoCipherSuites);
        }
        let provider = Arc::new(provider);

        let (chain, key) = self.load_identity()?;
        let builder = rustls::ServerConfig::builder_with_provider(Arc::clone(&provider))
            .with_protocol_versions(&versions)
            .map_err(TlsConfigError::Rejected)?;
        let builder = match &self.client_auth {
            ClientAuth::None => builder.with_no_client_auth(),
            ClientAuth::Required(roots) => {
                builder.with_client_cert_verifier(client_verifier(roots, provider)?)
            }
        };
        let config = builder
            .with_single_cert(chain, key)
            .map_err(TlsConfigError::Rejected)?;
        debug!(
            "tls configuration compiled: min_version={:?}, max_version={:?}, client_auth={}",
            self.min_version,
            self.max_version,
            matches!(self.client_auth, ClientAuth::Required(_)),
        );
        Ok(Arc::new(config))
    }

    fn load_identity(
        &self,
    ) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), TlsConfigError> {
        match &self.identity {
            TlsIdentity::PemFiles { cert, key } => {
                let chain = rustls_pemfile::certs(&mut read_pem(cert)?.as_slice())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|source| TlsConfigError::Read {
                        path: cert.clone(),
                        source,
                    })?;
                if chain.is_empty() {
                    return Err(TlsConfigError::EmptyChain);
                }
                let key = rustls_pemfile::private_key(&mut read_pem(key)?.as_slice())
                    .map_err(|source| TlsConfigError::Read {
                        path: key.clone(),
                        source,
                    })?
                    .ok_or_else(|| TlsConfigError::MissingKey { path: key.clone() })?;
                Ok((chain, key))
            }
            TlsIdentity::Der { chain, key } => {
                if chain.is_empty() {
                    return Err(TlsConfigError::EmptyChain);
                }
                Ok((chain.clone(), key.clone_key()))
            }
        }
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, TlsConfigError> {
    fs::read(path).map_err(|source| TlsConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn client_verifier(
    roots: &[CertificateDer<'static>],
    provider: Arc<CryptoProvider>,
) -> Result<Arc<dyn rustls::server::danger::ClientCertVerifier>, TlsConfigError> {
    let mut store = RootCertStore::empty();
    for root in roots {
        store
            .add(root.clone())
            .map_err(TlsConfigError::Rejected)?;
    }
    WebPkiClientVerifier::builder_with_provider(Arc::new(store), provider)
        .build()
        .map_err(|e| TlsConfigError::ClientVerifier(e.to_string()))
}

/// Errors raised while compiling a [`TlsConfig`].
#[derive(Debug, Error)]
pub enum TlsConfigError {
    /// A certificate or key file could not be read or parsed.
    #[error("failed to read TLS material from {}: {source}", path.display())]
    Read {
        /// Offending file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The certificate chain holds no certificates.
    #[error("TLS certificate chain is empty")]
    EmptyChain,

    /// The key file holds no private key.
    #[error("no private key found in {}", path.display())]
    MissingKey {
        /// Offending file.
        path: PathBuf,
    },

    /// `min_version` is above `max_version`.
    #[error("TLS version range is inverted: min={min:?}, max={max:?}")]
    VersionRange {
        /// Configured minimum.
        min: TlsVersion,
        /// Configured maximum.
        max: TlsVersion,
    },

    /// No permitted cipher suite supports the permitted versions.
    #[error("no usable TLS cipher suite")]
    NoCipherSuites,

    /// The client verifier could not be built from the configured roots.
    #[error("invalid client authentication roots: {0}")]
    ClientVerifier(String),

    /// `rustls` rejected the configuration, e.g. a key not matching the
    /// leaf certificate.
    #[error("TLS configuration rejected: {0}")]
    Rejected(#[source] rustls::Error),
}
