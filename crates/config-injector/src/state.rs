use std::{
    path::Path,
    sync::{Arc, RwLock},
};

use anyhow::{anyhow, Result};
use rustls::{server::ClientHello, sign::CertifiedKey, ServerConfig};
use rustls_pki_types::{pem::SliceIter, CertificateDer, PrivateKeyDer};
use tracing::warn;

use crate::config::WebhookConfig;

/// Everything the server must agree on at a given point in time. The reload
/// loop replaces the whole snapshot at once, so a reader can never observe a
/// new configuration paired with an old certificate or vice versa.
pub struct StateSnapshot {
    pub config: Arc<WebhookConfig>,
    pub cert: Arc<CertifiedKey>,
    pub revision: u64,
}

#[derive(Clone)]
pub struct SharedState {
    inner: Arc<RwLock<StateSnapshot>>,
}

impl SharedState {
    pub fn new(config: WebhookConfig, cert: CertifiedKey) -> Self {
        SharedState {
            inner: Arc::new(RwLock::new(StateSnapshot {
                config: Arc::new(config),
                cert: Arc::new(cert),
                revision: 0,
            })),
        }
    }

    pub fn config(&self) -> Arc<WebhookConfig> {
        self.inner
            .read()
            .expect("shared state lock poisoned")
            .config
            .clone()
    }

    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        self.inner
            .read()
            .expect("shared state lock poisoned")
            .cert
            .clone()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let guard = self.inner.read().expect("shared state lock poisoned");
        StateSnapshot {
            config: guard.config.clone(),
            cert: guard.cert.clone(),
            revision: guard.revision,
        }
    }

    pub fn revision(&self) -> u64 {
        self.inner
            .read()
            .expect("shared state lock poisoned")
            .revision
    }

    /// Swaps in a new configuration and certificate pair as one atomic step.
    pub fn replace(&self, config: WebhookConfig, cert: CertifiedKey) -> u64 {
        let mut guard = self.inner.write().expect("shared state lock poisoned");
        guard.config = Arc::new(config);
        guard.cert = Arc::new(cert);
        guard.revision += 1;
        guard.revision
    }
}

/// Serves the currently active certificate to every TLS handshake. Retrieval
/// goes through the shared state read lock, a handshake that races with a
/// reload gets either the old pair or the new one, never a mix.
#[derive(Clone)]
pub struct CertResolver(SharedState);

impl CertResolver {
    pub fn new(state: SharedState) -> Self {
        CertResolver(state)
    }
}

impl std::fmt::Debug for CertResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertResolver").finish()
    }
}

impl rustls::server::ResolvesServerCert for CertResolver {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(self.0.certified_key())
    }
}

pub fn build_tls_server_config(state: SharedState) -> ServerConfig {
    ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(CertResolver::new(state)))
}

/// Load a server certificate chain and private key from PEM files.
pub fn load_certified_key(cert_file: &Path, key_file: &Path) -> Result<CertifiedKey> {
    let cert_contents = std::fs::read(cert_file)
        .map_err(|e| anyhow!("cannot read certificate file {}: {}", cert_file.display(), e))?;
    let key_contents = std::fs::read(key_file)
        .map_err(|e| anyhow!("cannot read key file {}: {}", key_file.display(), e))?;

    parse_certified_key(&cert_contents, &key_contents)
}

pub fn parse_certified_key(cert_pem: &[u8], key_pem: &[u8]) -> Result<CertifiedKey> {
    let cert_iterator: SliceIter<CertificateDer> = SliceIter::new(cert_pem);
    let certs: Vec<_> = cert_iterator
        .filter_map(|it| {
            if let Err(ref e) = it {
                warn!("Cannot parse certificate: {e}");
            }
            it.ok()
        })
        .collect();

    if certs.is_empty() {
        return Err(anyhow!("no certificate found in certificate file"));
    }

    let key_iterator: SliceIter<PrivateKeyDer> = SliceIter::new(key_pem);
    let keys: Vec<PrivateKeyDer> = key_iterator
        .filter_map(|it| {
            if let Err(ref e) = it {
                warn!("Cannot parse private key: {e}");
            }
            it.ok()
        })
        .collect();

    if keys.len() != 1 {
        return Err(anyhow!(
            "Expected exactly one key in key file, found {}",
            keys.len()
        ));
    }

    let signing_key = rustls::crypto::ring::sign::any_supported_type(&keys[0])
        .map_err(|e| anyhow!("unsupported private key: {e}"))?;

    Ok(CertifiedKey::new(certs, signing_key))
}
