//! TLS hot-reload (C11): loads the webhook's serving certificate from disk,
//! then every `tls_watch_timer_secs` content-hashes the cert and key files
//! with SHA-256 and reloads in place when the hash changes. The leaf that
//! was just replaced stays resolvable (though never preferred over the
//! current one) for `tls_grace_secs` so anything still keyed to it —
//! session-ticket resumption, a slow-to-notice peer — has a window to
//! catch up before it's actually dropped.

use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use rustls::crypto::ring::sign::any_supported_type;
use rustls::pki_types::CertificateDer;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read TLS material: {0}")]
    Io(#[from] std::io::Error),
    #[error("no private key found in {0}")]
    MissingKey(PathBuf),
    #[error("rustls configuration error: {0}")]
    Rustls(#[from] rustls::Error),
}

fn load_certified_key(cert_path: &Path, key_path: &Path) -> Result<CertifiedKey, TlsError> {
    let mut cert_reader = BufReader::new(fs::File::open(cert_path)?);
    let mut key_reader = BufReader::new(fs::File::open(key_path)?);

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_reader).collect::<Result<_, _>>()?;
    let key = rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| TlsError::MissingKey(key_path.to_path_buf()))?;
    let signing_key = any_supported_type(&key)?;
    Ok(CertifiedKey::new(certs, signing_key))
}

fn content_hash(cert_path: &Path, key_path: &Path) -> Result<[u8; 32], TlsError> {
    let mut hasher = Sha256::new();
    hasher.update(fs::read(cert_path)?);
    hasher.update(fs::read(key_path)?);
    Ok(hasher.finalize().into())
}

/// Always resolves to the current certified key; the previous one is kept
/// alive (but never served) until `grace` has elapsed since the swap.
struct GracefulResolver {
    current: ArcSwap<CertifiedKey>,
    retiring: ArcSwap<Option<(Arc<CertifiedKey>, Instant)>>,
    grace: Duration,
}

impl GracefulResolver {
    fn new(initial: CertifiedKey, grace: Duration) -> Arc<Self> {
        Arc::new(Self {
            current: ArcSwap::from_pointee(initial),
            retiring: ArcSwap::from_pointee(None),
            grace,
        })
    }

    fn rotate(&self, next: CertifiedKey) {
        let previous = self.current.swap(Arc::new(next));
        self.retiring.store(Arc::new(Some((previous, Instant::now()))));
    }

    /// Drops the retiring cert once it has outlived the grace window.
    fn expire_retiring(&self) {
        let expired = self
            .retiring
            .load()
            .as_ref()
            .as_ref()
            .map(|(_, retired_at)| retired_at.elapsed() >= self.grace)
            .unwrap_or(false);
        if expired {
            self.retiring.store(Arc::new(None));
        }
    }
}

impl std::fmt::Debug for GracefulResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GracefulResolver").finish_non_exhaustive()
    }
}

impl ResolvesServerCert for GracefulResolver {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(self.current.load_full())
    }
}

/// Narrow handle `watch_and_reload` needs, so it doesn't have to know
/// about `rustls::server::ResolvesServerCert` at all.
pub trait ResolveHandle: Send + Sync {
    fn rotate(&self, next: CertifiedKey);
    fn expire_retiring(&self);
}

impl ResolveHandle for GracefulResolver {
    fn rotate(&self, next: CertifiedKey) {
        GracefulResolver::rotate(self, next)
    }

    fn expire_retiring(&self) {
        GracefulResolver::expire_retiring(self)
    }
}

/// Builds the initial `rustls::ServerConfig` plus the handle used to roll
/// it over in place as `watch_and_reload` notices file changes.
pub fn load_server_config(
    cert_path: &Path,
    key_path: &Path,
    grace: Duration,
) -> Result<(ServerConfig, Arc<dyn ResolveHandle>), TlsError> {
    let certified = load_certified_key(cert_path, key_path)?;
    let resolver = GracefulResolver::new(certified, grace);

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(resolver.clone());
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok((config, resolver as Arc<dyn ResolveHandle>))
}

/// Every `watch_interval`, hashes the cert and key files; on a change,
/// loads a fresh certified key and rotates it into `resolver`. Also sweeps
/// `resolver`'s grace window on every tick so a retired cert is actually
/// dropped once its window has passed.
pub async fn watch_and_reload(
    cert_path: PathBuf,
    key_path: PathBuf,
    resolver: Arc<dyn ResolveHandle>,
    watch_interval: Duration,
) {
    let mut last_hash = match content_hash(&cert_path, &key_path) {
        Ok(hash) => Some(hash),
        Err(err) => {
            tracing::warn!(%err, "failed initial TLS content hash; will retry on next tick");
            None
        }
    };

    let mut ticker = tokio::time::interval(watch_interval);
    loop {
        ticker.tick().await;
        resolver.expire_retiring();

        match content_hash(&cert_path, &key_path) {
            Ok(hash) if Some(hash) != last_hash => match load_certified_key(&cert_path, &key_path) {
                Ok(certified) => {
                    resolver.rotate(certified);
                    last_hash = Some(hash);
                    tracing::info!("reloaded webhook TLS certificate");
                }
                Err(err) => tracing::error!(%err, "failed to reload TLS certificate"),
            },
            Ok(_) => {}
            Err(err) => tracing::warn!(%err, "failed to hash TLS certificate files"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_signed_pair() -> (Vec<u8>, Vec<u8>) {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["perikles.odysseia.svc".to_string()])
                .expect("self-signed test cert generation");
        (cert.pem().into_bytes(), key_pair.serialize_pem().into_bytes())
    }

    #[test]
    fn content_hash_changes_when_either_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("tls.crt");
        let key_path = dir.path().join("tls.key");
        let (cert, key) = self_signed_pair();
        fs::write(&cert_path, &cert).unwrap();
        fs::write(&key_path, &key).unwrap();

        let before = content_hash(&cert_path, &key_path).unwrap();

        let (cert2, key2) = self_signed_pair();
        fs::write(&cert_path, &cert2).unwrap();
        fs::write(&key_path, &key2).unwrap();
        let after = content_hash(&cert_path, &key_path).unwrap();

        assert_ne!(before, after);
    }

    #[test]
    fn load_certified_key_rejects_a_missing_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("tls.crt");
        let key_path = dir.path().join("missing.key");
        let (cert, _) = self_signed_pair();
        fs::write(&cert_path, &cert).unwrap();

        assert!(load_certified_key(&cert_path, &key_path).is_err());
    }

    #[test]
    fn retiring_cert_is_kept_until_grace_elapses_then_dropped() {
        let (cert, key) = self_signed_pair();
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("tls.crt");
        let key_path = dir.path().join("tls.key");
        fs::write(&cert_path, &cert).unwrap();
        fs::write(&key_path, &key).unwrap();

        let initial = load_certified_key(&cert_path, &key_path).unwrap();
        let resolver = GracefulResolver::new(initial, Duration::from_millis(20));
        assert!(resolver.retiring.load().is_none());

        let (cert2, key2) = self_signed_pair();
        fs::write(&cert_path, &cert2).unwrap();
        fs::write(&key_path, &key2).unwrap();
        let next = load_certified_key(&cert_path, &key_path).unwrap();
        resolver.rotate(next);
        assert!(resolver.retiring.load().is_some());

        resolver.expire_retiring();
        assert!(resolver.retiring.load().is_some(), "grace window has not elapsed yet");

        std::thread::sleep(Duration::from_millis(30));
        resolver.expire_retiring();
        assert!(resolver.retiring.load().is_none(), "grace window elapsed, retiring cert should drop");
    }
}
