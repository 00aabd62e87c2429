//! URL resolution.
//!
//! Maps a stored key plus a requested variant to a deliverable URL. Signing
//! is best-effort: any failure falls back to the unsigned direct storage URL
//! and the caller never sees an error on this path.

use medira_core::clock::Clock;
use medira_core::config::Config;
use medira_core::keys::sibling_key;
use medira_core::models::VariantName;
use medira_storage::Storage;
use std::sync::Arc;
use std::time::Duration;

use crate::signer::UrlSigner;

/// Resolves stored keys into delivery URLs.
#[derive(Clone)]
pub struct UrlResolver {
    signer: Option<UrlSigner>,
    storage: Arc<dyn Storage>,
    expiry: Duration,
}

impl UrlResolver {
    /// `signer` is `None` when no CDN is configured; resolution then always
    /// produces direct storage URLs.
    pub fn new(signer: Option<UrlSigner>, storage: Arc<dyn Storage>, expiry: Duration) -> Self {
        Self {
            signer,
            storage,
            expiry,
        }
    }

    /// Build a resolver from configuration. Without a CDN domain and signing
    /// secret, every resolution degrades to the direct storage URL.
    pub fn from_config(
        config: &Config,
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let signer = match (&config.cdn_domain, &config.cdn_signing_secret) {
            (Some(domain), Some(secret)) => Some(UrlSigner::new(
                domain.clone(),
                config.cdn_key_pair_id.clone().unwrap_or_default(),
                secret.clone(),
                clock,
            )),
            _ => None,
        };
        Self::new(
            signer,
            storage,
            Duration::from_secs(config.url_expiry_seconds),
        )
    }

    /// Resolve a key (optionally substituting a sibling variant) into a URL.
    ///
    /// Never fails: signing errors degrade to the direct storage URL. A key
    /// that is already a fully-qualified URL (legacy records) is returned
    /// unchanged, after collapsing any scheme/host prefix a prior bug may
    /// have prepended twice.
    pub fn resolve(&self, storage_key: &str, variant: Option<VariantName>) -> String {
        if storage_key.starts_with("http://") || storage_key.starts_with("https://") {
            return normalize_legacy_url(storage_key);
        }

        let key = match variant {
            Some(variant) => sibling_key(storage_key, variant),
            None => storage_key.to_string(),
        };

        match &self.signer {
            Some(signer) => match signer.sign(&key, self.expiry) {
                Ok(url) => url,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        key = %key,
                        "URL signing failed, falling back to direct storage URL"
                    );
                    self.storage.public_url(&key)
                }
            },
            None => self.storage.public_url(&key),
        }
    }
}

/// Collapse a doubled scheme/host prefix (`https://h/https://h/k` → the inner
/// URL). Already-clean URLs pass through unchanged.
fn normalize_legacy_url(url: &str) -> String {
    let mut out = url;
    loop {
        let inner = out[1..]
            .find("https://")
            .or_else(|| out[1..].find("http://"))
            .map(|p| p + 1);
        match inner {
            Some(pos) => out = &out[pos..],
            None => break,
        }
    }
    out.to_string()
}
