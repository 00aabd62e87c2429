//! HMAC-SHA256 URL signing.
//!
//! Signed URL format: `https://{domain}/{key}?exp={unix}&kid={key_pair_id}&sig={hmac_hex}`.
//! Expiry is computed from the injected clock at signing time, so repeated
//! resolution of the same key yields fresh validity each time.

use hmac::{Hmac, Mac};
use medira_core::clock::Clock;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("Signing credentials not configured")]
    MissingCredentials,

    #[error("Signer error: {0}")]
    SignerFailure(String),

    #[error("Invalid signed URL: {0}")]
    InvalidSignedUrl(String),

    #[error("Signed URL expired")]
    Expired,
}

/// CDN URL signer.
#[derive(Clone)]
pub struct UrlSigner {
    domain: String,
    key_pair_id: String,
    secret: String,
    clock: Arc<dyn Clock>,
}

impl UrlSigner {
    pub fn new(
        domain: String,
        key_pair_id: String,
        secret: String,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            domain,
            key_pair_id,
            secret,
            clock,
        }
    }

    /// Sign a storage key into an expiring CDN URL.
    pub fn sign(&self, key: &str, expires_in: Duration) -> Result<String, SigningError> {
        if self.domain.trim().is_empty() || self.secret.trim().is_empty() {
            return Err(SigningError::MissingCredentials);
        }

        let expiration = self.clock.now_unix() + expires_in.as_secs() as i64;
        let payload = format!("{}:{}", key, expiration);
        let signature = self.compute_signature(&payload)?;

        Ok(format!(
            "https://{}/{}?exp={}&kid={}&sig={}",
            self.domain, key, expiration, self.key_pair_id, signature
        ))
    }

    /// Verify the signature and expiry of a URL produced by [`sign`].
    ///
    /// [`sign`]: UrlSigner::sign
    pub fn verify(&self, url: &str) -> Result<(), SigningError> {
        let (path, query) = url
            .split_once('?')
            .ok_or_else(|| SigningError::InvalidSignedUrl("missing query".to_string()))?;

        let mut exp = None;
        let mut sig = None;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("exp", v)) => exp = v.parse::<i64>().ok(),
                Some(("sig", v)) => sig = Some(v.to_string()),
                _ => {}
            }
        }
        let exp = exp.ok_or_else(|| {
            SigningError::InvalidSignedUrl("missing or invalid exp parameter".to_string())
        })?;
        let sig = sig
            .ok_or_else(|| SigningError::InvalidSignedUrl("missing sig parameter".to_string()))?;

        if self.clock.now_unix() > exp {
            return Err(SigningError::Expired);
        }

        let prefix = format!("https://{}/", self.domain);
        let key = path
            .strip_prefix(&prefix)
            .ok_or_else(|| SigningError::InvalidSignedUrl("unexpected domain".to_string()))?;

        let payload = format!("{}:{}", key, exp);
        let expected = self.compute_signature(&payload)?;
        if sig != expected {
            return Err(SigningError::InvalidSignedUrl(
                "signature mismatch".to_string(),
            ));
        }

        Ok(())
    }

    fn compute_signature(&self, payload: &str) -> Result<String, SigningError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| SigningError::SignerFailure(e.to_string()))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use medira_core::clock::SystemClock;

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn signer_with_clock(clock: Arc<dyn Clock>) -> UrlSigner {
        UrlSigner::new(
            "cdn.example.com".to_string(),
            "key-pair-1".to_string(),
            "test-secret".to_string(),
            clock,
        )
    }

    #[test]
    fn test_signed_url_format() {
        let signer = signer_with_clock(Arc::new(SystemClock));
        let url = signer
            .sign("blog_images/abc-thumb.jpg", Duration::from_secs(3600))
            .unwrap();

        assert!(url.starts_with("https://cdn.example.com/blog_images/abc-thumb.jpg?"));
        assert!(url.contains("exp="));
        assert!(url.contains("kid=key-pair-1"));
        assert!(url.contains("sig="));
    }

    #[test]
    fn test_sign_then_verify() {
        let signer = signer_with_clock(Arc::new(SystemClock));
        let url = signer
            .sign("receipts/r-original.jpg", Duration::from_secs(3600))
            .unwrap();
        signer.verify(&url).unwrap();
    }

    #[test]
    fn test_expiry_is_computed_from_resolution_time() {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let signer = signer_with_clock(Arc::new(FixedClock(t0)));

        let url = signer
            .sign("f/a.jpg", Duration::from_secs(86_400))
            .unwrap();
        let expected = t0.timestamp() + 86_400;
        assert!(url.contains(&format!("exp={}", expected)));
    }

    #[test]
    fn test_expired_url_rejected() {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let signer = signer_with_clock(Arc::new(FixedClock(t0)));
        let url = signer.sign("f/a.jpg", Duration::from_secs(60)).unwrap();

        let later = t0 + chrono::Duration::seconds(120);
        let late_signer = signer_with_clock(Arc::new(FixedClock(later)));
        assert!(matches!(
            late_signer.verify(&url),
            Err(SigningError::Expired)
        ));
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let signer = signer_with_clock(Arc::new(SystemClock));
        let url = signer.sign("f/a.jpg", Duration::from_secs(3600)).unwrap();
        let tampered = url.replace("sig=", "sig=ffff");

        assert!(matches!(
            signer.verify(&tampered),
            Err(SigningError::InvalidSignedUrl(_))
        ));
    }

    #[test]
    fn test_missing_credentials() {
        let signer = UrlSigner::new(
            String::new(),
            "kid".to_string(),
            "secret".to_string(),
            Arc::new(SystemClock),
        );
        assert!(matches!(
            signer.sign("f/a.jpg", Duration::from_secs(60)),
            Err(SigningError::MissingCredentials)
        ));

        let signer = UrlSigner::new(
            "cdn.example.com".to_string(),
            "kid".to_string(),
            String::new(),
            Arc::new(SystemClock),
        );
        assert!(matches!(
            signer.sign("f/a.jpg", Duration::from_secs(60)),
            Err(SigningError::MissingCredentials)
        ));
    }

    #[test]
    fn test_different_secrets_produce_different_signatures() {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let a = UrlSigner::new(
            "cdn.example.com".into(),
            "kid".into(),
            "secret-a".into(),
            Arc::new(FixedClock(t0)),
        );
        let b = UrlSigner::new(
            "cdn.example.com".into(),
            "kid".into(),
            "secret-b".into(),
            Arc::new(FixedClock(t0)),
        );

        let url_a = a.sign("f/a.jpg", Duration::from_secs(60)).unwrap();
        let url_b = b.sign("f/a.jpg", Duration::from_secs(60)).unwrap();
        assert_ne!(url_a, url_b);
    }
}
