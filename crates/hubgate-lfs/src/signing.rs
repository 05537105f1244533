//! Expiring links signed with HMAC-SHA256

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct UrlSigner {
    key: Vec<u8>,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner").finish_non_exhaustive()
    }
}

impl UrlSigner {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    fn mac(&self, resource: &str, expires: i64, filename: Option<&str>) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts keys of any length");
        mac.update(resource.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        mac.update(b"\n");
        mac.update(filename.unwrap_or_default().as_bytes());
        mac
    }

    /// Hex signature binding `resource`, the expiry (unix seconds) and the
    /// optional download filename.
    pub fn sign(&self, resource: &str, expires: i64, filename: Option<&str>) -> String {
        hex::encode(self.mac(resource, expires, filename).finalize().into_bytes())
    }

    pub fn verify(
        &self,
        resource: &str,
        expires: i64,
        filename: Option<&str>,
        signature: &str,
        now: i64,
    ) -> bool {
        if now > expires {
            return false;
        }
        let Ok(raw) = hex::decode(signature) else {
            return false;
        };
        self.mac(resource, expires, filename).verify_slice(&raw).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let signer = UrlSigner::new(b"secret".to_vec());
        let sig = signer.sign("objects/ab/cd/ef", 1_000, None);
        assert!(signer.verify("objects/ab/cd/ef", 1_000, None, &sig, 999));
        assert!(signer.verify("objects/ab/cd/ef", 1_000, None, &sig, 1_000));
    }

    #[test]
    fn test_rejects_tampering_and_expiry() {
        let signer = UrlSigner::new(b"secret".to_vec());
        let sig = signer.sign("objects/ab/cd/ef", 1_000, Some("model.bin"));

        assert!(!signer.verify("objects/ab/cd/ef", 1_000, Some("model.bin"), &sig, 1_001));
        assert!(!signer.verify("objects/ab/cd/00", 1_000, Some("model.bin"), &sig, 0));
        assert!(!signer.verify("objects/ab/cd/ef", 2_000, Some("model.bin"), &sig, 0));
        assert!(!signer.verify("objects/ab/cd/ef", 1_000, None, &sig, 0));
        assert!(!signer.verify("objects/ab/cd/ef", 1_000, Some("model.bin"), "zz", 0));

        let other = UrlSigner::new(b"other".to_vec());
        assert!(!other.verify("objects/ab/cd/ef", 1_000, Some("model.bin"), &sig, 0));
    }
}
