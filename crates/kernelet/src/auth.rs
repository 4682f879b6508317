//! Message signing.
//!
//! The session key is shared with front-ends out of band (connection file);
//! every inbound message is verified before any of its content is
//! interpreted. Signatures cover the raw bytes of the four JSON sections in
//! wire order.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signing scheme for wire messages.
pub trait Authenticator: Send + Sync {
    /// Hex signature over the given section byte frames, in order.
    fn sign(&self, parts: &[&[u8]]) -> String;

    /// Whether `signature` matches the given sections.
    fn verify(&self, parts: &[&[u8]], signature: &str) -> bool;
}

/// HMAC-SHA256 over the concatenated sections, hex-encoded on the wire.
pub struct HmacSha256Authenticator {
    key: Vec<u8>,
}

impl HmacSha256Authenticator {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    fn mac(&self, parts: &[&[u8]]) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        for part in parts {
            mac.update(part);
        }
        mac
    }
}

impl Authenticator for HmacSha256Authenticator {
    fn sign(&self, parts: &[&[u8]]) -> String {
        hex::encode(self.mac(parts).finalize().into_bytes())
    }

    fn verify(&self, parts: &[&[u8]], signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        // Constant-time comparison via the Mac itself.
        self.mac(parts).verify_slice(&expected).is_ok()
    }
}

/// Disabled authentication: empty signatures, everything verifies.
///
/// Matches the protocol's empty-key scheme where the transport is already
/// trusted (e.g. in-process front-ends).
pub struct NoAuth;

impl Authenticator for NoAuth {
    fn sign(&self, _parts: &[&[u8]]) -> String {
        String::new()
    }

    fn verify(&self, _parts: &[&[u8]], _signature: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECTIONS: [&[u8]; 4] = [b"{\"a\":1}", b"{}", b"{}", b"{\"code\":\"1+1\"}"];

    #[test]
    fn sign_is_deterministic() {
        let auth = HmacSha256Authenticator::new(b"key".to_vec());
        assert_eq!(auth.sign(&SECTIONS), auth.sign(&SECTIONS));
    }

    #[test]
    fn verify_accepts_own_signature() {
        let auth = HmacSha256Authenticator::new(b"key".to_vec());
        let sig = auth.sign(&SECTIONS);
        assert!(auth.verify(&SECTIONS, &sig));
    }

    #[test]
    fn verify_rejects_other_key() {
        let signer = HmacSha256Authenticator::new(b"key-a".to_vec());
        let verifier = HmacSha256Authenticator::new(b"key-b".to_vec());
        let sig = signer.sign(&SECTIONS);
        assert!(!verifier.verify(&SECTIONS, &sig));
    }

    #[test]
    fn verify_rejects_tampered_section() {
        let auth = HmacSha256Authenticator::new(b"key".to_vec());
        let sig = auth.sign(&SECTIONS);
        let tampered: [&[u8]; 4] = [b"{\"a\":1}", b"{}", b"{}", b"{\"code\":\"2+2\"}"];
        assert!(!auth.verify(&tampered, &sig));
    }

    #[test]
    fn verify_rejects_non_hex_signature() {
        let auth = HmacSha256Authenticator::new(b"key".to_vec());
        assert!(!auth.verify(&SECTIONS, "not hex at all"));
    }

    #[test]
    fn no_auth_accepts_anything() {
        assert!(NoAuth.verify(&SECTIONS, "whatever"));
        assert_eq!(NoAuth.sign(&SECTIONS), "");
    }
}
