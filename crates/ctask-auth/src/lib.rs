//! Dispatch Authenticator: shared-secret HMAC-SHA-256 signing of admission
//! requests and per-task webhook deliveries.
//!
//! The canonical string signed is `timestamp_ms.body`, where `body` is the
//! exact UTF-8 bytes of the JSON payload — never a re-serialization of it.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header names the admission client and the dispatch-authenticated
/// endpoints agree on.
pub mod headers {
    pub const TIMESTAMP: &str = "X-Dispatch-Timestamp";
    pub const SIGNATURE: &str = "X-Dispatch-Signature";
    pub const NONCE: &str = "X-Dispatch-Nonce";
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing dispatch secret")]
    MissingSecret,
}

/// A signed request: the timestamp it was signed at and its lowercase-hex
/// HMAC-SHA-256 signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signed {
    pub timestamp: i64,
    pub signature: String,
}

/// Sign `body` as of `timestamp_ms` with `secret`.
///
/// # Errors
///
/// Returns [`AuthError::MissingSecret`] if `secret` is empty.
pub fn sign(body: &[u8], timestamp_ms: i64, secret: &str) -> Result<Signed, AuthError> {
    let signature = raw_hmac(body, timestamp_ms, secret)?;
    Ok(Signed {
        timestamp: timestamp_ms,
        signature,
    })
}

/// Verify that `signature` is the correct HMAC-SHA-256 of `timestamp_ms.body`
/// under `secret`, using a constant-time comparison.
#[must_use]
pub fn verify(body: &[u8], timestamp_ms: i64, secret: &str, signature: &str) -> bool {
    let Ok(expected) = raw_hmac(body, timestamp_ms, secret) else {
        return false;
    };
    // Constant-time comparison of the lowercase-hex strings prevents timing
    // attacks on the signature check.
    let expected = expected.as_bytes();
    let actual = signature.as_bytes();
    expected.len() == actual.len() && bool::from(expected.ct_eq(actual))
}

fn raw_hmac(body: &[u8], timestamp_ms: i64, secret: &str) -> Result<String, AuthError> {
    if secret.is_empty() {
        return Err(AuthError::MissingSecret);
    }
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(timestamp_ms.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Generate a fresh UUID v4 nonce, used by the verifier to suppress replay.
#[must_use]
pub fn generate_nonce() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Generate a per-task webhook secret: `whsec_` followed by 48 hex characters
/// (24 random bytes).
#[must_use]
pub fn generate_webhook_secret() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("whsec_{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_produce_the_same_signature() {
        let a = sign(b"hello", 1000, "secret").unwrap();
        let b = sign(b"hello", 1000, "secret").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn differing_body_changes_the_signature() {
        let a = sign(b"hello", 1000, "secret").unwrap();
        let b = sign(b"goodbye", 1000, "secret").unwrap();
        assert_ne!(a.signature, b.signature);
    }

    #[test]
    fn differing_timestamp_changes_the_signature() {
        let a = sign(b"hello", 1000, "secret").unwrap();
        let b = sign(b"hello", 1001, "secret").unwrap();
        assert_ne!(a.signature, b.signature);
    }

    #[test]
    fn empty_secret_is_rejected() {
        assert_eq!(sign(b"hello", 1000, ""), Err(AuthError::MissingSecret));
    }

    #[test]
    fn signature_is_sixty_four_hex_chars() {
        let signed = sign(b"hello", 1000, "secret").unwrap();
        assert_eq!(signed.signature.len(), 64);
        assert!(signed.signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn round_trip_verifies() {
        let signed = sign(b"hello", 1000, "secret").unwrap();
        assert!(verify(b"hello", 1000, "secret", &signed.signature));
    }

    #[test]
    fn bit_flip_in_body_fails_verification() {
        let signed = sign(b"hello", 1000, "secret").unwrap();
        assert!(!verify(b"hellp", 1000, "secret", &signed.signature));
    }

    #[test]
    fn bit_flip_in_timestamp_fails_verification() {
        let signed = sign(b"hello", 1000, "secret").unwrap();
        assert!(!verify(b"hello", 1001, "secret", &signed.signature));
    }

    #[test]
    fn bit_flip_in_key_fails_verification() {
        let signed = sign(b"hello", 1000, "secret").unwrap();
        assert!(!verify(b"hello", 1000, "secrey", &signed.signature));
    }

    #[test]
    fn nonce_is_a_fresh_uuid_v4() {
        let a = generate_nonce();
        let b = generate_nonce();
        assert_ne!(a, b);
        assert_eq!(uuid::Uuid::parse_str(&a).unwrap().get_version_num(), 4);
    }

    #[test]
    fn matches_the_known_signature_vector() {
        let signed = sign(
            br#"{"test": "body"}"#,
            1_234_567_890,
            "test-dispatch-secret",
        )
        .unwrap();
        assert_eq!(
            signed.signature,
            "bdeafe056de274fbde7d3c2c028b1eb2a41f5f37f4bb203e1527f8e565f2e331"
        );
    }

    #[test]
    fn webhook_secret_has_the_expected_shape() {
        let secret = generate_webhook_secret();
        assert!(secret.starts_with("whsec_"));
        assert_eq!(secret.len(), "whsec_".len() + 48);
    }
}
