//! Webhook signature verification.
//!
//! The processor signs the raw request body with HMAC-SHA256 over the shared
//! secret and sends the hex digest in the `signature` header. Verification
//! fails closed: a missing, malformed, or mismatched signature rejects the
//! request before any parsing happens.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC digest of the raw body.
pub const SIGNATURE_HEADER: &str = "signature";

/// Verify a hex HMAC-SHA256 signature over the raw payload.
#[must_use]
pub fn verify_signature(payload: &[u8], signature_hex: &str, secret: &SecretString) -> bool {
    let Ok(provided) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.expose_secret().as_bytes()) else {
        return false;
    };
    mac.update(payload);
    // Constant-time comparison
    mac.verify_slice(&provided).is_ok()
}

/// Compute the hex signature for a payload. Used by tests and tooling to
/// craft valid deliveries.
#[must_use]
pub fn sign(payload: &[u8], secret: &SecretString) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
        .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> SecretString {
        SecretString::from("whsec_test_secret_value")
    }

    #[test]
    fn test_round_trip_verifies() {
        let body = br#"{"id":"evt_1"}"#;
        let signature = sign(body, &secret());
        assert!(verify_signature(body, &signature, &secret()));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let signature = sign(br#"{"id":"evt_1"}"#, &secret());
        assert!(!verify_signature(br#"{"id":"evt_2"}"#, &signature, &secret()));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let body = b"payload";
        let signature = sign(body, &secret());
        assert!(!verify_signature(
            body,
            &signature,
            &SecretString::from("another_secret")
        ));
    }

    #[test]
    fn test_garbage_signature_rejected() {
        assert!(!verify_signature(b"payload", "not-hex!", &secret()));
        assert!(!verify_signature(b"payload", "", &secret()));
    }

    #[test]
    fn test_surrounding_whitespace_tolerated() {
        let body = b"payload";
        let signature = format!("  {}\n", sign(body, &secret()));
        assert!(verify_signature(body, &signature, &secret()));
    }
}
