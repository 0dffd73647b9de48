//! HMAC-SHA256 webhook signature verification.
//!
//! Signatures are computed over the raw request body and compared in
//! constant time via the MAC itself, never with string equality.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verify `signature` (hex, optionally `sha256=`-prefixed) against `body`.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let hex_part = signature
        .trim()
        .strip_prefix("sha256=")
        .unwrap_or_else(|| signature.trim());

    let Ok(expected) = hex::decode(hex_part) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Sign a body the way upstream services do (tests and tooling).
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_body_verifies() {
        let secret = "webhook-secret";
        let body = br#"{"event":"task.updated","ID":"42"}"#;
        let signature = sign(secret, body);

        assert!(verify_signature(secret, body, &signature));
        // Prefixed form is accepted too.
        assert!(verify_signature(secret, body, &format!("sha256={signature}")));
    }

    #[test]
    fn test_flipped_bit_rejected() {
        let secret = "webhook-secret";
        let body = br#"{"event":"task.updated","ID":"42"}"#;
        let mut signature = sign(secret, body).into_bytes();

        // Flip one bit in the first hex nibble.
        signature[0] = if signature[0] == b'0' { b'1' } else { b'0' };
        let tampered = String::from_utf8(signature).unwrap();

        assert!(!verify_signature(secret, body, &tampered));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let body = b"payload";
        let signature = sign("secret-a", body);
        assert!(!verify_signature("secret-b", body, &signature));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let secret = "webhook-secret";
        let signature = sign(secret, b"original");
        assert!(!verify_signature(secret, b"modified", &signature));
    }

    #[test]
    fn test_malformed_signature_rejected() {
        assert!(!verify_signature("s", b"body", "not hex at all"));
        assert!(!verify_signature("s", b"body", ""));
        assert!(!verify_signature("s", b"body", "sha256="));
    }

    #[test]
    fn test_signature_is_hex_sha256() {
        let signature = sign("s", b"body");
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
