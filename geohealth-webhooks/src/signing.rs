//! HMAC-SHA256 payload signing.
//!
//! Subscribers verify `X-Webhook-Signature: sha256=<hex>` against the exact
//! request body bytes using their shared secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{WebhookError, WebhookResult};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Generate a hex HMAC-SHA256 of `payload` keyed by `secret`.
///
/// HMAC accepts keys of any length, so the error branch is not reachable in
/// practice.
pub fn sign_payload(payload: &[u8], secret: &str) -> WebhookResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| WebhookError::Signing(e.to_string()))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Value for the `X-Webhook-Signature` header.
pub fn signature_header(payload: &[u8], secret: &str) -> WebhookResult<String> {
    Ok(format!("{SIGNATURE_PREFIX}{}", sign_payload(payload, secret)?))
}

/// Check a `sha256=<hex>` header against `payload` in constant time.
pub fn verify_signature(payload: &[u8], secret: &str, header: &str) -> bool {
    let Some(hex_digest) = header.trim().strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_payload() {
        let signature = sign_payload(b"test payload", "supersecretkey123").unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_known_vector() {
        // RFC 4231 test case 2
        let signature = sign_payload(b"what do ya want for nothing?", "Jefe").unwrap();
        assert_eq!(
            signature,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_header_round_trips_through_verify() {
        let body = br#"{"event":"data.updated","data":{}}"#;
        let header = signature_header(body, "s3cret").unwrap();
        assert!(header.starts_with("sha256="));
        assert!(verify_signature(body, "s3cret", &header));
        assert!(!verify_signature(body, "other", &header));
        assert!(!verify_signature(b"tampered", "s3cret", &header));
    }

    #[test]
    fn test_verify_rejects_malformed_headers() {
        assert!(!verify_signature(b"x", "k", "md5=abcd"));
        assert!(!verify_signature(b"x", "k", "sha256=not-hex"));
        assert!(!verify_signature(b"x", "k", ""));
    }
}
