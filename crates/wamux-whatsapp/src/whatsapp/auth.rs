//! Webhook signature helpers (`X-Hub-Signature-256`).

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the callback signature.
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

/// `"sha256=" + hex(HMAC-SHA256(body, secret))`.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length, so this cannot fail.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Check a signature header against one secret in constant time.
///
/// The header must carry the `sha256=` prefix.
pub fn verify_signature(secret: &str, signature_header: &str, body: &[u8]) -> bool {
    let Some(hex_sig) = signature_header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_then_verify() {
        let body = br#"{"entry":[]}"#;
        let sig = sign_payload("my_app_secret", body);
        assert!(sig.starts_with("sha256="));
        assert_eq!(sig.len(), "sha256=".len() + 64);
        assert!(verify_signature("my_app_secret", &sig, body));
        assert!(!verify_signature("other_secret", &sig, body));
    }

    #[test]
    fn test_any_single_byte_mutation_fails() {
        let body = b"test payload body".to_vec();
        let sig = sign_payload("s3cret", &body);
        for i in 0..body.len() {
            let mut mutated = body.clone();
            mutated[i] ^= 0x01;
            assert!(!verify_signature("s3cret", &sig, &mutated), "byte {i}");
        }
    }

    #[test]
    fn test_malformed_headers() {
        let body = b"x";
        let sig = sign_payload("k", body);
        let bare = sig.trim_start_matches("sha256=");
        assert!(!verify_signature("k", bare, body));
        assert!(!verify_signature("k", "sha256=bad", body));
        assert!(!verify_signature("k", "sha256=", body));
    }
}
