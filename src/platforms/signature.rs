//! Webhook signature verification
//!
//! Both platforms sign the raw request body with HMAC-SHA256 keyed by the
//! channel secret. Verification runs on the bytes as received, before any
//! JSON parsing, and fails closed on every malformed input.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verify a LINE webhook signature
///
/// LINE sends the base64 digest in the `x-line-signature` header.
#[must_use]
pub fn verify_line(channel_secret: &str, body: &[u8], signature: &str) -> bool {
    if channel_secret.is_empty() || signature.is_empty() {
        return false;
    }
    let Ok(signature_bytes) = BASE64.decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(channel_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature_bytes).is_ok()
}

/// Compute the header value LINE would send for `body`
///
/// Counterpart of [`verify_line`], used when simulating inbound webhooks.
#[must_use]
pub fn sign_line(channel_secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(channel_secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    BASE64.encode(mac.finalize().into_bytes())
}

/// Verify a Facebook webhook signature
///
/// Facebook sends `sha256=<hex digest>` in the `x-hub-signature-256` header.
#[must_use]
pub fn verify_facebook(app_secret: &str, body: &[u8], signature: &str) -> bool {
    if app_secret.is_empty() {
        return false;
    }
    let Some(hex_digest) = signature.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(signature_bytes) = hex::decode(hex_digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature_bytes).is_ok()
}

/// Compute the header value Facebook would send for `body`
#[must_use]
pub fn sign_facebook(app_secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(app_secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_round_trip() {
        let body = br#"{"destination":"U-dest","events":[]}"#;
        let signature = sign_line("secret-1", body);

        assert!(verify_line("secret-1", body, &signature));
    }

    #[test]
    fn test_line_rejects_tampered_body() {
        let body = br#"{"destination":"U-dest","events":[]}"#;
        let signature = sign_line("secret-1", body);

        assert!(!verify_line("secret-1", b"{\"events\":[{}]}", &signature));
    }

    #[test]
    fn test_line_rejects_wrong_secret() {
        let body = b"payload";
        let signature = sign_line("secret-1", body);

        assert!(!verify_line("secret-2", body, &signature));
    }

    #[test]
    fn test_line_fails_closed_on_garbage() {
        assert!(!verify_line("secret", b"payload", ""));
        assert!(!verify_line("secret", b"payload", "not base64 !!!"));
        assert!(!verify_line("", b"payload", &sign_line("", b"payload")));
    }

    #[test]
    fn test_facebook_round_trip() {
        let body = br#"{"object":"page","entry":[]}"#;
        let signature = sign_facebook("app-secret", body);

        assert!(signature.starts_with("sha256="));
        assert!(verify_facebook("app-secret", body, &signature));
    }

    #[test]
    fn test_facebook_requires_prefix() {
        let body = b"payload";
        let signature = sign_facebook("app-secret", body);
        let bare = signature.trim_start_matches("sha256=");

        assert!(!verify_facebook("app-secret", body, bare));
        assert!(!verify_facebook("app-secret", body, "sha256=zzzz"));
    }
}
