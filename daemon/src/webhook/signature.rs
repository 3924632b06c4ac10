//! Webhook signature verification

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const PREFIX: &str = "sha256=";

/// Verify a `X-Hub-Signature-256` header value against the raw body.
///
/// The header must be `sha256=<hex digest>`. A missing header, another
/// prefix or a digest that is not hex is rejected before any HMAC work.
/// The digest comparison itself is constant time.
pub fn verify_signature(secret: &[u8], body: &[u8], header: Option<&str>) -> bool {
    let Some(digest) = header.and_then(|h| h.strip_prefix(PREFIX)) else {
        return false;
    };

    let Ok(expected) = hex::decode(digest) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Produce the header value a sender would attach to `body`
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    // HMAC accepts keys of any length.
    let mut mac = HmacSha256::new_from_slice(secret).unwrap_or_else(|_| unreachable!());
    mac.update(body);
    format!("{}{}", PREFIX, hex::encode(mac.finalize().into_bytes()))
}
