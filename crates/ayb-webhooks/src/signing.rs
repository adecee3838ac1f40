use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA-256 of the raw request body, sent as
/// `X-AYB-Signature` when the webhook carries a secret.
pub fn sign(secret: &str, body: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts a key of any length");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_stable_hex_digest() {
        let a = sign("secret", "body");
        let b = sign("secret", "body");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn different_bodies_produce_different_signatures() {
        assert_ne!(sign("secret", "one"), sign("secret", "two"));
    }
}
