use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Generate the HMAC-SHA256 signature for a time-limited object URL.
///
/// Format: HMAC-SHA256(method|key|expires, secret), hex encoded.
pub fn generate_url_signature(
    secret: &str,
    method: &str,
    key: &str,
    expires: i64,
) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;

    let payload = format!("{}|{}|{}", method, key, expires);
    mac.update(payload.as_bytes());

    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a URL signature using constant-time comparison.
///
/// Does not look at the expiry; callers compare `expires` with their clock.
pub fn verify_url_signature(
    secret: &str,
    method: &str,
    key: &str,
    expires: i64,
    signature: &str,
) -> Result<bool, anyhow::Error> {
    let expected = generate_url_signature(secret, method, key, expires)?;

    let expected_bytes = expected.as_bytes();
    let signature_bytes = signature.as_bytes();

    if expected_bytes.len() != signature_bytes.len() {
        return Ok(false);
    }

    Ok(expected_bytes.ct_eq(signature_bytes).into())
}

/// Constant-time equality for opaque tokens (CSRF values, session secrets).
pub fn tokens_match(expected: &str, presented: &str) -> bool {
    let a = expected.as_bytes();
    let b = presented.as_bytes();
    a.len() == b.len() && bool::from(a.ct_eq(b))
}
