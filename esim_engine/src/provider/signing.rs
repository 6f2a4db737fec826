use esim_common::helpers::to_hex;
use hmac::{Hmac, Mac};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use sha2::Sha256;

use crate::provider::ProviderError;

type HmacSha256 = Hmac<Sha256>;

pub const NONCE_LENGTH: usize = 16;

pub fn generate_nonce() -> String {
    OsRng.sample_iter(&Alphanumeric).take(NONCE_LENGTH).map(char::from).collect()
}

/// Signs a provider request: hex(HMAC-SHA256(secret, method ‖ path ‖ body ‖ timestamp ‖ nonce)).
///
/// The parts are concatenated without separators. `timestamp` is milliseconds since the epoch, as sent in the
/// `x-timestamp` header.
pub fn sign_request(
    secret: &str,
    method: &str,
    path: &str,
    body: &str,
    timestamp: i64,
    nonce: &str,
) -> Result<String, ProviderError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ProviderError::Configuration(format!("Invalid signing key: {e}")))?;
    mac.update(method.as_bytes());
    mac.update(path.as_bytes());
    mac.update(body.as_bytes());
    mac.update(timestamp.to_string().as_bytes());
    mac.update(nonce.as_bytes());
    Ok(to_hex(&mac.finalize().into_bytes()))
}
