use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use sha2::{Digest, Sha256};

fn random_url_safe(byte_len: usize) -> String {
    let mut bytes = vec![0u8; byte_len];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generates a PKCE code verifier (64 URL-safe characters, RFC 7636)
#[must_use]
pub fn generate_code_verifier() -> String {
    random_url_safe(48)
}

/// `BASE64URL(SHA256(verifier))`
#[must_use]
pub fn generate_code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Generates the OAuth `state` parameter (22 URL-safe characters)
#[must_use]
pub fn generate_state() -> String {
    random_url_safe(16)
}
