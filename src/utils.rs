use sha2::{Digest, Sha256};

use crate::core::SECRET_LEN;
use crate::error::{Result, SimpleStreamError};

// ========== Secret utilities ==========

/// Derive the 32-byte handshake secret from a password (SHA-256)
pub fn password_to_secret(password: &str) -> [u8; SECRET_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    let result = hasher.finalize();
    let mut secret = [0u8; SECRET_LEN];
    secret.copy_from_slice(&result);
    secret
}

/// Parse a secret given directly as 64 hex characters
pub fn secret_from_hex(s: &str) -> Result<[u8; SECRET_LEN]> {
    let bytes = hex::decode(s.trim())
        .map_err(|e| SimpleStreamError::Config(format!("invalid secret hex: {}", e)))?;
    bytes.try_into().map_err(|v: Vec<u8>| {
        SimpleStreamError::Config(format!(
            "secret must be {} bytes, got {}",
            SECRET_LEN,
            v.len()
        ))
    })
}

/// Hex form of a secret, for handing to clients
pub fn secret_to_hex(secret: &[u8; SECRET_LEN]) -> String {
    hex::encode(secret)
}
