//! AES-256-GCM helpers for credential fields stored at rest.
//!
//! Ciphertexts are `base64(nonce || sealed)` with a random 96 bit nonce. Values
//! carrying the [`ENCRYPTED_MARKER`] prefix are decrypted by [`reveal_secret`],
//! anything else is returned as-is.

use base64::{engine::general_purpose, Engine as _};
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;

/// Marker for encrypted values in credential payloads and config files
pub const ENCRYPTED_MARKER: &str = "encrypted:";

/// Error type for secret management operations
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("Encryption error: {0}")]
    EncryptionError(String),
    #[error("Decryption error: {0}")]
    DecryptionError(String),
    #[error("Key error: {0}")]
    KeyError(String),
    #[error("Base64 error: {0}")]
    Base64Error(#[from] base64::DecodeError),
}

fn load_key(key_b64: &str) -> Result<LessSafeKey, SecretError> {
    let key_bytes = general_purpose::STANDARD.decode(key_b64.trim())?;
    if key_bytes.len() != 32 {
        return Err(SecretError::KeyError(format!(
            "Encryption key must be 32 bytes, got {} bytes",
            key_bytes.len()
        )));
    }
    let unbound = UnboundKey::new(&aead::AES_256_GCM, &key_bytes)
        .map_err(|_| SecretError::KeyError("Failed to create AES-256-GCM key".to_string()))?;
    Ok(LessSafeKey::new(unbound))
}

/// Encrypt a string with the given base64 key. The result carries no marker.
pub fn encrypt_secret(key_b64: &str, plaintext: &str) -> Result<String, SecretError> {
    let key = load_key(key_b64)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| SecretError::EncryptionError("Failed to generate nonce".to_string()))?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = plaintext.as_bytes().to_vec();
    key.seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| SecretError::EncryptionError("Failed to encrypt data".to_string()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + in_out.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&in_out);
    Ok(general_purpose::STANDARD.encode(out))
}

/// Decrypt a value produced by [`encrypt_secret`].
pub fn decrypt_secret(key_b64: &str, ciphertext_b64: &str) -> Result<String, SecretError> {
    let key = load_key(key_b64)?;
    let raw = general_purpose::STANDARD.decode(ciphertext_b64.trim())?;
    if raw.len() <= NONCE_LEN {
        return Err(SecretError::DecryptionError(
            "Ciphertext is too short".to_string(),
        ));
    }

    let (nonce_bytes, sealed) = raw.split_at(NONCE_LEN);
    let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
        .map_err(|_| SecretError::DecryptionError("Invalid nonce".to_string()))?;

    let mut in_out = sealed.to_vec();
    let plaintext = key
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| SecretError::DecryptionError("Failed to decrypt data".to_string()))?;

    String::from_utf8(plaintext.to_vec()).map_err(|_| {
        SecretError::DecryptionError("Failed to convert decrypted data to string".to_string())
    })
}

/// Check if a string is an encrypted value
pub fn is_encrypted(value: &str) -> bool {
    value.starts_with(ENCRYPTED_MARKER)
}

/// Returns the plaintext for a stored value, decrypting it when it carries the
/// marker. A marked value without a configured key is an error.
pub fn reveal_secret(key_b64: Option<&str>, value: &str) -> Result<String, SecretError> {
    match value.strip_prefix(ENCRYPTED_MARKER) {
        Some(ciphertext) => {
            let key = key_b64.ok_or_else(|| {
                SecretError::KeyError("No credential key configured".to_string())
            })?;
            decrypt_secret(key, ciphertext)
        }
        None => Ok(value.to_string()),
    }
}
