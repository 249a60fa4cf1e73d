//! Credential encryption helpers.
//!
//! Credential fields on inbound events may be encrypted with a shared crypto
//! key. Each field is encrypted independently:
//!
//! - Key: SHA-256 of the crypto key string (any length is accepted)
//! - Cipher: AES-256-GCM with a random 96-bit nonce per field
//! - Encoding: standard base64 of `nonce || ciphertext || tag`

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

const NONCE_BYTES: usize = 12;
const FIELD_AAD: &[u8] = b"azvnet-credential-v1";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("crypto key is empty")]
    EmptyKey,
    #[error("ciphertext is not valid base64")]
    InvalidEncoding,
    #[error("ciphertext is too short")]
    Truncated,
    #[error("decryption failed")]
    DecryptFailed,
    #[error("encryption failed")]
    EncryptFailed,
    #[error("decrypted value is not valid UTF-8")]
    InvalidUtf8,
}

fn cipher_for_key(key: &str) -> Result<Aes256Gcm, CryptoError> {
    if key.is_empty() {
        return Err(CryptoError::EmptyKey);
    }
    let digest = Sha256::digest(key.as_bytes());
    Aes256Gcm::new_from_slice(&digest).map_err(|_| CryptoError::DecryptFailed)
}

/// Encrypt a credential field with the given key.
pub fn encrypt(plaintext: &str, key: &str) -> Result<String, CryptoError> {
    let cipher = cipher_for_key(key)?;

    let mut nonce_bytes = [0u8; NONCE_BYTES];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext.as_bytes(),
                aad: FIELD_AAD,
            },
        )
        .map_err(|_| CryptoError::EncryptFailed)?;

    let mut out = Vec::with_capacity(NONCE_BYTES + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(base64::engine::general_purpose::STANDARD.encode(out))
}

/// Decrypt a credential field with the given key.
pub fn decrypt(encoded: &str, key: &str) -> Result<String, CryptoError> {
    let cipher = cipher_for_key(key)?;

    let raw = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|_| CryptoError::InvalidEncoding)?;
    if raw.len() <= NONCE_BYTES {
        return Err(CryptoError::Truncated);
    }

    let (nonce_bytes, ciphertext) = raw.split_at(NONCE_BYTES);
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(nonce_bytes),
            Payload {
                msg: ciphertext,
                aad: FIELD_AAD,
            },
        )
        .map_err(|_| CryptoError::DecryptFailed)?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)
}
