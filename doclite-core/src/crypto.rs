// src/crypto.rs
// Per-collection symmetric codec: AES-256-GCM over the serialized document,
// ciphertext stored as a base64 string so document files stay text.

use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{DocLiteError, Result};

/// Size of the GCM nonce prepended to every ciphertext.
pub const NONCE_SIZE: usize = 12;

/// Symmetric encrypt/decrypt keyed by a per-collection key.
pub struct Codec {
    cipher: Aes256Gcm,
}

impl Codec {
    /// Build a codec from an explicit key, or from a host-derived default
    /// when the collection was created without one. Key bytes are the
    /// SHA-256 digest of the key material.
    pub fn new(key: Option<&str>) -> Self {
        let material = match key {
            Some(k) => k.to_string(),
            None => default_key_material(),
        };
        let digest = Sha256::digest(material.as_bytes());
        let cipher = Aes256Gcm::new(GenericArray::from_slice(digest.as_slice()));
        Codec { cipher }
    }

    /// Encrypt a serialized document. Output: base64 of `nonce || ciphertext`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| DocLiteError::Encryption("encryption failed".into()))?;

        let mut payload = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend(ciphertext);

        Ok(BASE64.encode(payload))
    }

    /// Decrypt a document file body. A wrong key or corrupted payload
    /// surfaces as a read error, never a partially decoded document.
    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        let payload = BASE64
            .decode(encoded.trim())
            .map_err(|_| DocLiteError::Decryption("payload is not valid base64".into()))?;

        if payload.len() < NONCE_SIZE {
            return Err(DocLiteError::Decryption("payload too short".into()));
        }

        let nonce = Nonce::from_slice(&payload[..NONCE_SIZE]);
        let plaintext = self
            .cipher
            .decrypt(nonce, &payload[NONCE_SIZE..])
            .map_err(|_| DocLiteError::Decryption("wrong key or corrupted payload".into()))?;

        String::from_utf8(plaintext)
            .map_err(|_| DocLiteError::Decryption("plaintext is not valid UTF-8".into()))
    }
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec").field("cipher", &"Aes256Gcm").finish()
    }
}

/// Default key material when no explicit key is supplied: derived from the
/// user and host identity of the running process.
fn default_key_material() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "doclite".to_string());
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string());
    format!("{}@{}", user, host)
}
