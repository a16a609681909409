//! AES-256-GCM sealing for secret environment values.
//!
//! Every write draws a fresh random nonce. Ciphertext and nonce are stored
//! base64-encoded next to each other; the master key never touches disk.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Master key length in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// GCM nonce length in bytes (96 bits)
const NONCE_SIZE: usize = 12;

/// A sealed value as written to the environment table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sealed {
    /// Base64 ciphertext (includes the GCM tag)
    pub ciphertext: String,
    /// Base64 nonce
    pub nonce: String,
}

/// Decodes a base64 master key and checks it is exactly 32 bytes.
///
/// # Arguments
/// * `key_base64` - Base64-encoded master key (surrounding whitespace ignored)
///
/// # Returns
/// * `Ok(Vec<u8>)` - Decoded key bytes
/// * `Err` - If the key is not base64 or has the wrong length
pub fn parse_master_key(key_base64: &str) -> Result<Vec<u8>> {
    let key = BASE64
        .decode(key_base64.trim())
        .context("Encryption key is not valid base64")?;

    if key.len() != KEY_SIZE {
        return Err(anyhow!(
            "Encryption key must be {} bytes, got {} bytes",
            KEY_SIZE,
            key.len()
        ));
    }
    Ok(key)
}

fn cipher(key: &[u8]) -> Result<Aes256Gcm> {
    if key.len() != KEY_SIZE {
        return Err(anyhow!("Encryption key must be {} bytes", KEY_SIZE));
    }
    Aes256Gcm::new_from_slice(key).map_err(|e| anyhow!("Failed to create cipher: {}", e))
}

/// Encrypts `plaintext` under `key` with a fresh nonce.
///
/// # Arguments
/// * `plaintext` - Value to seal (e.g. the refreshed access token)
/// * `key` - 32-byte master key
///
/// # Returns
/// * `Ok(Sealed)` - Base64 ciphertext and the nonce used
/// * `Err` - If the key length is wrong or encryption fails
pub fn seal(plaintext: &str, key: &[u8]) -> Result<Sealed> {
    let cipher = cipher(key)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    Ok(Sealed {
        ciphertext: BASE64.encode(ciphertext),
        nonce: BASE64.encode(nonce),
    })
}

/// Decrypts a sealed value.
///
/// # Arguments
/// * `sealed` - Ciphertext and nonce as read from the environment table
/// * `key` - 32-byte master key used when sealing
///
/// # Returns
/// * `Ok(String)` - The plaintext
/// * `Err` - On a wrong key, malformed base64 or nonce, or any tampering
pub fn open(sealed: &Sealed, key: &[u8]) -> Result<String> {
    let cipher = cipher(key)?;
    let ciphertext = BASE64
        .decode(&sealed.ciphertext)
        .context("Failed to decode ciphertext")?;
    let nonce = BASE64.decode(&sealed.nonce).context("Failed to decode nonce")?;

    if nonce.len() != NONCE_SIZE {
        return Err(anyhow!(
            "Invalid nonce size: expected {}, got {}",
            NONCE_SIZE,
            nonce.len()
        ));
    }

    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
        .map_err(|e| anyhow!("Decryption failed (wrong key or corrupted value): {}", e))?;

    String::from_utf8(plaintext).context("Decrypted value is not valid UTF-8")
}
