//! ChaCha20-Poly1305 Authenticated Encryption
//!
//! ChaCha20-Poly1305 is an AEAD cipher that provides both confidentiality
//! and authenticity. It's resistant to timing attacks and performs well
//! on systems without AES hardware acceleration.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;

use super::SecureBytes;
use crate::error::{Error, Result};

/// Nonce length for ChaCha20-Poly1305 (96 bits)
pub const NONCE_LEN: usize = 12;

/// Authentication tag length (128 bits)
pub const TAG_LEN: usize = 16;

/// Key length (256 bits)
pub const KEY_LEN: usize = 32;

/// Encrypt data using ChaCha20-Poly1305
///
/// # Returns
/// Tuple of (nonce, ciphertext) where ciphertext includes the auth tag
///
/// A fresh random nonce is drawn for every call, so the same key never
/// sees the same nonce twice in practice.
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<([u8; NONCE_LEN], Vec<u8>)> {
    if key.len() != KEY_LEN {
        return Err(Error::crypto(format!(
            "invalid key length: expected {}, got {}",
            KEY_LEN,
            key.len()
        )));
    }

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = ChaCha20Poly1305::new_from_slice(key).map_err(|e| Error::crypto(e.to_string()))?;

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| Error::crypto(e.to_string()))?;

    Ok((nonce_bytes, ciphertext))
}

/// Decrypt data using ChaCha20-Poly1305
///
/// # Errors
/// Returns `Error::Crypto` if:
/// - Key or nonce has wrong length
/// - Authentication tag verification fails (wrong key or tampered data)
pub fn decrypt(key: &[u8], nonce: &[u8], ciphertext: &[u8]) -> Result<SecureBytes> {
    if key.len() != KEY_LEN || nonce.len() != NONCE_LEN || ciphertext.len() < TAG_LEN {
        return Err(Error::Crypto(None));
    }

    let nonce = Nonce::from_slice(nonce);

    let cipher = ChaCha20Poly1305::new_from_slice(key).map_err(|_| Error::Crypto(None))?;

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| Error::Crypto(None))?;

    Ok(SecureBytes::new(plaintext))
}
