//! Argon2id Key Derivation Function
//!
//! Uses Argon2id (winner of the Password Hashing Competition) to derive
//! encryption keys from user passwords. Argon2id is resistant to:
//! - GPU attacks (memory-hard)
//! - Side-channel attacks (hybrid approach)
//! - Time-memory trade-off attacks

use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use super::SecureBytes;
use crate::error::{Error, Result};

/// Salt length in bytes (256 bits)
pub const SALT_LEN: usize = 32;

/// Derived key length in bytes (256 bits for ChaCha20)
pub const KEY_LEN: usize = 32;

/// Upper bounds accepted when parameters come from an untrusted envelope
const MAX_MEMORY_KIB: u32 = 4 * 1024 * 1024;
const MAX_ITERATIONS: u32 = 64;
const MAX_PARALLELISM: u32 = 64;

/// Argon2id cost parameters
///
/// Defaults follow the OWASP recommendation for high security:
/// 64 MB of memory, 3 iterations, 4 lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes (time cost)
    pub iterations: u32,
    /// Degree of parallelism
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 65536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// Reject parameters Argon2 can't run with, or that would make a
    /// crafted blob burn unbounded memory or time
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 || self.iterations > MAX_ITERATIONS {
            return Err(Error::crypto(format!("unsupported KDF iterations: {}", self.iterations)));
        }
        if self.parallelism == 0 || self.parallelism > MAX_PARALLELISM {
            return Err(Error::crypto(format!("unsupported KDF parallelism: {}", self.parallelism)));
        }
        if self.memory_kib < 8 * self.parallelism || self.memory_kib > MAX_MEMORY_KIB {
            return Err(Error::crypto(format!("unsupported KDF memory cost: {} KiB", self.memory_kib)));
        }
        Ok(())
    }
}

/// A derived encryption key with its associated salt
pub struct DerivedKey {
    /// The derived key material (32 bytes)
    pub key: SecureBytes,
    /// The salt used for derivation (32 bytes)
    pub salt: [u8; SALT_LEN],
    /// Cost parameters the key was derived with
    pub params: KdfParams,
}

impl Zeroize for DerivedKey {
    fn zeroize(&mut self) {
        self.key.zeroize();
        self.salt.zeroize();
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.zeroize();
    }
}

/// Generate a fresh random salt from the OS RNG
pub fn random_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive an encryption key from a password using Argon2id
///
/// # Arguments
/// * `password` - The user's password
/// * `salt` - Optional salt (if None, generates a new random salt)
/// * `params` - Argon2id cost parameters
///
/// Identical password, salt and parameters always yield the same key.
/// Every encryption target (the store file, each export) passes `None`
/// once so that it gets a salt of its own.
pub fn derive_key(
    password: &[u8],
    salt: Option<&[u8; SALT_LEN]>,
    params: &KdfParams,
) -> Result<DerivedKey> {
    params.validate()?;

    let salt_bytes: [u8; SALT_LEN] = match salt {
        Some(s) => *s,
        None => random_salt(),
    };

    let argon_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| Error::crypto(format!("Argon2 params error: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut key_bytes = vec![0u8; KEY_LEN];
    argon2
        .hash_password_into(password, &salt_bytes, &mut key_bytes)
        .map_err(|e| Error::crypto(format!("key derivation failed: {}", e)))?;

    Ok(DerivedKey {
        key: SecureBytes::new(key_bytes),
        salt: salt_bytes,
        params: *params,
    })
}

#[cfg(test)]
pub(crate) fn test_params() -> KdfParams {
    KdfParams {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    }
}
