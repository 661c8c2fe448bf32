//! Cryptographic primitives for shellvault
//!
//! This module provides:
//! - Argon2id for password-based key derivation
//! - ChaCha20-Poly1305 for authenticated encryption
//! - The versioned envelope shared by the store file and backups
//! - Secure memory handling with automatic zeroing

mod argon;
mod chacha;
mod envelope;
mod secure_bytes;

pub use argon::{derive_key, random_salt, DerivedKey, KdfParams, KEY_LEN, SALT_LEN};
pub use chacha::{decrypt, encrypt, NONCE_LEN, TAG_LEN};
pub use envelope::{Envelope, FORMAT_VERSION, HEADER_LEN};
pub use secure_bytes::SecureBytes;

#[cfg(test)]
pub(crate) use argon::test_params;

/// A password-protected export of every stored profile
pub type BackupBlob = Envelope;
