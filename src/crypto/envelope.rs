//! Versioned, self-describing encrypted container
//!
//! Used both for the at-rest store file and for password-protected backups.
//!
//! Layout (integers are big-endian):
//! [4 bytes: version][4 bytes: memory KiB][4 bytes: iterations][4 bytes: parallelism]
//! [32 bytes: salt][12 bytes: nonce][N bytes: ciphertext][16 bytes: tag]

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use super::argon::{derive_key, DerivedKey, KdfParams, SALT_LEN};
use super::chacha::{self, NONCE_LEN, TAG_LEN};
use super::SecureBytes;
use crate::error::{Error, Result};

/// Current version of the envelope format
pub const FORMAT_VERSION: u32 = 1;

/// version + three KDF parameters + salt + nonce
pub const HEADER_LEN: usize = 4 * 4 + SALT_LEN + NONCE_LEN;

#[derive(Clone, PartialEq, Eq)]
pub struct Envelope {
    params: KdfParams,
    salt: [u8; SALT_LEN],
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
}

impl Envelope {
    /// Encrypt under an already-derived key; the key's salt and parameters
    /// are recorded in the header
    pub fn seal(key: &DerivedKey, plaintext: &[u8]) -> Result<Self> {
        let (nonce, ciphertext) = chacha::encrypt(&key.key, plaintext)?;
        Ok(Self {
            params: key.params,
            salt: key.salt,
            nonce,
            ciphertext,
        })
    }

    /// Derive a key with a fresh salt and encrypt
    pub fn seal_with_password(password: &[u8], params: &KdfParams, plaintext: &[u8]) -> Result<Self> {
        let key = derive_key(password, None, params)?;
        Self::seal(&key, plaintext)
    }

    /// Re-derive the key from the stored salt and parameters, then decrypt
    pub fn open(&self, password: &[u8]) -> Result<SecureBytes> {
        let key = self.derive(password)?;
        self.open_with_key(&key)
    }

    pub fn open_with_key(&self, key: &DerivedKey) -> Result<SecureBytes> {
        chacha::decrypt(&key.key, &self.nonce, &self.ciphertext)
    }

    /// Derive the key this envelope was sealed with (given the right password)
    pub fn derive(&self, password: &[u8]) -> Result<DerivedKey> {
        derive_key(password, Some(&self.salt), &self.params)
    }

    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    pub fn params(&self) -> &KdfParams {
        &self.params
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(HEADER_LEN + self.ciphertext.len());
        data.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
        data.extend_from_slice(&self.params.memory_kib.to_be_bytes());
        data.extend_from_slice(&self.params.iterations.to_be_bytes());
        data.extend_from_slice(&self.params.parallelism.to_be_bytes());
        data.extend_from_slice(&self.salt);
        data.extend_from_slice(&self.nonce);
        data.extend_from_slice(&self.ciphertext);
        data
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN + TAG_LEN {
            return Err(Error::crypto("encrypted data is truncated"));
        }

        let word = |i: usize| u32::from_be_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);

        let version = word(0);
        if version != FORMAT_VERSION {
            return Err(Error::crypto(format!("unsupported format version: {}", version)));
        }

        let params = KdfParams {
            memory_kib: word(4),
            iterations: word(8),
            parallelism: word(12),
        };
        params.validate()?;

        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&data[16..16 + SALT_LEN]);

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&data[16 + SALT_LEN..HEADER_LEN]);

        Ok(Self {
            params,
            salt,
            nonce,
            ciphertext: data[HEADER_LEN..].to_vec(),
        })
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    pub fn from_base64(text: &str) -> Result<Self> {
        let data = BASE64
            .decode(text.trim())
            .map_err(|_| Error::crypto("backup is not valid base64"))?;
        Self::from_bytes(&data)
    }
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("params", &self.params)
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}
