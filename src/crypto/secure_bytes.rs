//! Secret byte buffer: zeroed on drop, redacted in `Debug`, and pinned in
//! RAM where the platform allows it.

use std::ops::Deref;
use zeroize::Zeroize;

/// Owned secret bytes (derived keys, decrypted store contents)
pub struct SecureBytes(Vec<u8>);

impl SecureBytes {
    pub fn new(data: Vec<u8>) -> Self {
        let secure = Self(data);
        secure.lock_memory();
        secure
    }

    /// Keep the buffer out of swap (best effort, may fail without privileges)
    #[cfg(unix)]
    fn lock_memory(&self) {
        if self.0.is_empty() {
            return;
        }
        unsafe {
            libc::mlock(self.0.as_ptr() as *const libc::c_void, self.0.len());
        }
    }

    #[cfg(not(unix))]
    fn lock_memory(&self) {}

    #[cfg(unix)]
    fn unlock_memory(&self) {
        if self.0.is_empty() {
            return;
        }
        unsafe {
            libc::munlock(self.0.as_ptr() as *const libc::c_void, self.0.len());
        }
    }

    #[cfg(not(unix))]
    fn unlock_memory(&self) {}
}

impl Zeroize for SecureBytes {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

impl Drop for SecureBytes {
    fn drop(&mut self) {
        // zeroize() also truncates, so unlock while the length is still known
        self.0.iter_mut().for_each(|b| *b = 0);
        self.unlock_memory();
        self.0.zeroize();
    }
}

impl Deref for SecureBytes {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Clone for SecureBytes {
    fn clone(&self) -> Self {
        Self::new(self.0.clone())
    }
}

impl From<Vec<u8>> for SecureBytes {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl Default for SecureBytes {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl std::fmt::Debug for SecureBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureBytes")
            .field("len", &self.0.len())
            .field("data", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secure_bytes_deref() {
        let secure = SecureBytes::new(vec![1, 2, 3, 4]);
        assert_eq!(secure.len(), 4);
        assert_eq!(&*secure, &[1, 2, 3, 4]);
    }

    #[test]
    fn test_debug_is_redacted() {
        let secure = SecureBytes::from(b"hunter2".to_vec());
        let printed = format!("{:?}", secure);
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("REDACTED"));
    }

    #[test]
    fn test_zeroize_clears() {
        let mut secure = SecureBytes::new(vec![9; 8]);
        secure.zeroize();
        assert!(secure.is_empty());
    }
}
