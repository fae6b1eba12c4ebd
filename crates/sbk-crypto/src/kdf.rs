//! Key derivation: scrypt password → 256-bit key
//!
//! Parameters are fixed constants. Archives carry only the salt, so every
//! platform must derive the exact same key from (password, salt).

use sbk_core::{SbkError, SbkResult};
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use crate::{KEY_SIZE, SALT_SIZE};

/// log2 of the scrypt work factor N (N = 16384)
pub const SCRYPT_LOG_N: u8 = 14;
/// scrypt block size r
pub const SCRYPT_R: u32 = 8;
/// scrypt parallelism p
pub const SCRYPT_P: u32 = 1;

/// A 256-bit key derived from a password. Scoped to one operation and
/// zeroized on drop.
pub struct BackupKey {
    bytes: [u8; KEY_SIZE],
}

impl BackupKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for BackupKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for BackupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive the key for `password` and `salt` with the fixed scrypt parameters.
pub fn derive_key(password: &SecretString, salt: &[u8; SALT_SIZE]) -> SbkResult<BackupKey> {
    derive_with(
        password.expose_secret().as_bytes(),
        salt,
        SCRYPT_LOG_N,
        SCRYPT_R,
        SCRYPT_P,
    )
}

fn derive_with(password: &[u8], salt: &[u8], log_n: u8, r: u32, p: u32) -> SbkResult<BackupKey> {
    let params = scrypt::Params::new(log_n, r, p, KEY_SIZE)
        .map_err(|e| SbkError::Kdf(format!("invalid scrypt params: {e}")))?;

    let mut key = [0u8; KEY_SIZE];
    scrypt::scrypt(password, salt, &params, &mut key)
        .map_err(|e| SbkError::Kdf(format!("scrypt failed: {e}")))?;

    Ok(BackupKey::from_bytes(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc7914_vector() {
        // RFC 7914 §12, P="password" S="NaCl" N=1024 r=8 p=16 (first 32 bytes)
        let key = derive_with(b"password", b"NaCl", 10, 8, 16).unwrap();
        assert_eq!(
            hex::encode(key.as_bytes()),
            "fdbabe1c9d3472007856e7190d01e9fe7c6ad7cbc8237830e77376634b373162"
        );
    }

    #[test]
    fn test_kdf_deterministic() {
        let password = SecretString::from("correct horse");
        let salt = [7u8; SALT_SIZE];

        let key1 = derive_key(&password, &salt).unwrap();
        let key2 = derive_key(&password, &salt).unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes(), "KDF must be deterministic");
    }

    #[test]
    fn test_kdf_different_passwords() {
        let salt = [1u8; SALT_SIZE];
        let key1 = derive_key(&SecretString::from("password-a"), &salt).unwrap();
        let key2 = derive_key(&SecretString::from("password-b"), &salt).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_kdf_different_salts() {
        let password = SecretString::from("same-password");
        let key1 = derive_key(&password, &[1u8; SALT_SIZE]).unwrap();
        let key2 = derive_key(&password, &[2u8; SALT_SIZE]).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_debug_redacted() {
        let key = BackupKey::from_bytes([0xAB; KEY_SIZE]);
        let rendered = format!("{key:?}");
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("171"));
    }
}
