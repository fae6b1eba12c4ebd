//! sbk-crypto: password-based encryption for SecureBackup
//!
//! Every encryption derives a fresh key from the password and a random salt,
//! so the (key, nonce) pair never repeats even across identical passwords.
//!
//! On-disk layout shared by `.sbk` backups and the keycheck blob:
//! ```text
//! offset  0  magic   (4)   "SBK1" backup / "SKCK" keycheck
//! offset  4  salt    (16)  scrypt salt
//! offset 20  nonce   (12)  AES-256-GCM nonce
//! offset 32  tag     (16)  GCM tag (patched in after streaming)
//! offset 48  ciphertext    32 bytes for keycheck, rest of file for backups
//! ```

pub mod gcm;
pub mod header;
pub mod kdf;
pub mod keycheck;
pub mod stream;

pub use header::{Header, BACKUP_MAGIC, KEYCHECK_MAGIC};
pub use kdf::{derive_key, BackupKey};
pub use keycheck::KeyCheck;
pub use stream::{decrypt_file, decrypt_stream, encrypt_file, encrypt_stream, StreamStats};

/// Size of a derived key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of the scrypt salt
pub const SALT_SIZE: usize = 16;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Streaming read size for encrypt/decrypt (1 MiB)
pub const CHUNK_SIZE: usize = 1024 * 1024;

pub(crate) fn random_bytes<const N: usize>() -> [u8; N] {
    use rand::RngCore;
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}
