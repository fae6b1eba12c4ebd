//! Fixed 48-byte header: `magic | salt | nonce | tag`

use sbk_core::{SbkError, SbkResult};

use crate::{NONCE_SIZE, SALT_SIZE, TAG_SIZE};

/// Magic identifying a `.sbk` backup file
pub const BACKUP_MAGIC: &[u8; 4] = b"SBK1";

/// Magic identifying a keycheck verifier blob
pub const KEYCHECK_MAGIC: &[u8; 4] = b"SKCK";

pub const MAGIC_SIZE: usize = 4;
pub const SALT_OFFSET: usize = MAGIC_SIZE;
pub const NONCE_OFFSET: usize = SALT_OFFSET + SALT_SIZE;
pub const TAG_OFFSET: usize = NONCE_OFFSET + NONCE_SIZE;
pub const HEADER_LEN: usize = TAG_OFFSET + TAG_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub salt: [u8; SALT_SIZE],
    pub nonce: [u8; NONCE_SIZE],
    pub tag: [u8; TAG_SIZE],
}

impl Header {
    pub fn to_bytes(&self, magic: &[u8; MAGIC_SIZE]) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..SALT_OFFSET].copy_from_slice(magic);
        out[SALT_OFFSET..NONCE_OFFSET].copy_from_slice(&self.salt);
        out[NONCE_OFFSET..TAG_OFFSET].copy_from_slice(&self.nonce);
        out[TAG_OFFSET..HEADER_LEN].copy_from_slice(&self.tag);
        out
    }

    /// Parse the first [`HEADER_LEN`] bytes of `bytes`, requiring `magic`.
    pub fn parse(magic: &[u8; MAGIC_SIZE], bytes: &[u8]) -> SbkResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(SbkError::Format(format!(
                "header too short: {} bytes (expected {HEADER_LEN})",
                bytes.len()
            )));
        }
        if &bytes[..MAGIC_SIZE] != magic {
            return Err(SbkError::Format("magic mismatch".into()));
        }

        let mut header = Header {
            salt: [0u8; SALT_SIZE],
            nonce: [0u8; NONCE_SIZE],
            tag: [0u8; TAG_SIZE],
        };
        header.salt.copy_from_slice(&bytes[SALT_OFFSET..NONCE_OFFSET]);
        header.nonce.copy_from_slice(&bytes[NONCE_OFFSET..TAG_OFFSET]);
        header.tag.copy_from_slice(&bytes[TAG_OFFSET..HEADER_LEN]);
        Ok(header)
    }
}
