//! Password verifier ("keycheck") blob
//!
//! A tiny AES-256-GCM ciphertext of 32 random bytes, persisted once. Trying
//! to decrypt it tells us in milliseconds whether a password is probably the
//! one the first backup was made with, without touching any archive.
//!
//! Blob format (80 bytes):
//! ```text
//! "SKCK" | salt(16) | nonce(12) | tag(16) | ciphertext(32)
//! ```

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce, Tag};
use sbk_core::{SbkError, SbkResult};
use secrecy::SecretString;
use tracing::{debug, info, warn};

use crate::header::{Header, HEADER_LEN, KEYCHECK_MAGIC};
use crate::kdf::derive_key;
use crate::{random_bytes, NONCE_SIZE, SALT_SIZE, TAG_SIZE};

/// Length of the random plaintext sealed in the blob
pub const VERIFIER_PLAINTEXT_LEN: usize = 32;

/// Total blob length
pub const KEYCHECK_LEN: usize = HEADER_LEN + VERIFIER_PLAINTEXT_LEN;

/// Handle to the verifier blob at a fixed path.
#[derive(Debug, Clone)]
pub struct KeyCheck {
    path: PathBuf,
}

impl KeyCheck {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Create the blob for `password` unless one already exists.
    ///
    /// The blob only ever appears complete: it is written to a temp file
    /// and hard-linked into place, so when several processes race on first
    /// run exactly one blob is published and the others leave it alone.
    /// Returns true if this call created the blob.
    pub fn ensure(&self, password: &SecretString) -> SbkResult<bool> {
        if self.exists() {
            return Ok(false);
        }

        let salt = random_bytes::<SALT_SIZE>();
        let nonce = random_bytes::<NONCE_SIZE>();
        let key = derive_key(password, &salt)?;

        let mut ciphertext = random_bytes::<VERIFIER_PLAINTEXT_LEN>();
        let tag = Aes256Gcm::new(key.as_bytes().into())
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), b"", &mut ciphertext)
            .map_err(|_| SbkError::Crypto("sealing verifier failed".into()))?;

        let mut header = Header {
            salt,
            nonce,
            tag: [0u8; TAG_SIZE],
        };
        header.tag.copy_from_slice(&tag);

        let mut blob = Vec::with_capacity(KEYCHECK_LEN);
        blob.extend_from_slice(&header.to_bytes(KEYCHECK_MAGIC));
        blob.extend_from_slice(&ciphertext);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| SbkError::resource(format!("creating {}", parent.display()), e))?;
        }

        // Fully written and synced under a private name, then published with
        // a hard link, which fails if the blob appeared meanwhile.
        let tmp = self.temp_path();
        write_new(&tmp, &blob).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            SbkError::resource(format!("writing {}", tmp.display()), e)
        })?;
        let published = fs::hard_link(&tmp, &self.path);
        if let Err(e) = fs::remove_file(&tmp) {
            warn!(path = %tmp.display(), error = %e, "failed to remove keycheck temp file");
        }
        match published {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(path = %self.path.display(), "keycheck created concurrently, keeping it");
                return Ok(false);
            }
            Err(e) => {
                return Err(SbkError::resource(
                    format!("creating {}", self.path.display()),
                    e,
                ))
            }
        }

        info!(path = %self.path.display(), "created password keycheck");
        Ok(true)
    }

    fn temp_path(&self) -> PathBuf {
        let id = u64::from_le_bytes(random_bytes::<8>());
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.path.with_file_name(format!(".{name}.{id:016x}.tmp"))
    }

    /// Check `password` against the blob.
    ///
    /// No blob yet means first run, which accepts any password. Any other
    /// problem (unreadable, malformed, wrong password) yields false.
    pub fn verify(&self, password: &SecretString) -> bool {
        let blob = match std::fs::read(&self.path) {
            Ok(blob) => blob,
            Err(e) if e.kind() == ErrorKind::NotFound => return true,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "keycheck unreadable");
                return false;
            }
        };

        match check_blob(&blob, password) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "keycheck rejected password");
                false
            }
        }
    }
}

fn write_new(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn check_blob(blob: &[u8], password: &SecretString) -> SbkResult<()> {
    if blob.len() < KEYCHECK_LEN {
        return Err(SbkError::Format(format!(
            "keycheck too short: {} bytes",
            blob.len()
        )));
    }
    let header = Header::parse(KEYCHECK_MAGIC, blob)?;
    let key = derive_key(password, &header.salt)?;

    let mut ciphertext = blob[HEADER_LEN..].to_vec();
    Aes256Gcm::new(key.as_bytes().into())
        .decrypt_in_place_detached(
            Nonce::from_slice(&header.nonce),
            b"",
            &mut ciphertext,
            Tag::from_slice(&header.tag),
        )
        .map_err(|_| SbkError::Authentication)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keycheck() -> (tempfile::TempDir, KeyCheck) {
        let dir = tempfile::tempdir().unwrap();
        let kc = KeyCheck::new(dir.path().join("state/keycheck.bin"));
        (dir, kc)
    }

    #[test]
    fn test_absent_blob_accepts_anything() {
        let (_dir, kc) = keycheck();
        assert!(kc.verify(&SecretString::from("anything")));
        assert!(!kc.exists(), "verify must not create the blob");
    }

    #[test]
    fn test_ensure_then_verify() {
        let (_dir, kc) = keycheck();
        assert!(kc.ensure(&SecretString::from("correct horse")).unwrap());

        let blob = std::fs::read(kc.path()).unwrap();
        assert_eq!(blob.len(), KEYCHECK_LEN);
        assert_eq!(&blob[..4], KEYCHECK_MAGIC);

        assert!(kc.verify(&SecretString::from("correct horse")));
        assert!(!kc.verify(&SecretString::from("battery staple")));
        assert_eq!(std::fs::read(kc.path()).unwrap(), blob, "verify must not mutate");
    }

    #[test]
    fn test_ensure_leaves_only_the_blob() {
        let (_dir, kc) = keycheck();
        assert!(kc.ensure(&SecretString::from("pw")).unwrap());
        assert!(!kc.ensure(&SecretString::from("pw")).unwrap());

        let names: Vec<String> = fs::read_dir(kc.path().parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["keycheck.bin"]);
    }

    #[test]
    fn test_second_ensure_keeps_first_password() {
        let (_dir, kc) = keycheck();
        assert!(kc.ensure(&SecretString::from("first")).unwrap());
        let blob = std::fs::read(kc.path()).unwrap();

        assert!(!kc.ensure(&SecretString::from("second")).unwrap());
        assert_eq!(std::fs::read(kc.path()).unwrap(), blob);
        assert!(kc.verify(&SecretString::from("first")));
        assert!(!kc.verify(&SecretString::from("second")));
    }

    #[test]
    fn test_malformed_blobs_reject() {
        let (_dir, kc) = keycheck();
        kc.ensure(&SecretString::from("pw")).unwrap();
        let good = std::fs::read(kc.path()).unwrap();

        std::fs::write(kc.path(), &good[..KEYCHECK_LEN - 1]).unwrap();
        assert!(!kc.verify(&SecretString::from("pw")));

        let mut bad_magic = good.clone();
        bad_magic[0] = b'X';
        std::fs::write(kc.path(), &bad_magic).unwrap();
        assert!(!kc.verify(&SecretString::from("pw")));

        let mut bad_ct = good;
        bad_ct[KEYCHECK_LEN - 1] ^= 0x80;
        std::fs::write(kc.path(), &bad_ct).unwrap();
        assert!(!kc.verify(&SecretString::from("pw")));
    }

    #[test]
    fn test_concurrent_ensure_single_winner() {
        let (_dir, kc) = keycheck();
        let handles: Vec<_> = ["alpha", "bravo", "charlie", "delta"]
            .into_iter()
            .map(|pw| {
                let kc = kc.clone();
                std::thread::spawn(move || {
                    let created = kc.ensure(&SecretString::from(pw)).unwrap();
                    (pw, created)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let winners: Vec<_> = results.iter().filter(|(_, created)| *created).collect();
        assert_eq!(winners.len(), 1, "exactly one ensure may create the blob");
        let winner = winners[0].0;
        assert!(kc.verify(&SecretString::from(winner)));
        for (pw, _) in &results {
            if *pw != winner {
                assert!(!kc.verify(&SecretString::from(*pw)));
            }
        }
    }
}
