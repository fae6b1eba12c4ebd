//! Incremental AES-256-GCM with a single tag over the whole stream
//!
//! The `aead` traits only seal complete buffers, which would force the
//! whole payload into memory. GCM itself is just CTR mode plus GHASH over
//! the ciphertext, so both halves are driven here chunk by chunk:
//!
//! ```text
//! H      = AES_K(0^128)
//! J0     = nonce || 0x00000001
//! C      = CTR32_K(inc32(J0)) ⊕ P
//! S      = GHASH_H(C || pad || 0^64 || bitlen(C))      (no AAD)
//! tag    = S ⊕ AES_K(J0)
//! ```
//!
//! The output is byte-identical to one-shot AES-256-GCM with empty AAD.

use aes::cipher::{BlockEncrypt, KeyInit, KeyIvInit, StreamCipher};
use aes::Aes256;
use ghash::universal_hash::UniversalHash;
use ghash::GHash;
use sbk_core::{SbkError, SbkResult};
use subtle::ConstantTimeEq;

use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

type Aes256Ctr32 = ctr::Ctr32BE<Aes256>;

const BLOCK_SIZE: usize = 16;

pub struct GcmStream {
    ctr: Aes256Ctr32,
    ghash: GHash,
    /// Ciphertext bytes not yet forming a full GHASH block
    pending: [u8; BLOCK_SIZE],
    pending_len: usize,
    /// AES_K(J0), XORed into the GHASH output at finalization
    tag_mask: [u8; TAG_SIZE],
    ciphertext_len: u64,
}

impl GcmStream {
    pub fn new(key: &[u8; KEY_SIZE], nonce: &[u8; NONCE_SIZE]) -> Self {
        let block_cipher = Aes256::new(key.into());

        let mut h = aes::Block::default();
        block_cipher.encrypt_block(&mut h);

        let mut j0 = [0u8; BLOCK_SIZE];
        j0[..NONCE_SIZE].copy_from_slice(nonce);
        j0[BLOCK_SIZE - 1] = 1;

        let mut mask = aes::Block::from(j0);
        block_cipher.encrypt_block(&mut mask);
        let mut tag_mask = [0u8; TAG_SIZE];
        tag_mask.copy_from_slice(&mask);

        let mut counter0 = j0;
        counter0[BLOCK_SIZE - 1] = 2;

        Self {
            ctr: Aes256Ctr32::new(key.into(), &counter0.into()),
            ghash: GHash::new(&h),
            pending: [0u8; BLOCK_SIZE],
            pending_len: 0,
            tag_mask,
            ciphertext_len: 0,
        }
    }

    /// Encrypt `buf` in place and absorb the resulting ciphertext.
    pub fn encrypt(&mut self, buf: &mut [u8]) -> SbkResult<()> {
        self.keystream(buf)?;
        self.absorb(buf);
        Ok(())
    }

    /// Absorb ciphertext `buf`, then decrypt it in place.
    pub fn decrypt(&mut self, buf: &mut [u8]) -> SbkResult<()> {
        self.absorb(buf);
        self.keystream(buf)
    }

    /// Compute the tag over everything processed so far.
    pub fn finalize(mut self) -> [u8; TAG_SIZE] {
        if self.pending_len > 0 {
            self.ghash.update_padded(&self.pending[..self.pending_len]);
        }

        let mut lengths = [0u8; BLOCK_SIZE];
        lengths[8..].copy_from_slice(&(self.ciphertext_len * 8).to_be_bytes());
        self.ghash.update(&[lengths.into()]);

        let s = self.ghash.finalize();
        let mut tag = [0u8; TAG_SIZE];
        for (i, t) in tag.iter_mut().enumerate() {
            *t = s[i] ^ self.tag_mask[i];
        }
        tag
    }

    /// Finalize and compare against `expected` in constant time.
    pub fn verify(self, expected: &[u8; TAG_SIZE]) -> SbkResult<()> {
        let computed = self.finalize();
        if bool::from(computed.ct_eq(expected)) {
            Ok(())
        } else {
            Err(SbkError::Authentication)
        }
    }

    fn keystream(&mut self, buf: &mut [u8]) -> SbkResult<()> {
        self.ctr.try_apply_keystream(buf).map_err(|_| {
            SbkError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "payload exceeds the AES-GCM length limit",
            ))
        })
    }

    fn absorb(&mut self, mut data: &[u8]) {
        self.ciphertext_len += data.len() as u64;

        if self.pending_len > 0 {
            let take = (BLOCK_SIZE - self.pending_len).min(data.len());
            self.pending[self.pending_len..self.pending_len + take].copy_from_slice(&data[..take]);
            self.pending_len += take;
            data = &data[take..];
            if self.pending_len < BLOCK_SIZE {
                return;
            }
            self.ghash.update(&[self.pending.into()]);
            self.pending_len = 0;
        }

        let mut blocks = data.chunks_exact(BLOCK_SIZE);
        for block in blocks.by_ref() {
            self.ghash.update(&[ghash::Block::clone_from_slice(block)]);
        }
        let rest = blocks.remainder();
        self.pending[..rest.len()].copy_from_slice(rest);
        self.pending_len = rest.len();
    }
}
