//! Whole-buffer LZ4 frame compression
//!
//! The container is compressed as one LZ4 frame, so memory use is bounded by
//! the total archive size. Streaming frames interleaved with the cipher
//! would lift that limit.

use std::io::{Read, Write};

use lz4_flex::frame::{FrameDecoder, FrameEncoder};
use sbk_core::{SbkError, SbkResult};

/// Compress `data` into a single LZ4 frame.
pub fn compress(data: &[u8]) -> SbkResult<Vec<u8>> {
    let mut encoder = FrameEncoder::new(Vec::with_capacity(data.len() / 2 + 64));
    encoder
        .write_all(data)
        .map_err(|e| SbkError::Archive(format!("lz4 compress: {e}")))?;
    encoder
        .finish()
        .map_err(|e| SbkError::Archive(format!("lz4 compress: {e}")))
}

/// Decompress an LZ4 frame produced by [`compress`].
pub fn decompress(data: &[u8]) -> SbkResult<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 2);
    FrameDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| SbkError::Archive(format!("lz4 decompress: {e}")))?;
    Ok(out)
}
