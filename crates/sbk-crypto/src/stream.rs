//! Streaming encryption to and from the `.sbk` file format
//!
//! Encryption writes the header with a zeroed tag, streams ciphertext in
//! [`CHUNK_SIZE`] pieces, then seeks back and patches the real tag in at
//! offset 32. A file cut short mid-stream still has a zero tag or a length
//! the tag does not cover, so it fails verification.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use sbk_core::{SbkError, SbkResult};
use secrecy::SecretString;
use tracing::debug;

use crate::gcm::GcmStream;
use crate::header::{Header, BACKUP_MAGIC, HEADER_LEN, TAG_OFFSET};
use crate::kdf::derive_key;
use crate::{random_bytes, CHUNK_SIZE, NONCE_SIZE, SALT_SIZE, TAG_SIZE};

/// Byte counts for one encrypt/decrypt pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// Encrypt everything from `reader` into `writer` as a `.sbk` stream.
pub fn encrypt_stream<R: Read, W: Write + Seek>(
    mut reader: R,
    mut writer: W,
    password: &SecretString,
) -> SbkResult<StreamStats> {
    let salt = random_bytes::<SALT_SIZE>();
    let nonce = random_bytes::<NONCE_SIZE>();
    let key = derive_key(password, &salt)?;
    let mut gcm = GcmStream::new(key.as_bytes(), &nonce);
    drop(key);

    let provisional = Header {
        salt,
        nonce,
        tag: [0u8; TAG_SIZE],
    };
    writer
        .write_all(&provisional.to_bytes(BACKUP_MAGIC))
        .map_err(|e| SbkError::resource("writing header", e))?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut bytes_in = 0u64;
    loop {
        let n = read_some(&mut reader, &mut buf)?;
        if n == 0 {
            break;
        }
        gcm.encrypt(&mut buf[..n])?;
        writer
            .write_all(&buf[..n])
            .map_err(|e| SbkError::resource("writing ciphertext", e))?;
        bytes_in += n as u64;
    }

    let tag = gcm.finalize();
    let end = writer
        .stream_position()
        .map_err(|e| SbkError::resource("locating end of output", e))?;
    writer
        .seek(SeekFrom::Start(TAG_OFFSET as u64))
        .and_then(|_| writer.write_all(&tag))
        .and_then(|_| writer.seek(SeekFrom::Start(end)))
        .and_then(|_| writer.flush())
        .map_err(|e| SbkError::resource("patching authentication tag", e))?;

    debug!(bytes_in, bytes_out = end, "encrypted stream");
    Ok(StreamStats {
        bytes_in,
        bytes_out: end,
    })
}

/// Decrypt a `.sbk` stream from `reader` into `writer`.
///
/// Plaintext is written as it is produced; the tag is only checked once the
/// input is exhausted. On [`SbkError::Authentication`] everything already
/// written to `writer` must be discarded by the caller.
pub fn decrypt_stream<R: Read, W: Write>(
    mut reader: R,
    mut writer: W,
    password: &SecretString,
) -> SbkResult<StreamStats> {
    let mut header_bytes = [0u8; HEADER_LEN];
    reader.read_exact(&mut header_bytes).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            SbkError::Format(format!("file shorter than the {HEADER_LEN}-byte header"))
        } else {
            SbkError::resource("reading header", e)
        }
    })?;
    let header = Header::parse(BACKUP_MAGIC, &header_bytes)?;

    let key = derive_key(password, &header.salt)?;
    let mut gcm = GcmStream::new(key.as_bytes(), &header.nonce);
    drop(key);

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut bytes_out = 0u64;
    loop {
        let n = read_some(&mut reader, &mut buf)?;
        if n == 0 {
            break;
        }
        gcm.decrypt(&mut buf[..n])?;
        writer
            .write_all(&buf[..n])
            .map_err(|e| SbkError::resource("writing plaintext", e))?;
        bytes_out += n as u64;
    }
    writer
        .flush()
        .map_err(|e| SbkError::resource("flushing plaintext", e))?;

    gcm.verify(&header.tag)?;

    debug!(bytes_out, "decrypted stream");
    Ok(StreamStats {
        bytes_in: HEADER_LEN as u64 + bytes_out,
        bytes_out,
    })
}

/// Encrypt the file at `plaintext_path` into a new `.sbk` at `ciphertext_path`.
pub fn encrypt_file(
    plaintext_path: &Path,
    ciphertext_path: &Path,
    password: &SecretString,
) -> SbkResult<StreamStats> {
    let input = File::open(plaintext_path)
        .map_err(|e| SbkError::resource(format!("opening {}", plaintext_path.display()), e))?;
    let output = File::create(ciphertext_path)
        .map_err(|e| SbkError::resource(format!("creating {}", ciphertext_path.display()), e))?;
    encrypt_stream(input, output, password)
}

/// Decrypt the `.sbk` at `ciphertext_path` into `plaintext_path`.
pub fn decrypt_file(
    ciphertext_path: &Path,
    plaintext_path: &Path,
    password: &SecretString,
) -> SbkResult<StreamStats> {
    let input = File::open(ciphertext_path)
        .map_err(|e| SbkError::resource(format!("opening {}", ciphertext_path.display()), e))?;
    let output = File::create(plaintext_path)
        .map_err(|e| SbkError::resource(format!("creating {}", plaintext_path.display()), e))?;
    decrypt_stream(input, output, password)
}

fn read_some<R: Read>(reader: &mut R, buf: &mut [u8]) -> SbkResult<usize> {
    loop {
        match reader.read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(SbkError::resource("reading input", e)),
        }
    }
}
