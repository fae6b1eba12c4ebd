use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use sbk_core::{EnginePaths, SbkError, SbkResult};
use sbk_crypto::{decrypt_file, encrypt_stream, KeyCheck};
use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use crate::staging::{write_replacing, StagedFile};

/// Outcome of a restore
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Entries written into the output directory
    pub extracted: usize,
    /// Entries refused because they would escape the output directory
    pub rejected: Vec<PathBuf>,
    /// Size of the decrypted payload
    pub payload_bytes: u64,
}

/// Entry point for collaborators (CLI, scheduler).
///
/// Holds nothing but paths; every call is independent and runs to
/// completion on the calling thread.
#[derive(Debug, Clone)]
pub struct Engine {
    paths: EnginePaths,
    keycheck: KeyCheck,
}

impl Engine {
    pub fn new(paths: EnginePaths) -> Self {
        let keycheck = KeyCheck::new(paths.keycheck_file.clone());
        Self { paths, keycheck }
    }

    pub fn paths(&self) -> &EnginePaths {
        &self.paths
    }

    pub fn keycheck(&self) -> &KeyCheck {
        &self.keycheck
    }

    /// Archive, compress and encrypt `sources` into
    /// `destination/output_name`, returning the written path.
    ///
    /// Unreadable sources are skipped with a warning. The output is written
    /// beside its final name and renamed over it only on success, so a
    /// failed run leaves any earlier file of that name intact.
    pub fn run_backup(
        &self,
        sources: &[PathBuf],
        destination: &Path,
        password: &SecretString,
        output_name: &str,
    ) -> SbkResult<PathBuf> {
        require_password(password)?;
        fs::create_dir_all(destination)
            .map_err(|e| SbkError::resource(format!("creating {}", destination.display()), e))?;

        let packed = sbk_archive::pack(sources)?;

        let stem = format!("payload_{}", stem_of(Path::new(output_name)));
        let staged = StagedFile::reserve(&self.paths.temp_dir, &stem)?;
        fs::write(staged.path(), &packed.compressed)
            .map_err(|e| SbkError::resource(format!("staging {}", staged.path().display()), e))?;

        let output = destination.join(output_name);
        let input = File::open(staged.path())
            .map_err(|e| SbkError::resource(format!("opening {}", staged.path().display()), e))?;
        let stats = write_replacing(&output, |sink| {
            encrypt_stream(BufReader::new(input), sink, password)
        })?;

        info!(
            output = %output.display(),
            entries = packed.entries,
            skipped = packed.skipped.len(),
            payload_bytes = stats.bytes_in,
            output_bytes = stats.bytes_out,
            "backup complete"
        );
        Ok(output)
    }

    /// Decrypt `archive` and extract it into `output_dir`.
    ///
    /// Nothing is extracted unless the whole file authenticates.
    pub fn run_restore(
        &self,
        archive: &Path,
        output_dir: &Path,
        password: &SecretString,
    ) -> SbkResult<RestoreReport> {
        require_password(password)?;
        fs::create_dir_all(output_dir)
            .map_err(|e| SbkError::resource(format!("creating {}", output_dir.display()), e))?;

        let staged = StagedFile::reserve(&self.paths.temp_dir, &stem_of(archive))?;
        let stats = decrypt_file(archive, staged.path(), password)?;

        let payload = fs::read(staged.path())
            .map_err(|e| SbkError::resource(format!("reading {}", staged.path().display()), e))?;
        let unpacked = sbk_archive::unpack(&payload, output_dir)?;

        info!(
            archive = %archive.display(),
            output_dir = %output_dir.display(),
            extracted = unpacked.extracted,
            rejected = unpacked.rejected.len(),
            "restore complete"
        );
        Ok(RestoreReport {
            extracted: unpacked.extracted,
            rejected: unpacked.rejected,
            payload_bytes: stats.bytes_out,
        })
    }

    /// True if `password` matches the keycheck, or no keycheck exists yet.
    pub fn verify_password(&self, password: &SecretString) -> bool {
        self.keycheck.verify(password)
    }

    /// Create the keycheck for `password` if none exists. Returns true when
    /// this call created it.
    pub fn ensure_keycheck(&self, password: &SecretString) -> SbkResult<bool> {
        require_password(password)?;
        self.keycheck.ensure(password)
    }
}

fn require_password(password: &SecretString) -> SbkResult<()> {
    if password.expose_secret().is_empty() {
        return Err(SbkError::EmptyPassword);
    }
    Ok(())
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "backup".to_string())
}
