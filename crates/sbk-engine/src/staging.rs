//! Transient payload files in the engine's temp directory, and
//! replace-on-success writes of final outputs

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use sbk_core::{SbkError, SbkResult};
use tracing::{debug, warn};

/// Suffix of every staged payload
pub const STAGED_SUFFIX: &str = ".tar.lz4";

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// A reserved temp path that is removed when the guard drops.
///
/// The file itself may or may not exist yet; drop removes it either way
/// and only logs if removal fails, so cleanup never hides the error that
/// caused an early return.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
}

impl StagedFile {
    /// Reserve `temp_dir/<stem>.<pid>-<n>.tar.lz4`, creating `temp_dir`.
    pub fn reserve(temp_dir: &Path, stem: &str) -> SbkResult<Self> {
        Self::reserve_with_suffix(temp_dir, stem, STAGED_SUFFIX)
    }

    fn reserve_with_suffix(dir: &Path, stem: &str, suffix: &str) -> SbkResult<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| SbkError::resource(format!("creating {}", dir.display()), e))?;

        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let name = format!("{stem}.{}-{id}{suffix}", std::process::id());
        let path = dir.join(name);
        debug!(path = %path.display(), "reserved staging file");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Suffix of in-progress outputs written by [`write_replacing`]
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Write `target` through a hidden sibling file and rename it into place
/// once `write` and an fsync succeed.
///
/// On any failure the sibling is removed and whatever was at `target`
/// before is left untouched.
pub fn write_replacing<T>(
    target: &Path,
    write: impl FnOnce(&mut File) -> SbkResult<T>,
) -> SbkResult<T> {
    let dir = match target.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let name = target
        .file_name()
        .ok_or_else(|| SbkError::Config(format!("{} names no file", target.display())))?
        .to_string_lossy();
    let partial = StagedFile::reserve_with_suffix(dir, &format!(".{name}"), PARTIAL_SUFFIX)?;

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(partial.path())
        .map_err(|e| SbkError::resource(format!("creating {}", partial.path().display()), e))?;
    let value = write(&mut file)?;
    file.sync_all()
        .map_err(|e| SbkError::resource(format!("syncing {}", partial.path().display()), e))?;
    drop(file);

    std::fs::rename(partial.path(), target)
        .map_err(|e| SbkError::resource(format!("replacing {}", target.display()), e))?;
    debug!(path = %target.display(), "output moved into place");
    Ok(value)
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed staging file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove staging file"),
        }
    }
}
