//! Tar container: building from source paths and guarded extraction
//!
//! Each source is stored under its own base name; directories keep their
//! relative layout beneath it, so `~/work/docs/a.txt` from source `~/work/docs`
//! becomes `docs/a.txt`. Symlinks are stored as links, never followed.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use sbk_core::{SbkError, SbkResult};
use tar::{Builder, EntryType, Header};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// A source path (or a file beneath one) left out of the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedSource {
    pub path: PathBuf,
    pub reason: String,
}

/// Result of building a container.
#[derive(Debug, Default)]
pub struct BuiltContainer {
    pub bytes: Vec<u8>,
    pub entries: usize,
    pub skipped: Vec<SkippedSource>,
}

/// Result of extracting a container.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UnpackOutput {
    pub extracted: usize,
    /// Entries refused because they would land outside the destination
    pub rejected: Vec<PathBuf>,
}

/// Build an uncompressed tar of `sources`.
///
/// A source that cannot be read is logged, recorded in `skipped` and left
/// out; the remaining sources are still archived. Files are read fully
/// before their header is written, so a read failure never leaves a
/// truncated entry behind.
pub fn build(sources: &[PathBuf]) -> SbkResult<BuiltContainer> {
    let mut builder = Builder::new(Vec::new());
    let mut out = BuiltContainer::default();

    for source in sources {
        let Some(arc_root) = source.file_name().map(PathBuf::from) else {
            warn!(path = %source.display(), "source has no file name, skipping");
            out.skipped.push(SkippedSource {
                path: source.clone(),
                reason: "path has no file name component".into(),
            });
            continue;
        };
        out.entries += append_tree(&mut builder, source, &arc_root, &mut out.skipped);
    }

    out.bytes = builder
        .into_inner()
        .map_err(|e| SbkError::Archive(format!("finishing tar: {e}")))?;
    debug!(
        entries = out.entries,
        skipped = out.skipped.len(),
        bytes = out.bytes.len(),
        "built container"
    );
    Ok(out)
}

fn append_tree(
    builder: &mut Builder<Vec<u8>>,
    source: &Path,
    arc_root: &Path,
    skipped: &mut Vec<SkippedSource>,
) -> usize {
    let mut appended = 0;
    for entry in WalkDir::new(source).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().unwrap_or(source).to_path_buf();
                skip(skipped, path, io::Error::from(e));
                continue;
            }
        };

        let rel = entry.path().strip_prefix(source).unwrap_or(Path::new(""));
        let arc_path = if rel.as_os_str().is_empty() {
            arc_root.to_path_buf()
        } else {
            arc_root.join(rel)
        };

        match append_entry(builder, &entry, &arc_path) {
            Ok(()) => appended += 1,
            Err(e) => skip(skipped, entry.path().to_path_buf(), e),
        }
    }
    appended
}

fn skip(skipped: &mut Vec<SkippedSource>, path: PathBuf, source: io::Error) {
    let reason = SbkError::SourceRead {
        path: path.clone(),
        source,
    }
    .to_string();
    warn!(%reason, "skipping source");
    skipped.push(SkippedSource { path, reason });
}

fn append_entry(builder: &mut Builder<Vec<u8>>, entry: &DirEntry, arc_path: &Path) -> io::Result<()> {
    let meta = entry.metadata().map_err(io::Error::from)?;
    let file_type = entry.file_type();

    let mut header = Header::new_gnu();
    header.set_metadata(&meta);

    if file_type.is_dir() {
        header.set_entry_type(EntryType::Directory);
        header.set_size(0);
        builder.append_data(&mut header, arc_path, io::empty())
    } else if file_type.is_file() {
        let data = fs::read(entry.path())?;
        header.set_size(data.len() as u64);
        builder.append_data(&mut header, arc_path, data.as_slice())
    } else if file_type.is_symlink() {
        let target = fs::read_link(entry.path())?;
        header.set_entry_type(EntryType::Symlink);
        header.set_size(0);
        builder.append_link(&mut header, arc_path, target)
    } else {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "special files are not archived",
        ))
    }
}

/// Extract a tar container into `destination`.
///
/// Entries whose path is absolute or climbs out with `..`, and links whose
/// target would resolve outside `destination` (following links already
/// extracted), are refused and reported in [`UnpackOutput::rejected`].
/// Everything else is written beneath `destination`, overwriting existing
/// files of the same name.
///
/// Directories are created writable as they appear and get their archived
/// mode and mtime only after every other entry is in place, deepest first,
/// so a read-only directory never blocks its own children.
pub fn extract(container: &[u8], destination: &Path) -> SbkResult<UnpackOutput> {
    fs::create_dir_all(destination)
        .map_err(|e| SbkError::resource(format!("creating {}", destination.display()), e))?;
    let root = fs::canonicalize(destination)
        .map_err(|e| SbkError::resource(format!("resolving {}", destination.display()), e))?;

    let mut archive = tar::Archive::new(container);
    archive.set_overwrite(true);
    let entries = archive
        .entries()
        .map_err(|e| SbkError::Archive(format!("reading tar: {e}")))?;

    let mut out = UnpackOutput::default();
    let mut directories = Vec::new();
    for entry in entries {
        let mut entry = entry.map_err(|e| SbkError::Archive(format!("reading tar entry: {e}")))?;
        let path = entry
            .path()
            .map_err(|e| SbkError::Archive(format!("tar entry path: {e}")))?
            .into_owned();

        if let Err(reason) = check_entry(&entry, &path, &root) {
            warn!(path = %path.display(), reason, "refusing archive entry");
            out.rejected.push(path);
            continue;
        }

        if entry.header().entry_type() == EntryType::Directory {
            let dir = root.join(&path);
            fs::create_dir_all(&dir)
                .and_then(|_| make_owner_writable(&dir))
                .map_err(|e| SbkError::resource(format!("creating {}", dir.display()), e))?;
            directories.push((path, entry));
            continue;
        }

        unpack_one(&mut entry, &path, &root, &mut out)?;
    }

    for (path, mut entry) in directories.into_iter().rev() {
        unpack_one(&mut entry, &path, &root, &mut out)?;
    }

    debug!(
        extracted = out.extracted,
        rejected = out.rejected.len(),
        "extracted container"
    );
    Ok(out)
}

fn unpack_one<R: io::Read>(
    entry: &mut tar::Entry<'_, R>,
    path: &Path,
    root: &Path,
    out: &mut UnpackOutput,
) -> SbkResult<()> {
    match entry.unpack_in(root) {
        Ok(true) => out.extracted += 1,
        Ok(false) => {
            warn!(path = %path.display(), "refusing archive entry outside destination");
            out.rejected.push(path.to_path_buf());
        }
        Err(e) => {
            return Err(SbkError::resource(
                format!("extracting {}", path.display()),
                e,
            ))
        }
    }
    Ok(())
}

#[cfg(unix)]
fn make_owner_writable(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = fs::metadata(dir)?.permissions().mode();
    if mode & 0o700 != 0o700 {
        fs::set_permissions(dir, fs::Permissions::from_mode(mode | 0o700))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn make_owner_writable(_dir: &Path) -> io::Result<()> {
    Ok(())
}

fn check_entry<R: io::Read>(
    entry: &tar::Entry<'_, R>,
    path: &Path,
    root: &Path,
) -> Result<(), &'static str> {
    if !is_contained(path) {
        return Err("path escapes destination");
    }

    let full = root.join(path);
    let entry_type = entry.header().entry_type();
    let parent = full.parent().unwrap_or(root);
    let placed = if entry_type == EntryType::Directory {
        resolves_inside(root, &full)
    } else {
        resolves_inside(root, parent)
    };
    if !placed {
        return Err("path resolves outside destination through a link");
    }

    let link_base = match entry_type {
        EntryType::Symlink => parent,
        // hard link names are relative to the archive root
        EntryType::Link => root,
        _ => return Ok(()),
    };
    let target = entry
        .link_name()
        .map_err(|_| "unreadable link target")?
        .ok_or("link without target")?;
    if target.is_absolute() || !resolves_inside(root, &link_base.join(&target)) {
        return Err("link target escapes destination");
    }
    Ok(())
}

/// True if `candidate` resolves to `root` or below it.
///
/// The longest prefix that exists on disk is canonicalized, following
/// links extracted so far. The remainder may hold only plain names: a `..`
/// after a name that does not exist yet could be redirected by a link
/// extracted later.
fn resolves_inside(root: &Path, candidate: &Path) -> bool {
    let components: Vec<Component<'_>> = candidate.components().collect();
    for split in (1..=components.len()).rev() {
        let prefix: PathBuf = components[..split].iter().collect();
        let Ok(mut resolved) = fs::canonicalize(&prefix) else {
            continue;
        };
        for component in &components[split..] {
            match component {
                Component::Normal(name) => resolved.push(name),
                Component::CurDir => {}
                _ => return false,
            }
        }
        return resolved.starts_with(root);
    }
    false
}

/// True if `path` is relative and never climbs above its starting point.
fn is_contained(path: &Path) -> bool {
    let mut depth: usize = 0;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return false,
            },
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}
