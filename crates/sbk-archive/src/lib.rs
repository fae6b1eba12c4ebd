//! sbk-archive: turns a list of source paths into one compressed payload
//! and back.
//!
//! Payload layout: a POSIX/GNU tar container wrapped in a single LZ4 frame.
//! The whole payload lives in memory; the caller stages it on disk before
//! encryption.

pub mod container;
pub mod lz4;

use std::path::{Path, PathBuf};

use sbk_core::SbkResult;
use tracing::info;

pub use container::{SkippedSource, UnpackOutput};

/// Output of [`pack`].
#[derive(Debug, Default)]
pub struct PackOutput {
    /// LZ4-framed tar container
    pub compressed: Vec<u8>,
    /// Uncompressed container size
    pub container_len: usize,
    /// Files, directories and links written
    pub entries: usize,
    pub skipped: Vec<SkippedSource>,
}

/// Archive and compress `sources`.
///
/// Unreadable sources are skipped and reported, never fatal. An empty list,
/// or one where every source was skipped, still yields a valid (empty)
/// container.
pub fn pack(sources: &[PathBuf]) -> SbkResult<PackOutput> {
    let built = container::build(sources)?;
    let compressed = lz4::compress(&built.bytes)?;

    info!(
        sources = sources.len(),
        entries = built.entries,
        skipped = built.skipped.len(),
        container_len = built.bytes.len(),
        compressed_len = compressed.len(),
        "packed sources"
    );
    Ok(PackOutput {
        compressed,
        container_len: built.bytes.len(),
        entries: built.entries,
        skipped: built.skipped,
    })
}

/// Decompress and extract a payload produced by [`pack`] into `destination`.
pub fn unpack(compressed: &[u8], destination: &Path) -> SbkResult<UnpackOutput> {
    let container = lz4::decompress(compressed)?;
    let extracted = container::extract(&container, destination)?;
    info!(
        destination = %destination.display(),
        extracted = extracted.extracted,
        rejected = extracted.rejected.len(),
        "unpacked payload"
    );
    Ok(extracted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use sbk_core::SbkError;
    use std::fs;
    use tar::{EntryType, Header};

    /// Header whose name and link fields are written raw, bypassing the
    /// path checks `tar::Builder` applies, to simulate hostile archives.
    fn raw_header(name: &str, kind: EntryType, size: u64, link: Option<&str>) -> Header {
        let mut header = Header::new_gnu();
        {
            let old = header.as_old_mut();
            old.name[..name.len()].copy_from_slice(name.as_bytes());
            if let Some(link) = link {
                old.linkname[..link.len()].copy_from_slice(link.as_bytes());
            }
        }
        header.set_entry_type(kind);
        header.set_size(size);
        header.set_mode(0o644);
        header.set_cksum();
        header
    }

    fn hostile_payload() -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        builder
            .append(&raw_header("../evil.txt", EntryType::Regular, 4, None), &b"evil"[..])
            .unwrap();
        builder
            .append(&raw_header("/tmp/abs.txt", EntryType::Regular, 3, None), &b"abs"[..])
            .unwrap();
        builder
            .append(
                &raw_header("escape", EntryType::Symlink, 0, Some("../../outside")),
                std::io::empty(),
            )
            .unwrap();
        // each link is harmless alone, but `a` walks back out through `x`
        builder
            .append(&raw_header("x", EntryType::Symlink, 0, Some(".")), std::io::empty())
            .unwrap();
        builder
            .append(&raw_header("a", EntryType::Symlink, 0, Some("x/..")), std::io::empty())
            .unwrap();
        builder
            .append(&raw_header("ok.txt", EntryType::Regular, 2, None), &b"ok"[..])
            .unwrap();
        lz4::compress(&builder.into_inner().unwrap()).unwrap()
    }

    #[test]
    fn test_pack_unpack_layout() {
        let src = tempfile::tempdir().unwrap();
        let notes = src.path().join("notes.txt");
        fs::write(&notes, b"hello").unwrap();
        let docs = src.path().join("docs");
        fs::create_dir(&docs).unwrap();
        fs::write(docs.join("a.txt"), b"alpha").unwrap();

        let packed = pack(&[notes, docs]).unwrap();
        assert_eq!(packed.entries, 3);
        assert!(packed.skipped.is_empty());

        let out = tempfile::tempdir().unwrap();
        let extracted = unpack(&packed.compressed, out.path()).unwrap();
        assert_eq!(extracted.extracted, 3);
        assert!(extracted.rejected.is_empty());
        assert_eq!(fs::read(out.path().join("notes.txt")).unwrap(), b"hello");
        assert_eq!(fs::read(out.path().join("docs/a.txt")).unwrap(), b"alpha");
    }

    #[test]
    fn test_pack_nothing_is_valid() {
        let packed = pack(&[]).unwrap();
        assert_eq!(packed.entries, 0);

        let out = tempfile::tempdir().unwrap();
        let extracted = unpack(&packed.compressed, out.path()).unwrap();
        assert_eq!(extracted.extracted, 0);
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_unpack_overwrites_existing() {
        let src = tempfile::tempdir().unwrap();
        let file = src.path().join("report.txt");
        fs::write(&file, b"new contents").unwrap();
        let packed = pack(&[file]).unwrap();

        let out = tempfile::tempdir().unwrap();
        fs::write(out.path().join("report.txt"), b"old").unwrap();
        unpack(&packed.compressed, out.path()).unwrap();
        assert_eq!(fs::read(out.path().join("report.txt")).unwrap(), b"new contents");
    }

    #[test]
    fn test_unpack_refuses_escaping_entries() {
        let root = tempfile::tempdir().unwrap();
        let dest = root.path().join("restore");

        let extracted = unpack(&hostile_payload(), &dest).unwrap();
        assert_eq!(extracted.extracted, 2);
        assert_eq!(
            extracted.rejected,
            [
                PathBuf::from("../evil.txt"),
                PathBuf::from("/tmp/abs.txt"),
                PathBuf::from("escape"),
                PathBuf::from("a"),
            ]
        );
        assert_eq!(fs::read(dest.join("ok.txt")).unwrap(), b"ok");
        assert!(!root.path().join("evil.txt").exists());
        assert!(fs::symlink_metadata(dest.join("escape")).is_err());
        assert!(fs::symlink_metadata(dest.join("a")).is_err());
    }

    #[test]
    fn test_unpack_garbage_is_format_kind() {
        let out = tempfile::tempdir().unwrap();
        let err = unpack(b"not an lz4 frame", out.path()).unwrap_err();
        assert!(matches!(err, SbkError::Archive(_)));
        assert_eq!(err.kind(), sbk_core::ErrorKind::Format);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn files_survive_pack_unpack(
            files in proptest::collection::btree_map(
                "[a-z]{1,12}",
                proptest::collection::vec(any::<u8>(), 0..2048),
                1..8,
            ),
        ) {
            let src = tempfile::tempdir().unwrap();
            let tree = src.path().join("tree");
            fs::create_dir(&tree).unwrap();
            for (name, data) in &files {
                fs::write(tree.join(name), data).unwrap();
            }

            let packed = pack(&[tree]).unwrap();
            prop_assert_eq!(packed.entries, files.len() + 1);

            let out = tempfile::tempdir().unwrap();
            unpack(&packed.compressed, out.path()).unwrap();
            for (name, data) in &files {
                let restored = fs::read(out.path().join("tree").join(name)).unwrap();
                prop_assert_eq!(&restored, data);
            }
        }
    }
}
