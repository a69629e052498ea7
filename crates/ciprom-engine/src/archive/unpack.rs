//! Archive extraction.
//!
//! Archives are tar streams, optionally gzip-compressed. Only directories and
//! regular files are accepted; entries may appear in any order, so parent
//! directories are created on demand.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::{Archive, EntryType};
use tracing::debug;

use crate::error::{ExtractError, ExtractResult};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Counts from one extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnpackStats {
    /// Directory entries processed.
    pub directories: usize,
    /// Regular files written.
    pub files: usize,
    /// Bytes written across all files.
    pub bytes: u64,
}

/// Unpack `archive` into `dest`.
///
/// Existing files are replaced, so unpacking the same archive twice yields
/// the same tree.
///
/// # Errors
///
/// Returns error on I/O failure, on entries other than directories and
/// regular files, and on entries that would land outside `dest`.
pub fn unpack(archive: &Path, dest: &Path) -> ExtractResult<UnpackStats> {
    let mut reader = BufReader::new(File::open(archive)?);
    let gzipped = reader.fill_buf()?.starts_with(&GZIP_MAGIC);

    fs::create_dir_all(dest)?;
    let stats = if gzipped {
        extract_entries(Archive::new(GzDecoder::new(reader)), dest)?
    } else {
        extract_entries(Archive::new(reader), dest)?
    };

    debug!(
        archive = %archive.display(),
        dest = %dest.display(),
        gzipped,
        files = stats.files,
        bytes = stats.bytes,
        "archive unpacked"
    );
    Ok(stats)
}

fn extract_entries<R: Read>(mut archive: Archive<R>, dest: &Path) -> ExtractResult<UnpackStats> {
    let mut stats = UnpackStats::default();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let declared = entry.path()?.into_owned();
        let relative = confined(&declared)?;
        let target = dest.join(&relative);

        match entry.header().entry_type() {
            EntryType::Directory => {
                fs::create_dir_all(&target)?;
                stats.directories += 1;
            }
            EntryType::Regular | EntryType::Continuous => {
                if relative.as_os_str().is_empty() {
                    return Err(ExtractError::UnsafePath {
                        path: declared.display().to_string(),
                    });
                }
                let mode = entry.header().mode().ok();
                stats.bytes += write_file(&mut entry, &target, mode)?;
                stats.files += 1;
            }
            other => {
                return Err(ExtractError::UnsupportedEntry {
                    path: declared.display().to_string(),
                    kind: format!("{other:?}"),
                });
            }
        }
    }

    Ok(stats)
}

/// Reduce an entry path to normal components below the destination.
fn confined(path: &Path) -> ExtractResult<PathBuf> {
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ExtractError::UnsafePath {
                    path: path.display().to_string(),
                });
            }
        }
    }
    Ok(relative)
}

fn write_file(reader: &mut impl Read, target: &Path, mode: Option<u32>) -> io::Result<u64> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    if target.is_file() {
        fs::remove_file(target)?;
    }

    let mut file = File::create(target)?;
    let written = io::copy(reader, &mut file)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Some(mode) = mode {
            fs::set_permissions(target, fs::Permissions::from_mode(mode & 0o7777))?;
        }
    }
    #[cfg(not(unix))]
    let _ = mode;

    Ok(written)
}

/// Recursively make `root` and everything below it readable and writable by
/// all users, so an unprivileged backend can open the data read-write.
///
/// # Errors
///
/// Returns error if the tree cannot be walked or a permission cannot be set.
pub fn open_permissions(root: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        fs::set_permissions(root, fs::Permissions::from_mode(0o777))?;
        if root.is_dir() {
            for entry in fs::read_dir(root)? {
                let entry = entry?;
                if entry.file_type()?.is_symlink() {
                    continue;
                }
                open_permissions(&entry.path())?;
            }
        }
    }
    #[cfg(not(unix))]
    let _ = root;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tar::{Builder, Header};

    fn file_header(path: &str, len: usize, mode: u32) -> Header {
        let mut header = Header::new_gnu();
        header.set_path(path).expect("path");
        header.set_size(len as u64);
        header.set_mode(mode);
        header.set_entry_type(EntryType::Regular);
        header.set_cksum();
        header
    }

    fn dir_header(path: &str) -> Header {
        let mut header = Header::new_gnu();
        header.set_path(path).expect("path");
        header.set_size(0);
        header.set_mode(0o755);
        header.set_entry_type(EntryType::Directory);
        header.set_cksum();
        header
    }

    /// A TSDB-like tree with a file listed before its directory.
    fn tsdb_tar() -> Vec<u8> {
        let mut builder = Builder::new(Vec::new());
        let chunk = b"chunk-data-0001";
        builder
            .append(&file_header("01DP/chunks/000001", chunk.len(), 0o644), &chunk[..])
            .expect("append");
        builder.append(&dir_header("01DP/"), io::empty()).expect("append");
        builder.append(&dir_header("01DP/chunks/"), io::empty()).expect("append");
        let meta = br#"{"ulid":"01DP"}"#;
        builder
            .append(&file_header("01DP/meta.json", meta.len(), 0o640), &meta[..])
            .expect("append");
        builder.append(&dir_header("wal/"), io::empty()).expect("append");
        builder.into_inner().expect("finish")
    }

    fn write_archive(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, bytes).expect("write archive");
        path
    }

    fn snapshot(root: &Path) -> BTreeMap<PathBuf, Option<Vec<u8>>> {
        fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, Option<Vec<u8>>>) {
            for entry in fs::read_dir(dir).expect("read_dir") {
                let path = entry.expect("entry").path();
                let rel = path.strip_prefix(root).expect("prefix").to_path_buf();
                if path.is_dir() {
                    out.insert(rel, None);
                    walk(root, &path, out);
                } else {
                    out.insert(rel, Some(fs::read(&path).expect("read")));
                }
            }
        }
        let mut out = BTreeMap::new();
        walk(root, root, &mut out);
        out
    }

    #[test]
    fn test_unpack_creates_parents_on_demand() {
        let work = tempfile::tempdir().expect("tempdir");
        let archive = write_archive(work.path(), "prometheus.tar", &tsdb_tar());
        let dest = work.path().join("prometheus");

        let stats = unpack(&archive, &dest).expect("unpack");
        assert_eq!(stats.files, 2);
        assert_eq!(stats.directories, 3);
        assert_eq!(
            fs::read(dest.join("01DP/chunks/000001")).expect("chunk"),
            b"chunk-data-0001"
        );
        assert!(dest.join("wal").is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_unpack_applies_declared_mode() {
        use std::os::unix::fs::PermissionsExt;

        let work = tempfile::tempdir().expect("tempdir");
        let archive = write_archive(work.path(), "prometheus.tar", &tsdb_tar());
        let dest = work.path().join("out");
        unpack(&archive, &dest).expect("unpack");

        let mode = fs::metadata(dest.join("01DP/meta.json"))
            .expect("meta")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o640);
    }

    #[test]
    fn test_unpack_is_idempotent() {
        let work = tempfile::tempdir().expect("tempdir");
        let archive = write_archive(work.path(), "prometheus.tar", &tsdb_tar());

        let first = work.path().join("first");
        let second = work.path().join("second");
        unpack(&archive, &first).expect("first unpack");
        unpack(&archive, &second).expect("second unpack");
        assert_eq!(snapshot(&first), snapshot(&second));

        // Re-extracting over an existing tree replaces files in place.
        unpack(&archive, &first).expect("repeat unpack");
        assert_eq!(snapshot(&first), snapshot(&second));
    }

    #[test]
    fn test_unpack_gzip_compressed() {
        let work = tempfile::tempdir().expect("tempdir");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        io::Write::write_all(&mut encoder, &tsdb_tar()).expect("compress");
        let archive = write_archive(work.path(), "prometheus.tar", &encoder.finish().expect("gz"));

        let dest = work.path().join("prometheus");
        let stats = unpack(&archive, &dest).expect("unpack");
        assert_eq!(stats.files, 2);
        assert!(dest.join("01DP/meta.json").is_file());
    }

    #[test]
    fn test_unpack_rejects_symlink() {
        let work = tempfile::tempdir().expect("tempdir");
        let mut builder = Builder::new(Vec::new());
        let mut header = Header::new_gnu();
        header.set_path("link").expect("path");
        header.set_size(0);
        header.set_entry_type(EntryType::Symlink);
        header.set_link_name("target").expect("link");
        header.set_cksum();
        builder.append(&header, io::empty()).expect("append");
        let archive = write_archive(work.path(), "bad.tar", &builder.into_inner().expect("tar"));

        let err = unpack(&archive, &work.path().join("out")).expect_err("symlink");
        assert!(matches!(err, ExtractError::UnsupportedEntry { .. }));
    }

    #[test]
    fn test_unpack_rejects_parent_escape() {
        let work = tempfile::tempdir().expect("tempdir");
        let mut header = Header::new_old();
        let name = b"../escape";
        header.as_old_mut().name[..name.len()].copy_from_slice(name);
        header.set_size(1);
        header.set_mode(0o644);
        header.set_entry_type(EntryType::Regular);
        header.set_cksum();
        let mut builder = Builder::new(Vec::new());
        builder.append(&header, &b"x"[..]).expect("append");
        let archive = write_archive(work.path(), "bad.tar", &builder.into_inner().expect("tar"));

        let dest = work.path().join("out");
        let err = unpack(&archive, &dest).expect_err("escape");
        assert!(matches!(err, ExtractError::UnsafePath { .. }));
        assert!(!work.path().join("escape").exists());
    }

    #[test]
    fn test_unpack_missing_archive_is_io_error() {
        let work = tempfile::tempdir().expect("tempdir");
        let err = unpack(&work.path().join("absent.tar"), work.path()).expect_err("missing");
        assert!(matches!(err, ExtractError::Io(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_open_permissions_recursive() {
        use std::os::unix::fs::PermissionsExt;

        let work = tempfile::tempdir().expect("tempdir");
        let archive = write_archive(work.path(), "prometheus.tar", &tsdb_tar());
        let dest = work.path().join("prometheus");
        unpack(&archive, &dest).expect("unpack");

        open_permissions(&dest).expect("chmod");
        for path in [
            dest.clone(),
            dest.join("01DP"),
            dest.join("01DP/meta.json"),
            dest.join("01DP/chunks/000001"),
        ] {
            let mode = fs::metadata(&path).expect("meta").permissions().mode();
            assert_eq!(mode & 0o777, 0o777, "{}", path.display());
        }
    }
}
