//! Filesystem primitives used by the engine: atomic writes, collision-free
//! names, recursive copy, cross-volume move, ZIP archiving and unpacking.
//!
//! None of the multi-step operations here are atomic as a whole. A failure
//! part-way through a tree copy leaves the files copied so far in place.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Errors raised by transfer primitives.
#[derive(Debug, Error)]
pub enum TransferError {
    /// A filesystem call failed.
    #[error("{operation} failed for {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Directory traversal failed.
    #[error("walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    /// Writing or reading an archive failed.
    #[error("archive failed for {path}: {message}")]
    Archive { path: PathBuf, message: String },

    /// An archive entry is larger than allowed once decompressed.
    #[error("archive entry {name} exceeds {limit} bytes")]
    EntryTooLarge { name: String, limit: u64 },
}

impl TransferError {
    fn io(operation: &'static str, path: &Path, source: io::Error) -> Self {
        TransferError::Io {
            operation,
            path: path.to_path_buf(),
            source,
        }
    }

    fn archive(path: &Path, error: impl std::fmt::Display) -> Self {
        TransferError::Archive {
            path: path.to_path_buf(),
            message: error.to_string(),
        }
    }
}

/// Temporary sibling path used for atomic writes.
fn temp_sibling(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp_name = format!(
        ".{}.{:x}_{}.tmp",
        name,
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos(),
        rand::random::<u32>()
    );
    destination.with_file_name(temp_name)
}

/// Write `bytes` to `destination` through a temporary sibling and a rename.
///
/// The parent directory must exist. `mode` is applied before the rename.
pub fn write_atomic(destination: &Path, bytes: &[u8], mode: Option<u32>) -> Result<(), TransferError> {
    let temp_path = temp_sibling(destination);

    let result = (|| {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .map_err(|e| TransferError::io("create", &temp_path, e))?;
        file.write_all(bytes)
            .and_then(|_| file.sync_all())
            .map_err(|e| TransferError::io("write", &temp_path, e))?;

        #[cfg(unix)]
        if let Some(mode) = mode {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&temp_path, fs::Permissions::from_mode(mode))
                .map_err(|e| TransferError::io("chmod", &temp_path, e))?;
        }
        #[cfg(not(unix))]
        let _ = mode;

        fs::rename(&temp_path, destination).map_err(|e| TransferError::io("rename", destination, e))
    })();

    if result.is_err() && temp_path.exists() {
        if let Err(e) = fs::remove_file(&temp_path) {
            warn!(path = ?temp_path, error = %e, "Failed to cleanup temp file after failed write");
        }
    }
    result
}

/// A name in `dir` that does not collide with an existing entry.
///
/// `report.pdf` becomes `report_1.pdf`, `report_2.pdf`, ... until free.
pub fn unique_name(dir: &Path, name: &str) -> String {
    if fs::symlink_metadata(dir.join(name)).is_err() {
        return name.to_string();
    }

    let (stem, ext) = match super::policy::extension_of(name) {
        Some(ext) => (&name[..name.len() - ext.len() - 1], Some(ext)),
        None => (name, None),
    };

    (1u64..)
        .map(|n| match ext {
            Some(ext) => format!("{}_{}.{}", stem, n, ext),
            None => format!("{}_{}", stem, n),
        })
        .find(|candidate| fs::symlink_metadata(dir.join(candidate)).is_err())
        .unwrap_or_else(|| name.to_string())
}

/// Copy a file or a whole directory tree. Symlinks are recreated, not
/// followed. Returns the number of entries created.
pub fn copy_tree(source: &Path, destination: &Path) -> Result<u64, TransferError> {
    let metadata =
        fs::symlink_metadata(source).map_err(|e| TransferError::io("stat", source, e))?;
    if !metadata.is_dir() {
        copy_entry(source, destination, &metadata)?;
        return Ok(1);
    }

    let mut created = 0;
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| TransferError::archive(entry.path(), e))?;
        let target = destination.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| TransferError::io("mkdir", &target, e))?;
        } else {
            let metadata = entry
                .path()
                .symlink_metadata()
                .map_err(|e| TransferError::io("stat", entry.path(), e))?;
            copy_entry(entry.path(), &target, &metadata)?;
        }
        created += 1;
    }
    Ok(created)
}

fn copy_entry(source: &Path, target: &Path, metadata: &fs::Metadata) -> Result<(), TransferError> {
    #[cfg(unix)]
    if metadata.file_type().is_symlink() {
        let link = fs::read_link(source).map_err(|e| TransferError::io("readlink", source, e))?;
        return std::os::unix::fs::symlink(&link, target)
            .map_err(|e| TransferError::io("symlink", target, e));
    }
    #[cfg(not(unix))]
    let _ = metadata;

    fs::copy(source, target)
        .map(|_| ())
        .map_err(|e| TransferError::io("copy", target, e))
}

/// Remove a file, symlink or directory tree.
pub fn remove_path(path: &Path) -> Result<(), TransferError> {
    let metadata = fs::symlink_metadata(path).map_err(|e| TransferError::io("stat", path, e))?;
    if metadata.is_dir() {
        fs::remove_dir_all(path).map_err(|e| TransferError::io("remove", path, e))
    } else {
        fs::remove_file(path).map_err(|e| TransferError::io("remove", path, e))
    }
}

/// Move an entry, preferring a single rename and falling back to
/// [`copy_then_remove`] when source and destination are on different volumes.
pub fn move_path(source: &Path, destination: &Path) -> Result<(), TransferError> {
    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            tracing::debug!(
                source = %source.display(),
                destination = %destination.display(),
                "Rename crosses volumes, copying instead"
            );
            copy_then_remove(source, destination)
        }
        Err(e) => Err(TransferError::io("rename", source, e)),
    }
}

/// Copy `source` to `destination`, then delete `source`.
///
/// The source is only removed once the whole copy succeeded.
pub fn copy_then_remove(source: &Path, destination: &Path) -> Result<(), TransferError> {
    copy_tree(source, destination)?;
    remove_path(source)
}

/// Build a ZIP archive of a directory in memory.
///
/// Entries are stored under the directory's own name. `keep(name, is_dir)`
/// decides per entry whether it is included; rejected directories are not
/// descended into.
pub fn zip_directory(
    source: &Path,
    keep: impl Fn(&str, bool) -> bool,
) -> Result<Vec<u8>, TransferError> {
    let base = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "archive".to_string());
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

    let walker = WalkDir::new(source)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0 || keep(&e.file_name().to_string_lossy(), e.file_type().is_dir())
        });

    for entry in walker {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| TransferError::archive(entry.path(), e))?;
        let mut name = base.clone();
        for component in relative.components() {
            name.push('/');
            name.push_str(&component.as_os_str().to_string_lossy());
        }

        if entry.file_type().is_dir() {
            writer
                .add_directory(name, options)
                .map_err(|e| TransferError::archive(entry.path(), e))?;
        } else if entry.file_type().is_file() {
            writer
                .start_file(name, options)
                .map_err(|e| TransferError::archive(entry.path(), e))?;
            let mut file =
                File::open(entry.path()).map_err(|e| TransferError::io("open", entry.path(), e))?;
            io::copy(&mut file, &mut writer)
                .map_err(|e| TransferError::io("read", entry.path(), e))?;
        }
    }

    let cursor = writer
        .finish()
        .map_err(|e| TransferError::archive(source, e))?;
    Ok(cursor.into_inner())
}

/// One entry listed from an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Position in the archive.
    pub index: usize,
    /// Entry path, relative and free of `..` and root components.
    pub path: PathBuf,
    pub is_dir: bool,
    /// Declared decompressed size.
    pub size: u64,
}

/// Open a ZIP archive for reading.
pub fn open_archive(source: &Path) -> Result<ZipArchive<File>, TransferError> {
    let file = File::open(source).map_err(|e| TransferError::io("open", source, e))?;
    ZipArchive::new(file).map_err(|e| TransferError::archive(source, e))
}

/// List the entries of an archive.
///
/// Entries whose names would land outside the extraction directory are
/// left out.
pub fn list_archive(
    archive: &mut ZipArchive<File>,
    source: &Path,
) -> Result<Vec<ArchiveEntry>, TransferError> {
    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let file = archive
            .by_index_raw(index)
            .map_err(|e| TransferError::archive(source, e))?;
        let Some(path) = file.enclosed_name() else {
            warn!(entry = %file.name(), archive = %source.display(), "Skipping unsafe archive entry");
            continue;
        };
        entries.push(ArchiveEntry {
            index,
            path,
            is_dir: file.is_dir(),
            size: file.size(),
        });
    }
    Ok(entries)
}

/// Decompress one entry, refusing more than `limit` bytes whatever its
/// header claims.
pub fn read_entry(
    archive: &mut ZipArchive<File>,
    source: &Path,
    index: usize,
    limit: u64,
) -> Result<Vec<u8>, TransferError> {
    let file = archive
        .by_index(index)
        .map_err(|e| TransferError::archive(source, e))?;
    let name = file.name().to_string();
    let mut bytes = Vec::new();
    file.take(limit.saturating_add(1))
        .read_to_end(&mut bytes)
        .map_err(|e| TransferError::io("read", source, e))?;
    if bytes.len() as u64 > limit {
        return Err(TransferError::EntryTooLarge { name, limit });
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_write_atomic_creates_and_replaces() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out.txt");

        write_atomic(&path, b"first", None).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"first");

        write_atomic(&path, b"second", None).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");

        // No temp files left behind
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }

    #[test]
    #[cfg(unix)]
    fn test_write_atomic_applies_mode() {
        use std::os::unix::fs::PermissionsExt;
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("mode.txt");

        write_atomic(&path, b"x", Some(0o600)).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_write_atomic_missing_parent_fails_cleanly() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing").join("out.txt");
        let err = write_atomic(&path, b"x", None).unwrap_err();
        assert!(matches!(err, TransferError::Io { operation: "create", .. }));
    }

    #[test]
    fn test_unique_name() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(unique_name(temp_dir.path(), "report.pdf"), "report.pdf");

        create_test_file(temp_dir.path(), "report.pdf", b"1");
        assert_eq!(unique_name(temp_dir.path(), "report.pdf"), "report_1.pdf");

        create_test_file(temp_dir.path(), "report_1.pdf", b"2");
        assert_eq!(unique_name(temp_dir.path(), "report.pdf"), "report_2.pdf");

        create_test_file(temp_dir.path(), "Makefile", b"3");
        assert_eq!(unique_name(temp_dir.path(), "Makefile"), "Makefile_1");
    }

    #[test]
    fn test_copy_tree_directory() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        create_test_file(&src, "a.txt", b"a");
        create_test_file(&src, "nested/b.txt", b"bb");
        fs::create_dir_all(src.join("empty")).unwrap();

        let dst = temp_dir.path().join("dst");
        copy_tree(&src, &dst).unwrap();

        assert_eq!(fs::read(dst.join("a.txt")).unwrap(), b"a");
        assert_eq!(fs::read(dst.join("nested/b.txt")).unwrap(), b"bb");
        assert!(dst.join("empty").is_dir());
        // Source untouched
        assert!(src.join("nested/b.txt").exists());
    }

    #[test]
    fn test_copy_tree_single_file() {
        let temp_dir = TempDir::new().unwrap();
        let src = create_test_file(temp_dir.path(), "one.txt", b"1");
        let dst = temp_dir.path().join("two.txt");
        assert_eq!(copy_tree(&src, &dst).unwrap(), 1);
        assert_eq!(fs::read(dst).unwrap(), b"1");
    }

    #[test]
    #[cfg(unix)]
    fn test_copy_tree_recreates_symlinks() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        create_test_file(&src, "target.txt", b"t");
        std::os::unix::fs::symlink("target.txt", src.join("link")).unwrap();

        let dst = temp_dir.path().join("dst");
        copy_tree(&src, &dst).unwrap();

        let link = fs::read_link(dst.join("link")).unwrap();
        assert_eq!(link, PathBuf::from("target.txt"));
    }

    #[test]
    fn test_move_path_same_volume() {
        let temp_dir = TempDir::new().unwrap();
        let src = create_test_file(temp_dir.path(), "a/b.txt", b"0123456789");
        fs::create_dir_all(temp_dir.path().join("c")).unwrap();
        let dst = temp_dir.path().join("c/b.txt");

        move_path(&src, &dst).unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read(dst).unwrap(), b"0123456789");
    }

    #[test]
    fn test_copy_then_remove_file() {
        let temp_dir = TempDir::new().unwrap();
        let src = create_test_file(temp_dir.path(), "a/b.txt", b"payload");
        let dst = temp_dir.path().join("b.txt");

        copy_then_remove(&src, &dst).unwrap();

        assert!(!src.exists());
        assert!(temp_dir.path().join("a").is_dir());
        assert_eq!(fs::read(dst).unwrap(), b"payload");
    }

    #[test]
    fn test_copy_then_remove_tree() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        create_test_file(&src, "one.txt", b"1");
        create_test_file(&src, "deep/er/two.txt", b"22");
        fs::create_dir_all(src.join("empty")).unwrap();
        let dst = temp_dir.path().join("dst");

        copy_then_remove(&src, &dst).unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read(dst.join("one.txt")).unwrap(), b"1");
        assert_eq!(fs::read(dst.join("deep/er/two.txt")).unwrap(), b"22");
        assert!(dst.join("empty").is_dir());
    }

    #[test]
    fn test_copy_then_remove_keeps_source_on_failure() {
        let temp_dir = TempDir::new().unwrap();
        let src = create_test_file(temp_dir.path(), "keep.txt", b"k");
        let dst = temp_dir.path().join("missing/keep.txt");

        assert!(copy_then_remove(&src, &dst).is_err());
        assert_eq!(fs::read(src).unwrap(), b"k");
    }

    #[test]
    fn test_remove_path() {
        let temp_dir = TempDir::new().unwrap();
        let file = create_test_file(temp_dir.path(), "dir/nested/f.txt", b"x");
        remove_path(&file).unwrap();
        assert!(!file.exists());

        let dir = temp_dir.path().join("dir");
        remove_path(&dir).unwrap();
        assert!(!dir.exists());

        assert!(remove_path(&dir).is_err());
    }

    #[test]
    fn test_zip_directory() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("photos");
        create_test_file(&src, "a.txt", b"alpha");
        create_test_file(&src, "sub/b.txt", b"beta");
        create_test_file(&src, "secret/c.txt", b"hidden");

        let bytes = zip_directory(&src, |name, is_dir| !(is_dir && name == "secret")).unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let names: Vec<String> = archive.file_names().map(str::to_string).collect();
        assert!(names.contains(&"photos/a.txt".to_string()));
        assert!(names.contains(&"photos/sub/b.txt".to_string()));
        assert!(!names.iter().any(|n| n.contains("secret")));

        let mut content = String::new();
        archive
            .by_name("photos/sub/b.txt")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "beta");
    }

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut writer = ZipWriter::new(File::create(path).unwrap());
        for (name, bytes) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, SimpleFileOptions::default()).unwrap();
            } else {
                writer.start_file(*name, SimpleFileOptions::default()).unwrap();
                writer.write_all(bytes).unwrap();
            }
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_list_archive_drops_escaping_entries() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("in.zip");
        write_zip(
            &path,
            &[
                ("docs/", b""),
                ("docs/a.txt", b"alpha"),
                ("../evil.txt", b"x"),
                ("/etc/passwd", b"x"),
            ],
        );

        let mut archive = open_archive(&path).unwrap();
        let entries = list_archive(&mut archive, &path).unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.path.clone()).collect();

        assert_eq!(paths, vec![PathBuf::from("docs"), PathBuf::from("docs/a.txt")]);
        assert!(entries[0].is_dir);
        assert_eq!(entries[1].size, 5);
    }

    #[test]
    fn test_read_entry_enforces_limit() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("in.zip");
        write_zip(&path, &[("a.txt", b"12345")]);
        let mut archive = open_archive(&path).unwrap();

        assert_eq!(read_entry(&mut archive, &path, 0, 5).unwrap(), b"12345");
        assert!(matches!(
            read_entry(&mut archive, &path, 0, 4),
            Err(TransferError::EntryTooLarge { limit: 4, .. })
        ));
    }

    #[test]
    fn test_open_archive_rejects_garbage() {
        let temp_dir = TempDir::new().unwrap();
        let path = create_test_file(temp_dir.path(), "fake.zip", b"not a zip");
        assert!(matches!(open_archive(&path), Err(TransferError::Archive { .. })));
    }
}
