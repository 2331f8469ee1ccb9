//! Atomic filesystem primitives
//!
//! All cache writes funnel through [`atomic_write_file`]: a sibling temp
//! file followed by a rename, so readers only ever observe whole entries.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Mode bits for cache content and sidecar files where the host filesystem
/// supports POSIX modes.
pub const CACHE_PERM: u32 = 0o644;

/// Read a file, mapping a missing file to `None`.
pub fn read_file_bytes(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

pub fn exists_file(path: &Path) -> bool {
    path.is_file()
}

/// Modification time of `path` in whole seconds since the Unix epoch, or
/// `None` when the file does not exist.
pub fn mtime_seconds(path: &Path) -> io::Result<Option<u64>> {
    match fs::metadata(path) {
        Ok(metadata) => Ok(metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|duration| duration.as_secs())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Write `bytes` to `path` atomically.
///
/// The bytes land in a sibling temp file (`<path>.<4 hex chars>`) which is
/// renamed onto the final path, relying on same-directory rename atomicity.
/// A missing parent directory is created recursively and the write retried
/// once. On rename failure the temp file is removed best-effort and the
/// error propagated.
pub fn atomic_write_file(path: &Path, bytes: &[u8], mode: u32) -> io::Result<()> {
    match write_and_rename(path, bytes, mode) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            write_and_rename(path, bytes, mode)
        }
        Err(err) => Err(err),
    }
}

fn write_and_rename(path: &Path, bytes: &[u8], mode: u32) -> io::Result<()> {
    let temp_path = sibling_temp_path(path);
    fs::write(&temp_path, bytes)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&temp_path, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    {
        let _ = mode;
    }

    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(err);
    }
    Ok(())
}

fn sibling_temp_path(path: &Path) -> PathBuf {
    let mut file_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    file_name.push(format!(".{}", hex::encode(rand::random::<[u8; 2]>())));
    path.with_file_name(file_name)
}

/// Determine once whether a cache root is writable. Creating the root is
/// the probe; a permission failure flips the store into read-only mode.
pub(crate) fn probe_read_only(root: &Path) -> bool {
    match fs::create_dir_all(root) {
        Ok(()) => false,
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
            tracing::debug!("Cache root {} is read-only: {}", root.display(), err);
            true
        }
        // other failures surface on the first write instead
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_missing_file() {
        let temp = TempDir::new().unwrap();
        let result = read_file_bytes(&temp.path().join("nope")).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn test_atomic_write_and_read() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("entry");

        atomic_write_file(&path, b"contents", CACHE_PERM).unwrap();

        assert_eq!(read_file_bytes(&path).unwrap().unwrap(), b"contents");
        assert!(exists_file(&path));
    }

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a").join("b").join("entry");

        atomic_write_file(&path, b"nested", CACHE_PERM).unwrap();

        assert_eq!(read_file_bytes(&path).unwrap().unwrap(), b"nested");
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_files() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("entry");

        atomic_write_file(&path, b"one", CACHE_PERM).unwrap();
        atomic_write_file(&path, b"two", CACHE_PERM).unwrap();

        let names: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec!["entry"]);
        assert_eq!(read_file_bytes(&path).unwrap().unwrap(), b"two");
    }

    #[cfg(unix)]
    #[test]
    fn test_atomic_write_sets_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("entry");

        atomic_write_file(&path, b"contents", CACHE_PERM).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn test_mtime_seconds() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("entry");
        assert_eq!(mtime_seconds(&path).unwrap(), None);

        atomic_write_file(&path, b"contents", CACHE_PERM).unwrap();
        assert!(mtime_seconds(&path).unwrap().unwrap() > 0);
    }
}
