//! Filesystem operations used by the segment lifecycle.

use crate::error::{StorageError, StorageResult};
use std::fmt;
use std::fs::{self, File};
use std::path::Path;

/// The directory-level filesystem operations the reload protocol needs.
///
/// The reload protocol never touches `std::fs` directly; every mutation goes
/// through this trait so that tests can inject failures at a precise step.
///
/// # Invariants
///
/// - `rename` is atomic: after it returns, either `from` or `to` exists,
///   never both and never neither
/// - `rename` refuses to overwrite an existing target
/// - `remove_dir_all` on a missing path succeeds
/// - Implementations must be `Send + Sync` so one instance can serve every
///   table of a process
pub trait SegmentFs: Send + Sync + fmt::Debug {
    /// Returns true if `path` exists.
    fn exists(&self, path: &Path) -> bool;

    /// Returns true if `path` exists and is a directory.
    fn is_dir(&self, path: &Path) -> bool;

    /// Atomically renames `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns an error if `from` is missing, `to` already exists, or the
    /// rename fails.
    fn rename(&self, from: &Path, to: &Path) -> StorageResult<()>;

    /// Recursively copies the directory `from` to the new directory `to`.
    ///
    /// Returns the number of bytes copied. The copy is not atomic; on
    /// failure `to` may hold a partial copy.
    ///
    /// # Errors
    ///
    /// Returns an error if `from` is not a directory, `to` already exists,
    /// or any file fails to copy.
    fn copy_dir(&self, from: &Path, to: &Path) -> StorageResult<u64>;

    /// Recursively deletes `path`. Succeeds if `path` does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if deletion fails.
    fn remove_dir_all(&self, path: &Path) -> StorageResult<()>;

    /// Makes directory entry changes under `path` durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync_dir(&self, path: &Path) -> StorageResult<()>;

    /// Lists the entry names of a directory, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` cannot be read.
    fn list_dir(&self, path: &Path) -> StorageResult<Vec<String>>;
}

/// [`SegmentFs`] backed by the operating system.
///
/// Renames and deletions are followed by an fsync of the parent directory
/// so the new directory shape survives power loss.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

impl LocalFs {
    /// Creates a new local filesystem handle.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn sync_parent(&self, path: &Path) -> StorageResult<()> {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => self.sync_dir(parent),
            _ => Ok(()),
        }
    }

    fn copy_recursive(from: &Path, to: &Path) -> StorageResult<u64> {
        fs::create_dir(to)?;
        let mut copied = 0u64;

        for entry in fs::read_dir(from)? {
            let entry = entry?;
            let source = entry.path();
            let target = to.join(entry.file_name());

            if entry.file_type()?.is_dir() {
                copied += Self::copy_recursive(&source, &target)?;
            } else {
                copied += fs::copy(&source, &target)?;
                File::open(&target)?.sync_all()?;
            }
        }

        Ok(copied)
    }
}

impl SegmentFs for LocalFs {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn rename(&self, from: &Path, to: &Path) -> StorageResult<()> {
        if !from.exists() {
            return Err(StorageError::NotFound(from.to_path_buf()));
        }
        if to.exists() {
            return Err(StorageError::AlreadyExists(to.to_path_buf()));
        }

        fs::rename(from, to)?;
        self.sync_parent(to)?;
        tracing::debug!(from = %from.display(), to = %to.display(), "renamed directory");
        Ok(())
    }

    fn copy_dir(&self, from: &Path, to: &Path) -> StorageResult<u64> {
        if !from.is_dir() {
            return Err(StorageError::NotADirectory(from.to_path_buf()));
        }
        if to.exists() {
            return Err(StorageError::AlreadyExists(to.to_path_buf()));
        }

        let copied = Self::copy_recursive(from, to)?;
        self.sync_dir(to)?;
        self.sync_parent(to)?;
        tracing::debug!(
            from = %from.display(),
            to = %to.display(),
            bytes = copied,
            "copied directory"
        );
        Ok(copied)
    }

    fn remove_dir_all(&self, path: &Path) -> StorageResult<()> {
        if !path.exists() {
            return Ok(());
        }

        fs::remove_dir_all(path)?;
        self.sync_parent(path)?;
        tracing::debug!(path = %path.display(), "removed directory");
        Ok(())
    }

    #[cfg(unix)]
    fn sync_dir(&self, path: &Path) -> StorageResult<()> {
        // fsync on a directory handle persists its entries
        File::open(path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_dir(&self, _path: &Path) -> StorageResult<()> {
        // NTFS journals metadata; directories cannot be opened for fsync
        Ok(())
    }

    fn list_dir(&self, path: &Path) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(path)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn populate(dir: &Path) {
        fs::create_dir_all(dir.join("nested")).unwrap();
        fs::write(dir.join("a.col"), b"alpha").unwrap();
        fs::write(dir.join("nested").join("b.col"), b"beta!").unwrap();
    }

    #[test]
    fn rename_moves_directory() {
        let temp = tempdir().unwrap();
        let from = temp.path().join("seg");
        let to = temp.path().join("seg.segment.bak");
        populate(&from);

        LocalFs.rename(&from, &to).unwrap();

        assert!(!from.exists());
        assert!(to.join("a.col").exists());
    }

    #[test]
    fn rename_refuses_existing_target() {
        let temp = tempdir().unwrap();
        let from = temp.path().join("seg");
        let to = temp.path().join("other");
        populate(&from);
        populate(&to);

        let result = LocalFs.rename(&from, &to);
        assert!(matches!(result, Err(StorageError::AlreadyExists(_))));
        assert!(from.exists());
    }

    #[test]
    fn rename_missing_source_fails() {
        let temp = tempdir().unwrap();
        let result = LocalFs.rename(&temp.path().join("nope"), &temp.path().join("x"));
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[test]
    fn copy_dir_is_recursive() {
        let temp = tempdir().unwrap();
        let from = temp.path().join("src");
        let to = temp.path().join("dst");
        populate(&from);

        let copied = LocalFs.copy_dir(&from, &to).unwrap();

        assert_eq!(copied, 10);
        assert_eq!(fs::read(to.join("a.col")).unwrap(), b"alpha");
        assert_eq!(fs::read(to.join("nested").join("b.col")).unwrap(), b"beta!");
        assert!(from.exists());
    }

    #[test]
    fn copy_dir_rejects_file_source() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("file");
        fs::write(&file, b"x").unwrap();

        let result = LocalFs.copy_dir(&file, &temp.path().join("dst"));
        assert!(matches!(result, Err(StorageError::NotADirectory(_))));
    }

    #[test]
    fn remove_missing_is_ok() {
        let temp = tempdir().unwrap();
        LocalFs.remove_dir_all(&temp.path().join("missing")).unwrap();
    }

    #[test]
    fn list_dir_is_sorted() {
        let temp = tempdir().unwrap();
        fs::create_dir(temp.path().join("b")).unwrap();
        fs::create_dir(temp.path().join("a")).unwrap();

        assert_eq!(LocalFs.list_dir(temp.path()).unwrap(), vec!["a", "b"]);
    }
}
