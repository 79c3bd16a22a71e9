//! Advisory-lock liveness protocol for progress files.
//!
//! A writer holds an exclusive advisory lock on its progress file for as long
//! as it runs. Readers test with a non-blocking lock attempt from a fresh handle.
//! Paths locked by this process are also kept in a process-wide registry,
//! which is consulted before probing.

use crate::error::ProgressError;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Component, Path, PathBuf};

static HELD_LOCKS: Lazy<RwLock<HashSet<PathBuf>>> = Lazy::new(|| RwLock::new(HashSet::new()));

/// Absolute, cleaned form of `path` used as registry key.
///
/// Resolves symlinks when the file exists, otherwise falls back to a
/// lexical cleanup against the current directory.
fn canonical_path(path: &Path) -> PathBuf {
    if let Ok(resolved) = std::fs::canonicalize(path) {
        return resolved;
    }

    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut cleaned = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}

fn register(path: &Path) {
    HELD_LOCKS.write().insert(canonical_path(path));
}

fn unregister(path: &Path) {
    HELD_LOCKS.write().remove(&canonical_path(path));
}

/// True if this process currently holds the writer lock on `path`.
pub fn is_locked_by_current_process(path: &Path) -> bool {
    HELD_LOCKS.read().contains(&canonical_path(path))
}

/// Whether some writer (this process or another) holds the lock on `path`.
pub fn is_active(path: &Path) -> Result<bool, ProgressError> {
    if is_locked_by_current_process(path) {
        return Ok(true);
    }

    let file = open_for_check(path)?;
    match try_lock_exclusive(&file) {
        Ok(true) => {
            unlock(&file);
            Ok(false)
        }
        Ok(false) => Ok(true),
        Err(e) => Err(ProgressError::io("check lock on", path, e)),
    }
}

fn open_for_check(path: &Path) -> Result<File, ProgressError> {
    let file = File::open(path).map_err(|e| ProgressError::io("open progress file", path, e))?;
    let meta = file
        .metadata()
        .map_err(|e| ProgressError::io("stat progress file", path, e))?;
    if !meta.is_file() {
        return Err(ProgressError::NotAFile(path.to_path_buf()));
    }
    Ok(file)
}

/// Exclusive writer lock on a progress file. Released on drop.
#[derive(Debug)]
pub struct ProgressLock {
    file: File,
    path: PathBuf,
}

impl ProgressLock {
    /// Take the lock on an existing file, failing with `Locked` if another
    /// handle already holds it.
    pub fn acquire(path: &Path) -> Result<Self, ProgressError> {
        if is_locked_by_current_process(path) {
            return Err(ProgressError::Locked(path.to_path_buf()));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| ProgressError::io("open progress file", path, e))?;

        match try_lock_exclusive(&file) {
            Ok(true) => {}
            Ok(false) => return Err(ProgressError::Locked(path.to_path_buf())),
            Err(e) => return Err(ProgressError::io("lock", path, e)),
        }

        register(path);
        log::debug!("[PROGRESS] Locked {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProgressLock {
    fn drop(&mut self) {
        unregister(&self.path);
        unlock(&self.file);
        log::debug!("[PROGRESS] Released lock on {}", self.path.display());
    }
}

/// Non-blocking exclusive lock. `Ok(false)` when another handle holds it.
fn try_lock_exclusive(file: &File) -> std::io::Result<bool> {
    match file.try_lock() {
        Ok(()) => Ok(true),
        Err(TryLockError::WouldBlock) => Ok(false),
        Err(TryLockError::Error(e)) => Err(e),
    }
}

fn unlock(file: &File) {
    if let Err(e) = file.unlock() {
        log::debug!("[PROGRESS] Unlock failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn progress_file(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, "# Progress Log\n").unwrap();
        path
    }

    #[test]
    fn test_unlocked_file_is_not_active() {
        let dir = TempDir::new().unwrap();
        let path = progress_file(&dir, "progress-a.txt");
        assert!(!is_active(&path).unwrap());
        assert!(!is_locked_by_current_process(&path));
    }

    #[test]
    fn test_held_lock_is_active_and_released_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = progress_file(&dir, "progress-b.txt");

        let lock = ProgressLock::acquire(&path).unwrap();
        assert_eq!(lock.path(), path.as_path());
        assert!(is_locked_by_current_process(&path));
        assert!(is_active(&path).unwrap());

        drop(lock);
        assert!(!is_locked_by_current_process(&path));
        assert!(!is_active(&path).unwrap());
    }

    #[test]
    fn test_lock_held_by_another_handle_is_active() {
        let dir = TempDir::new().unwrap();
        let path = progress_file(&dir, "progress-f.txt");

        let writer = File::open(&path).unwrap();
        writer.lock().unwrap();
        assert!(!is_locked_by_current_process(&path));
        assert!(is_active(&path).unwrap());
        assert!(matches!(ProgressLock::acquire(&path), Err(ProgressError::Locked(_))));

        writer.unlock().unwrap();
        assert!(!is_active(&path).unwrap());
    }

    #[test]
    fn test_second_acquire_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = progress_file(&dir, "progress-c.txt");

        let _lock = ProgressLock::acquire(&path).unwrap();
        let err = ProgressLock::acquire(&path).unwrap_err();
        assert!(matches!(err, ProgressError::Locked(_)));
    }

    #[test]
    fn test_registry_matches_relative_variants() {
        let dir = TempDir::new().unwrap();
        let path = progress_file(&dir, "progress-d.txt");
        let _lock = ProgressLock::acquire(&path).unwrap();

        let dotted = dir.path().join(".").join("sub").join("..").join("progress-d.txt");
        assert!(is_locked_by_current_process(&dotted));
    }

    #[test]
    fn test_registry_cleaned_on_panic() {
        let dir = TempDir::new().unwrap();
        let path = progress_file(&dir, "progress-e.txt");
        let checked = path.clone();

        let result = std::panic::catch_unwind(move || {
            let _lock = ProgressLock::acquire(&path).unwrap();
            panic!("writer crashed");
        });
        assert!(result.is_err());
        assert!(!is_locked_by_current_process(&checked));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = is_active(&dir.path().join("progress-missing.txt")).unwrap_err();
        assert!(err.to_string().contains("progress-missing.txt"));
    }

    #[test]
    fn test_directory_is_not_a_file() {
        let dir = TempDir::new().unwrap();
        let err = is_active(dir.path()).unwrap_err();
        assert!(matches!(err, ProgressError::NotAFile(_)));
    }
}
