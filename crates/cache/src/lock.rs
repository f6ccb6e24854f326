//! Scoped cross-process file locks
//!
//! Every mutation of a shared cache directory happens under a
//! [`ScopedLock`]. The lock is an advisory OS file lock, so the kernel
//! releases it when the holding process dies; a crashed holder never
//! strands the lock.

use crate::error::{Error, Result};
use fs2::FileExt as _;
use recache_core::Hasher;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Which namespace the lock lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockScope {
    /// Lock file beside the protected data. Serializes every process
    /// that can reach the filesystem, including over network shares.
    Remote,
    /// Lock file in the local temp directory, keyed by the protected
    /// path. Only serializes processes on this machine; can be faster
    /// on filesystems where locking beside the data is expensive.
    Local,
}

/// A scoped exclusive lock bound to a path on disk.
///
/// Constructing the lock attempts acquisition; dropping a held lock
/// releases it on every exit path. The type is move-only and the held
/// state moves with it.
#[derive(Debug)]
pub struct ScopedLock {
    file: Option<File>,
    path: PathBuf,
}

impl ScopedLock {
    /// Acquire the lock for `path`, blocking until it is available.
    ///
    /// Fails with an I/O error if the lock file cannot be created.
    pub fn acquire(path: &Path, scope: LockScope) -> Result<Self> {
        let lock_path = Self::lock_file_path(path, scope);
        let file = Self::open(&lock_path).map_err(|e| Error::io(e, &lock_path, "lock"))?;
        file.lock_exclusive()
            .map_err(|e| Error::io(e, &lock_path, "lock"))?;
        Ok(Self {
            file: Some(file),
            path: lock_path,
        })
    }

    /// Try to acquire the lock for `path` without blocking.
    ///
    /// Contention, as well as failure to create the underlying lock
    /// file, yields an unheld lock; check [`ScopedLock::is_held`].
    pub fn try_acquire(path: &Path, scope: LockScope) -> Self {
        let lock_path = Self::lock_file_path(path, scope);
        let file = match Self::open(&lock_path) {
            Ok(file) => file,
            Err(e) => {
                tracing::debug!(path = %lock_path.display(), error = %e, "Could not create lock file");
                return Self {
                    file: None,
                    path: lock_path,
                };
            }
        };
        match file.try_lock_exclusive() {
            Ok(()) => Self {
                file: Some(file),
                path: lock_path,
            },
            Err(_) => Self {
                file: None,
                path: lock_path,
            },
        }
    }

    /// Whether acquisition succeeded. Can be false only for
    /// [`ScopedLock::try_acquire`].
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// The lock file backing this lock.
    pub fn lock_path(&self) -> &Path {
        &self.path
    }

    fn open(lock_path: &Path) -> io::Result<File> {
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(lock_path)
    }

    fn lock_file_path(path: &Path, scope: LockScope) -> PathBuf {
        match scope {
            LockScope::Remote => path.to_path_buf(),
            LockScope::Local => {
                // The local namespace is keyed by the protected path so
                // distinct paths never contend on one lock file.
                let key = Hasher::hash_bytes(path.to_string_lossy().as_bytes());
                std::env::temp_dir()
                    .join("recache-locks")
                    .join(format!("{key}.lock"))
            }
        }
    }
}

impl Drop for ScopedLock {
    fn drop(&mut self) {
        if let Some(file) = &self.file {
            let _ = file.unlock();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join(".lock");

        let lock = ScopedLock::acquire(&target, LockScope::Remote).unwrap();
        assert!(lock.is_held());
        drop(lock);

        // Released on drop: a fresh acquisition succeeds immediately.
        let lock = ScopedLock::acquire(&target, LockScope::Remote).unwrap();
        assert!(lock.is_held());
    }

    #[test]
    fn try_acquire_reports_contention() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join(".lock");

        let held = ScopedLock::acquire(&target, LockScope::Remote).unwrap();
        assert!(held.is_held());

        let contender = ScopedLock::try_acquire(&target, LockScope::Remote);
        assert!(!contender.is_held());

        drop(held);
        let contender = ScopedLock::try_acquire(&target, LockScope::Remote);
        assert!(contender.is_held());
    }

    #[test]
    fn remote_lock_file_sits_beside_the_data() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("shard").join(".lock");
        let lock = ScopedLock::acquire(&target, LockScope::Remote).unwrap();
        assert!(target.exists());
        assert_eq!(lock.lock_path(), target);
    }

    #[test]
    fn local_lock_file_lives_in_the_temp_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("shard").join(".lock");
        let lock = ScopedLock::acquire(&target, LockScope::Local).unwrap();
        assert!(lock.is_held());
        assert!(!target.exists());
        assert!(lock.lock_path().starts_with(std::env::temp_dir()));
    }

    #[test]
    fn local_locks_on_distinct_paths_do_not_contend() {
        let dir = tempfile::tempdir().unwrap();
        let a = ScopedLock::acquire(&dir.path().join("a.lock"), LockScope::Local).unwrap();
        let b = ScopedLock::try_acquire(&dir.path().join("b.lock"), LockScope::Local);
        assert!(a.is_held());
        assert!(b.is_held());
    }

    #[test]
    fn held_state_moves_with_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join(".lock");
        let lock = ScopedLock::acquire(&target, LockScope::Remote).unwrap();
        let moved = lock;
        assert!(moved.is_held());
        assert!(!ScopedLock::try_acquire(&target, LockScope::Remote).is_held());
    }
}
