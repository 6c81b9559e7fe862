//! Per-invoice leases and per-identity locks.
//!
//! Both are held in process memory. Given a [`LockDir`] they are also held
//! as lock files, so processes sharing one store directory exclude each
//! other too.
use crate::store::sanitize_key;
use dashmap::{DashMap, DashSet};
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime},
};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

/// How often a waiting identity lock retries its file.
const LOCK_POLL: Duration = Duration::from_millis(25);

#[derive(Debug, Error)]
#[error("lock file error at '{path}': {source}")]
pub struct LockError {
    path: PathBuf,
    #[source]
    source: io::Error,
}

fn lock_error(path: &Path) -> impl FnOnce(io::Error) -> LockError + '_ {
    move |source| LockError {
        path: path.to_path_buf(),
        source,
    }
}

/// Directory of exclusive lock files, one per key.
///
/// A file older than `stale_after` is assumed to belong to a crashed
/// process and is taken over.
#[derive(Debug, Clone)]
pub struct LockDir {
    root: PathBuf,
    stale_after: Duration,
}

impl LockDir {
    pub fn new(root: impl Into<PathBuf>, stale_after: Duration) -> Self {
        Self {
            root: root.into(),
            stale_after,
        }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.lock", sanitize_key(key)))
    }

    /// `None` while someone else holds the file.
    fn try_create(&self, key: &str) -> Result<Option<LockFile>, LockError> {
        fs::create_dir_all(&self.root).map_err(lock_error(&self.root))?;
        let path = self.path(key);
        for _ in 0..2 {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(_) => return Ok(Some(LockFile { path })),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    if !self.is_stale(&path) {
                        return Ok(None);
                    }
                    warn!(path = %path.display(), "taking over stale lock file");
                    match fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                        Err(err) => return Err(lock_error(&path)(err)),
                    }
                }
                Err(err) => return Err(lock_error(&path)(err)),
            }
        }
        Ok(None)
    }

    fn is_stale(&self, path: &Path) -> bool {
        fs::metadata(path)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age > self.stale_after)
    }
}

/// Removed on drop.
#[derive(Debug)]
struct LockFile {
    path: PathBuf,
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %err, "lock file could not be removed");
        }
    }
}

/// Non-blocking, at-most-one-holder leases keyed by string.
#[derive(Debug, Clone, Default)]
pub struct LeaseRegistry {
    held: Arc<DashSet<String>>,
    files: Option<LockDir>,
}

impl LeaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock_dir(files: LockDir) -> Self {
        Self {
            held: Arc::default(),
            files: Some(files),
        }
    }

    /// Returns `None` when the key is already leased.
    pub fn try_acquire(&self, key: &str) -> Result<Option<Lease>, LockError> {
        if !self.held.insert(key.to_string()) {
            return Ok(None);
        }
        let mut lease = Lease {
            held: Arc::clone(&self.held),
            key: key.to_string(),
            _file: None,
        };
        if let Some(files) = &self.files {
            match files.try_create(key)? {
                Some(file) => lease._file = Some(file),
                None => return Ok(None),
            }
        }
        Ok(Some(lease))
    }
}

/// Released on drop.
#[derive(Debug)]
pub struct Lease {
    held: Arc<DashSet<String>>,
    key: String,
    _file: Option<LockFile>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.held.remove(&self.key);
    }
}

/// Async mutex per key. Different keys never contend.
#[derive(Debug, Clone, Default)]
pub struct KeyedMutex {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    files: Option<LockDir>,
}

/// Held lock of a [`KeyedMutex`] key.
#[derive(Debug)]
pub struct KeyGuard {
    _file: Option<LockFile>,
    _guard: OwnedMutexGuard<()>,
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock_dir(files: LockDir) -> Self {
        Self {
            locks: Arc::default(),
            files: Some(files),
        }
    }

    /// Waits for the key, then for its lock file when there is one.
    pub async fn lock(&self, key: &str) -> Result<KeyGuard, LockError> {
        let mutex = Arc::clone(&self.locks.entry(key.to_string()).or_default());
        let guard = mutex.lock_owned().await;
        let file = match &self.files {
            None => None,
            Some(files) => loop {
                if let Some(file) = files.try_create(key)? {
                    break Some(file);
                }
                tokio::time::sleep(LOCK_POLL).await;
            },
        };
        Ok(KeyGuard {
            _file: file,
            _guard: guard,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let leases = LeaseRegistry::new();
        let first = leases.try_acquire("INV-1").unwrap().unwrap();
        assert!(leases.try_acquire("INV-1").unwrap().is_none());
        assert!(leases.try_acquire("INV-2").unwrap().is_some());
        drop(first);
        assert!(leases.try_acquire("INV-1").unwrap().is_some());
    }

    #[test]
    fn lock_file_excludes_a_second_registry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let files = LockDir::new(dir.path(), Duration::from_secs(600));
        let first = LeaseRegistry::with_lock_dir(files.clone());
        let second = LeaseRegistry::with_lock_dir(files);

        let lease = first.try_acquire("INV/1").unwrap().expect("first lease");
        assert!(dir.path().join("INV_1.lock").exists());
        assert!(second.try_acquire("INV/1").unwrap().is_none());
        // the refused registry does not keep the key for itself
        assert!(second.held.is_empty());

        drop(lease);
        assert!(!dir.path().join("INV_1.lock").exists());
        assert!(second.try_acquire("INV/1").unwrap().is_some());
    }

    #[test]
    fn stale_lock_file_is_taken_over() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("INV-9.lock"), b"").unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let leases = LeaseRegistry::with_lock_dir(LockDir::new(dir.path(), Duration::from_millis(1)));
        assert!(leases.try_acquire("INV-9").unwrap().is_some());
    }

    #[tokio::test]
    async fn keyed_mutex_serializes_same_key() {
        let locks = KeyedMutex::new();
        let guard = locks.lock("company:ACME").await.unwrap();

        let other = locks.clone();
        let waiter = tokio::spawn(async move {
            let _guard = other.lock("company:ACME").await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        // a different key is free
        let _device = locks.lock("device:POS-1").await.unwrap();

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn keyed_mutex_waits_for_lock_file_of_another_process() {
        let dir = tempfile::tempdir().expect("tempdir");
        let files = LockDir::new(dir.path(), Duration::from_secs(600));
        let first = KeyedMutex::with_lock_dir(files.clone());
        let second = KeyedMutex::with_lock_dir(files);

        let guard = first.lock("company-ACME").await.unwrap();
        let waiter = tokio::spawn(async move {
            let _guard = second.lock("company-ACME").await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }
}
