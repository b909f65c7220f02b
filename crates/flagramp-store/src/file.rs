//! Locked-file store backend — durable, multi-process safe.
//!
//! The document is one JSON file. Writes go to a sibling `*.tmp` file and
//! are renamed over the target, so a reader never observes a partial
//! write. Mutations are serialized across processes by a sibling `*.lock`
//! file created with fail-if-exists semantics; a lock older than the lock
//! timeout is presumed abandoned by a crashed holder and reclaimed.
//!
//! On a read-only filesystem the store degrades to best-effort no-op
//! persistence: mutations log once, latch the degraded flag, and the
//! process keeps running on its in-memory state.

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::StateStore;

/// Lock acquisition and staleness tuning.
#[derive(Debug, Clone)]
pub struct FileStoreOptions {
    /// Deadline for acquiring the lock; also the age past which a lock is
    /// considered stale.
    pub lock_timeout: Duration,
    /// Fixed backoff between acquisition attempts.
    pub retry_interval: Duration,
    /// Hard cap on acquisition attempts.
    pub max_retries: u32,
}

impl Default for FileStoreOptions {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            retry_interval: Duration::from_millis(50),
            max_retries: 100,
        }
    }
}

/// Removes the lock file when dropped, so cleanup happens on every exit
/// path from a mutation.
struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path)
            && e.kind() != ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "failed to remove lock file");
        }
    }
}

/// Durable store for one JSON document at a fixed path.
pub struct LockedFileStore<T> {
    path: PathBuf,
    options: FileStoreOptions,
    degraded: AtomicBool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> LockedFileStore<T> {
    /// Store backed by the given path, with default lock tuning.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_options(path, FileStoreOptions::default())
    }

    pub fn with_options(path: impl Into<PathBuf>, options: FileStoreOptions) -> Self {
        Self {
            path: path.into(),
            options,
            degraded: AtomicBool::new(false),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(suffix);
        PathBuf::from(name)
    }

    fn lock_path(&self) -> PathBuf {
        self.sibling(".lock")
    }

    fn tmp_path(&self) -> PathBuf {
        self.sibling(".tmp")
    }

    /// Latch the degraded flag, logging only on the transition.
    fn mark_degraded(&self, err: &std::io::Error) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            warn!(
                path = %self.path.display(),
                error = %err,
                "filesystem not writable; rollout state persistence degraded to no-op"
            );
        }
    }

    /// Acquire the cross-process lock.
    ///
    /// Returns `None` when the filesystem is unwritable (degraded mode) —
    /// the caller proceeds without exclusion and the mutation becomes a
    /// best-effort no-op. Exhausting the retry budget is an error: the
    /// caller must not assume the mutation took effect.
    fn acquire_lock(&self) -> StoreResult<Option<LockGuard>> {
        if self.degraded.load(Ordering::SeqCst) {
            return Ok(None);
        }

        let lock_path = self.lock_path();
        let mut reclaimed = false;
        let mut waited = Duration::ZERO;

        for _attempt in 0..=self.options.max_retries {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(mut file) => {
                    // Contents identify the holder for operators inspecting
                    // a contended lock.
                    let _ = write!(file, "{}", std::process::id());
                    return Ok(Some(LockGuard { path: lock_path }));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if !reclaimed && self.lock_is_stale(&lock_path) {
                        warn!(
                            path = %lock_path.display(),
                            "reclaiming stale lock file"
                        );
                        match fs::remove_file(&lock_path) {
                            Ok(()) => {}
                            Err(e) if e.kind() == ErrorKind::NotFound => {}
                            Err(e) => return Err(e.into()),
                        }
                        reclaimed = true;
                        continue;
                    }
                    if waited >= self.options.lock_timeout {
                        break;
                    }
                    std::thread::sleep(self.options.retry_interval);
                    waited += self.options.retry_interval;
                }
                Err(e) if is_unwritable(&e) => {
                    self.mark_degraded(&e);
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::LockTimeout {
            path: lock_path,
            waited_ms: waited.as_millis() as u64,
        })
    }

    /// Whether the lock file's age exceeds the lock timeout.
    fn lock_is_stale(&self, lock_path: &Path) -> bool {
        let Ok(meta) = fs::metadata(lock_path) else {
            // Already gone — the holder released it between our attempts.
            return false;
        };
        let Ok(modified) = meta.modified() else {
            return false;
        };
        match modified.elapsed() {
            Ok(age) => age > self.options.lock_timeout,
            Err(_) => false,
        }
    }

    /// Serialize to the sibling tmp file and rename over the target.
    ///
    /// The tmp file is removed on every failure path.
    fn write_atomic(&self, payload: &[u8]) -> StoreResult<()> {
        let tmp = self.tmp_path();
        let result = (|| -> StoreResult<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(payload)?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)?;
            Ok(())
        })();
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }

    fn write_best_effort(&self, payload: &[u8]) -> StoreResult<()> {
        match self.write_atomic(payload) {
            Ok(()) => Ok(()),
            Err(StoreError::Io(e)) if is_unwritable(&e) => {
                self.mark_degraded(&e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn read_document(&self) -> StoreResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl<T> StateStore<T> for LockedFileStore<T>
where
    T: Serialize + DeserializeOwned + Send,
{
    fn read(&self) -> StoreResult<Option<T>> {
        // Lock-free: atomic rename guarantees a reader never observes a
        // partially written document.
        self.read_document()
    }

    fn write(&self, value: &T) -> StoreResult<()> {
        let payload = serde_json::to_vec_pretty(value)?;
        let Some(_guard) = self.acquire_lock()? else {
            // Degraded: best-effort no-op for the rest of this process.
            return Ok(());
        };
        self.write_best_effort(&payload)?;
        debug!(path = %self.path.display(), "state document written");
        Ok(())
    }

    fn update(&self, apply: &mut dyn FnMut(Option<T>) -> Option<T>) -> StoreResult<bool> {
        let Some(_guard) = self.acquire_lock()? else {
            return Ok(false);
        };
        let current = self.read_document()?;
        match apply(current) {
            Some(next) => {
                let payload = serde_json::to_vec_pretty(&next)?;
                self.write_best_effort(&payload)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn clear(&self) -> StoreResult<()> {
        let Some(_guard) = self.acquire_lock()? else {
            return Ok(());
        };
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) if is_unwritable(&e) => {
                self.mark_degraded(&e);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }
}

fn is_unwritable(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::PermissionDenied | ErrorKind::ReadOnlyFilesystem
    )
}
