//! Flagramp persisted-state store — memory and locked-file backends.
//!
//! A store holds exactly one serializable document (the rollout state).
//! The memory backend is for tests and ephemeral environments; the
//! locked-file backend survives process restarts and uses a lock file as
//! the sole cross-process mutual-exclusion mechanism.
//!
//! # Components
//!
//! - **`error`** — `StoreError` / `StoreResult`
//! - **`memory`** — Non-durable, single-process backend
//! - **`file`** — Durable backend: atomic writes, lock files, stale-lock
//!   reclaim, degraded mode on read-only filesystems

pub mod error;
pub mod file;
pub mod memory;

pub use error::{StoreError, StoreResult};
pub use file::{FileStoreOptions, LockedFileStore};
pub use memory::MemoryStore;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A durable slot for one state document.
///
/// Reads are lock-free; mutations (`write`, `update`, `clear`) acquire
/// whatever exclusion the backend provides.
pub trait StateStore<T>: Send + Sync
where
    T: Serialize + DeserializeOwned,
{
    /// The stored document, or `None` if nothing was ever written.
    fn read(&self) -> StoreResult<Option<T>>;

    /// Replace the stored document.
    fn write(&self, value: &T) -> StoreResult<()>;

    /// Read-modify-write under the backend's exclusion.
    ///
    /// The updater receives the current document and returns `Some(next)`
    /// to commit or `None` to signal a no-op. Returns whether a write
    /// happened, so callers can retry without double-applying.
    fn update(&self, apply: &mut dyn FnMut(Option<T>) -> Option<T>) -> StoreResult<bool>;

    /// Remove the stored document.
    fn clear(&self) -> StoreResult<()>;

    /// Whether persistence has degraded to best-effort no-ops (read-only
    /// filesystem). Memory stores never degrade.
    fn is_degraded(&self) -> bool {
        false
    }
}
