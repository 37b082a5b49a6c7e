//! Local persistence
//!
//! ```text
//! SecretStore (raw bytes per key)
//!   ├── FileStore    one file per key, tmp + fsync + rename
//!   └── MemoryStore  tests and dev mode
//!
//! SealedStore        AES-256-GCM per record, JSON values, scoped RMW lock
//! ```

pub mod file;
pub mod memory;
pub mod sealed;

use async_trait::async_trait;

use crate::error::StorageError;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use sealed::SealedStore;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Decoupling persistence from the orchestrators.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// `None` if the key was never written or has been deleted.
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Replace the value. Either the old or the new value survives a crash.
    async fn put(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> StorageResult<bool>;

    /// All keys, sorted.
    async fn keys(&self) -> StorageResult<Vec<String>>;
}

/// Keys are restricted to `[A-Za-z0-9._-]` so they map safely onto file names.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let ok = !key.is_empty()
        && key.len() <= 200
        && !key.starts_with('.')
        && !key.ends_with(file::TMP_SUFFIX)
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if ok {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}
