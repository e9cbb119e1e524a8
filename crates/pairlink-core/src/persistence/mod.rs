//! Persistence for session records and credential material.
//!
//! # File Locations
//!
//! ```text
//! <data_dir>/
//! ├── sessions/
//! │   └── <user-id>.json          # SessionRecord
//! └── credentials/
//!     └── <user-id>/
//!         └── creds.json          # CredentialMaterial
//! ```
//!
//! All saves write to `*.tmp` and rename over the target so a crash never
//! leaves a half-written file behind.

pub mod credentials;
pub mod memory;
pub mod sessions;

use std::path::{Component, Path};

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::CredentialMaterial;
use crate::session::{SessionRecord, UserId};

pub use credentials::FileCredentialStore;
pub use memory::{MemoryCredentialStore, MemorySessionStore};
pub use sessions::FileSessionStore;

/// Error type for store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// User id cannot be used as a storage key
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    /// Failure reported by a non-file backend
    #[error("Store error: {0}")]
    Backend(String),
}

/// Durable per-user session rows.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, user_id: &UserId) -> Result<Option<SessionRecord>, StoreError>;
    async fn save(&self, record: &SessionRecord) -> Result<(), StoreError>;
    async fn list(&self) -> Result<Vec<SessionRecord>, StoreError>;
}

/// Durable per-user authentication material.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self, user_id: &UserId) -> Result<Option<CredentialMaterial>, StoreError>;
    async fn save(&self, user_id: &UserId, material: &CredentialMaterial)
        -> Result<(), StoreError>;
    async fn delete(&self, user_id: &UserId) -> Result<(), StoreError>;

    async fn exists(&self, user_id: &UserId) -> Result<bool, StoreError> {
        Ok(self.load(user_id).await?.is_some())
    }
}

/// Reject user ids that would escape the store directory.
pub(crate) fn validate_key(user_id: &UserId) -> Result<&str, StoreError> {
    let key = user_id.as_str();
    if key.is_empty() {
        return Err(StoreError::InvalidKey("<empty>".to_string()));
    }

    let mut components = Path::new(key).components();
    match components.next() {
        Some(Component::Normal(_)) if components.next().is_none() => Ok(key),
        _ => Err(StoreError::InvalidKey(key.to_string())),
    }
}

/// Write `contents` next to `path` and rename it into place.
pub(crate) async fn write_atomic(path: &Path, contents: &str) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    tokio::fs::write(&temp, contents).await?;
    tokio::fs::rename(&temp, path).await?;
    Ok(())
}

/// Read a JSON file, `None` if it does not exist.
pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, StoreError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
