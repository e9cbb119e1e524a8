//! File-backed credential material.

use std::path::PathBuf;

use async_trait::async_trait;

use super::{read_json, validate_key, write_atomic, CredentialStore, StoreError};
use crate::protocol::CredentialMaterial;
use crate::session::UserId;

/// Stores `<data_dir>/credentials/<user-id>/creds.json`.
///
/// Only the connection that currently owns the user writes here, so no
/// cross-writer locking is needed.
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: data_dir.into().join("credentials"),
        }
    }

    fn user_dir(&self, user_id: &UserId) -> Result<PathBuf, StoreError> {
        Ok(self.dir.join(validate_key(user_id)?))
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self, user_id: &UserId) -> Result<Option<CredentialMaterial>, StoreError> {
        read_json(&self.user_dir(user_id)?.join("creds.json")).await
    }

    async fn save(
        &self,
        user_id: &UserId,
        material: &CredentialMaterial,
    ) -> Result<(), StoreError> {
        let path = self.user_dir(user_id)?.join("creds.json");
        let json = serde_json::to_string(material)?;
        write_atomic(&path, &json).await
    }

    async fn delete(&self, user_id: &UserId) -> Result<(), StoreError> {
        match tokio::fs::remove_dir_all(self.user_dir(user_id)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn alice() -> UserId {
        UserId::new("alice")
    }

    #[tokio::test]
    async fn save_load_delete_cycle() {
        let dir = tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());

        assert!(!store.exists(&alice()).await.unwrap());

        let mut material = CredentialMaterial::new(json!({"noiseKey": "abc"}));
        material.registered = true;
        store.save(&alice(), &material).await.unwrap();

        assert!(store.exists(&alice()).await.unwrap());
        assert_eq!(store.load(&alice()).await.unwrap(), Some(material));

        store.delete(&alice()).await.unwrap();
        assert!(!store.exists(&alice()).await.unwrap());
        assert!(!dir.path().join("credentials").join("alice").exists());
    }

    #[tokio::test]
    async fn delete_missing_is_ok() {
        let dir = tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());
        assert!(store.delete(&alice()).await.is_ok());
    }

    #[tokio::test]
    async fn corrupt_file_is_a_json_error() {
        let dir = tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());
        let user_dir = dir.path().join("credentials").join("alice");
        std::fs::create_dir_all(&user_dir).unwrap();
        std::fs::write(user_dir.join("creds.json"), "{{{").unwrap();

        assert!(matches!(
            store.load(&alice()).await,
            Err(StoreError::Json(_))
        ));
    }
}
