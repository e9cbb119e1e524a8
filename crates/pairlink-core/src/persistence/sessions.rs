//! File-backed session records.

use std::path::PathBuf;

use async_trait::async_trait;

use super::{read_json, validate_key, write_atomic, SessionStore, StoreError};
use crate::session::{SessionRecord, UserId};

/// Stores one `<user-id>.json` per user under `<data_dir>/sessions`.
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: data_dir.into().join("sessions"),
        }
    }

    fn path_for(&self, user_id: &UserId) -> Result<PathBuf, StoreError> {
        let key = validate_key(user_id)?;
        Ok(self.dir.join(format!("{key}.json")))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, user_id: &UserId) -> Result<Option<SessionRecord>, StoreError> {
        read_json(&self.path_for(user_id)?).await
    }

    async fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let path = self.path_for(&record.user_id)?;
        let json = serde_json::to_string_pretty(record)?;
        write_atomic(&path, &json).await
    }

    async fn list(&self) -> Result<Vec<SessionRecord>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_json::<SessionRecord>(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => log::warn!("Skipping unreadable session record {:?}: {}", path, e),
            }
        }
        records.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(records)
    }
}
