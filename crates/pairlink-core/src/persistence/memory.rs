//! In-memory stores for embedding and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CredentialStore, SessionStore, StoreError};
use crate::protocol::CredentialMaterial;
use crate::session::{SessionRecord, UserId};

#[derive(Default)]
pub struct MemorySessionStore {
    records: Mutex<HashMap<UserId, SessionRecord>>,
    fail_writes: AtomicBool,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `save` fail, to simulate a store outage.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn get(&self, user_id: &UserId) -> Option<SessionRecord> {
        self.records.lock().get(user_id).cloned()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, user_id: &UserId) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.get(user_id))
    }

    async fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("writes disabled".to_string()));
        }
        self.records
            .lock()
            .insert(record.user_id.clone(), record.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SessionRecord>, StoreError> {
        let mut records: Vec<_> = self.records.lock().values().cloned().collect();
        records.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(records)
    }
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    materials: Mutex<HashMap<UserId, CredentialMaterial>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: &UserId) -> Option<CredentialMaterial> {
        self.materials.lock().get(user_id).cloned()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self, user_id: &UserId) -> Result<Option<CredentialMaterial>, StoreError> {
        Ok(self.get(user_id))
    }

    async fn save(
        &self,
        user_id: &UserId,
        material: &CredentialMaterial,
    ) -> Result<(), StoreError> {
        self.materials
            .lock()
            .insert(user_id.clone(), material.clone());
        Ok(())
    }

    async fn delete(&self, user_id: &UserId) -> Result<(), StoreError> {
        self.materials.lock().remove(user_id);
        Ok(())
    }
}
