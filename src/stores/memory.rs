//! In-memory store: a mutex-guarded map, filtering client-side (spec §4.1).

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::{shallow_merge, Filter, StoreAdapter, StoreError};
use crate::value::Value;

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<FxHashMap<String, Value>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreAdapter for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.records.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, record: Value) -> Result<(), StoreError> {
        self.records.lock().insert(key.to_string(), record);
        Ok(())
    }

    async fn update(&self, key: &str, partial: Value) -> Result<Value, StoreError> {
        let mut guard = self.records.lock();
        let merged = shallow_merge(guard.get(key).cloned(), partial);
        guard.insert(key.to_string(), merged.clone());
        Ok(merged)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.records.lock().remove(key);
        Ok(())
    }

    async fn list(&self, filter: Option<&Filter>) -> Result<Vec<Value>, StoreError> {
        let all: Vec<Value> = self.records.lock().values().cloned().collect();
        Ok(match filter {
            Some(f) => f.apply_to(all),
            None => all,
        })
    }
}
