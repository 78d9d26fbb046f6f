//! SQL-via-REST store, talking to a PostgREST-compatible endpoint. Writes
//! are serialized per key through an in-process mutex; the remote service
//! is the durability boundary (spec §4.1).

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use rustc_hash::FxHashMap;
use tokio::sync::Mutex as AsyncMutex;

use super::{shallow_merge, Filter, StoreAdapter, StoreError};
use crate::value::Value;

pub struct PostgrestStore {
    base_url: String,
    collection: String,
    http: reqwest::Client,
    key_locks: SyncMutex<FxHashMap<String, Arc<AsyncMutex<()>>>>,
}

impl PostgrestStore {
    #[must_use]
    pub fn new(base_url: String, collection: String, http: reqwest::Client) -> Self {
        Self { base_url, collection, http, key_locks: SyncMutex::new(FxHashMap::default()) }
    }

    fn table_url(&self) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), self.collection)
    }

    fn lock_for(&self, key: &str) -> Arc<AsyncMutex<()>> {
        self.key_locks.lock().entry(key.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }
}

#[async_trait]
impl StoreAdapter for PostgrestStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let response = self
            .http
            .get(self.table_url())
            .query(&[("key", format!("eq.{key}")), ("select", "*".to_string())])
            .send()
            .await
            .map_err(|e| StoreError::BackendUnavailable(e.to_string()))?;
        let rows: Vec<serde_json::Value> =
            response.json().await.map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(rows.into_iter().next().map(Value::from_json))
    }

    async fn set(&self, key: &str, record: Value) -> Result<(), StoreError> {
        let gate = self.lock_for(key);
        let _permit = gate.lock().await;
        let mut body = record.to_json();
        if let serde_json::Value::Object(map) = &mut body {
            map.insert("key".to_string(), serde_json::Value::String(key.to_string()));
        }
        self.http
            .post(self.table_url())
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::BackendUnavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| StoreError::BackendUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn update(&self, key: &str, partial: Value) -> Result<Value, StoreError> {
        let gate = self.lock_for(key);
        let _permit = gate.lock().await;
        let existing = self.get(key).await?;
        let merged = shallow_merge(existing, partial);
        drop(_permit);
        self.set(key, merged.clone()).await?;
        Ok(merged)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let gate = self.lock_for(key);
        let _permit = gate.lock().await;
        self.http
            .delete(self.table_url())
            .query(&[("key", format!("eq.{key}"))])
            .send()
            .await
            .map_err(|e| StoreError::BackendUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn list(&self, filter: Option<&Filter>) -> Result<Vec<Value>, StoreError> {
        let response = self
            .http
            .get(self.table_url())
            .query(&[("select", "*")])
            .send()
            .await
            .map_err(|e| StoreError::BackendUnavailable(e.to_string()))?;
        let rows: Vec<serde_json::Value> =
            response.json().await.map_err(|e| StoreError::Io(e.to_string()))?;
        let values: Vec<Value> = rows.into_iter().map(Value::from_json).collect();
        Ok(match filter {
            Some(f) => f.apply_to(values),
            None => values,
        })
    }
}
