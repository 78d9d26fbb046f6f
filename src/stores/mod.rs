//! Store adapters: uniform key/value persistence behind one trait, with
//! pluggable backends selected by a [`StoreDef`] (spec §4.1).

pub mod file;
pub mod memory;
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub mod sql;
pub mod postgrest;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::warn;

use crate::program::{StoreBackend, StoreDef};
use crate::value::Value;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(String),
    #[error("conflicting write for key '{0}'")]
    Conflict(String),
    #[error("key '{0}' not found")]
    NotFound(String),
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
}

/// `where` is equality-only per spec §4.1; adapters that can't push it down
/// natively (memory) filter client-side after `list()`.
#[derive(Clone, Debug, Default)]
pub struct Filter {
    pub where_: FxHashMap<String, Value>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Filter {
    #[must_use]
    pub fn matches(&self, record: &Value) -> bool {
        self.where_.iter().all(|(field, expected)| record.get_field(field).is_some_and(|v| v.values_equal(expected)))
    }

    pub fn apply_to(&self, records: Vec<Value>) -> Vec<Value> {
        let filtered: Vec<Value> = records.into_iter().filter(|r| self.matches(r)).collect();
        let offset = self.offset.unwrap_or(0);
        let skipped = filtered.into_iter().skip(offset);
        match self.limit {
            Some(limit) => skipped.take(limit).collect(),
            None => skipped.collect(),
        }
    }
}

#[async_trait]
pub trait StoreAdapter: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    async fn set(&self, key: &str, record: Value) -> Result<(), StoreError>;
    /// Shallow-merge upsert: creates the key if absent (spec §4.1, §8 property 7).
    async fn update(&self, key: &str, partial: Value) -> Result<Value, StoreError>;
    /// A no-op (not an error) when `key` doesn't exist.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
    async fn list(&self, filter: Option<&Filter>) -> Result<Vec<Value>, StoreError>;
    async fn count(&self, filter: Option<&Filter>) -> Result<usize, StoreError> {
        Ok(self.list(filter).await?.len())
    }

    async fn bulk_set(&self, records: Vec<(String, Value)>) -> Result<(), StoreError> {
        for (key, record) in records {
            self.set(&key, record).await?;
        }
        Ok(())
    }

    async fn bulk_upsert(&self, records: Vec<(String, Value)>) -> Result<(), StoreError> {
        for (key, partial) in records {
            self.update(&key, partial).await?;
        }
        Ok(())
    }

    /// Flush pending writes and release resources. Called at mission
    /// teardown; adapters with nothing to flush no-op.
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Shallow-merges `partial` onto `base`, partial's values winning — the one
/// merge primitive shared by every adapter's `update()`.
#[must_use]
pub fn shallow_merge(base: Option<Value>, partial: Value) -> Value {
    match (base, partial) {
        (Some(Value::Object(mut base_map)), Value::Object(partial_map)) => {
            for (k, v) in partial_map {
                base_map.insert(k, v);
            }
            Value::Object(base_map)
        }
        (None, partial) => partial,
        (Some(_), partial) => partial,
    }
}

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    pub dev_mode: bool,
    pub sql_url: Option<String>,
    pub postgrest_url: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { data_dir: PathBuf::from("./data"), dev_mode: true, sql_url: None, postgrest_url: None }
    }
}

/// Resolves a [`StoreDef`]'s backend tag to a ready adapter (spec §4.1
/// factory + async init contract). A handle that fails initialization is
/// never returned to the caller — there is no partially-constructed store.
pub async fn create_store(
    name: &str,
    def: &StoreDef,
    config: &StoreConfig,
) -> Result<Arc<dyn StoreAdapter>, StoreError> {
    match def.backend {
        StoreBackend::Memory => Ok(Arc::new(memory::MemoryStore::new())),
        StoreBackend::File => {
            let store = file::FileStore::create(config.data_dir.join(format!("{}.json", def.collection))).await?;
            Ok(Arc::new(store))
        }
        StoreBackend::Sql => create_sql_or_fallback(name, def, config).await,
        StoreBackend::NoSql => create_nosql_or_fallback(name, def, config).await,
        StoreBackend::Postgrest => {
            let base_url = config
                .postgrest_url
                .clone()
                .ok_or_else(|| StoreError::BackendUnavailable("no postgrest_url configured".to_string()))?;
            Ok(Arc::new(postgrest::PostgrestStore::new(base_url, def.collection.clone(), reqwest::Client::new())))
        }
    }
}

#[cfg(any(feature = "sqlite", feature = "postgres"))]
async fn create_sql_or_fallback(
    name: &str,
    def: &StoreDef,
    config: &StoreConfig,
) -> Result<Arc<dyn StoreAdapter>, StoreError> {
    if let Some(url) = &config.sql_url {
        return Ok(Arc::new(sql::SqlStore::create(url, &def.collection).await?));
    }
    if config.dev_mode {
        warn!(store = name, "no sql_url configured; falling back to the file backend in dev mode");
        let store = file::FileStore::create(config.data_dir.join(format!("{}.json", def.collection))).await?;
        return Ok(Arc::new(store));
    }
    Err(StoreError::BackendUnavailable("sql backend requires sql_url outside dev mode".to_string()))
}

#[cfg(not(any(feature = "sqlite", feature = "postgres")))]
async fn create_sql_or_fallback(
    name: &str,
    def: &StoreDef,
    config: &StoreConfig,
) -> Result<Arc<dyn StoreAdapter>, StoreError> {
    if config.dev_mode {
        warn!(store = name, "sql feature not compiled in; falling back to the file backend in dev mode");
        let store = file::FileStore::create(config.data_dir.join(format!("{}.json", def.collection))).await?;
        return Ok(Arc::new(store));
    }
    Err(StoreError::BackendUnavailable("sql backend not compiled into this build".to_string()))
}

/// No concrete NoSQL driver is specified by this runtime; outside dev mode
/// it is always a configuration error, and in dev mode it degrades to the
/// file backend exactly like `sql` (spec §4.1).
async fn create_nosql_or_fallback(
    name: &str,
    def: &StoreDef,
    config: &StoreConfig,
) -> Result<Arc<dyn StoreAdapter>, StoreError> {
    if config.dev_mode {
        warn!(store = name, "no nosql driver bundled; falling back to the file backend in dev mode");
        let store = file::FileStore::create(config.data_dir.join(format!("{}.json", def.collection))).await?;
        return Ok(Arc::new(store));
    }
    Err(StoreError::BackendUnavailable("nosql backend has no bundled driver".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::collections::ValueMap;

    #[test]
    fn shallow_merge_partial_wins() {
        let mut base = ValueMap::default();
        base.insert("a".to_string(), Value::Int(1));
        base.insert("b".to_string(), Value::Int(2));
        let mut partial = ValueMap::default();
        partial.insert("b".to_string(), Value::Int(99));
        let merged = shallow_merge(Some(Value::Object(base)), Value::Object(partial));
        assert_eq!(merged.get_field("a"), Some(&Value::Int(1)));
        assert_eq!(merged.get_field("b"), Some(&Value::Int(99)));
    }

    #[test]
    fn filter_applies_where_then_offset_then_limit() {
        let mut a = ValueMap::default();
        a.insert("kind".to_string(), Value::String("x".into()));
        let mut b = ValueMap::default();
        b.insert("kind".to_string(), Value::String("y".into()));
        let mut c = ValueMap::default();
        c.insert("kind".to_string(), Value::String("x".into()));
        let records = vec![Value::Object(a), Value::Object(b), Value::Object(c)];

        let mut where_ = FxHashMap::default();
        where_.insert("kind".to_string(), Value::String("x".into()));
        let filter = Filter { where_, limit: Some(1), offset: Some(0) };
        assert_eq!(filter.apply_to(records).len(), 1);
    }
}
