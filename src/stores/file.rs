//! File-backed store: debounced, coalesced writes with a guaranteed flush
//! on `close()` and on `SIGINT`/`SIGTERM` (spec §4.1).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use super::{shallow_merge, Filter, StoreAdapter, StoreError};
use crate::value::Value;

const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

pub struct FileStore {
    path: PathBuf,
    records: Arc<Mutex<FxHashMap<String, Value>>>,
    dirty: Arc<AtomicBool>,
    flush_gate: Arc<tokio::sync::Mutex<()>>,
    debounce_task: JoinHandle<()>,
    signal_task: JoinHandle<()>,
}

impl FileStore {
    pub async fn create(path: PathBuf) -> Result<Self, StoreError> {
        Self::create_with_debounce(path, DEFAULT_DEBOUNCE).await
    }

    pub async fn create_with_debounce(path: PathBuf, debounce: Duration) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| StoreError::Io(e.to_string()))?;
        }
        let records = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => {
                let json: serde_json::Value =
                    serde_json::from_str(&raw).map_err(|e| StoreError::Io(format!("corrupt store file: {e}")))?;
                let mut map = FxHashMap::default();
                if let serde_json::Value::Object(obj) = json {
                    for (k, v) in obj {
                        map.insert(k, Value::from_json(v));
                    }
                }
                map
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => FxHashMap::default(),
            Err(e) => return Err(StoreError::Io(e.to_string())),
        };

        let records = Arc::new(Mutex::new(records));
        let dirty = Arc::new(AtomicBool::new(false));
        let flush_gate = Arc::new(tokio::sync::Mutex::new(()));

        let debounce_task = tokio::spawn(debounce_loop(path.clone(), records.clone(), dirty.clone(), flush_gate.clone(), debounce));
        let signal_task = tokio::spawn(signal_flush_loop(path.clone(), records.clone(), flush_gate.clone()));

        Ok(Self { path, records, dirty, flush_gate, debounce_task, signal_task })
    }

    async fn flush_now(&self) -> Result<(), StoreError> {
        flush_to_disk(&self.path, &self.records, &self.flush_gate).await?;
        self.dirty.store(false, Ordering::SeqCst);
        Ok(())
    }
}

async fn debounce_loop(
    path: PathBuf,
    records: Arc<Mutex<FxHashMap<String, Value>>>,
    dirty: Arc<AtomicBool>,
    flush_gate: Arc<tokio::sync::Mutex<()>>,
    debounce: Duration,
) {
    loop {
        tokio::time::sleep(debounce).await;
        if dirty.swap(false, Ordering::SeqCst) {
            if let Err(err) = flush_to_disk(&path, &records, &flush_gate).await {
                error!(path = %path.display(), error = %err, "debounced flush failed");
            }
        }
    }
}

async fn signal_flush_loop(
    path: PathBuf,
    records: Arc<Mutex<FxHashMap<String, Value>>>,
    flush_gate: Arc<tokio::sync::Mutex<()>>,
) {
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(s) => s,
        Err(err) => {
            warn!(error = %err, "could not install SIGTERM handler for store flush");
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    if let Err(err) = flush_to_disk(&path, &records, &flush_gate).await {
        error!(path = %path.display(), error = %err, "flush-on-signal failed");
    }
}

async fn flush_to_disk(
    path: &PathBuf,
    records: &Arc<Mutex<FxHashMap<String, Value>>>,
    flush_gate: &Arc<tokio::sync::Mutex<()>>,
) -> Result<(), StoreError> {
    let _permit = flush_gate.lock().await;
    let snapshot: FxHashMap<String, serde_json::Value> = {
        let guard = records.lock();
        guard.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()
    };
    let serialized = serde_json::to_vec_pretty(&snapshot).map_err(|e| StoreError::Io(e.to_string()))?;
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, serialized).await.map_err(|e| StoreError::Io(e.to_string()))?;
    tokio::fs::rename(&tmp_path, path).await.map_err(|e| StoreError::Io(e.to_string()))?;
    Ok(())
}

impl Drop for FileStore {
    fn drop(&mut self) {
        self.debounce_task.abort();
        self.signal_task.abort();
    }
}

#[async_trait]
impl StoreAdapter for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.records.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, record: Value) -> Result<(), StoreError> {
        self.records.lock().insert(key.to_string(), record);
        self.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn update(&self, key: &str, partial: Value) -> Result<Value, StoreError> {
        let merged = {
            let mut guard = self.records.lock();
            let merged = shallow_merge(guard.get(key).cloned(), partial);
            guard.insert(key.to_string(), merged.clone());
            merged
        };
        self.dirty.store(true, Ordering::SeqCst);
        Ok(merged)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.records.lock().remove(key);
        self.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn list(&self, filter: Option<&Filter>) -> Result<Vec<Value>, StoreError> {
        let all: Vec<Value> = self.records.lock().values().cloned().collect();
        Ok(match filter {
            Some(f) => f.apply_to(all),
            None => all,
        })
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.flush_now().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_disk_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("widgets.json");
        {
            let store = FileStore::create_with_debounce(path.clone(), Duration::from_secs(3600)).await.unwrap();
            store.set("w1", Value::String("gadget".into())).await.unwrap();
            store.close().await.unwrap();
        }
        let reopened = FileStore::create_with_debounce(path, Duration::from_secs(3600)).await.unwrap();
        assert_eq!(reopened.get("w1").await.unwrap(), Some(Value::String("gadget".into())));
    }

    #[tokio::test]
    async fn debounced_write_lands_without_explicit_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("widgets.json");
        let store = FileStore::create_with_debounce(path.clone(), Duration::from_millis(20)).await.unwrap();
        store.set("w1", Value::Int(7)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(raw.contains('7'));
    }
}
