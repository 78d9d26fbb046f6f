//! Direct SQL store backend (`sqlite`/`postgres` features), a plain
//! key/value table per collection. Durability and per-key serialization
//! come from the database itself; no in-process mutex is needed here.

use async_trait::async_trait;
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::AnyPool;

use super::{shallow_merge, Filter, StoreAdapter, StoreError};
use crate::value::Value;

pub struct SqlStore {
    pool: AnyPool,
    table: String,
}

impl SqlStore {
    pub async fn create(database_url: &str, collection: &str) -> Result<Self, StoreError> {
        install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::BackendUnavailable(e.to_string()))?;

        let table = sanitize_table_name(collection);
        let create_sql = format!(
            "CREATE TABLE IF NOT EXISTS {table} (store_key TEXT PRIMARY KEY, store_value TEXT NOT NULL)"
        );
        sqlx::query(&create_sql).execute(&pool).await.map_err(|e| StoreError::Io(e.to_string()))?;

        Ok(Self { pool, table })
    }
}

/// Table names come from the program's own `Store` definitions, not user
/// input at request time, but this still guards against an accidental
/// collection name that isn't a valid bare identifier.
fn sanitize_table_name(collection: &str) -> String {
    let cleaned: String = collection.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '_').collect();
    format!("reqon_{cleaned}")
}

#[async_trait]
impl StoreAdapter for SqlStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as(&format!("SELECT store_value FROM {} WHERE store_key = ?", self.table))
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        row.map(|(raw,)| serde_json::from_str(&raw).map(Value::from_json).map_err(|e| StoreError::Io(e.to_string())))
            .transpose()
    }

    async fn set(&self, key: &str, record: Value) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(&record.to_json()).map_err(|e| StoreError::Io(e.to_string()))?;
        sqlx::query(&format!(
            "INSERT INTO {table} (store_key, store_value) VALUES (?, ?) \
             ON CONFLICT (store_key) DO UPDATE SET store_value = excluded.store_value",
            table = self.table
        ))
        .bind(key)
        .bind(serialized)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }

    async fn update(&self, key: &str, partial: Value) -> Result<Value, StoreError> {
        let existing = self.get(key).await?;
        let merged = shallow_merge(existing, partial);
        self.set(key, merged.clone()).await?;
        Ok(merged)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query(&format!("DELETE FROM {} WHERE store_key = ?", self.table))
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }

    async fn list(&self, filter: Option<&Filter>) -> Result<Vec<Value>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(&format!("SELECT store_value FROM {}", self.table))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        let values = rows
            .into_iter()
            .map(|(raw,)| serde_json::from_str::<serde_json::Value>(&raw).map(Value::from_json))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(match filter {
            Some(f) => f.apply_to(values),
            None => values,
        })
    }
}
