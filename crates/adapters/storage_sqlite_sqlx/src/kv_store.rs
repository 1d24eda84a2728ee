//! `SQLite` implementation of [`KeyValueStore`].

use std::future::Future;

use sqlx::SqlitePool;

use hearth_app::ports::KeyValueStore;
use hearth_domain::error::HearthError;
use serde_json::Value;

use crate::error::StorageError;

const SELECT: &str = "SELECT value FROM kv WHERE namespace = ? AND key = ?";
const UPSERT: &str = "INSERT INTO kv (namespace, key, value, updated_at) VALUES (?, ?, ?, ?) \
     ON CONFLICT (namespace, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at";
const EXISTS: &str = "SELECT 1 FROM kv WHERE namespace = ? AND key = ?";
const DELETE: &str = "DELETE FROM kv WHERE namespace = ? AND key = ?";
const CLEAR: &str = "DELETE FROM kv WHERE namespace = ?";

/// `SQLite`-backed key-value store. Values are stored as JSON text.
#[derive(Debug, Clone)]
pub struct SqliteKeyValueStore {
    pool: SqlitePool,
}

impl SqliteKeyValueStore {
    /// Create a new store using the given connection pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    fn get(
        &self,
        namespace: &str,
        key: &str,
    ) -> impl Future<Output = Result<Option<Value>, HearthError>> + Send {
        let pool = self.pool.clone();
        let (namespace, key) = (namespace.to_string(), key.to_string());
        async move {
            let row: Option<(String,)> = sqlx::query_as(SELECT)
                .bind(namespace)
                .bind(key)
                .fetch_optional(&pool)
                .await
                .map_err(StorageError::from)?;

            let value = row
                .map(|(text,)| serde_json::from_str(&text))
                .transpose()
                .map_err(StorageError::from)?;
            Ok(value)
        }
    }

    fn set(
        &self,
        namespace: &str,
        key: &str,
        value: Value,
    ) -> impl Future<Output = Result<(), HearthError>> + Send {
        let pool = self.pool.clone();
        let (namespace, key) = (namespace.to_string(), key.to_string());
        async move {
            let text = serde_json::to_string(&value).map_err(StorageError::from)?;
            sqlx::query(UPSERT)
                .bind(namespace)
                .bind(key)
                .bind(text)
                .bind(chrono::Utc::now().to_rfc3339())
                .execute(&pool)
                .await
                .map_err(StorageError::from)?;
            Ok(())
        }
    }

    fn has(&self, namespace: &str, key: &str) -> impl Future<Output = Result<bool, HearthError>> + Send {
        let pool = self.pool.clone();
        let (namespace, key) = (namespace.to_string(), key.to_string());
        async move {
            let row: Option<(i64,)> = sqlx::query_as(EXISTS)
                .bind(namespace)
                .bind(key)
                .fetch_optional(&pool)
                .await
                .map_err(StorageError::from)?;
            Ok(row.is_some())
        }
    }

    fn delete(
        &self,
        namespace: &str,
        key: &str,
    ) -> impl Future<Output = Result<bool, HearthError>> + Send {
        let pool = self.pool.clone();
        let (namespace, key) = (namespace.to_string(), key.to_string());
        async move {
            let result = sqlx::query(DELETE)
                .bind(namespace)
                .bind(key)
                .execute(&pool)
                .await
                .map_err(StorageError::from)?;
            Ok(result.rows_affected() > 0)
        }
    }

    fn clear(&self, namespace: &str) -> impl Future<Output = Result<(), HearthError>> + Send {
        let pool = self.pool.clone();
        let namespace = namespace.to_string();
        async move {
            sqlx::query(CLEAR)
                .bind(namespace)
                .execute(&pool)
                .await
                .map_err(StorageError::from)?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hearth_app::ports::Namespace;
    use serde_json::json;

    use super::*;
    use crate::pool::Config;

    async fn setup() -> SqliteKeyValueStore {
        let db = Config::new("sqlite::memory:").build().await.unwrap();
        SqliteKeyValueStore::new(db.pool().clone())
    }

    #[tokio::test]
    async fn should_return_none_when_key_missing() {
        let store = setup().await;
        assert_eq!(store.get("virtual", "switch").await.unwrap(), None);
        assert!(!store.has("virtual", "switch").await.unwrap());
    }

    #[tokio::test]
    async fn should_store_and_replace_json_values() {
        let store = setup().await;
        store.set("virtual", "switch", json!({"on": true})).await.unwrap();
        store.set("virtual", "switch", json!({"on": false})).await.unwrap();

        assert_eq!(
            store.get("virtual", "switch").await.unwrap(),
            Some(json!({"on": false}))
        );
        assert!(store.has("virtual", "switch").await.unwrap());
    }

    #[tokio::test]
    async fn should_keep_namespaces_apart() {
        let store = setup().await;
        store.set("a", "k", json!(1)).await.unwrap();
        store.set("b", "k", json!(2)).await.unwrap();

        store.clear("a").await.unwrap();

        assert_eq!(store.get("a", "k").await.unwrap(), None);
        assert_eq!(store.get("b", "k").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn should_report_whether_delete_removed_something() {
        let store = setup().await;
        store.set("a", "k", json!("v")).await.unwrap();

        assert!(store.delete("a", "k").await.unwrap());
        assert!(!store.delete("a", "k").await.unwrap());
    }

    #[tokio::test]
    async fn should_work_through_namespace_handle() {
        let store = Arc::new(setup().await);
        let ns = Namespace::new(Arc::clone(&store), "rpc");
        ns.set("token", json!("abc")).await.unwrap();

        assert_eq!(store.get("rpc", "token").await.unwrap(), Some(json!("abc")));
        assert_eq!(ns.get("token").await.unwrap(), Some(json!("abc")));
    }

    #[tokio::test]
    async fn should_surface_corrupt_rows_as_backend_errors() {
        let store = setup().await;
        sqlx::query("INSERT INTO kv (namespace, key, value, updated_at) VALUES ('a', 'k', 'not json', '')")
            .execute(&store.pool)
            .await
            .unwrap();

        let err = store.get("a", "k").await.unwrap_err();
        assert_eq!(err.code(), 500);
    }
}
