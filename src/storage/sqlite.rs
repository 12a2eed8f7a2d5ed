use async_trait::async_trait;
use futures_util::TryStreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::Result;
use crate::storage::{ObjectMeta, ObjectStore};

/// Object store persisted in a single SQLite table, keyed by `(bucket, key)`.
pub struct SqliteObjectStore {
    pool: SqlitePool,
    bucket: String,
}

impl SqliteObjectStore {
    pub fn new(pool: SqlitePool, bucket: impl Into<String>) -> Self {
        Self { pool, bucket: bucket.into() }
    }

    /// Open (creating if needed) the database at `path` and apply migrations.
    pub async fn open(path: &str, bucket: impl Into<String>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Object store ready at {path}");
        Ok(Self::new(pool, bucket))
    }

    /// Private in-memory database. One connection, so every query sees the same data.
    pub async fn in_memory(bucket: impl Into<String>) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self::new(pool, bucket))
    }
}

#[async_trait]
impl ObjectStore for SqliteObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn head(&self, key: &str) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM objects WHERE bucket = ? AND key = ?")
                .bind(&self.bucket)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        let size_bytes = body.len() as i64;
        let created_at = chrono::Utc::now().timestamp_millis();

        sqlx::query(
            r#"
            INSERT INTO objects (bucket, key, body, content_type, size_bytes, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket, key) DO UPDATE SET
                body = excluded.body,
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                created_at = excluded.created_at
            "#,
        )
        .bind(&self.bucket)
        .bind(key)
        .bind(body)
        .bind(content_type)
        .bind(size_bytes)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        debug!(bucket = %self.bucket, key, size_bytes, "object stored");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let body: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT body FROM objects WHERE bucket = ? AND key = ?")
                .bind(&self.bucket)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(body)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let rows: Vec<ObjectMeta> = sqlx::query_as(
            r#"
            SELECT key, size_bytes, content_type, created_at
            FROM objects
            WHERE bucket = ? AND substr(key, 1, length(?)) = ?
            ORDER BY key
            "#,
        )
        .bind(&self.bucket)
        .bind(prefix)
        .bind(prefix)
        .fetch(&self.pool)
        .try_collect()
        .await?;
        Ok(rows)
    }

    async fn delete_batch(&self, keys: &[String]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut deleted = 0usize;
        for key in keys {
            let res = sqlx::query("DELETE FROM objects WHERE bucket = ? AND key = ?")
                .bind(&self.bucket)
                .bind(key)
                .execute(&mut *tx)
                .await?;
            deleted += res.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(deleted)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_head_and_get() {
        let store = SqliteObjectStore::in_memory("lake").await.unwrap();
        assert!(!store.head("silver/a.json").await.unwrap());

        store.put("silver/a.json", b"{}".to_vec(), "application/json").await.unwrap();
        assert!(store.head("silver/a.json").await.unwrap());
        assert_eq!(store.get("silver/a.json").await.unwrap(), Some(b"{}".to_vec()));
        assert_eq!(store.get("silver/missing.json").await.unwrap(), None);
    }

    #[tokio::test]
    async fn put_overwrites_existing_key() {
        let store = SqliteObjectStore::in_memory("lake").await.unwrap();
        store.put("k", b"one".to_vec(), "text/plain").await.unwrap();
        store.put("k", b"three".to_vec(), "text/plain").await.unwrap();

        let listed = store.list("").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].size_bytes, 5);
        assert_eq!(store.get("k").await.unwrap(), Some(b"three".to_vec()));
    }

    #[tokio::test]
    async fn list_is_prefix_scoped_and_ordered() {
        let store = SqliteObjectStore::in_memory("lake").await.unwrap();
        for key in ["silver/interval=1d/b", "silver/interval=1d/a", "silver/interval=4h/a", "bronze/x"] {
            store.put(key, b"x".to_vec(), "application/json").await.unwrap();
        }

        let keys: Vec<String> = store
            .list("silver/interval=1d/")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.key)
            .collect();
        assert_eq!(keys, vec!["silver/interval=1d/a", "silver/interval=1d/b"]);
        assert_eq!(store.list("silver/").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn buckets_are_isolated() {
        let a = SqliteObjectStore::in_memory("a").await.unwrap();
        let b = SqliteObjectStore::new(a.pool.clone(), "b");
        a.put("k", b"x".to_vec(), "text/plain").await.unwrap();
        assert!(!b.head("k").await.unwrap());
        assert!(b.list("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_batch_counts_existing_keys() {
        let store = SqliteObjectStore::in_memory("lake").await.unwrap();
        store.put("a", b"x".to_vec(), "text/plain").await.unwrap();
        store.put("b", b"x".to_vec(), "text/plain").await.unwrap();

        let deleted = store
            .delete_batch(&["a".to_string(), "b".to_string(), "nope".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert!(store.list("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn uri_uses_bucket() {
        let store = SqliteObjectStore::in_memory("lake").await.unwrap();
        assert_eq!(store.uri("silver/a.json"), "s3://lake/silver/a.json");
    }
}
