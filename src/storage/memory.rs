use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::Result;
use crate::storage::{ObjectMeta, ObjectStore};

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    content_type: String,
    created_at: i64,
}

/// Process-local object store. Contents vanish with the process.
#[derive(Debug)]
pub struct MemoryObjectStore {
    bucket: String,
    objects: DashMap<String, StoredObject>,
}

impl MemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self { bucket: bucket.into(), objects: DashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn head(&self, key: &str) -> Result<bool> {
        Ok(self.objects.contains_key(key))
    }

    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        self.objects.insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
                created_at: chrono::Utc::now().timestamp_millis(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.objects.get(key).map(|o| o.body.clone()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let mut listed: Vec<ObjectMeta> = self
            .objects
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| ObjectMeta {
                key: e.key().clone(),
                size_bytes: e.value().body.len() as i64,
                content_type: e.value().content_type.clone(),
                created_at: e.value().created_at,
            })
            .collect();
        listed.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(listed)
    }

    async fn delete_batch(&self, keys: &[String]) -> Result<usize> {
        Ok(keys.iter().filter(|k| self.objects.remove(k.as_str()).is_some()).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn head_reports_missing_as_false() {
        let store = MemoryObjectStore::new("lake");
        assert!(!store.head("nope").await.unwrap());
        store.put("yes", b"1".to_vec(), "text/plain").await.unwrap();
        assert!(store.head("yes").await.unwrap());
    }

    #[tokio::test]
    async fn list_filters_and_sorts() {
        let store = MemoryObjectStore::new("lake");
        for key in ["p/c", "p/a", "q/a", "p/b"] {
            store.put(key, b"xy".to_vec(), "text/plain").await.unwrap();
        }
        let listed = store.list("p/").await.unwrap();
        let keys: Vec<&str> = listed.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, vec!["p/a", "p/b", "p/c"]);
        assert!(listed.iter().all(|m| m.size_bytes == 2));
    }

    #[tokio::test]
    async fn delete_batch_removes_only_named_keys() {
        let store = MemoryObjectStore::new("lake");
        store.put("a", vec![], "text/plain").await.unwrap();
        store.put("b", vec![], "text/plain").await.unwrap();
        let n = store.delete_batch(&["a".to_string(), "zz".to_string()]).await.unwrap();
        assert_eq!(n, 1);
        assert_eq!(store.len(), 1);
        assert!(store.head("b").await.unwrap());
    }
}
