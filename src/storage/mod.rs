pub mod memory;
pub mod models;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::Result;

pub use memory::MemoryObjectStore;
pub use models::ObjectMeta;
pub use sqlite::SqliteObjectStore;

/// Minimal object-store surface the dataset writer depends on.
///
/// Every store is scoped to a single bucket chosen at construction.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    /// True if an object exists at `key`. A missing object is `Ok(false)`, not an error.
    async fn head(&self, key: &str) -> Result<bool>;

    /// Create or replace the object at `key`.
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Objects under `prefix`, ordered by key.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Delete up to one batch of keys. Returns how many existed.
    async fn delete_batch(&self, keys: &[String]) -> Result<usize>;

    /// Location string reported to callers for a stored key.
    fn uri(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket(), key)
    }
}
