use serde::Serialize;

/// Listing entry for a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct ObjectMeta {
    pub key: String,
    pub size_bytes: i64,
    pub content_type: String,
    /// Milliseconds since the UNIX epoch.
    pub created_at: i64,
}
