//! Represents an object (blob) as seen through the store capability.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Metadata for a single object within a bucket.
///
/// Returned by listings and HEAD requests. It describes the stored blob, not
/// its content bytes.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Object key (path-like identifier within the bucket).
    pub key: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Content type (MIME type), when the writer supplied one.
    pub content_type: Option<String>,

    /// MD5 checksum of the payload.
    pub etag: Option<String>,

    /// Timestamp when the object was last written.
    pub last_modified: DateTime<Utc>,
}
