//! The index entity and its HTTP-facing projections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::naming;

/// One indexed object, mirrored from the bucket.
///
/// The bucket is the source of truth for existence; a record is a queryable
/// cache of what the last reconciliation or upload saw.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct ObjectRecord {
    /// Object key, unique across the index.
    pub key: String,

    /// Size in bytes.
    pub size: i64,

    /// Last-modified timestamp reported by the store.
    pub last_modified: DateTime<Utc>,

    /// Public URL, derived from the key.
    pub url: String,

    /// Pixel width. Present if and only if `height` is.
    pub width: Option<i64>,

    /// Pixel height. Present if and only if `width` is.
    pub height: Option<i64>,

    /// Key of the derived thumbnail, once one has been written.
    pub thumbnail_ref: Option<String>,

    /// When the record was first indexed.
    pub created_at: DateTime<Utc>,

    /// When the record was last refreshed.
    pub updated_at: DateTime<Utc>,
}

impl ObjectRecord {
    pub fn dimensions(&self) -> Option<(i64, i64)> {
        self.width.zip(self.height)
    }
}

/// Listing/upload response item.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ImageObject {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    pub size: i64,
    pub url: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub thumbnail_url: Option<String>,
}

impl ImageObject {
    /// Project a record for the HTTP layer, resolving the thumbnail URL
    /// against the same endpoint as the original.
    pub fn from_record(record: ObjectRecord, endpoint: &str) -> Self {
        let thumbnail_url = record
            .thumbnail_ref
            .as_deref()
            .map(|thumb| naming::object_url(endpoint, thumb));
        Self {
            key: record.key,
            last_modified: record.last_modified,
            size: record.size,
            url: record.url,
            width: record.width,
            height: record.height,
            thumbnail_url,
        }
    }
}

/// One page of the index, newest first.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ImageListResponse {
    pub items: Vec<ImageObject>,
    pub has_more: bool,
    pub total: i64,
    pub current_page: u32,
}
