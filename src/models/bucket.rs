//! Represents a logical bucket: a top-level container for objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A storage bucket in the local backend.
///
/// Buckets act as namespaces for objects. The index tracks exactly one of
/// them, named by configuration.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    /// Unique identifier for this bucket (UUID for internal DB use).
    pub id: Uuid,

    /// Globally unique bucket name (must conform to DNS naming rules).
    pub name: String,

    /// Region where the bucket is hosted (e.g. "us-west-2", or "local").
    pub region: String,

    /// When this bucket was created.
    pub created_at: DateTime<Utc>,
}
