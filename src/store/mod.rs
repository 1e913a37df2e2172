//! Object-store capability.
//!
//! Every component that touches blobs receives an `Arc<dyn ObjectStoreClient>`
//! at construction; there is no process-wide client. `s3` talks to any
//! S3-compatible bucket, `disk` keeps blobs locally under SQLite metadata,
//! and `retry` adds bounded retries on top of either.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, TryStreamExt, stream};
use std::io;
use thiserror::Error;

use crate::models::object::ObjectMeta;

pub mod disk;
pub mod retry;
pub mod s3;

/// One page of a bucket listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub entries: Vec<ObjectMeta>,
    /// Token for the next page; `None` once the listing is exhausted.
    pub next_token: Option<String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{key}` not found in bucket `{bucket}`")]
    NotFound { bucket: String, key: String },
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("region `{0}` is not supported")]
    UnsupportedRegion(String),
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("invalid continuation token")]
    InvalidContinuationToken,
    #[error("listing of bucket `{0}` returned the same continuation token twice")]
    StalledPagination(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StoreError {
    /// Whether retrying the same call could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Transport(_) | StoreError::Io(_) => true,
            StoreError::Sqlx(err) => matches!(err, sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Blob storage keyed by string within a named bucket.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// Fetch one listing page, starting after `continuation` (or from the
    /// beginning when `None`).
    async fn list_page(&self, bucket: &str, continuation: Option<String>) -> StoreResult<ListPage>;

    /// Read the full payload. Missing objects yield [`StoreError::NotFound`].
    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Bytes>;

    /// Metadata-only lookup. Absence is `Ok(None)`, not an error.
    async fn head(&self, bucket: &str, key: &str) -> StoreResult<Option<ObjectMeta>>;

    /// Write (or overwrite) an object.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> StoreResult<ObjectMeta>;

    /// Remove an object. Returns whether anything was removed.
    async fn delete(&self, bucket: &str, key: &str) -> StoreResult<bool>;
}

enum Cursor {
    Start,
    After(String),
    Done,
}

/// Lazily enumerate every object in `bucket`, following continuation tokens
/// until the store reports the listing is exhausted.
pub fn list_all<'a>(
    client: &'a dyn ObjectStoreClient,
    bucket: &'a str,
) -> impl Stream<Item = StoreResult<ObjectMeta>> + Send + 'a {
    stream::try_unfold(Cursor::Start, move |cursor| async move {
        let sent = match cursor {
            Cursor::Start => None,
            Cursor::After(token) => Some(token),
            Cursor::Done => return Ok(None),
        };
        let page = client.list_page(bucket, sent.clone()).await?;
        let next = match page.next_token {
            Some(token) if sent.as_deref() == Some(token.as_str()) => {
                return Err(StoreError::StalledPagination(bucket.to_string()));
            }
            Some(token) => Cursor::After(token),
            None => Cursor::Done,
        };
        let entries = stream::iter(page.entries.into_iter().map(Ok::<_, StoreError>));
        Ok::<_, StoreError>(Some((entries, next)))
    })
    .try_flatten()
}
