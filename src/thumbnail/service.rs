//! Generate-if-missing protocol for thumbnails.
//!
//! Idempotence comes from an existence check on the thumbnail key, not from
//! hashing: once `thumb_{key}` exists it is returned as-is unless the caller
//! forces regeneration.

use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use super::derive::{DeriveError, ThumbnailOptions, derive};
use crate::{
    naming,
    store::{ObjectStoreClient, StoreError},
};

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("`{0}` is itself a thumbnail")]
    IsThumbnail(String),
    #[error("source object `{0}` is missing")]
    SourceMissing(String),
    #[error(transparent)]
    Derive(#[from] DeriveError),
    #[error("thumbnail task failed: {0}")]
    Task(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What `ensure` found or did. Both variants carry the thumbnail key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThumbnailOutcome {
    Existing(String),
    Derived(String),
}

impl ThumbnailOutcome {
    pub fn into_key(self) -> String {
        match self {
            ThumbnailOutcome::Existing(key) | ThumbnailOutcome::Derived(key) => key,
        }
    }

    pub fn was_derived(&self) -> bool {
        matches!(self, ThumbnailOutcome::Derived(_))
    }
}

#[derive(Clone)]
pub struct ThumbnailService {
    store: Arc<dyn ObjectStoreClient>,
    bucket: String,
    options: ThumbnailOptions,
}

impl ThumbnailService {
    pub fn new(
        store: Arc<dyn ObjectStoreClient>,
        bucket: impl Into<String>,
        options: ThumbnailOptions,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            options,
        }
    }

    /// Make sure a thumbnail exists for `key`.
    ///
    /// Without `force`, a HEAD on the thumbnail key short-circuits the whole
    /// operation. Otherwise the original is fetched, derived on a blocking
    /// thread, and written back as JPEG.
    pub async fn ensure(&self, key: &str, force: bool) -> Result<ThumbnailOutcome, ThumbnailError> {
        if naming::is_thumbnail_key(key) {
            return Err(ThumbnailError::IsThumbnail(key.to_string()));
        }
        let thumb_key = naming::thumbnail_key(key);

        if !force && self.store.head(&self.bucket, &thumb_key).await?.is_some() {
            return Ok(ThumbnailOutcome::Existing(thumb_key));
        }

        let source = match self.store.get(&self.bucket, key).await {
            Ok(bytes) => bytes,
            Err(err) if err.is_not_found() => {
                return Err(ThumbnailError::SourceMissing(key.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        let thumb_key = self.store_from_source(key, source).await?;
        Ok(ThumbnailOutcome::Derived(thumb_key))
    }

    /// Derive from bytes the caller already holds and write the result,
    /// overwriting any existing thumbnail. Returns the thumbnail key.
    pub async fn store_from_source(
        &self,
        key: &str,
        source: Bytes,
    ) -> Result<String, ThumbnailError> {
        let thumb_key = naming::thumbnail_key(key);
        let thumbnail = self.derive_blocking(source).await?;
        let size = thumbnail.len();
        self.store
            .put(
                &self.bucket,
                &thumb_key,
                Bytes::from(thumbnail),
                naming::THUMBNAIL_CONTENT_TYPE,
            )
            .await?;
        info!(key, thumbnail = %thumb_key, size, "thumbnail written");
        Ok(thumb_key)
    }

    /// Best-effort variant of [`ensure`](Self::ensure) for batch contexts:
    /// failures are logged and reported as `None`.
    pub async fn generate_if_missing(&self, key: &str) -> Option<String> {
        match self.ensure(key, false).await {
            Ok(outcome) => Some(outcome.into_key()),
            Err(err) => {
                warn!(key, error = %err, "thumbnail generation failed");
                None
            }
        }
    }

    async fn derive_blocking(&self, source: Bytes) -> Result<Vec<u8>, ThumbnailError> {
        let options = self.options.clone();
        let derived = tokio::task::spawn_blocking(move || derive(&source, &options))
            .await
            .map_err(|err| ThumbnailError::Task(err.to_string()))??;
        Ok(derived)
    }
}
