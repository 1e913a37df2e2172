//! UploadIngestor: validates an uploaded image, names it by content
//! fingerprint and upload time, writes it to the bucket and records it.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    index::{IndexError, IndexStore},
    models::image::ObjectRecord,
    naming,
    store::{ObjectStoreClient, StoreError},
    thumbnail::{ThumbnailService, derive::decode_dimensions},
};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("only image files are allowed (got `{0}`)")]
    UnsupportedType(String),
    #[error("unsupported image format `{0}`")]
    UnsupportedExtension(String),
    #[error("upload is not a decodable image: {0}")]
    DecodeFailed(String),
    #[error("failed to write object: {0}")]
    StoreWriteFailed(#[source] StoreError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

impl IngestError {
    /// Rejected on input alone, before any I/O happened.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            IngestError::UnsupportedType(_) | IngestError::UnsupportedExtension(_)
        )
    }
}

#[derive(Clone)]
pub struct UploadIngestor {
    store: Arc<dyn ObjectStoreClient>,
    index: IndexStore,
    thumbnails: Option<ThumbnailService>,
    bucket: String,
    endpoint: String,
}

impl UploadIngestor {
    /// `thumbnails`, when set, derives the thumbnail right after the upload
    /// instead of waiting for the next reconciliation.
    pub fn new(
        store: Arc<dyn ObjectStoreClient>,
        index: IndexStore,
        thumbnails: Option<ThumbnailService>,
        bucket: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            store,
            index,
            thumbnails,
            bucket: bucket.into(),
            endpoint: endpoint.into(),
        }
    }

    pub async fn ingest(
        &self,
        raw: Bytes,
        content_type: &str,
        filename: &str,
    ) -> Result<ObjectRecord, IngestError> {
        self.ingest_at(raw, content_type, filename, Utc::now()).await
    }

    /// [`ingest`](Self::ingest) with an explicit upload instant, which salts
    /// the key.
    pub async fn ingest_at(
        &self,
        raw: Bytes,
        content_type: &str,
        filename: &str,
        uploaded_at: DateTime<Utc>,
    ) -> Result<ObjectRecord, IngestError> {
        if !content_type.starts_with("image/") {
            return Err(IngestError::UnsupportedType(content_type.to_string()));
        }
        let ext = naming::extension_of(filename)
            .filter(|ext| naming::is_allowed_extension(ext))
            .ok_or_else(|| IngestError::UnsupportedExtension(filename.to_string()))?;

        let source = raw.clone();
        let (width, height) = tokio::task::spawn_blocking(move || decode_dimensions(&source))
            .await
            .map_err(|err| IngestError::DecodeFailed(err.to_string()))?
            .map_err(|err| IngestError::DecodeFailed(err.to_string()))?;

        let key = naming::object_key(uploaded_at, &naming::fingerprint(&raw), &ext);
        let size = raw.len() as i64;

        self.store
            .put(&self.bucket, &key, raw.clone(), content_type)
            .await
            .map_err(IngestError::StoreWriteFailed)?;

        // The HEAD after write is authoritative for last_modified; fall back to
        // the upload instant if the store cannot answer.
        let last_modified = match self.store.head(&self.bucket, &key).await {
            Ok(Some(meta)) => meta.last_modified,
            Ok(None) => uploaded_at,
            Err(err) => {
                warn!(key = %key, error = %err, "head after upload failed");
                uploaded_at
            }
        };

        let thumbnail_ref = match &self.thumbnails {
            Some(thumbnails) => match thumbnails.store_from_source(&key, raw).await {
                Ok(thumb_key) => Some(thumb_key),
                Err(err) => {
                    warn!(key = %key, error = %err, "thumbnail on upload failed");
                    None
                }
            },
            None => None,
        };

        let now = Utc::now();
        let record = ObjectRecord {
            url: naming::object_url(&self.endpoint, &key),
            key,
            size,
            last_modified,
            width: Some(i64::from(width)),
            height: Some(i64::from(height)),
            thumbnail_ref,
            created_at: now,
            updated_at: now,
        };
        self.index.upsert(&record).await?;

        info!(
            key = %record.key,
            size,
            width,
            height,
            "image ingested"
        );
        Ok(record)
    }

    /// Delete an object, its thumbnail and its index entry. Returns whether
    /// the original existed in the bucket.
    ///
    /// The thumbnail is removed whether or not this ingestor derives them:
    /// the reconciler may have written one.
    pub async fn remove(&self, key: &str) -> Result<bool, IngestError> {
        let existed = self
            .store
            .delete(&self.bucket, key)
            .await
            .map_err(IngestError::StoreWriteFailed)?;
        let thumb_key = naming::thumbnail_key(key);
        if let Err(err) = self.store.delete(&self.bucket, &thumb_key).await {
            warn!(key, thumbnail = %thumb_key, error = %err, "failed to remove thumbnail");
        }
        self.index.delete(key).await?;
        Ok(existed)
    }
}
