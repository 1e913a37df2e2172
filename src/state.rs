//! Shared handler state.

use sqlx::SqlitePool;
use std::sync::Arc;

use crate::{
    index::IndexStore, ingest::UploadIngestor, store::ObjectStoreClient, sync::SyncRunner,
    thumbnail::ThumbnailService,
};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<SqlitePool>,
    pub store: Arc<dyn ObjectStoreClient>,
    pub bucket: String,
    pub endpoint: String,
    pub index: IndexStore,
    pub ingestor: UploadIngestor,
    pub thumbnails: ThumbnailService,
    pub runner: SyncRunner,
    pub default_page_size: u32,
}
