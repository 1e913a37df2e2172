//! Shared fixtures for unit tests.

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::{io::Cursor, sync::Arc};
use tempfile::TempDir;

use crate::{db, index::IndexStore, store::disk::DiskObjectStore};

pub const BUCKET: &str = "photos";
pub const ENDPOINT: &str = "img.example.com";

/// A migrated single-connection in-memory database. Each call is isolated.
pub async fn memory_pool() -> Arc<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::run_migrations(&pool).await.unwrap();
    Arc::new(pool)
}

/// A disk store rooted in a fresh temp dir, with [`BUCKET`] created.
/// Keep the returned `TempDir` alive for the duration of the test.
pub async fn disk_store() -> (DiskObjectStore, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = DiskObjectStore::new(memory_pool().await, dir.path());
    store.create_bucket(BUCKET, "local").await.unwrap();
    (store, dir)
}

pub async fn index_store() -> IndexStore {
    IndexStore::new(memory_pool().await)
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 30, 30])));
    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .unwrap();
    buffer
}
