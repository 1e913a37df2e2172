//! IndexStore: the queryable SQLite mirror of the bucket (`images` table).

use chrono::Utc;
use sqlx::{Executor, SqlitePool, sqlite::Sqlite};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::models::image::ObjectRecord;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index constraint violated: {0}")]
    Constraint(String),
    #[error(transparent)]
    Sqlx(sqlx::Error),
}

impl From<sqlx::Error> for IndexError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err)
                if db_err.message().to_ascii_lowercase().contains("constraint") =>
            {
                IndexError::Constraint(db_err.message().to_string())
            }
            _ => IndexError::Sqlx(err),
        }
    }
}

pub type IndexResult<T> = Result<T, IndexError>;

/// Mutations to apply atomically. Upserts and deletes are expected to touch
/// disjoint keys.
#[derive(Debug, Default, Clone)]
pub struct IndexBatch {
    pub upserts: Vec<ObjectRecord>,
    pub deletes: Vec<String>,
}

impl IndexBatch {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }
}

const RECORD_COLUMNS: &str =
    "key, size, last_modified, url, width, height, thumbnail_ref, created_at, updated_at";

#[derive(Clone)]
pub struct IndexStore {
    db: Arc<SqlitePool>,
}

impl IndexStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    #[cfg(test)]
    pub async fn all_keys(&self) -> IndexResult<std::collections::HashSet<String>> {
        let keys: Vec<String> = sqlx::query_scalar("SELECT key FROM images")
            .fetch_all(&*self.db)
            .await?;
        Ok(keys.into_iter().collect())
    }

    pub async fn all_records(&self) -> IndexResult<Vec<ObjectRecord>> {
        let records = sqlx::query_as::<Sqlite, ObjectRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM images"
        ))
        .fetch_all(&*self.db)
        .await?;
        Ok(records)
    }

    #[cfg(test)]
    pub async fn get(&self, key: &str) -> IndexResult<Option<ObjectRecord>> {
        let record = sqlx::query_as::<Sqlite, ObjectRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM images WHERE key = ?"
        ))
        .bind(key)
        .fetch_optional(&*self.db)
        .await?;
        Ok(record)
    }

    /// Insert or replace a record. `created_at` of an existing row is kept.
    pub async fn upsert(&self, record: &ObjectRecord) -> IndexResult<()> {
        upsert_with(&*self.db, record).await
    }

    /// Returns whether a row was removed.
    pub async fn delete(&self, key: &str) -> IndexResult<bool> {
        delete_with(&*self.db, key).await
    }

    /// One page ordered newest first, plus the total number of records.
    pub async fn paginate(
        &self,
        offset: i64,
        limit: i64,
    ) -> IndexResult<(Vec<ObjectRecord>, i64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images")
            .fetch_one(&*self.db)
            .await?;
        let items = sqlx::query_as::<Sqlite, ObjectRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM images
             ORDER BY last_modified DESC, key ASC
             LIMIT ? OFFSET ?"
        ))
        .bind(limit.max(0))
        .bind(offset.max(0))
        .fetch_all(&*self.db)
        .await?;
        Ok((items, total))
    }

    /// Record the thumbnail key for an indexed object. Returns false if the
    /// key is not indexed.
    pub async fn set_thumbnail_ref(&self, key: &str, thumbnail_ref: &str) -> IndexResult<bool> {
        let result =
            sqlx::query("UPDATE images SET thumbnail_ref = ?, updated_at = ? WHERE key = ?")
                .bind(thumbnail_ref)
                .bind(Utc::now())
                .bind(key)
                .execute(&*self.db)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Apply every mutation in one transaction. On any failure nothing is
    /// committed.
    pub async fn apply_batch(&self, batch: &IndexBatch) -> IndexResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut tx = self.db.begin().await?;
        for record in &batch.upserts {
            upsert_with(&mut *tx, record).await?;
        }
        for key in &batch.deletes {
            delete_with(&mut *tx, key).await?;
        }
        tx.commit().await?;
        debug!(
            upserts = batch.upserts.len(),
            deletes = batch.deletes.len(),
            "index batch committed"
        );
        Ok(())
    }
}

async fn upsert_with<'e, E>(executor: E, record: &ObjectRecord) -> IndexResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO images (
            key, size, last_modified, url, width, height,
            thumbnail_ref, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(key) DO UPDATE SET
            size = excluded.size,
            last_modified = excluded.last_modified,
            url = excluded.url,
            width = excluded.width,
            height = excluded.height,
            thumbnail_ref = excluded.thumbnail_ref,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&record.key)
    .bind(record.size)
    .bind(record.last_modified)
    .bind(&record.url)
    .bind(record.width)
    .bind(record.height)
    .bind(&record.thumbnail_ref)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(executor)
    .await?;
    Ok(())
}

async fn delete_with<'e, E>(executor: E, key: &str) -> IndexResult<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM images WHERE key = ?")
        .bind(key)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}
