//! Reconciler: converges the index to the bucket.
//!
//! A run lists the whole bucket, diffs it against the index, enriches new and
//! refreshed records (thumbnails, dimensions), then applies every mutation in
//! a single transaction. Per-key enrichment failures are recorded in the
//! stats and never abort the run; listing and index failures do, and leave
//! the index untouched.
//!
//! Enrichment is bounded twice: at most `max_enrichments` keys per run, and
//! only within the first three quarters of the run deadline. Keys past either
//! bound are still indexed, with null thumbnail and dimensions, and are
//! picked up again by the next run.

use chrono::Utc;
use futures::TryStreamExt;
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{FailureStage, SyncError, SyncPlan, SyncStats};
use crate::{
    index::{IndexBatch, IndexStore},
    models::{image::ObjectRecord, object::ObjectMeta},
    naming,
    store::{ObjectStoreClient, list_all},
    thumbnail::{ThumbnailService, derive::decode_dimensions},
};

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Derive thumbnails for image keys that have none recorded.
    pub derive_thumbnails: bool,
    /// Read width/height for image records that lack them.
    pub extract_dimensions: bool,
    /// Overall deadline for one run. On expiry nothing is committed.
    pub timeout: Option<Duration>,
    /// Most keys enriched in one run; `None` is unbounded.
    pub max_enrichments: Option<usize>,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            derive_thumbnails: true,
            extract_dimensions: true,
            timeout: Some(Duration::from_secs(120)),
            max_enrichments: Some(500),
        }
    }
}

/// Remaining enrichment allowance of one run.
struct EnrichBudget {
    remaining: Option<usize>,
    /// Enrichment must be finished by this instant so the commit still fits
    /// in the run deadline.
    window_end: Option<Instant>,
}

impl EnrichBudget {
    fn new(options: &ReconcileOptions, started: Instant) -> Self {
        Self {
            remaining: options.max_enrichments,
            window_end: options.timeout.map(|limit| started + limit * 3 / 4),
        }
    }

    /// Take one slot; false once the count or the window is spent.
    fn claim(&mut self) -> bool {
        if self.window_end.is_some_and(|end| Instant::now() >= end) {
            return false;
        }
        match &mut self.remaining {
            Some(0) => false,
            Some(left) => {
                *left -= 1;
                true
            }
            None => true,
        }
    }
}

/// Not self-serialising: callers must not run two `run`s concurrently against
/// the same index (see [`super::SyncRunner`]).
pub struct Reconciler {
    store: Arc<dyn ObjectStoreClient>,
    index: IndexStore,
    thumbnails: ThumbnailService,
    bucket: String,
    endpoint: String,
    options: ReconcileOptions,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ObjectStoreClient>,
        index: IndexStore,
        thumbnails: ThumbnailService,
        bucket: impl Into<String>,
        endpoint: impl Into<String>,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            store,
            index,
            thumbnails,
            bucket: bucket.into(),
            endpoint: endpoint.into(),
            options,
        }
    }

    pub async fn run(&self) -> Result<SyncStats, SyncError> {
        let mut budget = EnrichBudget::new(&self.options, Instant::now());
        match self.options.timeout {
            Some(limit) => tokio::time::timeout(limit, self.run_unbounded(&mut budget))
                .await
                .map_err(|_| SyncError::Timeout(limit))?,
            None => self.run_unbounded(&mut budget).await,
        }
    }

    async fn run_unbounded(&self, budget: &mut EnrichBudget) -> Result<SyncStats, SyncError> {
        let mut stats = SyncStats::new(Utc::now());

        let listing: Vec<ObjectMeta> = list_all(self.store.as_ref(), &self.bucket)
            .try_collect()
            .await
            .map_err(SyncError::Listing)?;
        let indexed = self.index.all_records().await?;
        let listed = listing.len();

        let plan = SyncPlan::compute(listing, indexed);
        info!(
            bucket = %self.bucket,
            listed,
            inserts = plan.to_insert.len(),
            updates = plan.to_update.len(),
            deletes = plan.to_delete.len(),
            "sync plan computed"
        );
        if plan.is_empty() {
            debug!("bucket is empty and so is the index");
        }

        let now = Utc::now();
        let mut batch = IndexBatch::default();

        for entry in plan.to_insert {
            let is_image = naming::is_image(&entry.key, entry.content_type.as_deref());
            let mut record = ObjectRecord {
                url: naming::object_url(&self.endpoint, &entry.key),
                key: entry.key,
                size: entry.size_bytes,
                last_modified: entry.last_modified,
                width: None,
                height: None,
                thumbnail_ref: None,
                created_at: now,
                updated_at: now,
            };
            if is_image {
                self.enrich_within(&mut record, budget, &mut stats).await;
            }
            batch.upserts.push(record);
            stats.inserted += 1;
        }

        // Full refresh: size/last_modified/updated_at are rewritten even when
        // unchanged.
        for (entry, existing) in plan.to_update {
            let is_image = naming::is_image(&entry.key, entry.content_type.as_deref());
            let mut record = ObjectRecord {
                url: naming::object_url(&self.endpoint, &entry.key),
                size: entry.size_bytes,
                last_modified: entry.last_modified,
                updated_at: now,
                ..existing
            };
            if is_image {
                self.enrich_within(&mut record, budget, &mut stats).await;
            }
            batch.upserts.push(record);
            stats.updated += 1;
        }

        stats.deleted = plan.to_delete.len();
        batch.deletes = plan.to_delete;

        self.index.apply_batch(&batch).await?;

        stats.finished_at = Utc::now();
        info!(
            inserted = stats.inserted,
            updated = stats.updated,
            deleted = stats.deleted,
            derived = stats.derived,
            dimensions = stats.dimensions_extracted,
            deferred = stats.deferred,
            failed = stats.failed,
            "sync complete"
        );
        Ok(stats)
    }

    fn needs_thumbnail(&self, record: &ObjectRecord) -> bool {
        self.options.derive_thumbnails && record.thumbnail_ref.is_none()
    }

    fn needs_dimensions(&self, record: &ObjectRecord) -> bool {
        self.options.extract_dimensions && record.dimensions().is_none()
    }

    /// Enrich `record` if it is missing anything and the budget allows;
    /// otherwise leave it for the next run.
    async fn enrich_within(
        &self,
        record: &mut ObjectRecord,
        budget: &mut EnrichBudget,
        stats: &mut SyncStats,
    ) {
        if !self.needs_thumbnail(record) && !self.needs_dimensions(record) {
            return;
        }
        if !budget.claim() {
            debug!(key = %record.key, "enrichment deferred to a later run");
            stats.deferred += 1;
            return;
        }
        let Some(end) = budget.window_end else {
            self.enrich(record, stats).await;
            return;
        };
        if tokio::time::timeout_at(end, self.enrich(record, stats))
            .await
            .is_err()
        {
            warn!(key = %record.key, "enrichment window closed mid-key; deferred");
            stats.deferred += 1;
        }
    }

    async fn enrich(&self, record: &mut ObjectRecord, stats: &mut SyncStats) {
        if self.needs_thumbnail(record) {
            match self.thumbnails.ensure(&record.key, false).await {
                Ok(outcome) => {
                    if outcome.was_derived() {
                        stats.derived += 1;
                    }
                    record.thumbnail_ref = Some(outcome.into_key());
                }
                Err(err) => {
                    warn!(key = %record.key, error = %err, "thumbnail derivation failed");
                    stats.record_failure(&record.key, FailureStage::Thumbnail, err);
                }
            }
        }

        if self.needs_dimensions(record) {
            match self.read_dimensions(&record.key).await {
                Ok((width, height)) => {
                    debug!(key = %record.key, width, height, "dimensions extracted");
                    record.width = Some(i64::from(width));
                    record.height = Some(i64::from(height));
                    stats.dimensions_extracted += 1;
                }
                Err(reason) => {
                    warn!(key = %record.key, error = %reason, "dimension extraction failed");
                    stats.record_failure(&record.key, FailureStage::Dimensions, reason);
                }
            }
        }
    }

    async fn read_dimensions(&self, key: &str) -> Result<(u32, u32), String> {
        let body = self
            .store
            .get(&self.bucket, key)
            .await
            .map_err(|err| err.to_string())?;
        tokio::task::spawn_blocking(move || decode_dimensions(&body))
            .await
            .map_err(|err| err.to_string())?
            .map_err(|err| err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        index::IndexError,
        store::{
            ListPage, StoreError, StoreResult,
            disk::DiskObjectStore,
            mock::{MockStore, meta},
        },
        testutil::{self, BUCKET, ENDPOINT},
        thumbnail::ThumbnailOptions,
    };
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::HashSet;

    fn reconciler(
        store: Arc<dyn ObjectStoreClient>,
        index: IndexStore,
        options: ReconcileOptions,
    ) -> Reconciler {
        let thumbnails = ThumbnailService::new(store.clone(), BUCKET, ThumbnailOptions::default());
        Reconciler::new(store, index, thumbnails, BUCKET, ENDPOINT, options)
    }

    async fn put_png(store: &dyn ObjectStoreClient, key: &str, width: u32, height: u32) {
        store
            .put(BUCKET, key, Bytes::from(testutil::png_bytes(width, height)), "image/png")
            .await
            .unwrap();
    }

    fn key_set(keys: &[&str]) -> HashSet<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[tokio::test]
    async fn test_empty_index_gets_two_inserts_with_thumbnail_attempts() {
        let mut store = MockStore::new();
        store.expect_list_page().times(1).returning(|_, _| {
            Ok(ListPage {
                entries: vec![meta("a.jpg", 500), meta("b.png", 1200)],
                next_token: None,
            })
        });
        store
            .expect_head()
            .withf(|_, key| key.starts_with("thumb_"))
            .times(2)
            .returning(|_, _| Ok(None));
        store
            .expect_get()
            .times(2)
            .returning(|_, _| Ok(Bytes::from(testutil::png_bytes(400, 400))));
        store
            .expect_put()
            .times(2)
            .returning(|_, key, body, _| Ok(meta(key, body.len() as i64)));

        let index = testutil::index_store().await;
        let options = ReconcileOptions {
            extract_dimensions: false,
            ..ReconcileOptions::default()
        };
        let stats = reconciler(Arc::new(store), index.clone(), options)
            .run()
            .await
            .unwrap();

        assert_eq!((stats.inserted, stats.updated, stats.deleted), (2, 0, 0));
        assert_eq!(stats.derived, 2);
        assert_eq!(stats.failed, 0);

        let a = index.get("a.jpg").await.unwrap().unwrap();
        assert_eq!(a.size, 500);
        assert_eq!(a.url, format!("https://{ENDPOINT}/a.jpg"));
        assert_eq!(a.thumbnail_ref.as_deref(), Some("thumb_a.jpg"));
        let b = index.get("b.png").await.unwrap().unwrap();
        assert_eq!(b.size, 1200);
    }

    #[tokio::test]
    async fn test_removed_object_is_deleted_from_index() {
        let (store, _dir) = testutil::disk_store().await;
        let store: Arc<dyn ObjectStoreClient> = Arc::new(store);
        put_png(store.as_ref(), "a.jpg", 10, 10).await;
        put_png(store.as_ref(), "b.png", 10, 10).await;
        let index = testutil::index_store().await;
        let sync = reconciler(store.clone(), index.clone(), ReconcileOptions::default());

        sync.run().await.unwrap();
        store.delete(BUCKET, "b.png").await.unwrap();
        let stats = sync.run().await.unwrap();

        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.inserted, 0);
        assert_eq!(index.all_keys().await.unwrap(), key_set(&["a.jpg"]));
    }

    #[tokio::test]
    async fn test_index_converges_to_bucket_minus_thumbnails() {
        let (store, _dir) = testutil::disk_store().await;
        let store: Arc<dyn ObjectStoreClient> = Arc::new(store);
        put_png(store.as_ref(), "a.jpg", 10, 10).await;
        put_png(store.as_ref(), "thumb_old.jpg", 10, 10).await;
        store
            .put(BUCKET, "notes.txt", Bytes::from_static(b"hello"), "text/plain")
            .await
            .unwrap();

        let index = testutil::index_store().await;
        let now = Utc::now();
        index
            .upsert(&ObjectRecord {
                key: "stale.png".into(),
                size: 1,
                last_modified: now,
                url: "https://old/stale.png".into(),
                width: None,
                height: None,
                thumbnail_ref: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        let stats = reconciler(store.clone(), index.clone(), ReconcileOptions::default())
            .run()
            .await
            .unwrap();

        assert_eq!(stats.deleted, 1);
        assert_eq!(index.all_keys().await.unwrap(), key_set(&["a.jpg", "notes.txt"]));
        let notes = index.get("notes.txt").await.unwrap().unwrap();
        assert!(notes.thumbnail_ref.is_none());
        assert!(notes.dimensions().is_none());
    }

    #[tokio::test]
    async fn test_second_run_is_a_full_refresh_with_same_state() {
        let (store, _dir) = testutil::disk_store().await;
        let store: Arc<dyn ObjectStoreClient> = Arc::new(store);
        put_png(store.as_ref(), "a.jpg", 600, 300).await;
        put_png(store.as_ref(), "b.png", 20, 40).await;
        let index = testutil::index_store().await;
        let sync = reconciler(store.clone(), index.clone(), ReconcileOptions::default());

        let first = sync.run().await.unwrap();
        assert_eq!((first.inserted, first.derived, first.dimensions_extracted), (2, 2, 2));
        let before = index.all_records().await.unwrap();

        let second = sync.run().await.unwrap();
        assert_eq!((second.inserted, second.updated, second.deleted), (0, 2, 0));
        assert_eq!((second.derived, second.dimensions_extracted), (0, 0));
        let after = index.all_records().await.unwrap();

        let strip = |records: Vec<ObjectRecord>| {
            let mut rows: Vec<_> = records
                .into_iter()
                .map(|r| (r.key, r.size, r.last_modified, r.url, r.width, r.height, r.thumbnail_ref))
                .collect();
            rows.sort();
            rows
        };
        assert_eq!(strip(before), strip(after));
    }

    #[tokio::test]
    async fn test_corrupt_object_does_not_abort_the_run() {
        let (store, _dir) = testutil::disk_store().await;
        let store: Arc<dyn ObjectStoreClient> = Arc::new(store);
        for key in ["a.jpg", "b.jpg", "c.png"] {
            put_png(store.as_ref(), key, 32, 32).await;
        }
        store
            .put(BUCKET, "broken.jpg", Bytes::from_static(b"\xff\xd8 truncated"), "image/jpeg")
            .await
            .unwrap();
        let index = testutil::index_store().await;

        let stats = reconciler(store.clone(), index.clone(), ReconcileOptions::default())
            .run()
            .await
            .unwrap();

        assert_eq!(stats.inserted, 4);
        assert_eq!(stats.derived, 3);
        assert_eq!(stats.failed, 1);
        let stages: Vec<FailureStage> = stats.failures.iter().map(|f| f.stage).collect();
        assert_eq!(stages, vec![FailureStage::Thumbnail, FailureStage::Dimensions]);
        assert!(stats.failures.iter().all(|f| f.key == "broken.jpg"));

        let broken = index.get("broken.jpg").await.unwrap().unwrap();
        assert!(broken.thumbnail_ref.is_none());
        assert!(broken.dimensions().is_none());
        for key in ["a.jpg", "b.jpg", "c.png"] {
            let record = index.get(key).await.unwrap().unwrap();
            assert_eq!(record.thumbnail_ref, Some(format!("thumb_{key}")));
            assert_eq!(record.dimensions(), Some((32, 32)));
        }
    }

    #[tokio::test]
    async fn test_existing_thumbnail_is_linked_not_rederived() {
        let (store, _dir) = testutil::disk_store().await;
        let store: Arc<dyn ObjectStoreClient> = Arc::new(store);
        put_png(store.as_ref(), "a.jpg", 64, 64).await;
        store
            .put(BUCKET, "thumb_a.jpg", Bytes::from_static(b"prebuilt"), "image/jpeg")
            .await
            .unwrap();
        let index = testutil::index_store().await;

        let stats = reconciler(store.clone(), index.clone(), ReconcileOptions::default())
            .run()
            .await
            .unwrap();

        assert_eq!(stats.derived, 0);
        let record = index.get("a.jpg").await.unwrap().unwrap();
        assert_eq!(record.thumbnail_ref.as_deref(), Some("thumb_a.jpg"));
        assert_eq!(&store.get(BUCKET, "thumb_a.jpg").await.unwrap()[..], b"prebuilt");
    }

    #[tokio::test]
    async fn test_capability_flags_disable_enrichment() {
        let (store, _dir) = testutil::disk_store().await;
        let store: Arc<dyn ObjectStoreClient> = Arc::new(store);
        put_png(store.as_ref(), "a.jpg", 64, 64).await;
        let index = testutil::index_store().await;
        let options = ReconcileOptions {
            derive_thumbnails: false,
            extract_dimensions: false,
            timeout: None,
            max_enrichments: None,
        };

        let stats = reconciler(store.clone(), index.clone(), options).run().await.unwrap();

        assert_eq!(stats.inserted, 1);
        let record = index.get("a.jpg").await.unwrap().unwrap();
        assert!(record.thumbnail_ref.is_none());
        assert!(record.dimensions().is_none());
        assert!(store.head(BUCKET, "thumb_a.jpg").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_content_type_marks_extensionless_key_as_image() {
        let (store, _dir) = testutil::disk_store().await;
        let store: Arc<dyn ObjectStoreClient> = Arc::new(store);
        put_png(store.as_ref(), "scan-001", 90, 45).await;
        store
            .put(BUCKET, "readme", Bytes::from_static(b"plain"), "text/plain")
            .await
            .unwrap();
        let index = testutil::index_store().await;

        let stats = reconciler(store.clone(), index.clone(), ReconcileOptions::default())
            .run()
            .await
            .unwrap();

        assert_eq!((stats.inserted, stats.derived, stats.dimensions_extracted), (2, 1, 1));
        let scan = index.get("scan-001").await.unwrap().unwrap();
        assert_eq!(scan.thumbnail_ref.as_deref(), Some("thumb_scan-001"));
        assert_eq!(scan.dimensions(), Some((90, 45)));
        let readme = index.get("readme").await.unwrap().unwrap();
        assert!(readme.thumbnail_ref.is_none());
    }

    #[tokio::test]
    async fn test_enrichment_budget_spreads_backfill_across_runs() {
        let (store, _dir) = testutil::disk_store().await;
        let store: Arc<dyn ObjectStoreClient> = Arc::new(store);
        for key in ["a.jpg", "b.jpg", "c.jpg"] {
            put_png(store.as_ref(), key, 16, 16).await;
        }
        let index = testutil::index_store().await;
        let options = ReconcileOptions {
            max_enrichments: Some(2),
            ..ReconcileOptions::default()
        };
        let sync = reconciler(store.clone(), index.clone(), options);

        let first = sync.run().await.unwrap();
        assert_eq!((first.inserted, first.derived, first.deferred), (3, 2, 1));
        assert_eq!(index.all_keys().await.unwrap(), key_set(&["a.jpg", "b.jpg", "c.jpg"]));
        let c = index.get("c.jpg").await.unwrap().unwrap();
        assert!(c.thumbnail_ref.is_none() && c.dimensions().is_none());

        // Complete records cost nothing, so the leftover key gets a slot.
        let second = sync.run().await.unwrap();
        assert_eq!((second.updated, second.derived, second.deferred), (3, 1, 0));
        let c = index.get("c.jpg").await.unwrap().unwrap();
        assert_eq!(c.thumbnail_ref.as_deref(), Some("thumb_c.jpg"));
        assert_eq!(c.dimensions(), Some((16, 16)));
    }

    /// Disk store whose object reads hang, as a slow remote would.
    struct SlowReads(DiskObjectStore);

    #[async_trait]
    impl ObjectStoreClient for SlowReads {
        async fn list_page(&self, bucket: &str, token: Option<String>) -> StoreResult<ListPage> {
            self.0.list_page(bucket, token).await
        }
        async fn get(&self, bucket: &str, key: &str) -> StoreResult<Bytes> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            self.0.get(bucket, key).await
        }
        async fn head(&self, bucket: &str, key: &str) -> StoreResult<Option<ObjectMeta>> {
            self.0.head(bucket, key).await
        }
        async fn put(&self, bucket: &str, key: &str, body: Bytes, ct: &str) -> StoreResult<ObjectMeta> {
            self.0.put(bucket, key, body, ct).await
        }
        async fn delete(&self, bucket: &str, key: &str) -> StoreResult<bool> {
            self.0.delete(bucket, key).await
        }
    }

    #[tokio::test]
    async fn test_slow_enrichment_still_commits_keys_before_deadline() {
        let (disk, _dir) = testutil::disk_store().await;
        for key in ["a.jpg", "b.png"] {
            put_png(&disk, key, 8, 8).await;
        }
        let store: Arc<dyn ObjectStoreClient> = Arc::new(SlowReads(disk));
        let index = testutil::index_store().await;
        let options = ReconcileOptions {
            timeout: Some(Duration::from_millis(800)),
            ..ReconcileOptions::default()
        };

        let stats = reconciler(store, index.clone(), options).run().await.unwrap();

        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.deferred, 2);
        assert_eq!(index.all_keys().await.unwrap(), key_set(&["a.jpg", "b.png"]));
        let a = index.get("a.jpg").await.unwrap().unwrap();
        assert!(a.thumbnail_ref.is_none() && a.dimensions().is_none());
    }

    #[tokio::test]
    async fn test_listing_across_many_pages_is_exhausted() {
        let (store, _dir) = testutil::disk_store().await;
        let store: Arc<dyn ObjectStoreClient> = Arc::new(store.with_page_size(2));
        let keys: Vec<String> = (0..7).map(|i| format!("doc-{i}.txt")).collect();
        for key in &keys {
            store
                .put(BUCKET, key, Bytes::from_static(b"x"), "text/plain")
                .await
                .unwrap();
        }
        let index = testutil::index_store().await;

        let stats = reconciler(store, index.clone(), ReconcileOptions::default())
            .run()
            .await
            .unwrap();

        assert_eq!(stats.inserted, 7);
        let expected: HashSet<String> = keys.into_iter().collect();
        assert_eq!(index.all_keys().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_listing_failure_aborts_without_touching_index() {
        let mut store = MockStore::new();
        store.expect_list_page().returning(|_, token| match token {
            None => Ok(ListPage {
                entries: vec![meta("a.jpg", 1)],
                next_token: Some("p2".into()),
            }),
            Some(_) => Err(StoreError::Transport("bucket unreachable".into())),
        });
        let index = testutil::index_store().await;
        let now = Utc::now();
        let existing = ObjectRecord {
            key: "old.jpg".into(),
            size: 1,
            last_modified: now,
            url: "https://x/old.jpg".into(),
            width: None,
            height: None,
            thumbnail_ref: None,
            created_at: now,
            updated_at: now,
        };
        index.upsert(&existing).await.unwrap();

        let err = reconciler(Arc::new(store), index.clone(), ReconcileOptions::default())
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Listing(StoreError::Transport(_))));
        assert_eq!(index.all_keys().await.unwrap(), key_set(&["old.jpg"]));
    }

    #[tokio::test]
    async fn test_index_failure_rolls_back_whole_batch() {
        let (store, _dir) = testutil::disk_store().await;
        let store: Arc<dyn ObjectStoreClient> = Arc::new(store);
        put_png(store.as_ref(), "a.jpg", 8, 8).await;
        let index = testutil::index_store().await;
        let now = Utc::now();
        index
            .upsert(&ObjectRecord {
                key: "gone.jpg".into(),
                size: 1,
                last_modified: now,
                url: "https://x/gone.jpg".into(),
                width: None,
                height: None,
                thumbnail_ref: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        sqlx::query("DROP TABLE images")
            .execute(index.pool())
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE images (key TEXT PRIMARY KEY, size INTEGER NOT NULL CHECK (size < 0),
             last_modified TEXT NOT NULL, url TEXT NOT NULL, width INTEGER, height INTEGER,
             thumbnail_ref TEXT, created_at TEXT NOT NULL, updated_at TEXT NOT NULL)",
        )
        .execute(index.pool())
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO images VALUES ('gone.jpg', -1, '2024-01-01T00:00:00Z', 'u', NULL, NULL, NULL,
             '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
        )
        .execute(index.pool())
        .await
        .unwrap();

        let err = reconciler(store, index.clone(), ReconcileOptions::default())
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Index(IndexError::Constraint(_))));
        assert_eq!(index.all_keys().await.unwrap(), key_set(&["gone.jpg"]));
    }

    /// Listing that never finishes in time.
    struct StalledStore;

    #[async_trait]
    impl ObjectStoreClient for StalledStore {
        async fn list_page(&self, _: &str, _: Option<String>) -> StoreResult<ListPage> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ListPage::default())
        }
        async fn get(&self, _: &str, _: &str) -> StoreResult<Bytes> {
            unreachable!()
        }
        async fn head(&self, _: &str, _: &str) -> StoreResult<Option<ObjectMeta>> {
            unreachable!()
        }
        async fn put(&self, _: &str, _: &str, _: Bytes, _: &str) -> StoreResult<ObjectMeta> {
            unreachable!()
        }
        async fn delete(&self, _: &str, _: &str) -> StoreResult<bool> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn test_deadline_discards_the_run() {
        let index = testutil::index_store().await;
        let options = ReconcileOptions {
            timeout: Some(Duration::from_millis(20)),
            ..ReconcileOptions::default()
        };

        let err = reconciler(Arc::new(StalledStore), index.clone(), options)
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Timeout(_)));
        assert!(index.all_keys().await.unwrap().is_empty());
    }
}
