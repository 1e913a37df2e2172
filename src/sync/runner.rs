//! Serialises reconciliation runs and drives the periodic schedule.

use std::{sync::Arc, time::Duration};
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, error, info};

use super::{Reconciler, SyncError, SyncStats};

/// At most one run is in flight per runner. A trigger that arrives while a
/// run is active fails fast with [`SyncError::AlreadyRunning`] instead of
/// queueing.
#[derive(Clone)]
pub struct SyncRunner {
    reconciler: Arc<Reconciler>,
    guard: Arc<Mutex<()>>,
}

impl SyncRunner {
    pub fn new(reconciler: Reconciler) -> Self {
        Self {
            reconciler: Arc::new(reconciler),
            guard: Arc::new(Mutex::new(())),
        }
    }

    pub async fn trigger(&self) -> Result<SyncStats, SyncError> {
        let _running = self
            .guard
            .try_lock()
            .map_err(|_| SyncError::AlreadyRunning)?;
        self.reconciler.run().await
    }

    /// Run a sync every `interval`, starting immediately. Ticks that fall
    /// inside a long run are delayed, not stacked.
    pub fn spawn_periodic(&self, interval: Duration) -> JoinHandle<()> {
        let runner = self.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match runner.trigger().await {
                    Ok(stats) => info!(
                        inserted = stats.inserted,
                        updated = stats.updated,
                        deleted = stats.deleted,
                        failed = stats.failed,
                        "scheduled sync finished"
                    ),
                    Err(SyncError::AlreadyRunning) => {
                        debug!("scheduled sync skipped, another run in progress")
                    }
                    Err(err) => error!(error = %err, "scheduled sync failed"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::object::ObjectMeta,
        store::{ListPage, ObjectStoreClient, StoreResult, mock::MockStore},
        sync::ReconcileOptions,
        testutil::{self, BUCKET, ENDPOINT},
        thumbnail::{ThumbnailOptions, ThumbnailService},
    };
    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::sync::Notify;

    async fn runner_with(store: Arc<dyn ObjectStoreClient>) -> SyncRunner {
        let thumbnails = ThumbnailService::new(store.clone(), BUCKET, ThumbnailOptions::default());
        let reconciler = Reconciler::new(
            store,
            testutil::index_store().await,
            thumbnails,
            BUCKET,
            ENDPOINT,
            ReconcileOptions::default(),
        );
        SyncRunner::new(reconciler)
    }

    /// Empty bucket whose listing blocks until `release` is notified.
    struct GatedStore {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl ObjectStoreClient for GatedStore {
        async fn list_page(&self, _: &str, _: Option<String>) -> StoreResult<ListPage> {
            self.entered.notify_one();
            self.release.notified().await;
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
    async fn test_concurrent_trigger_is_rejected() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let store = GatedStore {
            entered: entered.clone(),
            release: release.clone(),
        };
        let runner = runner_with(Arc::new(store)).await;

        let first = tokio::spawn({
            let runner = runner.clone();
            async move { runner.trigger().await }
        });
        entered.notified().await;

        assert!(matches!(runner.trigger().await, Err(SyncError::AlreadyRunning)));

        release.notify_one();
        let stats = first.await.unwrap().unwrap();
        assert_eq!(stats.inserted, 0);
    }

    #[tokio::test]
    async fn test_sequential_triggers_both_run() {
        let mut store = MockStore::new();
        store
            .expect_list_page()
            .times(2)
            .returning(|_, _| Ok(ListPage::default()));
        let runner = runner_with(Arc::new(store)).await;

        runner.trigger().await.unwrap();
        runner.trigger().await.unwrap();
    }
}
