//! Bounded retry with exponential backoff around any [`ObjectStoreClient`].

use async_trait::async_trait;
use bytes::Bytes;
use std::{future::Future, time::Duration};
use tracing::warn;

use super::{ListPage, ObjectStoreClient, StoreResult};
use crate::models::object::ObjectMeta;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first call. Never less than 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Retries transient failures (see [`super::StoreError::is_transient`]).
/// Not-found and validation errors are returned immediately.
pub struct RetryingStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: ObjectStoreClient> RetryingStore<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    async fn run<T, F, Fut>(&self, op: &'static str, key: &str, mut call: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = StoreResult<T>> + Send,
        T: Send,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        op,
                        key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient store failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[async_trait]
impl<S: ObjectStoreClient> ObjectStoreClient for RetryingStore<S> {
    async fn list_page(&self, bucket: &str, continuation: Option<String>) -> StoreResult<ListPage> {
        self.run("list", bucket, || {
            self.inner.list_page(bucket, continuation.clone())
        })
        .await
    }

    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Bytes> {
        self.run("get", key, || self.inner.get(bucket, key)).await
    }

    async fn head(&self, bucket: &str, key: &str) -> StoreResult<Option<ObjectMeta>> {
        self.run("head", key, || self.inner.head(bucket, key)).await
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> StoreResult<ObjectMeta> {
        self.run("put", key, || {
            self.inner.put(bucket, key, body.clone(), content_type)
        })
        .await
    }

    async fn delete(&self, bucket: &str, key: &str) -> StoreResult<bool> {
        self.run("delete", key, || self.inner.delete(bucket, key)).await
    }
}
