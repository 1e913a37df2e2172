//! S3-compatible backend (AWS S3, Cloudflare R2, MinIO).
//!
//! SDK retries are disabled; [`super::retry::RetryingStore`] owns the retry
//! policy for every backend. Service errors other than a missing key or
//! bucket surface as [`StoreError::Transport`].

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    Client,
    config::{Credentials, Region, http::HttpResponse, retry::RetryConfig},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::{ByteStream, DateTime as SmithyDateTime},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;
use tracing::debug;

use super::{ListPage, ObjectStoreClient, StoreError, StoreResult};
use crate::models::object::ObjectMeta;

/// Largest page S3 will return for one `ListObjectsV2` call.
pub const MAX_PAGE_SIZE: usize = 1000;

/// Connection settings for an S3-compatible endpoint.
#[derive(Clone)]
pub struct S3Settings {
    /// e.g. `https://{account}.r2.cloudflarestorage.com`; `None` for AWS.
    pub endpoint: Option<String>,
    pub region: String,
    /// Static credentials; when absent the default AWS provider chain is used.
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Address buckets as `{endpoint}/{bucket}` instead of `{bucket}.{endpoint}`.
    pub path_style: bool,
    pub page_size: usize,
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: "auto".into(),
            access_key_id: None,
            secret_access_key: None,
            path_style: false,
            page_size: MAX_PAGE_SIZE,
        }
    }
}

impl fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Settings")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("path_style", &self.path_style)
            .field("page_size", &self.page_size)
            .finish()
    }
}

#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    page_size: i32,
}

impl S3ObjectStore {
    pub async fn connect(settings: &S3Settings) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()));

        if let (Some(access_key_id), Some(secret_access_key)) =
            (&settings.access_key_id, &settings.secret_access_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key_id,
                secret_access_key,
                None,
                None,
                "bucket-index",
            ));
        }
        if let Some(endpoint) = &settings.endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        let shared = loader.load().await;
        let config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(settings.path_style)
            .retry_config(RetryConfig::disabled())
            .build();

        Self {
            client: Client::from_conf(config),
            page_size: settings.page_size.clamp(1, MAX_PAGE_SIZE) as i32,
        }
    }
}

/// `NoSuchBucket` keeps its meaning; anything else is a transport problem.
fn map_sdk_error<E, R>(bucket: &str, err: SdkError<E, R>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: fmt::Debug,
{
    if err.code() == Some("NoSuchBucket") {
        return StoreError::BucketNotFound(bucket.to_string());
    }
    StoreError::Transport(DisplayErrorContext(err).to_string())
}

fn is_not_found<E>(err: &SdkError<E, HttpResponse>) -> bool
where
    E: ProvideErrorMetadata,
{
    match err {
        SdkError::ServiceError(ctx) => {
            ctx.raw().status().as_u16() == 404 && err.code() != Some("NoSuchBucket")
        }
        _ => false,
    }
}

fn to_utc(at: Option<&SmithyDateTime>) -> DateTime<Utc> {
    at.and_then(|at| DateTime::from_timestamp(at.secs(), at.subsec_nanos()))
        .unwrap_or_else(Utc::now)
}

/// ETags come back quoted; the disk backend stores them bare.
fn bare_etag(etag: Option<&str>) -> Option<String> {
    etag.map(|tag| tag.trim_matches('"').to_string())
}

#[async_trait]
impl ObjectStoreClient for S3ObjectStore {
    async fn list_page(&self, bucket: &str, continuation: Option<String>) -> StoreResult<ListPage> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .max_keys(self.page_size)
            .set_continuation_token(continuation)
            .send()
            .await
            .map_err(|err| map_sdk_error(bucket, err))?;

        let entries: Vec<ObjectMeta> = output
            .contents()
            .iter()
            .filter_map(|obj| {
                Some(ObjectMeta {
                    key: obj.key()?.to_string(),
                    size_bytes: obj.size().unwrap_or(0),
                    content_type: None,
                    etag: bare_etag(obj.e_tag()),
                    last_modified: to_utc(obj.last_modified()),
                })
            })
            .collect();

        let next_token = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(str::to_string)
        } else {
            None
        };
        debug!(bucket, entries = entries.len(), more = next_token.is_some(), "listed page");
        Ok(ListPage {
            entries,
            next_token,
        })
    }

    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Bytes> {
        let output = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(output) => output,
            Err(err) if is_not_found(&err) => {
                return Err(StoreError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                });
            }
            Err(err) => return Err(map_sdk_error(bucket, err)),
        };
        let body = output
            .body
            .collect()
            .await
            .map_err(|err| StoreError::Transport(DisplayErrorContext(err).to_string()))?;
        Ok(body.into_bytes())
    }

    async fn head(&self, bucket: &str, key: &str) -> StoreResult<Option<ObjectMeta>> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(output) => Ok(Some(ObjectMeta {
                key: key.to_string(),
                size_bytes: output.content_length().unwrap_or(0),
                content_type: output.content_type().map(str::to_string),
                etag: bare_etag(output.e_tag()),
                last_modified: to_utc(output.last_modified()),
            })),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(map_sdk_error(bucket, err)),
        }
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> StoreResult<ObjectMeta> {
        let size_bytes = body.len() as i64;
        let output = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| map_sdk_error(bucket, err))?;

        Ok(ObjectMeta {
            key: key.to_string(),
            size_bytes,
            content_type: Some(content_type.to_string()),
            etag: bare_etag(output.e_tag()),
            last_modified: Utc::now(),
        })
    }

    /// S3 deletes are idempotent and do not report existence, so a HEAD
    /// decides the return value.
    async fn delete(&self, bucket: &str, key: &str) -> StoreResult<bool> {
        if self.head(bucket, key).await?.is_none() {
            return Ok(false);
        }
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| map_sdk_error(bucket, err))?;
        Ok(true)
    }
}
