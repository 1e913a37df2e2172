use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

use crate::{
    store::{retry::RetryPolicy, s3::S3Settings},
    sync::ReconcileOptions,
    thumbnail::ThumbnailOptions,
};

const ENV_PREFIX: &str = "BUCKET_INDEX_";

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub bucket: String,
    /// Public host objects are served from; URLs are `https://{endpoint}/{key}`.
    pub bucket_endpoint: String,
    pub sync_interval_secs: u64,
    pub sync_timeout_secs: u64,
    pub thumbnail_max_width: u32,
    pub thumbnail_max_height: u32,
    pub thumbnail_quality: u8,
    pub default_page_size: u32,
    pub thumbnail_on_upload: bool,
    pub extract_dimensions: bool,
    /// Keys enriched per sync run; 0 means no cap.
    pub sync_max_enrichments: usize,
    pub store_max_attempts: u32,
    /// Entries per listing page requested from the store.
    pub store_page_size: usize,
    pub store_backend: StoreBackend,
    /// Used when `store_backend` is `s3`.
    pub s3: S3Settings,
    /// Browser origins allowed to call the API; `*` allows any.
    pub cors_origins: Vec<String>,
}

/// Where object payloads live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Local files under `storage_dir`, metadata in SQLite.
    Disk,
    /// An S3-compatible bucket (AWS S3, Cloudflare R2, MinIO).
    S3,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "disk" => Ok(StoreBackend::Disk),
            "s3" | "r2" => Ok(StoreBackend::S3),
            other => anyhow::bail!("unknown store backend `{other}` (expected `disk` or `s3`)"),
        }
    }
}

/// Run mode selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Serve,
    Migrate,
    SyncOnce,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Bucket-backed image index service")]
pub struct Args {
    /// Host to bind to (overrides BUCKET_INDEX_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides BUCKET_INDEX_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where object payloads are stored (overrides BUCKET_INDEX_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides BUCKET_INDEX_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Bucket to index (overrides BUCKET_INDEX_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Public endpoint host for object URLs (overrides BUCKET_INDEX_BUCKET_ENDPOINT)
    #[arg(long)]
    pub bucket_endpoint: Option<String>,

    /// Seconds between scheduled syncs (overrides BUCKET_INDEX_SYNC_INTERVAL_SECS)
    #[arg(long)]
    pub sync_interval_secs: Option<u64>,

    /// Deadline for one sync run (overrides BUCKET_INDEX_SYNC_TIMEOUT_SECS)
    #[arg(long)]
    pub sync_timeout_secs: Option<u64>,

    #[arg(long)]
    pub thumbnail_max_width: Option<u32>,

    #[arg(long)]
    pub thumbnail_max_height: Option<u32>,

    /// JPEG quality, 1-100
    #[arg(long)]
    pub thumbnail_quality: Option<u8>,

    /// Page size used when a list request does not give one
    #[arg(long)]
    pub default_page_size: Option<u32>,

    /// Derive the thumbnail during upload instead of at the next sync
    #[arg(long)]
    pub thumbnail_on_upload: Option<bool>,

    /// Backfill width/height during sync
    #[arg(long)]
    pub extract_dimensions: Option<bool>,

    /// Keys enriched per sync run, 0 for no cap (overrides BUCKET_INDEX_SYNC_MAX_ENRICHMENTS)
    #[arg(long)]
    pub sync_max_enrichments: Option<usize>,

    /// Attempts per store call, including the first
    #[arg(long)]
    pub store_max_attempts: Option<u32>,

    /// Listing page size, 1-1000
    #[arg(long)]
    pub store_page_size: Option<usize>,

    /// `disk` or `s3` (overrides BUCKET_INDEX_STORE_BACKEND)
    #[arg(long)]
    pub store_backend: Option<String>,

    /// S3-compatible endpoint URL, e.g. https://{account}.r2.cloudflarestorage.com
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// Signing region; R2 uses `auto`
    #[arg(long)]
    pub s3_region: Option<String>,

    #[arg(long)]
    pub s3_path_style: Option<bool>,

    /// Comma-separated allowed CORS origins (overrides BUCKET_INDEX_CORS_ORIGINS)
    #[arg(long, value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    /// Run migrations and exit
    #[arg(long, conflicts_with = "sync_once")]
    pub migrate: bool,

    /// Run one sync, print its stats as JSON and exit
    #[arg(long)]
    pub sync_once: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and run mode.
    pub fn from_env_and_args() -> Result<(Self, Mode)> {
        Self::merge(Args::parse(), |name| env::var(name).ok())
    }

    fn merge(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<(Self, Mode)> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let store_page_size = pick(args.store_page_size, &var, "STORE_PAGE_SIZE", 1000)?;

        let cfg = Self {
            host: args
                .host
                .or_else(|| var("HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: pick(args.port, &var, "PORT", 3000)?,
            storage_dir: args
                .storage_dir
                .or_else(|| var("STORAGE_DIR"))
                .unwrap_or_else(|| "./data/objects".into()),
            database_url: args
                .database_url
                .or_else(|| var("DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/bucket_index.db".into()),
            bucket: args
                .bucket
                .or_else(|| var("BUCKET"))
                .unwrap_or_else(|| "images".into()),
            bucket_endpoint: args
                .bucket_endpoint
                .or_else(|| var("BUCKET_ENDPOINT"))
                .unwrap_or_else(|| "localhost:3000".into()),
            sync_interval_secs: pick(args.sync_interval_secs, &var, "SYNC_INTERVAL_SECS", 300)?,
            sync_timeout_secs: pick(args.sync_timeout_secs, &var, "SYNC_TIMEOUT_SECS", 120)?,
            thumbnail_max_width: pick(args.thumbnail_max_width, &var, "THUMBNAIL_MAX_WIDTH", 300)?,
            thumbnail_max_height: pick(
                args.thumbnail_max_height,
                &var,
                "THUMBNAIL_MAX_HEIGHT",
                300,
            )?,
            thumbnail_quality: pick(args.thumbnail_quality, &var, "THUMBNAIL_QUALITY", 85)?,
            default_page_size: pick(args.default_page_size, &var, "DEFAULT_PAGE_SIZE", 10)?,
            thumbnail_on_upload: pick(
                args.thumbnail_on_upload,
                &var,
                "THUMBNAIL_ON_UPLOAD",
                true,
            )?,
            extract_dimensions: pick(args.extract_dimensions, &var, "EXTRACT_DIMENSIONS", true)?,
            sync_max_enrichments: pick(
                args.sync_max_enrichments,
                &var,
                "SYNC_MAX_ENRICHMENTS",
                500,
            )?,
            store_max_attempts: pick(args.store_max_attempts, &var, "STORE_MAX_ATTEMPTS", 3)?,
            store_page_size,
            store_backend: match args.store_backend.or_else(|| var("STORE_BACKEND")) {
                Some(raw) => raw.trim().parse()?,
                None => StoreBackend::Disk,
            },
            s3: S3Settings {
                endpoint: args.s3_endpoint.or_else(|| var("S3_ENDPOINT")),
                region: args
                    .s3_region
                    .or_else(|| var("S3_REGION"))
                    .unwrap_or_else(|| "auto".into()),
                // Secrets come from the environment only.
                access_key_id: var("S3_ACCESS_KEY_ID"),
                secret_access_key: var("S3_SECRET_ACCESS_KEY"),
                path_style: pick(args.s3_path_style, &var, "S3_PATH_STYLE", false)?,
                page_size: store_page_size,
            },
            cors_origins: args
                .cors_origins
                .or_else(|| var("CORS_ORIGINS").map(|raw| split_list(&raw)))
                .unwrap_or_else(|| vec!["http://localhost:5173".into()]),
        };
        cfg.validate()?;

        let mode = if args.migrate {
            Mode::Migrate
        } else if args.sync_once {
            Mode::SyncOnce
        } else {
            Mode::Serve
        };
        Ok((cfg, mode))
    }

    fn validate(&self) -> Result<()> {
        if self.bucket_endpoint.is_empty() {
            anyhow::bail!("bucket_endpoint must not be empty");
        }
        if !(1..=100).contains(&self.thumbnail_quality) {
            anyhow::bail!("thumbnail_quality must be 1-100, got {}", self.thumbnail_quality);
        }
        if self.thumbnail_max_width == 0 || self.thumbnail_max_height == 0 {
            anyhow::bail!("thumbnail bounds must be positive");
        }
        if !(1..=50).contains(&self.default_page_size) {
            anyhow::bail!("default_page_size must be 1-50, got {}", self.default_page_size);
        }
        if self.sync_interval_secs == 0 {
            anyhow::bail!("sync_interval_secs must be positive");
        }
        if !(1..=1000).contains(&self.store_page_size) {
            anyhow::bail!("store_page_size must be 1-1000, got {}", self.store_page_size);
        }
        if self.s3.access_key_id.is_some() != self.s3.secret_access_key.is_some() {
            anyhow::bail!("S3 access key id and secret access key must be set together");
        }
        if self.cors_origins.is_empty() {
            anyhow::bail!("cors_origins must name at least one origin");
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    /// `None` when the timeout is configured as 0.
    pub fn sync_timeout(&self) -> Option<Duration> {
        (self.sync_timeout_secs > 0).then(|| Duration::from_secs(self.sync_timeout_secs))
    }

    pub fn thumbnail_options(&self) -> ThumbnailOptions {
        ThumbnailOptions {
            max_width: self.thumbnail_max_width,
            max_height: self.thumbnail_max_height,
            quality: self.thumbnail_quality,
        }
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            derive_thumbnails: true,
            extract_dimensions: self.extract_dimensions,
            timeout: self.sync_timeout(),
            max_enrichments: (self.sync_max_enrichments > 0).then_some(self.sync_max_enrichments),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.store_max_attempts,
            ..RetryPolicy::default()
        }
    }
}

/// Comma-separated list, blanks dropped.
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// CLI value, else parsed environment value, else `default`.
fn pick<T>(
    cli: Option<T>,
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(value) = cli {
        return Ok(value);
    }
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {ENV_PREFIX}{name} value `{raw}`")),
        None => Ok(default),
    }
}
