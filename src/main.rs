use anyhow::Result;
use axum::Router;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod errors;
mod handlers;
mod index;
mod ingest;
mod models;
mod naming;
mod routes;
mod state;
mod store;
mod sync;
#[cfg(test)]
mod testutil;
mod thumbnail;

use config::{Mode, StoreBackend};
use index::IndexStore;
use ingest::UploadIngestor;
use state::AppState;
use store::{ObjectStoreClient, disk::DiskObjectStore, retry::RetryingStore, s3::S3ObjectStore};
use sync::{Reconciler, SyncRunner};
use thumbnail::ThumbnailService;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + run mode ---
    let (cfg, mode) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting bucket-index with config: {:?}", cfg);

    // --- Initialize SQLite connection + schema ---
    let db = Arc::new(db::connect(&cfg.database_url).await?);
    db::run_migrations(&db).await?;
    if mode == Mode::Migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Object store ---
    let store: Arc<dyn ObjectStoreClient> = match cfg.store_backend {
        StoreBackend::Disk => {
            if !Path::new(&cfg.storage_dir).exists() {
                fs::create_dir_all(&cfg.storage_dir)?;
                tracing::info!("Created storage directory at {}", cfg.storage_dir);
            }
            let disk = DiskObjectStore::new(db.clone(), cfg.storage_dir.clone())
                .with_page_size(cfg.store_page_size);
            disk.ensure_bucket(&cfg.bucket, "auto").await?;
            Arc::new(RetryingStore::new(disk, cfg.retry_policy()))
        }
        StoreBackend::S3 => {
            let s3 = S3ObjectStore::connect(&cfg.s3).await;
            tracing::info!(
                "Using S3-compatible bucket `{}` at {}",
                cfg.bucket,
                cfg.s3.endpoint.as_deref().unwrap_or("the default AWS endpoint")
            );
            Arc::new(RetryingStore::new(s3, cfg.retry_policy()))
        }
    };

    // --- Core services ---
    let index = IndexStore::new(db.clone());
    let thumbnails = ThumbnailService::new(store.clone(), &cfg.bucket, cfg.thumbnail_options());
    let ingestor = UploadIngestor::new(
        store.clone(),
        index.clone(),
        cfg.thumbnail_on_upload.then(|| thumbnails.clone()),
        &cfg.bucket,
        &cfg.bucket_endpoint,
    );
    let reconciler = Reconciler::new(
        store.clone(),
        index.clone(),
        thumbnails.clone(),
        &cfg.bucket,
        &cfg.bucket_endpoint,
        cfg.reconcile_options(),
    );
    let runner = SyncRunner::new(reconciler);

    if mode == Mode::SyncOnce {
        let stats = runner.trigger().await?;
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let _scheduler = runner.spawn_periodic(cfg.sync_interval());
    tracing::info!(
        "Scheduled sync of bucket `{}` every {}s",
        cfg.bucket,
        cfg.sync_interval_secs
    );

    // --- Build router ---
    let state = AppState {
        db,
        store,
        bucket: cfg.bucket.clone(),
        endpoint: cfg.bucket_endpoint.clone(),
        index,
        ingestor,
        thumbnails,
        runner,
        default_page_size: cfg.default_page_size,
    };
    let cors = routes::routes::cors_layer(&cfg.cors_origins)?;
    let app: Router = routes::routes::routes().layer(cors).with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
