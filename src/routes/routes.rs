//! Defines the HTTP surface of the image index.
//!
//! ## Structure
//! - **Image endpoints**
//!   - `GET    /api/images/list`           : paginated index listing
//!   - `POST   /api/images/upload`         : multipart upload (`file` field)
//!   - `POST   /api/images/sync`           : run one reconciliation now
//!   - `DELETE /api/images/{key}`          : delete object, thumbnail and row
//!   - `GET    /api/images/{key}/thumbnail`: generate-if-missing
//!
//! - **Probes**
//!   - `GET /healthz`, `GET /readyz`
//!
//! CORS is applied by the caller with [`cors_layer`] so the frontend's
//! origins come from configuration.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        image_handlers::{delete_image, get_thumbnail, list_images, trigger_sync, upload_image},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, header::InvalidHeaderValue},
    routing::{delete, get, post},
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer};

/// Largest accepted upload body.
const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Build the router. Handlers share [`AppState`].
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/images/list", get(list_images))
        .route(
            "/api/images/upload",
            post(upload_image).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/images/sync", post(trigger_sync))
        .route("/api/images/{key}", delete(delete_image))
        .route("/api/images/{key}/thumbnail", get(get_thumbnail))
}

/// CORS for the browser frontend. `*` allows any origin without
/// credentials; otherwise only the listed origins, with credentials.
pub fn cors_layer(origins: &[String]) -> Result<CorsLayer, InvalidHeaderValue> {
    if origins.iter().any(|origin| origin == "*") {
        return Ok(CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any));
    }
    let origins = origins
        .iter()
        .map(|origin| HeaderValue::from_str(origin))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request()))
}
