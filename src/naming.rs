//! Key, fingerprint and URL rules shared by ingestion, reconciliation and
//! thumbnail generation.
//!
//! Keeping these in one place means an object written by the uploader is
//! classified exactly the same way when the reconciler later lists it.

use chrono::{DateTime, Utc};

/// Prefix that marks a key as a derived thumbnail rather than an original.
pub const THUMBNAIL_PREFIX: &str = "thumb_";

/// Content type every derived thumbnail is stored with.
pub const THUMBNAIL_CONTENT_TYPE: &str = "image/jpeg";

/// Extensions accepted at upload and treated as images during reconciliation.
pub const ALLOWED_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

const KEY_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// MD5 digest of the exact byte sequence, as lower-case hex.
pub fn fingerprint(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

/// Build the object key for an upload: `{timestamp}_{fingerprint}{.ext}`.
///
/// `ext` is expected with its leading dot, already lower-cased (see
/// [`extension_of`]).
pub fn object_key(uploaded_at: DateTime<Utc>, fingerprint: &str, ext: &str) -> String {
    format!(
        "{}_{}{}",
        uploaded_at.format(KEY_TIMESTAMP_FORMAT),
        fingerprint,
        ext
    )
}

/// Lower-cased extension of `filename`, including the leading dot.
///
/// Returns `None` when there is no extension or the name is a dotfile.
pub fn extension_of(filename: &str) -> Option<String> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(format!(".{}", ext.to_ascii_lowercase()))
}

/// True if `ext` (with or without the leading dot) is an accepted image extension.
pub fn is_allowed_extension(ext: &str) -> bool {
    let bare = ext.trim_start_matches('.');
    ALLOWED_EXTENSIONS
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(bare))
}

/// True if the object is an original image the thumbnail pipeline should
/// handle: an `image/*` content type, or an image extension on the key.
pub fn is_image(key: &str, content_type: Option<&str>) -> bool {
    if is_thumbnail_key(key) {
        return false;
    }
    content_type.is_some_and(|ct| ct.starts_with("image/"))
        || extension_of(key).is_some_and(|ext| is_allowed_extension(&ext))
}

/// Deterministic thumbnail key for an original key.
pub fn thumbnail_key(original_key: &str) -> String {
    format!("{THUMBNAIL_PREFIX}{original_key}")
}

pub fn is_thumbnail_key(key: &str) -> bool {
    key.starts_with(THUMBNAIL_PREFIX)
}

/// Public URL of a key: `https://{endpoint}/{key}`.
pub fn object_url(endpoint: &str, key: &str) -> String {
    format!("https://{}/{}", endpoint.trim_end_matches('/'), key)
}
