//! Core data models for the bucket index.
//!
//! `bucket` and `object` describe the local bucket backend; `image` is the
//! index entity mirrored from it. All of them map to SQLite rows via
//! `sqlx::FromRow` and serialize as JSON via `serde`.

pub mod bucket;
pub mod image;
pub mod object;
