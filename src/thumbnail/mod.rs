//! Thumbnail derivation.
//!
//! `derive` is the pure bytes-in/bytes-out transform; `service` layers the
//! skip-if-exists protocol on top of the store capability.

pub mod derive;
pub mod service;

pub use derive::ThumbnailOptions;
pub use service::ThumbnailService;
