//! Blob storage for originals and renditions
//!
//! Blobs are written once under a freshly generated path and never
//! overwritten, so concurrent writers never conflict.

pub mod local;
pub mod mock;
pub mod s3;

pub use local::LocalBlobStore;
pub use mock::MockBlobStore;
pub use s3::{S3BlobStore, S3Config};

use crate::stream::ByteStream;
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

pub const ORIGIN_LABEL: &str = "origin";

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn read(&self, path: &str) -> Result<ByteStream>;
    /// Stores an original upload and returns its path.
    async fn upload(&self, data: ByteStream) -> Result<String>;
    /// Stores a rendition and returns its path.
    async fn upload_resized(&self, data: ByteStream, width: u32, height: u32) -> Result<String>;
}

/// `YYYY/MM/DD/origin/<uuid>` for originals.
pub fn origin_path() -> String {
    format!(
        "{}/{}/{}",
        Utc::now().format("%Y/%m/%d"),
        ORIGIN_LABEL,
        Uuid::new_v4()
    )
}

/// `YYYY/MM/DD/<width>_<height>/<uuid>.png` for renditions.
pub fn resized_path(width: u32, height: u32) -> String {
    format!(
        "{}/{}_{}/{}.png",
        Utc::now().format("%Y/%m/%d"),
        width,
        height,
        Uuid::new_v4()
    )
}
