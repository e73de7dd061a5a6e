//! Image metadata persistence
//!
//! Every write is a compare-and-swap on the image version. An expected
//! version of [`NEW_RECORD_VERSION`] inserts; anything else updates only if
//! the stored version still matches, failing with
//! [`Error::RaceCondition`](crate::Error::RaceCondition) otherwise.

pub mod mock;
pub mod sqlite;

pub use mock::MockImageRepository;
pub use sqlite::SqliteImageRepository;

use crate::models::Image;
use crate::Result;
use async_trait::async_trait;

/// Expected version meaning "the record does not exist yet".
pub const NEW_RECORD_VERSION: u64 = 0;

#[async_trait]
pub trait ImageRepository: Send + Sync {
    async fn get(&self, id: &str) -> Result<Image>;
    /// Images in insertion order.
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Image>>;
    async fn save(&self, expected_version: u64, image: &Image) -> Result<()>;
}
