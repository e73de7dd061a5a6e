//! Pixel resizing
//!
//! Decodes an encoded image stream, resamples it to the requested dimensions
//! and re-encodes it into a pipe for the blob store to consume.

pub mod mock;
pub mod processor;

pub use mock::MockResizer;
pub use processor::LanczosResizer;

use crate::stream::{ByteStream, PipeWriter};
use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait ImageResizer: Send + Sync {
    /// Reads `source` and writes the re-encoded `width` x `height` image to `output`.
    async fn resize(
        &self,
        source: ByteStream,
        output: &mut PipeWriter,
        width: u32,
        height: u32,
    ) -> Result<()>;
}
