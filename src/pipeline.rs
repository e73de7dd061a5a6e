//! Per-size resize pipeline
//!
//! The resizer runs as a spawned producer writing into a bounded pipe while
//! the calling task uploads the pipe's read end, so resizing and uploading
//! overlap instead of serializing through a full in-memory buffer.

use crate::models::SizeRequest;
use crate::resizer::ImageResizer;
use crate::storage::BlobStore;
use crate::stream::{pipe, ByteStream};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::{debug, warn};

/// Chunks buffered between resizer and uploader.
pub const DEFAULT_PIPE_CAPACITY: usize = 8;

#[derive(Clone)]
pub struct ResizePipeline {
    resizer: Arc<dyn ImageResizer>,
    storage: Arc<dyn BlobStore>,
    capacity: usize,
}

impl ResizePipeline {
    pub fn new(resizer: Arc<dyn ImageResizer>, storage: Arc<dyn BlobStore>) -> Self {
        Self {
            resizer,
            storage,
            capacity: DEFAULT_PIPE_CAPACITY,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Resizes `source` to `size` and returns the stored rendition's path.
    ///
    /// A path is only returned when both the upload and the resizer
    /// succeeded; a resizer failure reaches the uploader as a stream error.
    pub async fn run(&self, source: ByteStream, size: SizeRequest) -> Result<String> {
        let (mut writer, reader) = pipe(self.capacity);

        let resizer = Arc::clone(&self.resizer);
        let producer = tokio::spawn(async move {
            let result = resizer
                .resize(source, &mut writer, size.width, size.height)
                .await;
            if let Err(e) = &result {
                writer.fail(e).await;
            }
            result
        });

        let uploaded = self
            .storage
            .upload_resized(reader, size.width, size.height)
            .await;

        let path = match uploaded {
            Ok(path) => path,
            Err(e) => {
                producer.abort();
                return Err(e);
            }
        };

        match producer.await {
            Ok(Ok(())) => {
                debug!("[{}] Stored rendition at {}", size, path);
                Ok(path)
            }
            Ok(Err(e)) => {
                warn!("[{}] Resizer failed after upload, orphaned blob {}", size, path);
                Err(e)
            }
            Err(e) => {
                warn!("[{}] Resizer task died, orphaned blob {}", size, path);
                Err(Error::Task(format!("Resize task join error: {}", e)))
            }
        }
    }
}
