//! Image orchestration: upload, resize, and list.
//!
//! Drives the per-size resize pipeline and commits the resulting image
//! through the repository's compare-and-swap contract. Collaborator failures
//! are logged here and surface to callers only as [`ServiceError::Internal`].

use crate::error::{ServiceError, ServiceResult};
use crate::models::{Image, ImageUpload, SizeRequest};
use crate::pipeline::ResizePipeline;
use crate::repository::{ImageRepository, NEW_RECORD_VERSION};
use crate::resizer::ImageResizer;
use crate::storage::BlobStore;
use crate::stream::StreamDuplicator;
use crate::validation;
use crate::{Error, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Owns the collaborators and runs the image use cases.
pub struct ImageService {
    storage: Arc<dyn BlobStore>,
    repository: Arc<dyn ImageRepository>,
    pipeline: ResizePipeline,
}

/// Injectable collaborator bundle used to construct [`ImageService`].
pub struct ImageServiceDeps {
    pub storage: Arc<dyn BlobStore>,
    pub resizer: Arc<dyn ImageResizer>,
    pub repository: Arc<dyn ImageRepository>,
}

impl ImageService {
    pub fn with_services(deps: ImageServiceDeps) -> Self {
        let pipeline = ResizePipeline::new(deps.resizer, Arc::clone(&deps.storage));
        Self {
            storage: deps.storage,
            repository: deps.repository,
            pipeline,
        }
    }

    pub fn with_pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipeline = self.pipeline.with_capacity(capacity);
        self
    }

    /// Stores a new image and the requested renditions, then inserts its record.
    pub async fn upload(
        &self,
        upload: ImageUpload,
        sizes: &[SizeRequest],
        cancel: &CancellationToken,
    ) -> ServiceResult<Image> {
        validation::validate_upload(&upload.filename, upload.byte_size, &upload.mime_type, sizes)?;

        self.upload_image(upload, sizes, cancel)
            .await
            .map_err(|e| surface("upload", e))
    }

    /// Adds any missing renditions to an existing image.
    ///
    /// Fails with [`ServiceError::RaceCondition`] when another writer
    /// committed first; the caller should retry the whole call.
    pub async fn resize(
        &self,
        id: &str,
        sizes: &[SizeRequest],
        cancel: &CancellationToken,
    ) -> ServiceResult<Image> {
        validation::validate_resize(sizes)?;

        self.resize_image(id, sizes, cancel)
            .await
            .map_err(|e| surface("resize", e))
    }

    pub async fn list(&self, limit: usize, offset: usize) -> ServiceResult<Vec<Image>> {
        validation::validate_list(limit)?;

        self.repository
            .list(limit, offset)
            .await
            .map_err(|e| surface("list", e))
    }

    async fn upload_image(
        &self,
        upload: ImageUpload,
        sizes: &[SizeRequest],
        cancel: &CancellationToken,
    ) -> Result<Image> {
        let ImageUpload {
            content,
            filename,
            byte_size,
            mime_type,
        } = upload;

        let content = StreamDuplicator::new(content);
        let original_path = self.storage.upload(content.branch()).await?;
        info!("[{}] Stored original at {}", filename, original_path);

        let mut image = Image::new(original_path, filename, mime_type, byte_size);

        let committed: Result<()> = async {
            self.resize_all(&mut image, &content, sizes, cancel).await?;
            self.repository.save(NEW_RECORD_VERSION, &image).await
        }
        .await;

        if let Err(e) = committed {
            let mut written = vec![image.path.as_str()];
            written.extend(image.sizes.iter().map(|size| size.path.as_str()));
            warn_orphans(&image.id, &written, &e);
            return Err(e);
        }

        info!(
            "[{}] Created image {} with {} rendition(s)",
            image.client_name,
            image.id,
            image.sizes.len()
        );
        Ok(image)
    }

    async fn resize_image(
        &self,
        id: &str,
        sizes: &[SizeRequest],
        cancel: &CancellationToken,
    ) -> Result<Image> {
        let mut image = self.repository.get(id).await?;
        let expected_version = image.version;
        let known = image.sizes.len();

        let content = StreamDuplicator::new(self.storage.read(&image.path).await?);

        let committed: Result<()> = async {
            self.resize_all(&mut image, &content, sizes, cancel).await?;
            image.version = expected_version + 1;
            self.repository.save(expected_version, &image).await
        }
        .await;

        if let Err(e) = committed {
            let written: Vec<&str> = image.sizes[known..]
                .iter()
                .map(|size| size.path.as_str())
                .collect();
            warn_orphans(&image.id, &written, &e);
            return Err(e);
        }

        info!(
            "[{}] Image {} now at version {} with {} new rendition(s)",
            image.client_name,
            image.id,
            image.version,
            image.sizes.len() - known
        );
        Ok(image)
    }

    /// Runs the pipeline for each requested size, strictly in order.
    ///
    /// Sizes the image already has are skipped. On failure the renditions
    /// appended so far stay on `image`; the caller discards it uncommitted.
    async fn resize_all(
        &self,
        image: &mut Image,
        content: &StreamDuplicator,
        sizes: &[SizeRequest],
        cancel: &CancellationToken,
    ) -> Result<()> {
        for size in sizes {
            if cancel.is_cancelled() {
                info!("[{}] Cancelled before resizing to {}", image.id, size);
                return Err(Error::Cancelled);
            }

            if image.has_rendition(size.width, size.height) {
                debug!("[{}] Rendition {} already exists, skipping", image.id, size);
                continue;
            }

            let path = self.pipeline.run(content.branch(), *size).await?;
            image.add_rendition(path, size.width, size.height);
        }
        Ok(())
    }
}

/// Logs blobs written by a call that will not be committed.
fn warn_orphans(id: &str, paths: &[&str], err: &Error) {
    if !paths.is_empty() {
        warn!(
            "[{}] Not committed ({}); orphaned blobs: {}",
            id,
            err,
            paths.join(", ")
        );
    }
}

/// Logs collaborator detail and collapses it to the boundary taxonomy.
fn surface(operation: &str, err: Error) -> ServiceError {
    match &err {
        Error::NotFound(id) => debug!("{}: image {} not found", operation, id),
        Error::RaceCondition {
            id,
            expected_version,
        } => warn!(
            "{}: image {} changed since version {}",
            operation, id, expected_version
        ),
        Error::Cancelled => info!("{}: cancelled", operation),
        other => error!("{} failed: {}", operation, other),
    }
    ServiceError::from(err)
}
