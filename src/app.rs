//! Process wiring: builds the collaborators from [`Config`] and exposes the
//! use cases to the command line.

use crate::models::{Config, Image, ImageUpload, SizeRequest, StorageBackend};
use crate::repository::SqliteImageRepository;
use crate::resizer::LanczosResizer;
use crate::service::{ImageService, ImageServiceDeps};
use crate::storage::{BlobStore, LocalBlobStore, S3BlobStore};
use crate::{Error, Result, ServiceError};
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio_retry::{strategy::FixedInterval, RetryIf};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const RETRY_INTERVAL_MS: u64 = 200;
const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

pub struct App {
    service: ImageService,
    resize_retries: usize,
}

impl App {
    /// Build an app around an existing service, e.g. one backed by mocks.
    pub fn with_service(service: ImageService, resize_retries: usize) -> Self {
        Self {
            service,
            resize_retries,
        }
    }

    pub async fn new(config: &Config) -> Result<Self> {
        let storage: Arc<dyn BlobStore> = match config.storage_backend {
            StorageBackend::Local => {
                info!("Storage backend: local ({})", config.storage_root);
                Arc::new(LocalBlobStore::new(Path::new(&config.storage_root)).await?)
            }
            StorageBackend::S3 => {
                info!(
                    "Storage backend: s3 ({} / {})",
                    config.s3.endpoint, config.s3.bucket
                );
                Arc::new(S3BlobStore::new(config.s3.clone()).await?)
            }
        };

        let repository = Arc::new(SqliteImageRepository::open(&config.database_path)?);

        let service = ImageService::with_services(ImageServiceDeps {
            storage,
            resizer: Arc::new(LanczosResizer::new()),
            repository,
        })
        .with_pipe_capacity(config.pipe_capacity);

        Ok(Self::with_service(service, config.resize_retries))
    }

    /// Uploads a file from disk, guessing its MIME type from the extension
    /// when none is given.
    pub async fn upload_file(
        &self,
        file: &Path,
        mime_type: Option<String>,
        sizes: &[SizeRequest],
        cancel: &CancellationToken,
    ) -> anyhow::Result<Image> {
        let handle = File::open(file).await?;
        let byte_size = handle.metadata().await?.len();

        let filename = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mime_type = mime_type.unwrap_or_else(|| guess_mime_type(file));

        let upload = ImageUpload {
            content: Box::pin(ReaderStream::new(handle).map(|chunk| chunk.map_err(Error::from))),
            filename,
            byte_size,
            mime_type,
        };

        Ok(self.service.upload(upload, sizes, cancel).await?)
    }

    /// Resizes an existing image, re-issuing the whole call when another
    /// writer committed first.
    pub async fn resize(
        &self,
        id: &str,
        sizes: &[SizeRequest],
        cancel: &CancellationToken,
    ) -> anyhow::Result<Image> {
        let strategy = FixedInterval::from_millis(RETRY_INTERVAL_MS).take(self.resize_retries);

        let image = RetryIf::start(
            strategy,
            move || self.service.resize(id, sizes, cancel),
            |e: &ServiceError| {
                let retry = e.is_retryable() && !cancel.is_cancelled();
                if retry {
                    warn!("[{}] Image changed concurrently, retrying resize", id);
                }
                retry
            },
        )
        .await?;

        Ok(image)
    }

    pub async fn list(&self, limit: usize, offset: usize) -> anyhow::Result<Vec<Image>> {
        Ok(self.service.list(limit, offset).await?)
    }
}

fn guess_mime_type(file: &Path) -> String {
    image::ImageFormat::from_path(file)
        .map(|format| format.to_mime_type().to_string())
        .unwrap_or_else(|_| FALLBACK_MIME_TYPE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{ImageRepository, MockImageRepository, NEW_RECORD_VERSION};
    use crate::resizer::MockResizer;
    use crate::storage::MockBlobStore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Loses the first `races` conditional updates.
    struct RacingRepository {
        inner: MockImageRepository,
        races: Mutex<usize>,
    }

    #[async_trait]
    impl ImageRepository for RacingRepository {
        async fn get(&self, id: &str) -> Result<Image> {
            self.inner.get(id).await
        }

        async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Image>> {
            self.inner.list(limit, offset).await
        }

        async fn save(&self, expected_version: u64, image: &Image) -> Result<()> {
            if expected_version != NEW_RECORD_VERSION {
                let mut races = self.races.lock().unwrap();
                if *races > 0 {
                    *races -= 1;
                    return Err(Error::RaceCondition {
                        id: image.id.clone(),
                        expected_version,
                    });
                }
            }
            self.inner.save(expected_version, image).await
        }
    }

    fn test_app(races: usize, retries: usize) -> (App, MockImageRepository) {
        let inner = MockImageRepository::new();
        let service = ImageService::with_services(ImageServiceDeps {
            storage: Arc::new(MockBlobStore::new()),
            resizer: Arc::new(MockResizer::new()),
            repository: Arc::new(RacingRepository {
                inner: inner.clone(),
                races: Mutex::new(races),
            }),
        });
        (App::with_service(service, retries), inner)
    }

    fn write_temp_file(dir: &TempDir, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn test_upload_file_reads_metadata_from_disk() {
        let (app, repository) = test_app(0, 0);
        let dir = TempDir::new().unwrap();
        let file = write_temp_file(&dir, "photo.png", b"not really a png");

        let image = app
            .upload_file(&file, None, &[SizeRequest::new(10, 10)], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(image.client_name, "photo.png");
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.byte_size, 16);
        assert_eq!(repository.get_images().len(), 1);
    }

    #[tokio::test]
    async fn test_upload_missing_file_fails() {
        let (app, _) = test_app(0, 0);
        let result = app
            .upload_file(
                Path::new("/definitely/not/here.png"),
                None,
                &[],
                &CancellationToken::new(),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_resize_retries_lost_race() {
        let (app, repository) = test_app(2, 3);
        let dir = TempDir::new().unwrap();
        let file = write_temp_file(&dir, "a.jpg", b"IMG");
        let cancel = CancellationToken::new();
        let image = app.upload_file(&file, None, &[], &cancel).await.unwrap();

        let resized = app
            .resize(&image.id, &[SizeRequest::new(5, 5)], &cancel)
            .await
            .unwrap();

        assert_eq!(resized.version, 2);
        assert_eq!(repository.get_images()[0].version, 2);
    }

    #[tokio::test]
    async fn test_resize_gives_up_after_retries() {
        let (app, _) = test_app(5, 1);
        let dir = TempDir::new().unwrap();
        let file = write_temp_file(&dir, "a.jpg", b"IMG");
        let cancel = CancellationToken::new();
        let image = app.upload_file(&file, None, &[], &cancel).await.unwrap();

        let err = app
            .resize(&image.id, &[SizeRequest::new(5, 5)], &cancel)
            .await
            .unwrap_err();

        assert_eq!(
            err.downcast_ref::<ServiceError>(),
            Some(&ServiceError::RaceCondition)
        );
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let (app, _) = test_app(0, 3);

        let err = app
            .resize("missing", &[SizeRequest::new(5, 5)], &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(
            err.downcast_ref::<ServiceError>(),
            Some(&ServiceError::NotFound)
        );
    }

    #[test]
    fn test_guess_mime_type() {
        assert_eq!(guess_mime_type(Path::new("a.jpeg")), "image/jpeg");
        assert_eq!(guess_mime_type(Path::new("a.webp")), "image/webp");
        assert_eq!(guess_mime_type(Path::new("a.unknown")), FALLBACK_MIME_TYPE);
    }
}
