use super::{origin_path, resized_path, BlobStore};
use crate::stream::ByteStream;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

/// Stores blobs as files under a root directory.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub async fn new(root: &Path) -> Result<Self> {
        fs::create_dir_all(root).await?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let is_plain = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if path.is_empty() || !is_plain {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Invalid blob path: {}", path),
            )));
        }
        Ok(self.root.join(relative))
    }

    async fn write(&self, path: String, mut data: ByteStream) -> Result<String> {
        let target = self.resolve(&path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut partial = target.clone().into_os_string();
        partial.push(".part");
        let partial = PathBuf::from(partial);

        let written = async {
            let mut file = File::create(&partial).await?;
            let mut total = 0usize;
            while let Some(chunk) = data.next().await {
                let chunk = chunk?;
                total += chunk.len();
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            fs::rename(&partial, &target).await?;
            Ok::<usize, Error>(total)
        }
        .await;

        match written {
            Ok(total) => {
                debug!("Stored {} bytes at {}", total, target.display());
                Ok(path)
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&partial).await {
                    warn!(
                        "Failed to remove partial blob {}: {}",
                        partial.display(),
                        cleanup
                    );
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn read(&self, path: &str) -> Result<ByteStream> {
        let file = File::open(self.resolve(path)?).await?;
        Ok(Box::pin(ReaderStream::new(file).map(|chunk| chunk.map_err(Error::from))))
    }

    async fn upload(&self, data: ByteStream) -> Result<String> {
        self.write(origin_path(), data).await
    }

    async fn upload_resized(&self, data: ByteStream, width: u32, height: u32) -> Result<String> {
        self.write(resized_path(width, height), data).await
    }
}
