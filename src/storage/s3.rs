use super::{origin_path, resized_path, BlobStore};
use crate::stream::{self, ByteStream};
use crate::{Error, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::primitives::ByteStream as S3ByteStream;
use aws_sdk_s3::{config::Region, Client as S3Client};
use futures::stream as futures_stream;
use tracing::info;

#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    pub region: String,
    /// Prefix joined in front of every blob path.
    pub root_path: String,
}

/// S3-compatible blob store (MinIO, DigitalOcean Spaces, AWS).
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
    root_path: String,
}

impl S3BlobStore {
    pub async fn new(config: S3Config) -> Result<Self> {
        let credentials = aws_sdk_s3::config::Credentials::new(
            config.access_key_id,
            config.secret_access_key,
            None,
            None,
            "image-resizer",
        );

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(config.region))
            .endpoint_url(config.endpoint)
            .load()
            .await;

        // MinIO serves buckets by path, not by virtual host
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        let store = Self {
            client: S3Client::from_conf(s3_config),
            bucket: config.bucket,
            root_path: config.root_path,
        };
        store.ensure_bucket().await?;

        Ok(store)
    }

    async fn ensure_bucket(&self) -> Result<()> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(()),
            Err(e)
                if e
                    .as_service_error()
                    .map(|service| service.is_not_found())
                    .unwrap_or(false) =>
            {
                info!("Creating bucket {}", self.bucket);
                self.client
                    .create_bucket()
                    .bucket(&self.bucket)
                    .send()
                    .await
                    .map_err(|e| Error::S3(format!("Failed to create bucket: {}", e)))?;
                Ok(())
            }
            Err(e) => Err(Error::S3(format!("Failed to check bucket: {}", e))),
        }
    }

    fn object_key(&self, path: &str) -> String {
        object_key(&self.root_path, path)
    }

    /// Buffers the whole blob before `put_object`, so with this store the
    /// pipe bounds memory between resizer and uploader only, not end to end.
    async fn put(&self, path: String, data: ByteStream, content_type: &str) -> Result<String> {
        let data = stream::collect(data).await?;
        let length = data.len() as i64;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.object_key(&path))
            .body(S3ByteStream::from(data))
            .content_length(length)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| Error::S3(format!("Failed to upload file: {}", e)))?;

        Ok(path)
    }
}

fn object_key(root_path: &str, path: &str) -> String {
    let root = root_path.trim_matches('/');
    let path = path.trim_start_matches('/');
    if root.is_empty() {
        path.to_string()
    } else {
        format!("{}/{}", root, path)
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn read(&self, path: &str) -> Result<ByteStream> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.object_key(path))
            .send()
            .await
            .map_err(|e| Error::S3(format!("Failed to read file: {}", e)))?;

        let body = futures_stream::unfold(response.body, |mut body| async move {
            body.next().await.map(|chunk| {
                let chunk = chunk.map_err(|e| Error::S3(format!("Failed to read body: {}", e)));
                (chunk, body)
            })
        });
        Ok(Box::pin(body))
    }

    async fn upload(&self, data: ByteStream) -> Result<String> {
        self.put(origin_path(), data, "application/octet-stream")
            .await
    }

    async fn upload_resized(&self, data: ByteStream, width: u32, height: u32) -> Result<String> {
        self.put(resized_path(width, height), data, "image/png")
            .await
    }
}
