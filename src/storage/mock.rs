use super::{origin_path, resized_path, BlobStore};
use crate::stream::{self, ByteStream};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct MockBlobStore {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    upload_count: Arc<Mutex<usize>>,
    resized_count: Arc<Mutex<usize>>,
    read_count: Arc<Mutex<usize>>,
    fail_upload: Arc<Mutex<bool>>,
    fail_resized: Arc<Mutex<bool>>,
}

impl MockBlobStore {
    pub fn new() -> Self {
        Self {
            files: Arc::new(Mutex::new(HashMap::new())),
            upload_count: Arc::new(Mutex::new(0)),
            resized_count: Arc::new(Mutex::new(0)),
            read_count: Arc::new(Mutex::new(0)),
            fail_upload: Arc::new(Mutex::new(false)),
            fail_resized: Arc::new(Mutex::new(false)),
        }
    }

    pub fn with_file(self, path: String, content: Vec<u8>) -> Self {
        self.files.lock().unwrap().insert(path, content);
        self
    }

    pub fn with_upload_failure(self, should_fail: bool) -> Self {
        *self.fail_upload.lock().unwrap() = should_fail;
        self
    }

    pub fn with_resized_failure(self, should_fail: bool) -> Self {
        *self.fail_resized.lock().unwrap() = should_fail;
        self
    }

    pub fn get_upload_count(&self) -> usize {
        *self.upload_count.lock().unwrap()
    }

    pub fn get_resized_count(&self) -> usize {
        *self.resized_count.lock().unwrap()
    }

    pub fn get_read_count(&self) -> usize {
        *self.read_count.lock().unwrap()
    }

    pub fn get_file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn get_files(&self) -> HashMap<String, Vec<u8>> {
        self.files.lock().unwrap().clone()
    }

    fn store(&self, path: String, data: Vec<u8>) -> String {
        self.files.lock().unwrap().insert(path.clone(), data);
        path
    }
}

impl Default for MockBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MockBlobStore {
    async fn read(&self, path: &str) -> Result<ByteStream> {
        *self.read_count.lock().unwrap() += 1;

        let files = self.files.lock().unwrap();
        match files.get(path) {
            Some(data) => Ok(stream::from_bytes(data.clone())),
            None => Err(Error::S3(format!("File not found: {}", path))),
        }
    }

    async fn upload(&self, data: ByteStream) -> Result<String> {
        *self.upload_count.lock().unwrap() += 1;

        let data = stream::collect(data).await?;
        if *self.fail_upload.lock().unwrap() {
            return Err(Error::S3("Mock upload failure".to_string()));
        }
        Ok(self.store(origin_path(), data))
    }

    async fn upload_resized(&self, data: ByteStream, width: u32, height: u32) -> Result<String> {
        *self.resized_count.lock().unwrap() += 1;

        if *self.fail_resized.lock().unwrap() {
            return Err(Error::S3("Mock resized upload failure".to_string()));
        }
        let data = stream::collect(data).await?;
        Ok(self.store(resized_path(width, height), data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::from_bytes;

    #[tokio::test]
    async fn test_mock_store_upload_and_read() {
        let store = MockBlobStore::new();

        let path = store.upload(from_bytes(&b"IMG"[..])).await.unwrap();
        assert!(path.contains("/origin/"));
        assert_eq!(store.get_upload_count(), 1);

        let content = stream::collect(store.read(&path).await.unwrap())
            .await
            .unwrap();
        assert_eq!(content, b"IMG");
        assert_eq!(store.get_read_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_store_resized_upload() {
        let store = MockBlobStore::new();

        let path = store
            .upload_resized(from_bytes(&b"RESIZED"[..]), 100, 200)
            .await
            .unwrap();

        assert!(path.contains("/100_200/"));
        assert_eq!(store.get_file(&path), Some(b"RESIZED".to_vec()));
        assert_eq!(store.get_resized_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_store_with_file() {
        let store = MockBlobStore::new().with_file("seed/a".to_string(), b"IMG".to_vec());

        let content = stream::collect(store.read("seed/a").await.unwrap())
            .await
            .unwrap();
        assert_eq!(content, b"IMG");
        assert_eq!(store.get_upload_count(), 0);
    }

    #[tokio::test]
    async fn test_mock_store_read_missing_file() {
        let store = MockBlobStore::new();
        let result = store.read("missing").await;

        assert!(result.is_err());
        assert!(result.err().unwrap().to_string().contains("File not found"));
    }

    #[tokio::test]
    async fn test_mock_store_with_failure() {
        let store = MockBlobStore::new()
            .with_upload_failure(true)
            .with_resized_failure(true);

        assert!(store.upload(from_bytes(&b"a"[..])).await.is_err());
        assert!(store
            .upload_resized(from_bytes(&b"a"[..]), 1, 1)
            .await
            .is_err());
        assert!(store.get_files().is_empty());
    }
}
