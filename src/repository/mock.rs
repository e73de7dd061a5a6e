use super::{ImageRepository, NEW_RECORD_VERSION};
use crate::models::Image;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// One recorded [`ImageRepository::save`] call.
#[derive(Debug, Clone)]
pub struct SaveCall {
    pub expected_version: u64,
    pub image: Image,
}

#[derive(Clone)]
pub struct MockImageRepository {
    images: Arc<Mutex<Vec<Image>>>,
    saves: Arc<Mutex<Vec<SaveCall>>>,
    should_fail: Arc<Mutex<bool>>,
}

impl MockImageRepository {
    pub fn new() -> Self {
        Self {
            images: Arc::new(Mutex::new(Vec::new())),
            saves: Arc::new(Mutex::new(Vec::new())),
            should_fail: Arc::new(Mutex::new(false)),
        }
    }

    pub fn with_image(self, image: Image) -> Self {
        self.images.lock().unwrap().push(image);
        self
    }

    pub fn with_failure(self, should_fail: bool) -> Self {
        *self.should_fail.lock().unwrap() = should_fail;
        self
    }

    pub fn get_save_calls(&self) -> Vec<SaveCall> {
        self.saves.lock().unwrap().clone()
    }

    pub fn get_images(&self) -> Vec<Image> {
        self.images.lock().unwrap().clone()
    }
}

impl Default for MockImageRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageRepository for MockImageRepository {
    async fn get(&self, id: &str) -> Result<Image> {
        self.images
            .lock()
            .unwrap()
            .iter()
            .find(|image| image.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Image>> {
        Ok(self
            .images
            .lock()
            .unwrap()
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn save(&self, expected_version: u64, image: &Image) -> Result<()> {
        self.saves.lock().unwrap().push(SaveCall {
            expected_version,
            image: image.clone(),
        });

        if *self.should_fail.lock().unwrap() {
            return Err(Error::Repository("Mock repository failure".to_string()));
        }

        let mut images = self.images.lock().unwrap();
        let existing = images.iter().position(|stored| stored.id == image.id);

        if expected_version == NEW_RECORD_VERSION {
            if existing.is_some() {
                return Err(Error::Repository(format!("Duplicate image id {}", image.id)));
            }
            images.push(image.clone());
            return Ok(());
        }

        match existing {
            Some(index) if images[index].version == expected_version => {
                images[index] = image.clone();
                Ok(())
            }
            _ => Err(Error::RaceCondition {
                id: image.id.clone(),
                expected_version,
            }),
        }
    }
}
