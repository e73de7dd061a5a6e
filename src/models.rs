//! Data models and structures
//!
//! Defines the versioned image record, its renditions, the upload and size
//! request inputs, and process configuration.

use crate::storage::S3Config;
use crate::stream::ByteStream;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

/// One resized output of an [`Image`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rendition {
    pub path: String,
    pub width: u32,
    pub height: u32,
}

/// Versioned image record.
///
/// `sizes` only grows and keeps creation order. `version` is the optimistic
/// concurrency token: 1 after the first insert, +1 per persisted mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub id: String,
    pub path: String,
    pub client_name: String,
    pub mime_type: String,
    pub byte_size: u64,
    pub uploaded_at: DateTime<Utc>,
    pub sizes: Vec<Rendition>,
    pub version: u64,
}

impl Image {
    pub fn new(path: String, client_name: String, mime_type: String, byte_size: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            path,
            client_name,
            mime_type,
            byte_size,
            uploaded_at: Utc::now(),
            sizes: Vec::new(),
            version: 1,
        }
    }

    pub fn has_rendition(&self, width: u32, height: u32) -> bool {
        self.sizes
            .iter()
            .any(|size| size.width == width && size.height == height)
    }

    pub fn add_rendition(&mut self, path: String, width: u32, height: u32) {
        self.sizes.push(Rendition {
            path,
            width,
            height,
        });
    }

    pub fn rendition(&self, width: u32, height: u32) -> Option<&Rendition> {
        self.sizes
            .iter()
            .find(|size| size.width == width && size.height == height)
    }
}

/// A read-once upload plus the metadata the client sent with it.
pub struct ImageUpload {
    pub content: ByteStream,
    pub filename: String,
    pub byte_size: u64,
    pub mime_type: String,
}

/// Target dimensions for one rendition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Validate)]
pub struct SizeRequest {
    #[validate(range(min = 1, max = 8192))]
    pub width: u32,
    #[validate(range(min = 1, max = 8192))]
    pub height: u32,
}

impl SizeRequest {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for SizeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for SizeRequest {
    type Err = String;

    /// Parses `WIDTHxHEIGHT`, e.g. `100x200`.
    fn from_str(input: &str) -> std::result::Result<Self, Self::Err> {
        let (width, height) = input
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("Invalid size '{}'. Expected format: WIDTHxHEIGHT", input))?;

        let width = width
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("Invalid width in '{}'", input))?;
        let height = height
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("Invalid height in '{}'", input))?;

        Ok(Self { width, height })
    }
}

// Configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Local,
    S3,
}

impl FromStr for StorageBackend {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(StorageBackend::Local),
            "s3" => Ok(StorageBackend::S3),
            other => Err(Error::Config(format!(
                "Unknown storage backend '{}'. Expected 'local' or 's3'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub log_json: bool,
    pub database_path: PathBuf,
    pub storage_backend: StorageBackend,
    pub storage_root: String,
    pub s3: S3Config,
    pub resize_retries: usize,
    pub pipe_capacity: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let storage_root = var("APP_STORAGE_ROOT", "images");

        Ok(Self {
            log_level: var("APP_LOG_LEVEL", "info"),
            log_json: parse_bool("APP_LOG_JSON", &var("APP_LOG_JSON", "false"))?,
            database_path: PathBuf::from(var("APP_DATABASE_PATH", "images.db")),
            storage_backend: var("APP_STORAGE_BACKEND", "local").parse()?,
            s3: S3Config {
                endpoint: var("APP_S3_ENDPOINT", "http://127.0.0.1:9000"),
                access_key_id: var("APP_S3_ACCESS_KEY_ID", "minioadmin"),
                secret_access_key: var("APP_S3_SECRET_ACCESS_KEY", "minioadmin"),
                bucket: var("APP_S3_BUCKET", "images"),
                region: var("APP_S3_REGION", "us-east-1"),
                root_path: storage_root.clone(),
            },
            storage_root,
            resize_retries: parse_usize("APP_RESIZE_RETRIES", &var("APP_RESIZE_RETRIES", "3"))?,
            pipe_capacity: parse_usize("APP_PIPE_CAPACITY", &var("APP_PIPE_CAPACITY", "8"))?
                .max(1),
        })
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::Config(format!("{} must be a boolean, got '{}'", key, value))),
    }
}

fn parse_usize(key: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} must be a non-negative integer, got '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_add_rendition_keeps_order() {
        let mut image = Image::new(
            "origin/a".to_string(),
            "a.png".to_string(),
            "image/png".to_string(),
            3,
        );
        image.add_rendition("test".to_string(), 1, 2);
        assert_eq!(image.sizes.len(), 1);
        assert_eq!(image.sizes[0].path, "test");
        assert_eq!(image.sizes[0].width, 1);
        assert_eq!(image.sizes[0].height, 2);

        image.add_rendition("test2".to_string(), 3, 4);
        assert_eq!(image.sizes.len(), 2);
        assert_eq!(image.sizes[1].path, "test2");
    }

    #[test]
    fn test_has_rendition_matches_exact_pair() {
        let mut image = Image::new(String::new(), String::new(), String::new(), 0);
        image.add_rendition("test".to_string(), 1, 2);

        assert!(image.has_rendition(1, 2));
        assert!(!image.has_rendition(1, 1));
        assert!(!image.has_rendition(2, 1));
        assert_eq!(image.rendition(1, 2).map(|r| r.path.as_str()), Some("test"));
    }

    #[test]
    fn test_new_image_starts_at_version_one() {
        let image = Image::new(String::new(), String::new(), String::new(), 0);
        assert_eq!(image.version, 1);
        assert!(image.sizes.is_empty());
        assert!(Uuid::parse_str(&image.id).is_ok());
    }

    #[test]
    fn test_image_serializes_camel_case() {
        let image = Image::new(
            "2024/01/01/origin/x".to_string(),
            "a.png".to_string(),
            "image/png".to_string(),
            123,
        );

        let json = serde_json::to_string(&image).unwrap();
        assert!(json.contains("\"clientName\":\"a.png\""));
        assert!(json.contains("\"mimeType\":\"image/png\""));
        assert!(json.contains("\"byteSize\":123"));
        assert!(json.contains("\"uploadedAt\""));

        let deserialized: Image = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, image);
    }

    #[test]
    fn test_size_request_parse() {
        assert_eq!("100x200".parse::<SizeRequest>(), Ok(SizeRequest::new(100, 200)));
        assert_eq!("50X50".parse::<SizeRequest>(), Ok(SizeRequest::new(50, 50)));
        assert!("100".parse::<SizeRequest>().is_err());
        assert!("ax10".parse::<SizeRequest>().is_err());
        assert_eq!(SizeRequest::new(7, 9).to_string(), "7x9");
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::from_lookup(|_| None).unwrap();

        assert_eq!(config.log_level, "info");
        assert!(!config.log_json);
        assert_eq!(config.database_path, PathBuf::from("images.db"));
        assert_eq!(config.storage_backend, StorageBackend::Local);
        assert_eq!(config.storage_root, "images");
        assert_eq!(config.s3.bucket, "images");
        assert_eq!(config.s3.root_path, "images");
        assert_eq!(config.resize_retries, 3);
        assert_eq!(config.pipe_capacity, 8);
    }

    #[test]
    fn test_config_overrides() {
        let vars: HashMap<&str, &str> = [
            ("APP_LOG_JSON", "true"),
            ("APP_STORAGE_BACKEND", "S3"),
            ("APP_S3_BUCKET", "renditions"),
            ("APP_RESIZE_RETRIES", "5"),
            ("APP_PIPE_CAPACITY", "0"),
        ]
        .into_iter()
        .collect();

        let config = Config::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();

        assert!(config.log_json);
        assert_eq!(config.storage_backend, StorageBackend::S3);
        assert_eq!(config.s3.bucket, "renditions");
        assert_eq!(config.resize_retries, 5);
        assert_eq!(config.pipe_capacity, 1);
    }

    #[test]
    fn test_config_rejects_malformed_values() {
        let err = Config::from_lookup(|key| {
            (key == "APP_STORAGE_BACKEND").then(|| "ftp".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("Unknown storage backend"));

        let err = Config::from_lookup(|key| {
            (key == "APP_RESIZE_RETRIES").then(|| "many".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("APP_RESIZE_RETRIES"));
    }
}
