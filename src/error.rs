//! Error handling and custom error types
//!
//! [`Error`] carries collaborator failures with full detail for logging.
//! [`ServiceError`] is the closed taxonomy surfaced to callers of the
//! orchestrator; collaborator detail never crosses that boundary.

use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("S3 error: {0}")]
    S3(String),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Pipe error: {0}")]
    Pipe(String),

    #[error("Task error: {0}")]
    Task(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Image not found: {0}")]
    NotFound(String),

    #[error("Version conflict for image {id}: expected version {expected_version}")]
    RaceCondition { id: String, expected_version: u64 },

    #[error("Operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

/// A single violated constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidParam {
    pub field: String,
    pub constraint: String,
}

impl InvalidParam {
    pub fn new(field: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            constraint: constraint.into(),
        }
    }
}

/// Every constraint violated by one request, in field order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidParams(pub Vec<InvalidParam>);

impl InvalidParams {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InvalidParam> {
        self.0.iter()
    }

    pub fn push(&mut self, param: InvalidParam) {
        self.0.push(param);
    }

    pub fn extend(&mut self, other: InvalidParams) {
        self.0.extend(other.0);
    }

    pub fn into_result(self) -> std::result::Result<(), ServiceError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::InvalidParams(self))
        }
    }
}

impl fmt::Display for InvalidParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self
            .0
            .iter()
            .map(|param| format!("{}:{}", param.field, param.constraint))
            .collect();
        write!(f, "{}", messages.join(", "))
    }
}

/// Errors surfaced by [`crate::service::ImageService`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("NotFound")]
    NotFound,

    #[error("Internal")]
    Internal,

    #[error("RaceCondition")]
    RaceCondition,

    #[error("Cancelled")]
    Cancelled,

    #[error("{0}")]
    InvalidParams(InvalidParams),
}

impl ServiceError {
    /// Only a lost compare-and-swap is worth re-issuing.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::RaceCondition)
    }
}

impl From<Error> for ServiceError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound(_) => ServiceError::NotFound,
            Error::RaceCondition { .. } => ServiceError::RaceCondition,
            Error::Cancelled => ServiceError::Cancelled,
            _ => ServiceError::Internal,
        }
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
