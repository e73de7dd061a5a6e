//! Image upload and rendition service
//!
//! Streams uploaded images into blob storage, renders them at requested
//! sizes through a concurrent resize pipeline, and keeps a versioned image
//! record protected by optimistic concurrency.

pub mod app;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod repository;
pub mod resizer;
pub mod service;
pub mod storage;
pub mod stream;
pub mod validation;

pub use error::{Error, InvalidParam, InvalidParams, Result, ServiceError, ServiceResult};
