use super::ImageResizer;
use crate::stream::{self, ByteStream, PipeWriter};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Call recorded by [`MockResizer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizeCall {
    pub input: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone)]
pub struct MockResizer {
    output: Arc<Mutex<Vec<u8>>>,
    calls: Arc<Mutex<Vec<ResizeCall>>>,
    should_fail: Arc<Mutex<bool>>,
    fail_after: Arc<Mutex<Option<usize>>>,
}

impl MockResizer {
    pub fn new() -> Self {
        Self {
            output: Arc::new(Mutex::new(b"RESIZED".to_vec())),
            calls: Arc::new(Mutex::new(Vec::new())),
            should_fail: Arc::new(Mutex::new(false)),
            fail_after: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_output(self, output: Vec<u8>) -> Self {
        *self.output.lock().unwrap() = output;
        self
    }

    pub fn with_failure(self, should_fail: bool) -> Self {
        *self.should_fail.lock().unwrap() = should_fail;
        self
    }

    /// Succeed for the first `calls` resizes, then fail.
    pub fn with_failure_after(self, calls: usize) -> Self {
        *self.fail_after.lock().unwrap() = Some(calls);
        self
    }

    pub fn get_call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn get_calls(&self) -> Vec<ResizeCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for MockResizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageResizer for MockResizer {
    async fn resize(
        &self,
        source: ByteStream,
        output: &mut PipeWriter,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let input = stream::collect(source).await?;

        let call_index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(ResizeCall {
                input,
                width,
                height,
            });
            calls.len()
        };

        let exhausted = self
            .fail_after
            .lock()
            .unwrap()
            .is_some_and(|limit| call_index > limit);
        if *self.should_fail.lock().unwrap() || exhausted {
            return Err(Error::Image(image::ImageError::IoError(
                std::io::Error::other("Mock resize failure"),
            )));
        }

        let data = self.output.lock().unwrap().clone();
        output.write_all(&data).await
    }
}
