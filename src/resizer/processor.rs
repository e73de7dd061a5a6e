use super::ImageResizer;
use crate::stream::{self, ByteStream, PipeWriter};
use crate::{Error, Result};
use async_trait::async_trait;
use image::imageops::FilterType;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader};
use std::io::Cursor;
use tracing::debug;

/// Lanczos3 resampler backed by the `image` crate. Output is always PNG.
pub struct LanczosResizer {
    format: ImageFormat,
}

impl LanczosResizer {
    pub fn new() -> Self {
        Self {
            format: ImageFormat::Png,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.to_mime_type()
    }

    fn resize_sync(data: &[u8], width: u32, height: u32, format: ImageFormat) -> Result<Vec<u8>> {
        let mut decoder = ImageReader::new(Cursor::new(data))
            .with_guessed_format()?
            .into_decoder()?;
        let orientation = decoder.orientation()?;
        let mut image = DynamicImage::from_decoder(decoder)?;
        image.apply_orientation(orientation);

        let resized = image.resize_exact(width, height, FilterType::Lanczos3);

        let mut encoded = Vec::new();
        resized.write_to(&mut Cursor::new(&mut encoded), format)?;
        Ok(encoded)
    }
}

impl Default for LanczosResizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageResizer for LanczosResizer {
    async fn resize(
        &self,
        source: ByteStream,
        output: &mut PipeWriter,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let data = stream::collect(source).await?;
        debug!("Resizing {} byte image to {}x{}", data.len(), width, height);

        let format = self.format;
        let encoded = tokio::task::spawn_blocking(move || {
            Self::resize_sync(&data, width, height, format)
        })
        .await
        .map_err(|e| Error::Task(format!("Resize task join error: {}", e)))??;

        output.write_all(&encoded).await
    }
}
