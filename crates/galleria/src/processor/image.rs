use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};

use crate::config::{ConversionConfig, MediaKind};
use crate::error::ProcessError;
use crate::processor::{AttachmentConverter, ConvertedPage, EncodedImage};

/// Resizing and encoding rules shared by every converter.
#[derive(Debug, Clone)]
pub struct ImageNormalizer {
    max_long_edge: u32,
    thumbnail_size: u32,
    jpeg_quality: u8,
}

impl ImageNormalizer {
    pub fn new(max_long_edge: u32, thumbnail_size: u32, jpeg_quality: u8) -> Self {
        Self {
            max_long_edge,
            thumbnail_size,
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    pub fn from_config(config: &ConversionConfig) -> Self {
        Self::new(config.max_long_edge, config.thumbnail_size, config.jpeg_quality)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, ProcessError> {
        image::load_from_memory(bytes).map_err(|e| ProcessError::ImageDecode(e.to_string()))
    }

    /// Bounds the long edge to `max_long_edge`, keeping the aspect ratio.
    /// Smaller images are re-encoded at their own size.
    pub fn normalize(&self, img: &DynamicImage) -> Result<EncodedImage, ProcessError> {
        let (width, height) = img.dimensions();
        if width.max(height) > self.max_long_edge {
            let resized = img.resize(self.max_long_edge, self.max_long_edge, FilterType::Lanczos3);
            self.encode(&resized)
        } else {
            self.encode(img)
        }
    }

    /// Square, centre-cropped thumbnail.
    pub fn thumbnail(&self, img: &DynamicImage) -> Result<EncodedImage, ProcessError> {
        let thumb = img.resize_to_fill(self.thumbnail_size, self.thumbnail_size, FilterType::Triangle);
        self.encode(&thumb)
    }

    fn encode(&self, img: &DynamicImage) -> Result<EncodedImage, ProcessError> {
        // JPEG has no alpha channel.
        let rgb = img.to_rgb8();
        let mut buffer = Cursor::new(Vec::new());
        let encoder = JpegEncoder::new_with_quality(&mut buffer, self.jpeg_quality);
        rgb.write_with_encoder(encoder)
            .map_err(|e| ProcessError::ImageEncode(e.to_string()))?;

        Ok(EncodedImage {
            bytes: buffer.into_inner(),
            width: rgb.width(),
            height: rgb.height(),
        })
    }
}

/// Converts a single image attachment into one page with a thumbnail.
pub struct ImageConverter {
    normalizer: ImageNormalizer,
}

impl ImageConverter {
    pub fn new(normalizer: ImageNormalizer) -> Self {
        Self { normalizer }
    }
}

impl AttachmentConverter for ImageConverter {
    fn convert(&self, bytes: &[u8]) -> Result<Vec<ConvertedPage>, ProcessError> {
        let _span = tracing::info_span!("processor.image", bytes = bytes.len()).entered();

        let img = self.normalizer.decode(bytes)?;
        let image = self.normalizer.normalize(&img)?;
        let thumbnail = self.normalizer.thumbnail(&img)?;

        Ok(vec![ConvertedPage {
            page_number: 1,
            image,
            thumbnail: Some(thumbnail),
        }])
    }

    fn supports(&self, kind: MediaKind) -> bool {
        matches!(kind, MediaKind::Image)
    }
}
