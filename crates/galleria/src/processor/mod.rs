//! Attachment conversion: raw attachment bytes in, normalized JPEG pages out.

pub mod document;
pub mod image;

pub use self::document::{DocumentConverter, PageRenderer, PdftoppmRenderer};
pub use self::image::{ImageConverter, ImageNormalizer};

use std::sync::Arc;

use crate::config::{ConversionConfig, MediaKind};
use crate::error::ProcessError;

/// A JPEG-encoded image and its pixel size.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// One page of a converted attachment. Plain images yield a single page
/// numbered 1.
#[derive(Debug, Clone)]
pub struct ConvertedPage {
    pub page_number: u32,
    pub image: EncodedImage,
    pub thumbnail: Option<EncodedImage>,
}

pub trait AttachmentConverter: Send + Sync {
    fn convert(&self, bytes: &[u8]) -> Result<Vec<ConvertedPage>, ProcessError>;
    fn supports(&self, kind: MediaKind) -> bool;
}

pub struct ConverterRegistry {
    converters: Vec<Box<dyn AttachmentConverter>>,
}

impl ConverterRegistry {
    /// Image converter plus a document converter rendering through poppler.
    pub fn new(config: &ConversionConfig) -> Self {
        Self::with_renderer(config, Arc::new(PdftoppmRenderer::new()))
    }

    pub fn with_renderer(config: &ConversionConfig, renderer: Arc<dyn PageRenderer>) -> Self {
        let normalizer = ImageNormalizer::from_config(config);
        Self {
            converters: vec![
                Box::new(ImageConverter::new(normalizer.clone())),
                Box::new(DocumentConverter::new(
                    renderer,
                    normalizer,
                    config.document_dpi,
                    config.max_document_pages,
                )),
            ],
        }
    }

    pub fn convert(&self, kind: MediaKind, bytes: &[u8]) -> Result<Vec<ConvertedPage>, ProcessError> {
        self.converters
            .iter()
            .find(|c| c.supports(kind))
            .ok_or_else(|| ProcessError::UnsupportedFormat(format!("{:?}", kind)))?
            .convert(bytes)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{png_bytes, FakeRenderer};
    use super::*;

    fn config() -> ConversionConfig {
        serde_json::from_str("{}").unwrap()
    }

    #[test]
    fn test_registry_dispatches_by_kind() {
        let registry = ConverterRegistry::with_renderer(&config(), Arc::new(FakeRenderer { pages: 3 }));

        let image_pages = registry.convert(MediaKind::Image, &png_bytes(64, 32)).unwrap();
        assert_eq!(image_pages.len(), 1);

        let document_pages = registry.convert(MediaKind::Document, b"%PDF-fake").unwrap();
        assert_eq!(document_pages.len(), 3);
    }

    #[test]
    fn test_registry_surfaces_decode_errors() {
        let registry = ConverterRegistry::with_renderer(&config(), Arc::new(FakeRenderer { pages: 1 }));
        assert!(matches!(
            registry.convert(MediaKind::Image, b"definitely not an image"),
            Err(ProcessError::ImageDecode(_))
        ));
    }
}
