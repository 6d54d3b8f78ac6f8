use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use crate::config::MediaKind;
use crate::error::ProcessError;
use crate::processor::{AttachmentConverter, ConvertedPage, ImageNormalizer};

/// Rasterises PDF pages to PNG bytes.
pub trait PageRenderer: Send + Sync {
    fn page_count(&self, pdf: &[u8]) -> Result<u32, ProcessError>;

    /// Renders pages `1..=last_page`, in order.
    fn render(&self, pdf: &[u8], last_page: u32, dpi: u32) -> Result<Vec<Vec<u8>>, ProcessError>;
}

/// Renders through poppler's `pdftoppm`; counts pages with lopdf, falling
/// back to `pdfinfo` for files lopdf cannot parse.
#[derive(Debug, Default)]
pub struct PdftoppmRenderer;

impl PdftoppmRenderer {
    pub fn new() -> Self {
        Self
    }
}

/// Scratch directory removed on drop.
struct ScratchDir(PathBuf);

impl ScratchDir {
    fn create(label: &str) -> Result<Self, ProcessError> {
        let path = std::env::temp_dir().join(format!("galleria_{}_{}", label, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&path).map_err(|e| {
            ProcessError::DocumentProcessing(format!("Failed to create scratch directory: {}", e))
        })?;
        Ok(Self(path))
    }

    fn path(&self) -> &Path {
        &self.0
    }

    fn write_pdf(&self, pdf: &[u8]) -> Result<PathBuf, ProcessError> {
        let pdf_path = self.0.join("input.pdf");
        std::fs::write(&pdf_path, pdf).map_err(|e| {
            ProcessError::DocumentProcessing(format!("Failed to write temp PDF: {}", e))
        })?;
        Ok(pdf_path)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

fn run_poppler(command: &mut Command, tool: &str) -> Result<Vec<u8>, ProcessError> {
    let output = command.output().map_err(|e| {
        ProcessError::DocumentProcessing(format!(
            "Failed to run {}: {}. Make sure poppler-utils is installed.",
            tool, e
        ))
    })?;

    if !output.status.success() {
        return Err(ProcessError::DocumentProcessing(format!(
            "{} failed: {}",
            tool,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(output.stdout)
}

/// Parses the `Pages:` line of `pdfinfo` output.
fn parse_pdfinfo_pages(stdout: &str) -> Option<u32> {
    stdout
        .lines()
        .find_map(|line| line.strip_prefix("Pages:"))
        .and_then(|count| count.trim().parse().ok())
}

/// `pdftoppm` zero-pads page suffixes to the width of the last page number,
/// and the width varies between poppler versions.
fn find_rendered_page(dir: &Path, page: u32) -> Option<PathBuf> {
    (1..=4)
        .map(|width| dir.join(format!("page-{:0width$}.png", page, width = width)))
        .find(|p| p.exists())
}

impl PageRenderer for PdftoppmRenderer {
    fn page_count(&self, pdf: &[u8]) -> Result<u32, ProcessError> {
        match lopdf::Document::load_mem(pdf) {
            Ok(doc) => Ok(doc.get_pages().len() as u32),
            Err(e) => {
                tracing::warn!("lopdf failed to parse document: {}. Falling back to pdfinfo.", e);
                let scratch = ScratchDir::create("pagecount")?;
                let pdf_path = scratch.write_pdf(pdf)?;
                let stdout = run_poppler(Command::new("pdfinfo").arg(&pdf_path), "pdfinfo")?;
                parse_pdfinfo_pages(&String::from_utf8_lossy(&stdout)).ok_or_else(|| {
                    ProcessError::DocumentProcessing("pdfinfo reported no page count".to_string())
                })
            }
        }
    }

    fn render(&self, pdf: &[u8], last_page: u32, dpi: u32) -> Result<Vec<Vec<u8>>, ProcessError> {
        let scratch = ScratchDir::create("render")?;
        let pdf_path = scratch.write_pdf(pdf)?;
        let prefix = scratch.path().join("page");

        run_poppler(
            Command::new("pdftoppm")
                .arg("-png")
                .args(["-r", &dpi.to_string()])
                .args(["-f", "1"])
                .args(["-l", &last_page.to_string()])
                .arg(&pdf_path)
                .arg(&prefix),
            "pdftoppm",
        )?;

        (1..=last_page)
            .map(|page| -> Result<Vec<u8>, ProcessError> {
                let path = find_rendered_page(scratch.path(), page).ok_or_else(|| {
                    ProcessError::DocumentProcessing(format!("Page {} was not rendered", page))
                })?;
                std::fs::read(&path).map_err(|e| {
                    ProcessError::DocumentProcessing(format!(
                        "Failed to read rendered page {}: {}",
                        page, e
                    ))
                })
            })
            .collect()
    }
}

/// Converts a document into one page image per page, in page order. Only
/// the first page gets a thumbnail.
pub struct DocumentConverter {
    renderer: Arc<dyn PageRenderer>,
    normalizer: ImageNormalizer,
    dpi: u32,
    max_pages: u32,
}

impl DocumentConverter {
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        normalizer: ImageNormalizer,
        dpi: u32,
        max_pages: u32,
    ) -> Self {
        Self {
            renderer,
            normalizer,
            dpi,
            max_pages: max_pages.max(1),
        }
    }
}

impl AttachmentConverter for DocumentConverter {
    fn convert(&self, bytes: &[u8]) -> Result<Vec<ConvertedPage>, ProcessError> {
        let _span = tracing::info_span!("processor.document", bytes = bytes.len()).entered();

        let page_count = self.renderer.page_count(bytes)?;
        if page_count == 0 {
            return Err(ProcessError::EmptyDocument);
        }

        let last_page = page_count.min(self.max_pages);
        if last_page < page_count {
            tracing::warn!(
                page_count,
                max_pages = self.max_pages,
                "document exceeds page limit, ignoring trailing pages"
            );
        }

        let rendered = self.renderer.render(bytes, last_page, self.dpi)?;
        if rendered.is_empty() {
            return Err(ProcessError::EmptyDocument);
        }

        rendered
            .iter()
            .zip(1u32..)
            .map(|(png, page_number)| -> Result<ConvertedPage, ProcessError> {
                let img = self.normalizer.decode(png)?;
                let thumbnail = if page_number == 1 {
                    Some(self.normalizer.thumbnail(&img)?)
                } else {
                    None
                };
                Ok(ConvertedPage {
                    page_number,
                    image: self.normalizer.normalize(&img)?,
                    thumbnail,
                })
            })
            .collect()
    }

    fn supports(&self, kind: MediaKind) -> bool {
        matches!(kind, MediaKind::Document)
    }
}
