//! Source document access: open a PDF, report its page count, render pages.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library and every call is CPU-bound and blocking.
//! `tokio::task::spawn_blocking` moves the work onto the blocking thread pool
//! so the async workers driving recognition calls never stall.
//!
//! ## Per-call isolation
//!
//! [`PdfiumSource::render_page`] reopens the document for every call and
//! drops it before returning. Concurrent renders of different pages of the
//! same file therefore share no document state, and peak memory is bounded by
//! the number of in-flight renders rather than by document length.

use crate::error::SourceAccessError;
use crate::pipeline::input::{document_filename, validate_local};
use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A rendered page. Dropping it releases the pixel buffer.
pub type RasterImage = DynamicImage;

/// An opened source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentHandle {
    path: PathBuf,
    filename: String,
    page_count: u32,
}

impl DocumentHandle {
    pub fn new(path: impl Into<PathBuf>, page_count: u32) -> Self {
        let path = path.into();
        let filename = document_filename(&path);
        Self {
            path,
            filename,
            page_count,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Natural key used for the ledger's issue row.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Total pages in the document.
    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Reject page numbers outside `1..=page_count`.
    pub fn check_page(&self, page: u32) -> Result<(), SourceAccessError> {
        if page == 0 || page > self.page_count {
            return Err(SourceAccessError::PageOutOfRange {
                page,
                total: self.page_count,
            });
        }
        Ok(())
    }
}

/// Opens documents and renders their pages.
///
/// Implementations must allow concurrent `render_page` calls for different
/// pages of the same handle.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Open `path` and read its page count.
    async fn open(&self, path: &Path) -> Result<DocumentHandle, SourceAccessError>;

    /// Render page `page` (1-based) at `dpi`.
    async fn render_page(
        &self,
        handle: &DocumentHandle,
        page: u32,
        dpi: u32,
    ) -> Result<RasterImage, SourceAccessError>;
}

/// [`DocumentSource`] backed by pdfium.
///
/// Holds only the library location. Each blocking task binds its own
/// `Pdfium` instance, so no pdfium state crosses threads.
#[derive(Debug, Clone)]
pub struct PdfiumSource {
    library_dir: Option<PathBuf>,
}

impl PdfiumSource {
    /// Use pdfium from `library_dir`, or from the system library search path.
    ///
    /// Binds once up front so a missing library fails here rather than on
    /// the first document.
    pub fn new(library_dir: Option<&Path>) -> Result<Self, SourceAccessError> {
        let source = Self {
            library_dir: library_dir.map(Path::to_path_buf),
        };
        bind(source.library_dir.as_deref())?;
        info!("pdfium available");
        Ok(source)
    }
}

fn bind(library_dir: Option<&Path>) -> Result<Pdfium, SourceAccessError> {
    let bindings = match library_dir {
        Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| SourceAccessError::EngineUnavailable(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

#[async_trait]
impl DocumentSource for PdfiumSource {
    async fn open(&self, path: &Path) -> Result<DocumentHandle, SourceAccessError> {
        validate_local(path)?;

        let library_dir = self.library_dir.clone();
        let owned = path.to_path_buf();
        let page_count = tokio::task::spawn_blocking(move || {
            let pdfium = bind(library_dir.as_deref())?;
            page_count_blocking(&pdfium, &owned)
        })
        .await
        .map_err(|e| SourceAccessError::Internal(format!("Open task panicked: {}", e)))??;

        info!("Opened {}: {} pages", path.display(), page_count);
        Ok(DocumentHandle::new(path, page_count))
    }

    async fn render_page(
        &self,
        handle: &DocumentHandle,
        page: u32,
        dpi: u32,
    ) -> Result<RasterImage, SourceAccessError> {
        handle.check_page(page)?;

        let library_dir = self.library_dir.clone();
        let path = handle.path().to_path_buf();
        tokio::task::spawn_blocking(move || {
            let pdfium = bind(library_dir.as_deref())?;
            render_page_blocking(&pdfium, &path, page, dpi)
        })
        .await
        .map_err(|e| SourceAccessError::Internal(format!("Render task panicked: {}", e)))?
    }
}

fn load<'a>(pdfium: &'a Pdfium, path: &Path) -> Result<PdfDocument<'a>, SourceAccessError> {
    pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| SourceAccessError::Corrupt {
            path: path.to_path_buf(),
            detail: format!("{:?}", e),
        })
}

/// Blocking page count.
fn page_count_blocking(pdfium: &Pdfium, path: &Path) -> Result<u32, SourceAccessError> {
    let document = load(pdfium, path)?;
    Ok(u32::from(document.pages().len()))
}

/// Blocking render of one page.
fn render_page_blocking(
    pdfium: &Pdfium,
    path: &Path,
    page: u32,
    dpi: u32,
) -> Result<RasterImage, SourceAccessError> {
    let document = load(pdfium, path)?;
    let pages = document.pages();
    let total = u32::from(pages.len());
    if page == 0 || page > total {
        return Err(SourceAccessError::PageOutOfRange { page, total });
    }

    let index = u16::try_from(page - 1).map_err(|_| SourceAccessError::PageOutOfRange {
        page,
        total,
    })?;
    let pdf_page = pages
        .get(index)
        .map_err(|e| SourceAccessError::RenderFailed {
            page,
            detail: format!("{:?}", e),
        })?;

    let render_config = PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / 72.0);
    let bitmap = pdf_page
        .render_with_config(&render_config)
        .map_err(|e| SourceAccessError::RenderFailed {
            page,
            detail: format!("{:?}", e),
        })?;

    let image = bitmap.as_image();
    debug!(
        "Rendered page {} of {} → {}x{} px",
        page,
        path.display(),
        image.width(),
        image.height()
    );
    Ok(image)
}
