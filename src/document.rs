//! Document access: the [`PageSource`] seam and the [`DocumentHandle`] that
//! carries it through the pipeline.
//!
//! The selector needs each page's text layer and the extractor needs each
//! page as an image. Both go through [`PageSource`] so the pipeline runs the
//! same way against a real PDF ([`crate::pipeline::render::PdfiumDocument`])
//! and against an in-memory deck in tests ([`crate::testing::InMemoryDeck`]).
//!
//! `PageSource` methods are synchronous: pdfium is blocking and not
//! async-safe, so callers in async code go through `spawn_blocking`.

use crate::config::AnalysisConfig;
use crate::error::DeckScanError;
use crate::pipeline::render::PdfiumDocument;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::debug;

/// Page-level access to a document. Page numbers are 1-indexed.
pub trait PageSource: Send + Sync {
    /// Total number of pages.
    fn page_count(&self) -> Result<usize, DeckScanError>;

    /// Extractable text of one page (may be empty for image-only slides).
    fn page_text(&self, page: usize) -> Result<String, DeckScanError>;

    /// Render one page to a PNG held in a scoped temporary file.
    fn render_page(&self, page: usize) -> Result<PageImage, DeckScanError>;

    /// Text of every page, each with its own outcome so one unreadable page
    /// does not hide the rest. Sources that can open the document once
    /// should override this.
    fn page_texts(&self) -> Result<Vec<(usize, Result<String, DeckScanError>)>, DeckScanError> {
        let total = self.page_count()?;
        Ok((1..=total).map(|p| (p, self.page_text(p))).collect())
    }
}

/// A rendered page image on disk.
///
/// The backing file is deleted when the value is dropped, so every exit
/// path of a page extraction (success, error, timeout, cancellation)
/// discards the artifact.
pub struct PageImage {
    page: usize,
    file: NamedTempFile,
}

impl PageImage {
    /// Write PNG bytes to a fresh temporary file.
    pub fn from_png(page: usize, png: &[u8]) -> Result<Self, DeckScanError> {
        let mut file = tempfile::Builder::new()
            .prefix(&format!("deckscan-p{page}-"))
            .suffix(".png")
            .tempfile()
            .map_err(|e| DeckScanError::Internal(format!("tempfile: {e}")))?;
        file.write_all(png)
            .map_err(|e| DeckScanError::Internal(format!("tempfile write: {e}")))?;
        debug!("Page {} image → {} ({} bytes)", page, file.path().display(), png.len());
        Ok(Self { page, file })
    }

    /// 1-indexed page number this image was rendered from.
    pub fn page(&self) -> usize {
        self.page
    }

    /// Path of the temporary PNG. Only valid while `self` is alive.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Read the PNG bytes back.
    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(self.file.path()).await
    }
}

impl fmt::Debug for PageImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageImage")
            .field("page", &self.page)
            .field("path", &self.file.path())
            .finish()
    }
}

/// Identifies a document for the lifetime of an analysis.
///
/// Immutable once created; cheap to clone (the source is shared).
#[derive(Clone)]
pub struct DocumentHandle {
    reference: String,
    page_count: usize,
    source: Arc<dyn PageSource>,
}

impl fmt::Debug for DocumentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentHandle")
            .field("reference", &self.reference)
            .field("page_count", &self.page_count)
            .finish()
    }
}

impl DocumentHandle {
    /// Wrap an arbitrary page source. Reads the page count once.
    pub fn new(
        reference: impl Into<String>,
        source: Arc<dyn PageSource>,
    ) -> Result<Self, DeckScanError> {
        let page_count = source.page_count()?;
        Ok(Self {
            reference: reference.into(),
            page_count,
            source,
        })
    }

    /// Open a local PDF deck through pdfium.
    ///
    /// Blocking: validates the file, binds pdfium and reads the page count.
    /// Use [`DocumentHandle::open`] from async code.
    pub fn open_pdf(path: impl AsRef<Path>, config: &AnalysisConfig) -> Result<Self, DeckScanError> {
        let path = validate_pdf_path(path.as_ref())?;
        let source = PdfiumDocument::new(&path, config.password.clone(), config.max_rendered_pixels);
        Self::new(path.display().to_string(), Arc::new(source))
    }

    /// Async wrapper around [`DocumentHandle::open_pdf`].
    pub async fn open(path: impl AsRef<Path>, config: &AnalysisConfig) -> Result<Self, DeckScanError> {
        let path = path.as_ref().to_path_buf();
        let config = config.clone();
        tokio::task::spawn_blocking(move || Self::open_pdf(&path, &config))
            .await
            .map_err(|e| DeckScanError::Internal(format!("Open task panicked: {e}")))?
    }

    /// Path or other caller-meaningful reference.
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Total pages in the document.
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Shared handle on the underlying page source.
    pub fn source(&self) -> Arc<dyn PageSource> {
        Arc::clone(&self.source)
    }
}

/// Validate existence, readability and PDF magic bytes of a local file.
fn validate_pdf_path(path: &Path) -> Result<PathBuf, DeckScanError> {
    let path = path.to_path_buf();

    if !path.exists() {
        return Err(DeckScanError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            use std::io::Read;
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
                return Err(DeckScanError::NotAPdf { path, magic });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(DeckScanError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(DeckScanError::FileNotFound { path });
        }
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(path)
}
