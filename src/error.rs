//! Error types for the deckscan library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`DeckScanError`] — **Fatal**: the document cannot be opened or the
//!   pipeline cannot be configured (bad input file, wrong password, provider
//!   not configured). Returned as `Err(DeckScanError)`.
//!
//! * [`PageError`] — **Non-fatal**: a single page was abandoned (timeout,
//!   inference error, render glitch) while the rest of the pass continues.
//!   Recorded in [`crate::output::ExtractionReport::failures`]; the page
//!   simply has no result.
//!
//! * [`VisionError`] — what a [`crate::pipeline::vision::VisionBackend`]
//!   returns. The extractor turns it into a [`PageError`]; it never escapes
//!   an extraction pass.
//!
//! Per-page failures are never propagated out of the extractor. The only
//! document-level failure signal is
//! [`crate::output::ExtractionStatus::TotalFailure`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the deckscan library.
#[derive(Debug, Error)]
pub enum DeckScanError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Deck not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// Requested page number is outside the document.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// pdfium-render returned an error while rasterising a page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// The text layer of a page could not be read.
    #[error("Text extraction failed for page {page}: {detail}")]
    TextExtractionFailed { page: usize, detail: String },

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy,\n\
or place the library next to the executable.\n"
    )]
    PdfiumBindingFailed(String),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page of an extraction pass.
///
/// The page is skipped; its absence from the result map is what callers see.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Render + inference did not finish within the per-page deadline.
    #[error("Page {page}: abandoned after {elapsed_ms}ms (deadline exceeded)")]
    Timeout { page: usize, elapsed_ms: u64 },

    /// The vision backend returned an error. Not retried within the pass.
    #[error("Page {page}: vision inference failed: {detail}")]
    InferenceFailed { page: usize, detail: String },

    /// Page rasterisation failed.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// The page number does not exist in the document.
    #[error("Page {page} is out of range (document has {total} pages)")]
    OutOfRange { page: usize, total: usize },

    /// The pass's total time budget ran out before the page was started.
    #[error("Page {page}: not attempted, total extraction budget of {budget_ms}ms exhausted")]
    BudgetExhausted { page: usize, budget_ms: u64 },

    /// The pass was cancelled before the page was started.
    #[error("Page {page}: not attempted, extraction cancelled")]
    Cancelled { page: usize },
}

impl PageError {
    /// 1-indexed page number the error refers to.
    pub fn page(&self) -> usize {
        match self {
            PageError::Timeout { page, .. }
            | PageError::InferenceFailed { page, .. }
            | PageError::RenderFailed { page, .. }
            | PageError::OutOfRange { page, .. }
            | PageError::BudgetExhausted { page, .. }
            | PageError::Cancelled { page } => *page,
        }
    }

    /// Whether the page was actually started (render or inference attempted).
    pub fn was_attempted(&self) -> bool {
        !matches!(
            self,
            PageError::BudgetExhausted { .. } | PageError::Cancelled { .. }
        )
    }
}

/// Errors raised by a vision inference backend.
#[derive(Debug, Clone, Error)]
pub enum VisionError {
    /// The backend gave up waiting on the provider.
    #[error("vision call timed out: {0}")]
    Timeout(String),

    /// Overloaded backend, network blip, 429/5xx. A later pass may retry.
    #[error("transient vision error: {0}")]
    Transient(String),

    /// Authentication, bad request, content filter. Retrying will not help.
    #[error("vision error: {0}")]
    Permanent(String),
}
