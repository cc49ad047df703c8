//! PDF access via pdfium: page count, text layer and rasterisation.
//!
//! ## Why open the document per call?
//!
//! The upstream `Pdfium` handle is `!Send`, while [`PageSource`] must be
//! `Send + Sync` so the extractor can drive it from `spawn_blocking`.
//! `PdfiumDocument` therefore stores only the path and settings and binds
//! pdfium for each operation. The OS caches the `dlopen`, so repeat binds
//! are cheap next to rendering a page.
//!
//! ## Why cap pixels, not DPI?
//!
//! Slide sizes vary (4:3, 16:9, A4 exports of Keynote decks).
//! `max_rendered_pixels` caps the longest edge regardless of physical size,
//! keeping memory bounded and matching the image-size sweet spot of vision
//! models.

use crate::document::{PageImage, PageSource};
use crate::error::DeckScanError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A PDF on disk, read through pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumDocument {
    path: PathBuf,
    password: Option<String>,
    max_rendered_pixels: u32,
}

impl PdfiumDocument {
    pub fn new(path: &Path, password: Option<String>, max_rendered_pixels: u32) -> Self {
        Self {
            path: path.to_path_buf(),
            password,
            max_rendered_pixels,
        }
    }

    fn with_document<T>(
        &self,
        f: impl FnOnce(&PdfDocument<'_>) -> Result<T, DeckScanError>,
    ) -> Result<T, DeckScanError> {
        let pdfium = load_pdfium()?;
        let document = pdfium
            .load_pdf_from_file(&self.path, self.password.as_deref())
            .map_err(|e| self.map_load_error(e))?;
        f(&document)
    }

    fn map_load_error(&self, e: PdfiumError) -> DeckScanError {
        let err_str = format!("{:?}", e);
        if err_str.to_lowercase().contains("password") {
            if self.password.is_some() {
                DeckScanError::WrongPassword {
                    path: self.path.clone(),
                }
            } else {
                DeckScanError::PasswordRequired {
                    path: self.path.clone(),
                }
            }
        } else {
            DeckScanError::CorruptPdf {
                path: self.path.clone(),
                detail: err_str,
            }
        }
    }
}

fn page_index(page: usize, total: usize) -> Result<u16, DeckScanError> {
    if page == 0 || page > total {
        return Err(DeckScanError::PageOutOfRange { page, total });
    }
    u16::try_from(page - 1).map_err(|_| DeckScanError::PageOutOfRange { page, total })
}

impl PageSource for PdfiumDocument {
    fn page_count(&self) -> Result<usize, DeckScanError> {
        self.with_document(|doc| Ok(doc.pages().len() as usize))
    }

    fn page_text(&self, page: usize) -> Result<String, DeckScanError> {
        self.with_document(|doc| read_page_text(doc, page))
    }

    fn page_texts(&self) -> Result<Vec<(usize, Result<String, DeckScanError>)>, DeckScanError> {
        self.with_document(|doc| {
            let total = doc.pages().len() as usize;
            Ok((1..=total).map(|p| (p, read_page_text(doc, p))).collect())
        })
    }

    fn render_page(&self, page: usize) -> Result<PageImage, DeckScanError> {
        let max_pixels = self.max_rendered_pixels as i32;
        let image = self.with_document(|doc| {
            let pages = doc.pages();
            let idx = page_index(page, pages.len() as usize)?;
            let pdf_page = pages
                .get(idx)
                .map_err(|e| DeckScanError::RasterisationFailed {
                    page,
                    detail: format!("{:?}", e),
                })?;

            let render_config = PdfRenderConfig::new()
                .set_target_width(max_pixels)
                .set_maximum_height(max_pixels);

            let bitmap = pdf_page.render_with_config(&render_config).map_err(|e| {
                DeckScanError::RasterisationFailed {
                    page,
                    detail: format!("{:?}", e),
                }
            })?;
            Ok(bitmap.as_image())
        })?;

        debug!(
            "Rendered page {} → {}x{} px",
            page,
            image.width(),
            image.height()
        );
        let png = encode_png(&image).map_err(|e| DeckScanError::RasterisationFailed {
            page,
            detail: format!("PNG encoding failed: {e}"),
        })?;
        PageImage::from_png(page, &png)
    }
}

fn read_page_text(doc: &PdfDocument<'_>, page: usize) -> Result<String, DeckScanError> {
    let pages = doc.pages();
    let idx = page_index(page, pages.len() as usize)?;
    let pdf_page = pages
        .get(idx)
        .map_err(|e| DeckScanError::TextExtractionFailed {
            page,
            detail: format!("{:?}", e),
        })?;
    let text = pdf_page
        .text()
        .map_err(|e| DeckScanError::TextExtractionFailed {
            page,
            detail: format!("{:?}", e),
        })?;
    Ok(text.all())
}

/// Lossless PNG keeps chart labels and small figures crisp for the model.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Bind the pdfium dynamic library.
///
/// Discovery order:
/// 1. `PDFIUM_LIB_PATH` env var (explicit path to the library file)
/// 2. Alongside the running executable
/// 3. System library search paths
fn load_pdfium() -> Result<Pdfium, DeckScanError> {
    if let Ok(path) = std::env::var("PDFIUM_LIB_PATH") {
        let bindings = Pdfium::bind_to_library(&path)
            .map_err(|e| DeckScanError::PdfiumBindingFailed(format!("{path}: {e:?}")))?;
        return Ok(Pdfium::new(bindings));
    }

    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        let lib_path =
            Pdfium::pdfium_platform_library_name_at_path(exe_dir.to_string_lossy().as_ref());
        if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
            return Ok(Pdfium::new(bindings));
        }
    }

    let bindings = Pdfium::bind_to_system_library()
        .map_err(|e| DeckScanError::PdfiumBindingFailed(format!("{e:?}")))?;
    Ok(Pdfium::new(bindings))
}
