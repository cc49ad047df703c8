//! Test doubles for the two external collaborators.
//!
//! [`InMemoryDeck`] stands in for a PDF and [`MockVisionBackend`] for a
//! vision model, so applications (and this crate's own tests) can drive the
//! whole pipeline without pdfium or network calls. Both record what they
//! were asked to do for later assertions.

use crate::category::Category;
use crate::document::{PageImage, PageSource};
use crate::error::{DeckScanError, VisionError};
use crate::pipeline::vision::{TokenUsage, VisionBackend, VisionPrompt, VisionResponse};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

/// Minimal valid 1x1 PNG.
pub fn minimal_png() -> Vec<u8> {
    vec![
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, // PNG signature
        0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52, // IHDR chunk
        0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, // 1x1
        0x08, 0x02, 0x00, 0x00, 0x00, 0x90, 0x77, 0x53, // 8-bit RGB
        0xDE, // IHDR CRC
        0x00, 0x00, 0x00, 0x0C, 0x49, 0x44, 0x41, 0x54, // IDAT chunk
        0x08, 0xD7, 0x63, 0xF8, 0xCF, 0xC0, 0x00, 0x00, // compressed
        0x00, 0x02, 0x00, 0x01, 0xE2, 0x21, 0xBC, 0x33, // IDAT CRC
        0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, // IEND chunk
        0xAE, 0x42, 0x60, 0x82, // IEND CRC
    ]
}

/// An in-memory deck: per-page text, rendered as a blank PNG.
///
/// A `None` text makes that page unreadable. Rendered images go through
/// real temporary files so cleanup can be asserted.
#[derive(Default)]
pub struct InMemoryDeck {
    texts: Vec<Option<String>>,
    render_failures: BTreeSet<usize>,
    render_delays: HashMap<usize, Duration>,
    rendered: Mutex<Vec<PathBuf>>,
    rendering: AtomicUsize,
    peak_rendering: AtomicUsize,
}

impl InMemoryDeck {
    /// Pages in order; index 0 is page 1.
    pub fn from_texts(texts: Vec<Option<String>>) -> Self {
        Self {
            texts,
            ..Default::default()
        }
    }

    /// A deck of `pages` slides with no text at all.
    pub fn blank(pages: usize) -> Self {
        Self::from_texts(vec![Some(String::new()); pages])
    }

    /// A deck of `total` pages where the listed pages carry the given text
    /// and every other page a keyword-free filler.
    pub fn with_pages(total: usize, entries: &[(usize, &str)]) -> Self {
        let mut texts: Vec<Option<String>> = (1..=total)
            .map(|p| Some(format!("Slide {p}. Thank you for your attention.")))
            .collect();
        for (page, text) in entries {
            if (1..=total).contains(page) {
                texts[page - 1] = Some(text.to_string());
            }
        }
        Self::from_texts(texts)
    }

    /// Make rendering of `page` fail.
    pub fn fail_render(mut self, page: usize) -> Self {
        self.render_failures.insert(page);
        self
    }

    /// Block the rendering thread for `delay` before rendering `page`.
    pub fn with_render_delay(mut self, page: usize, delay: Duration) -> Self {
        self.render_delays.insert(page, delay);
        self
    }

    /// Highest number of renders observed running at the same time.
    pub fn peak_concurrent_renders(&self) -> usize {
        self.peak_rendering.load(Ordering::SeqCst)
    }

    /// Paths of every image rendered so far.
    pub fn rendered_paths(&self) -> Vec<PathBuf> {
        self.rendered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn check_range(&self, page: usize) -> Result<(), DeckScanError> {
        if page == 0 || page > self.texts.len() {
            return Err(DeckScanError::PageOutOfRange {
                page,
                total: self.texts.len(),
            });
        }
        Ok(())
    }
}

impl PageSource for InMemoryDeck {
    fn page_count(&self) -> Result<usize, DeckScanError> {
        Ok(self.texts.len())
    }

    fn page_text(&self, page: usize) -> Result<String, DeckScanError> {
        self.check_range(page)?;
        self.texts[page - 1]
            .clone()
            .ok_or_else(|| DeckScanError::TextExtractionFailed {
                page,
                detail: "unreadable page".into(),
            })
    }

    fn render_page(&self, page: usize) -> Result<PageImage, DeckScanError> {
        self.check_range(page)?;
        if self.render_failures.contains(&page) {
            return Err(DeckScanError::RasterisationFailed {
                page,
                detail: "injected render failure".into(),
            });
        }
        let now = self.rendering.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_rendering.fetch_max(now, Ordering::SeqCst);
        let _rendering = InFlight(&self.rendering);
        if let Some(delay) = self.render_delays.get(&page) {
            std::thread::sleep(*delay);
        }
        let image = PageImage::from_png(page, &minimal_png())?;
        self.rendered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(image.path().to_path_buf());
        Ok(image)
    }
}

/// Scripted behaviour for one page.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Reply immediately with this content and out-of-band confidence.
    Respond {
        content: String,
        confidence: Option<f32>,
    },
    /// Sleep, then reply with the default content.
    Delay(Duration),
    /// Return this error.
    Fail(VisionError),
    /// Never reply.
    Hang,
}

/// A scripted [`VisionBackend`].
///
/// Pages without a script get a default JSON reply naming the page and its
/// category, with confidence 0.8.
#[derive(Default)]
pub struct MockVisionBackend {
    behaviors: RwLock<HashMap<usize, MockBehavior>>,
    default_delay: Option<Duration>,
    calls: Mutex<Vec<usize>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Decrements the in-flight counter however the call ends.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockVisionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(self, page: usize, behavior: MockBehavior) -> Self {
        self.behaviors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(page, behavior);
        self
    }

    pub fn with_response(self, page: usize, content: impl Into<String>, confidence: f32) -> Self {
        self.script(
            page,
            MockBehavior::Respond {
                content: content.into(),
                confidence: Some(confidence),
            },
        )
    }

    /// Reply with raw model text, leaving confidence to the parser.
    pub fn with_raw_reply(self, page: usize, content: impl Into<String>) -> Self {
        self.script(
            page,
            MockBehavior::Respond {
                content: content.into(),
                confidence: None,
            },
        )
    }

    pub fn with_delay(self, page: usize, delay: Duration) -> Self {
        self.script(page, MockBehavior::Delay(delay))
    }

    pub fn with_failure(self, page: usize, error: VisionError) -> Self {
        self.script(page, MockBehavior::Fail(error))
    }

    pub fn with_hang(self, page: usize) -> Self {
        self.script(page, MockBehavior::Hang)
    }

    /// Delay applied to every unscripted page.
    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = Some(delay);
        self
    }

    /// Pages in the order their calls started.
    pub fn calls(&self) -> Vec<usize> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }

    /// Highest number of calls that were in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn default_reply(page: usize, category: Category) -> VisionResponse {
        VisionResponse {
            content: format!(
                r#"{{"content": "Slide {page} {category} details: $1.{page}M reported", "key_phrases": ["{category}"]}}"#
            ),
            confidence: Some(0.8),
            usage: TokenUsage {
                input_tokens: 800,
                output_tokens: 60,
            },
        }
    }
}

#[async_trait]
impl VisionBackend for MockVisionBackend {
    async fn vision_extract(
        &self,
        _image_png: &[u8],
        prompt: &VisionPrompt,
    ) -> Result<VisionResponse, VisionError> {
        let page = prompt.page_number;
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(page);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let behavior = self
            .behaviors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&page)
            .cloned();

        match behavior {
            Some(MockBehavior::Respond {
                content,
                confidence,
            }) => Ok(VisionResponse {
                content,
                confidence,
                usage: TokenUsage::default(),
            }),
            Some(MockBehavior::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(Self::default_reply(page, prompt.category))
            }
            Some(MockBehavior::Fail(error)) => Err(error),
            Some(MockBehavior::Hang) => {
                std::future::pending::<()>().await;
                unreachable!("pending never resolves")
            }
            None => {
                if let Some(delay) = self.default_delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(Self::default_reply(page, prompt.category))
            }
        }
    }
}
