//! Text acquisition: native character layer first, OCR when a page looks
//! scanned.
//!
//! A page is sent to OCR when its non-whitespace native character count is
//! below `min_native_chars` or its density is below `min_native_density`.
//! Raster inputs have no text layer and always take the OCR path. Pages are
//! acquired strictly in order; the cancel token is checked between pages and
//! raced against rasterisation and recognition.
//!
//! OCR failure on one page is not fatal: the page keeps whatever native text
//! it had (usually none) and a [`PageWarning`] is recorded. A missing OCR
//! engine is fatal, since every later scanned page would fail the same way.

use crate::cancel::CancelToken;
use crate::config::PipelineConfig;
use crate::document::{group_into_lines, PageGeometry, PageText, RasterFormat, TextSource};
use crate::error::{FormFillError, PageWarning};
use crate::geometry::BBox;
use crate::pipeline::ocr::{OcrEngine, OcrError};
use crate::pipeline::pdf::{self, NativePage};
use crate::progress::FormFillProgressCallback;
use crate::state::Stage;
use async_trait::async_trait;
use image::DynamicImage;
use std::sync::Arc;
use tracing::{debug, info};

/// Page access for acquisition.
#[async_trait]
pub trait PageSource: Send + Sync {
    fn page_count(&self) -> usize;

    fn geometry(&self, page: usize) -> Option<PageGeometry>;

    /// False for sources without a text layer (raster images).
    fn has_text_layer(&self) -> bool {
        true
    }

    /// Positioned characters of the text layer, top-left origin.
    fn native_glyphs(&self, page: usize) -> &[(char, BBox)];

    async fn rasterize(&self, page: usize, dpi: u32) -> Result<DynamicImage, FormFillError>;
}

// ── PDF ──────────────────────────────────────────────────────────────────

/// A PDF opened through pdfium. The text layer is read once at open time.
pub struct PdfiumSource {
    bytes: Arc<Vec<u8>>,
    password: Option<String>,
    pages: Vec<NativePage>,
}

impl PdfiumSource {
    pub async fn open(bytes: Arc<Vec<u8>>, password: Option<String>) -> Result<Self, FormFillError> {
        let pages = pdf::read_pages(Arc::clone(&bytes), password.clone()).await?;
        if pages.is_empty() {
            return Err(FormFillError::EmptyDocument);
        }
        Ok(Self {
            bytes,
            password,
            pages,
        })
    }
}

#[async_trait]
impl PageSource for PdfiumSource {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn geometry(&self, page: usize) -> Option<PageGeometry> {
        self.pages.get(page).map(|p| p.geometry)
    }

    fn native_glyphs(&self, page: usize) -> &[(char, BBox)] {
        self.pages.get(page).map(|p| p.glyphs.as_slice()).unwrap_or(&[])
    }

    async fn rasterize(&self, page: usize, dpi: u32) -> Result<DynamicImage, FormFillError> {
        pdf::rasterize(Arc::clone(&self.bytes), self.password.clone(), page, dpi).await
    }
}

// ── Raster ───────────────────────────────────────────────────────────────

/// A single-page raster image. Page units are pixels scaled by
/// `72 / scan_dpi`, so sizes in points mean the same as on a PDF page.
pub struct RasterSource {
    image: Arc<DynamicImage>,
    geometry: PageGeometry,
}

impl RasterSource {
    pub fn new(image: DynamicImage, scan_dpi: u32) -> Self {
        let scale = 72.0 / scan_dpi.max(1) as f32;
        let geometry = PageGeometry {
            width: image.width() as f32 * scale,
            height: image.height() as f32 * scale,
        };
        Self {
            image: Arc::new(image),
            geometry,
        }
    }

    /// Decode `bytes`; multi-frame TIFFs yield their first frame.
    pub fn decode(bytes: &[u8], format: RasterFormat, scan_dpi: u32) -> Result<Self, FormFillError> {
        let image = image::load_from_memory_with_format(bytes, format.image_format())
            .map_err(|e| FormFillError::ImageDecodeFailed { detail: e.to_string() })?;
        if image.width() == 0 || image.height() == 0 {
            return Err(FormFillError::EmptyDocument);
        }
        debug!("Raster: {}x{} px {:?}", image.width(), image.height(), format);
        Ok(Self::new(image, scan_dpi))
    }
}

#[async_trait]
impl PageSource for RasterSource {
    fn page_count(&self) -> usize {
        1
    }

    fn geometry(&self, page: usize) -> Option<PageGeometry> {
        (page == 0).then_some(self.geometry)
    }

    fn has_text_layer(&self) -> bool {
        false
    }

    fn native_glyphs(&self, _page: usize) -> &[(char, BBox)] {
        &[]
    }

    /// The decoded image as-is; OCR maps its pixels onto the page geometry.
    async fn rasterize(&self, page: usize, _dpi: u32) -> Result<DynamicImage, FormFillError> {
        if page != 0 {
            return Err(FormFillError::RenderFailed {
                page: page + 1,
                detail: "raster inputs have a single page".into(),
            });
        }
        Ok(self.image.as_ref().clone())
    }
}

// ── Acquisition ──────────────────────────────────────────────────────────

/// Acquired pages, in page order, plus the warnings raised on the way.
#[derive(Debug, Clone, Default)]
pub struct Acquisition {
    pub pages: Vec<PageText>,
    pub warnings: Vec<PageWarning>,
}

/// The native text of `page`, grouped into lines.
pub fn native_text(source: &dyn PageSource, page: usize) -> Option<PageText> {
    let geometry = source.geometry(page)?;
    Some(PageText {
        page_index: page,
        width: geometry.width,
        height: geometry.height,
        blocks: group_into_lines(source.native_glyphs(page)),
        source: TextSource::Native,
        ocr_confidence: None,
    })
}

/// True when the native text is too thin to trust.
pub fn needs_ocr(native: &PageText, config: &PipelineConfig) -> bool {
    native.char_count() < config.min_native_chars || native.char_density() < config.min_native_density
}

/// Acquire every page of `source`.
pub async fn acquire_text(
    source: &dyn PageSource,
    ocr: &dyn OcrEngine,
    config: &PipelineConfig,
    cancel: &CancelToken,
    progress: &dyn FormFillProgressCallback,
) -> Result<Acquisition, FormFillError> {
    let total = source.page_count();
    let cancelled = || FormFillError::Cancelled {
        stage: Stage::TextAcquired,
    };
    let mut out = Acquisition::default();

    for idx in 0..total {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        let native = native_text(source, idx)
            .ok_or_else(|| FormFillError::Internal(format!("page {} has no geometry", idx + 1)))?;

        let page = if source.has_text_layer() && !needs_ocr(&native, config) {
            native
        } else {
            debug!(
                "Page {}: {} native chars, density {:.3}; using OCR",
                idx + 1,
                native.char_count(),
                native.char_density()
            );
            progress.on_ocr_page(idx + 1, total);
            ocr_page(source, ocr, native, config, cancel, &mut out.warnings).await?
        };

        progress.on_page_acquired(idx + 1, total, page.source, page.char_count());
        out.pages.push(page);
    }

    info!(
        "Acquired {} pages ({} native, {} OCR, {} warnings)",
        total,
        out.pages.iter().filter(|p| p.source == TextSource::Native).count(),
        out.pages.iter().filter(|p| p.source == TextSource::Ocr).count(),
        out.warnings.len()
    );
    Ok(out)
}

/// OCR one page. On failure the native text is kept if there is any.
async fn ocr_page(
    source: &dyn PageSource,
    ocr: &dyn OcrEngine,
    native: PageText,
    config: &PipelineConfig,
    cancel: &CancelToken,
    warnings: &mut Vec<PageWarning>,
) -> Result<PageText, FormFillError> {
    let idx = native.page_index;
    let geometry = PageGeometry {
        width: native.width,
        height: native.height,
    };
    let cancelled = || FormFillError::Cancelled {
        stage: Stage::TextAcquired,
    };
    let fallback = |native: PageText| {
        if native.char_count() > 0 {
            native
        } else {
            PageText::empty(idx, geometry)
        }
    };

    let image = match cancel.run(source.rasterize(idx, config.ocr_dpi)).await {
        None => return Err(cancelled()),
        Some(Ok(image)) => image,
        Some(Err(e)) => {
            warnings.push(PageWarning::RasterisationFailed {
                page: idx + 1,
                detail: e.to_string(),
            });
            return Ok(fallback(native));
        }
    };

    match cancel.run(ocr.recognize(&image, config.ocr_dpi)).await {
        None => Err(cancelled()),
        Some(Err(OcrError::Unavailable(detail))) => Err(FormFillError::OcrUnavailable {
            engine: ocr.name().to_string(),
            detail,
        }),
        Some(Err(OcrError::Failed(detail))) => {
            warnings.push(PageWarning::OcrFailed { page: idx + 1, detail });
            Ok(fallback(native))
        }
        Some(Ok(result)) => {
            let recognised = result.into_page_text(idx, geometry);
            if let Some(confidence) = recognised.ocr_confidence {
                if confidence < config.low_ocr_confidence {
                    warnings.push(PageWarning::LowOcrConfidence {
                        page: idx + 1,
                        confidence,
                    });
                }
            }
            if native.char_count() > recognised.char_count() {
                debug!("Page {}: OCR found less than the text layer; keeping native", idx + 1);
                Ok(native)
            } else {
                Ok(recognised)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ocr::{OcrPage, OcrWord};
    use crate::progress::NoopProgressCallback;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Pages {
        glyphs: Vec<Vec<(char, BBox)>>,
    }

    #[async_trait]
    impl PageSource for Pages {
        fn page_count(&self) -> usize {
            self.glyphs.len()
        }
        fn geometry(&self, page: usize) -> Option<PageGeometry> {
            (page < self.glyphs.len()).then_some(PageGeometry {
                width: 200.0,
                height: 100.0,
            })
        }
        fn native_glyphs(&self, page: usize) -> &[(char, BBox)] {
            &self.glyphs[page]
        }
        async fn rasterize(&self, _page: usize, _dpi: u32) -> Result<DynamicImage, FormFillError> {
            Ok(DynamicImage::new_rgb8(400, 200))
        }
    }

    fn line(text: &str, top: f32) -> Vec<(char, BBox)> {
        text.chars()
            .enumerate()
            .map(|(i, c)| {
                let x0 = 5.0 + i as f32 * 4.0;
                (c, BBox::new(x0, top, x0 + 4.0, top + 8.0))
            })
            .collect()
    }

    enum Behaviour {
        Words(Vec<&'static str>),
        Fail,
        Missing,
    }

    struct FakeOcr {
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl FakeOcr {
        fn new(behaviour: Behaviour) -> Self {
            Self {
                behaviour,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl OcrEngine for FakeOcr {
        fn name(&self) -> &str {
            "fake"
        }
        async fn recognize(&self, image: &DynamicImage, _dpi: u32) -> Result<OcrPage, OcrError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behaviour {
                Behaviour::Words(words) => Ok(OcrPage {
                    width: image.width(),
                    height: image.height(),
                    words: words
                        .iter()
                        .enumerate()
                        .map(|(i, w)| OcrWord {
                            text: w.to_string(),
                            bbox: BBox::new(10.0 + i as f32 * 100.0, 20.0, 90.0 + i as f32 * 100.0, 40.0),
                            confidence: 91.0,
                            line_key: (1, 1, 1),
                        })
                        .collect(),
                }),
                Behaviour::Fail => Err(OcrError::Failed("tesseract exited with 1".into())),
                Behaviour::Missing => Err(OcrError::Unavailable("not found".into())),
            }
        }
    }

    #[derive(Default)]
    struct Events {
        ocr: Mutex<Vec<usize>>,
        acquired: Mutex<Vec<(usize, TextSource)>>,
    }

    impl FormFillProgressCallback for Events {
        fn on_ocr_page(&self, page_num: usize, _total: usize) {
            self.ocr.lock().unwrap().push(page_num);
        }
        fn on_page_acquired(&self, page_num: usize, _total: usize, source: TextSource, _chars: usize) {
            self.acquired.lock().unwrap().push((page_num, source));
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig::builder().min_native_chars(10).build().unwrap()
    }

    #[tokio::test]
    async fn empty_page_goes_to_ocr_once() {
        let source = Pages {
            glyphs: vec![line("Surname: ........ Given name: ........", 10.0), vec![]],
        };
        let ocr = FakeOcr::new(Behaviour::Words(vec!["Address:", "......"]));
        let events = Events::default();
        let out = acquire_text(&source, &ocr, &config(), &CancelToken::new(), &events)
            .await
            .unwrap();

        assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
        assert_eq!(events.ocr.lock().unwrap().as_slice(), [2]);
        assert_eq!(
            events.acquired.lock().unwrap().as_slice(),
            [(1, TextSource::Native), (2, TextSource::Ocr)]
        );
        assert_eq!(out.pages[1].plain_text(), "Address: ......");
        assert_eq!(out.pages[1].ocr_confidence, Some(91.0));
        assert!(out.warnings.is_empty());
    }

    #[tokio::test]
    async fn ocr_boxes_land_in_page_units() {
        let source = Pages { glyphs: vec![vec![]] };
        let ocr = FakeOcr::new(Behaviour::Words(vec!["Name"]));
        let out = acquire_text(&source, &ocr, &config(), &CancelToken::new(), &NoopProgressCallback)
            .await
            .unwrap();
        // 400x200 px raster onto a 200x100 page.
        let bbox = out.pages[0].blocks[0].bbox;
        assert_eq!(bbox, BBox::new(5.0, 10.0, 45.0, 20.0));
    }

    #[tokio::test]
    async fn ocr_failure_leaves_empty_page_and_warning() {
        let source = Pages {
            glyphs: vec![vec![], line("Surname: ........ Given name: ........", 10.0)],
        };
        let ocr = FakeOcr::new(Behaviour::Fail);
        let out = acquire_text(&source, &ocr, &config(), &CancelToken::new(), &NoopProgressCallback)
            .await
            .unwrap();
        assert_eq!(out.pages.len(), 2);
        assert_eq!(out.pages[0].source, TextSource::Empty);
        assert_eq!(out.pages[1].source, TextSource::Native);
        assert!(matches!(out.warnings.as_slice(), [PageWarning::OcrFailed { page: 1, .. }]));
    }

    #[tokio::test]
    async fn missing_engine_is_fatal() {
        let source = Pages { glyphs: vec![vec![]] };
        let ocr = FakeOcr::new(Behaviour::Missing);
        let err = acquire_text(&source, &ocr, &config(), &CancelToken::new(), &NoopProgressCallback)
            .await
            .unwrap_err();
        assert!(matches!(err, FormFillError::OcrUnavailable { ref engine, .. } if engine == "fake"));
    }

    #[tokio::test]
    async fn cancelled_before_first_page() {
        let source = Pages { glyphs: vec![vec![]] };
        let ocr = FakeOcr::new(Behaviour::Words(vec![]));
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = acquire_text(&source, &ocr, &config(), &cancel, &NoopProgressCallback)
            .await
            .unwrap_err();
        assert!(matches!(err, FormFillError::Cancelled { stage: Stage::TextAcquired }));
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn raster_always_uses_ocr() {
        let source = RasterSource::new(DynamicImage::new_luma8(600, 300), 300);
        assert_eq!(
            source.geometry(0),
            Some(PageGeometry {
                width: 144.0,
                height: 72.0
            })
        );
        assert!(source.geometry(1).is_none());
        let ocr = FakeOcr::new(Behaviour::Words(vec!["Όνομα:"]));
        let config = PipelineConfig::builder().min_native_chars(0).min_native_density(0.0).build().unwrap();
        let out = acquire_text(&source, &ocr, &config, &CancelToken::new(), &NoopProgressCallback)
            .await
            .unwrap();
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
        assert_eq!(out.pages[0].source, TextSource::Ocr);
    }

    #[test]
    fn thin_text_needs_ocr() {
        let source = Pages {
            glyphs: vec![line("abc", 10.0)],
        };
        let page = native_text(&source, 0).unwrap();
        assert!(needs_ocr(&page, &config()));
        let lenient = PipelineConfig::builder().min_native_chars(2).build().unwrap();
        assert!(!needs_ocr(&page, &lenient));
    }
}
