//! pdfium access: page geometry, the native character layer, rasterisation
//! and drawing whiteouts/overlays.
//!
//! pdfium is not async-aware and keeps thread-local state, so every public
//! function here hands its work to `tokio::task::spawn_blocking` and opens
//! the document inside the blocking closure. Coordinates leave this module
//! with a top-left origin; pdfium's bottom-left origin never escapes.
//!
//! ## Library lookup
//!
//! 1. `PDFIUM_LIB_PATH` (a file or a directory)
//! 2. the current directory
//! 3. the system library path

use crate::document::PageGeometry;
use crate::error::FormFillError;
use crate::fields::RenderInstruction;
use crate::geometry::BBox;
use crate::pipeline::blanks::split_at_runs;
use crate::pipeline::fonts::FontCatalog;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Geometry and positioned characters of one PDF page.
#[derive(Debug, Clone, PartialEq)]
pub struct NativePage {
    pub geometry: PageGeometry,
    pub glyphs: Vec<(char, BBox)>,
}

fn bind() -> Result<Pdfium, FormFillError> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Ok(p) = std::env::var("PDFIUM_LIB_PATH") {
        let path = PathBuf::from(p);
        candidates.push(if path.is_dir() {
            Pdfium::pdfium_platform_library_name_at_path(&path)
        } else {
            path
        });
    }
    candidates.push(Pdfium::pdfium_platform_library_name_at_path("./"));

    for path in &candidates {
        match Pdfium::bind_to_library(path) {
            Ok(bindings) => return Ok(Pdfium::new(bindings)),
            Err(e) => debug!("pdfium not at {}: {:?}", path.display(), e),
        }
    }
    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| FormFillError::PdfiumBindingFailed(format!("{e:?}")))
}

fn open<'a>(pdfium: &'a Pdfium, bytes: &'a [u8], password: Option<&str>) -> Result<PdfDocument<'a>, FormFillError> {
    pdfium.load_pdf_from_byte_slice(bytes, password).map_err(|e| {
        let detail = format!("{e:?}");
        if detail.contains("Password") || detail.contains("password") {
            FormFillError::PasswordRequired
        } else {
            FormFillError::CorruptPdf { detail }
        }
    })
}

async fn blocking<T, F>(what: &'static str, f: F) -> Result<T, FormFillError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, FormFillError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| FormFillError::Internal(format!("{what} task panicked: {e}")))?
}

// ── Reading ──────────────────────────────────────────────────────────────

/// Geometry and character layer of every page.
pub async fn read_pages(bytes: Arc<Vec<u8>>, password: Option<String>) -> Result<Vec<NativePage>, FormFillError> {
    blocking("PDF read", move || read_pages_blocking(&bytes, password.as_deref())).await
}

fn read_pages_blocking(bytes: &[u8], password: Option<&str>) -> Result<Vec<NativePage>, FormFillError> {
    let pdfium = bind()?;
    let document = open(&pdfium, bytes, password)?;
    let pages = document.pages();
    info!("PDF loaded: {} pages", pages.len());

    let mut out = Vec::with_capacity(pages.len() as usize);
    for (idx, page) in pages.iter().enumerate() {
        let width = page.width().value;
        let height = page.height().value;
        let mut glyphs = Vec::new();
        match page.text() {
            Ok(text) => {
                for ch in text.chars().iter() {
                    let Some(c) = ch.unicode_char() else {
                        continue;
                    };
                    let Ok(rect) = ch.loose_bounds() else {
                        continue;
                    };
                    glyphs.push((
                        c,
                        BBox::new(
                            rect.left.value,
                            height - rect.top.value,
                            rect.right.value,
                            height - rect.bottom.value,
                        ),
                    ));
                }
            }
            Err(e) => warn!("Page {}: no text layer ({:?})", idx + 1, e),
        }
        debug!("Page {}: {:.0}x{:.0} pt, {} native chars", idx + 1, width, height, glyphs.len());
        out.push(NativePage {
            geometry: PageGeometry { width, height },
            glyphs,
        });
    }
    Ok(out)
}

/// Render one page at `dpi`.
pub async fn rasterize(
    bytes: Arc<Vec<u8>>,
    password: Option<String>,
    page_index: usize,
    dpi: u32,
) -> Result<DynamicImage, FormFillError> {
    blocking("Rasterise", move || {
        let pdfium = bind()?;
        let document = open(&pdfium, &bytes, password.as_deref())?;
        let failed = |detail: String| FormFillError::RenderFailed {
            page: page_index + 1,
            detail,
        };
        let page = document
            .pages()
            .get(page_index as u16)
            .map_err(|e| failed(format!("{e:?}")))?;
        let config = PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / 72.0);
        let bitmap = page
            .render_with_config(&config)
            .map_err(|e| failed(format!("{e:?}")))?;
        let image = bitmap.as_image();
        debug!("Page {}: rendered {}x{} px at {} dpi", page_index + 1, image.width(), image.height(), dpi);
        Ok(image)
    })
    .await
}

// ── Drawing ──────────────────────────────────────────────────────────────

/// Options for [`draw`].
#[derive(Debug, Clone)]
pub struct DrawOptions {
    pub password: Option<String>,
    pub text_color: [u8; 3],
    pub min_run_len: usize,
}

/// Apply whiteouts and overlays and return the saved PDF.
pub async fn draw(
    bytes: Arc<Vec<u8>>,
    instructions: Vec<RenderInstruction>,
    fonts: FontCatalog,
    options: DrawOptions,
) -> Result<Vec<u8>, FormFillError> {
    blocking("PDF draw", move || draw_blocking(&bytes, &instructions, &fonts, &options)).await
}

fn draw_blocking(
    bytes: &[u8],
    instructions: &[RenderInstruction],
    fonts: &FontCatalog,
    options: &DrawOptions,
) -> Result<Vec<u8>, FormFillError> {
    let pdfium = bind()?;
    let mut document = open(&pdfium, bytes, options.password.as_deref())?;

    let mut tokens: HashMap<&str, PdfFontToken> = HashMap::new();
    for inst in instructions {
        let Some(text) = &inst.text else {
            continue;
        };
        if tokens.contains_key(text.font.as_str()) {
            continue;
        }
        let face = fonts.get(&text.font).ok_or_else(|| FormFillError::RenderFailed {
            page: inst.page + 1,
            detail: format!("font '{}' is not loaded", text.font),
        })?;
        let token = document
            .fonts_mut()
            .load_true_type_from_bytes(face.bytes(), true)
            .map_err(|e| FormFillError::RenderFailed {
                page: inst.page + 1,
                detail: format!("embedding font '{}': {e:?}", text.font),
            })?;
        tokens.insert(text.font.as_str(), token);
    }

    let [r, g, b] = options.text_color;
    let ink = PdfColor::new(r, g, b, 255);
    let mut page_indices: Vec<usize> = instructions.iter().map(|i| i.page).collect();
    page_indices.sort_unstable();
    page_indices.dedup();

    for page_index in page_indices {
        let failed = |detail: String| FormFillError::RenderFailed {
            page: page_index + 1,
            detail,
        };
        let mut page = document
            .pages()
            .get(page_index as u16)
            .map_err(|e| failed(format!("{e:?}")))?;
        let height = page.height().value;

        let stripped = strip_text_layer(&mut page, options.min_run_len);

        for inst in instructions.iter().filter(|i| i.page == page_index) {
            let w = inst.whiteout;
            let rect = PdfRect::new_from_values(height - w.bottom, w.x0, height - w.top, w.x1);
            page.objects_mut()
                .create_path_object_rect(rect, None, None, Some(PdfColor::WHITE))
                .map_err(|e| failed(format!("whiteout for '{}': {e:?}", inst.field_id)))?;

            if let Some(text) = &inst.text {
                let Some(token) = tokens.get(text.font.as_str()) else {
                    continue;
                };
                let mut object = page
                    .objects_mut()
                    .create_text_object(
                        PdfPoints::new(text.x),
                        PdfPoints::new(height - text.baseline),
                        &text.text,
                        *token,
                        PdfPoints::new(text.font_size),
                    )
                    .map_err(|e| failed(format!("text for '{}': {e:?}", inst.field_id)))?;
                object
                    .set_fill_color(ink)
                    .map_err(|e| failed(format!("text colour: {e:?}")))?;
            }
        }
        page.regenerate_content().map_err(|e| failed(format!("{e:?}")))?;
        debug!("Page {}: drawn, {} dotted text objects stripped", page_index + 1, stripped);
    }

    document
        .save_to_bytes()
        .map_err(|e| FormFillError::Internal(format!("PDF save failed: {e:?}")))
}

/// A text object whose dotted runs are being removed.
struct SplitObject {
    index: PdfPageObjectIndex,
    head: String,
    tail: Vec<(PdfPoints, PdfPoints, String)>,
    font: PdfFontToken,
    size: PdfPoints,
    color: Option<PdfColor>,
}

/// Drop dotted runs from the text layer, so a blank is gone from the text
/// layer as well as from view. Text before the first run stays in its
/// object; text after a run moves to a new object at its old origin.
/// Returns the number of objects changed.
fn strip_text_layer(page: &mut PdfPage<'_>, min_run_len: usize) -> usize {
    let splits = match page.text() {
        Ok(text_page) => plan_splits(page, &text_page, min_run_len),
        Err(e) => {
            debug!("text layer unavailable: {e:?}");
            return 0;
        }
    };

    let mut stripped = 0;
    for split in &splits {
        let rewritten = page.objects().get(split.index).and_then(|mut object| match object.as_text_object_mut() {
            Some(text_object) => text_object.set_text(&split.head),
            None => Ok(()),
        });
        if let Err(e) = rewritten {
            debug!("text object not rewritten: {e:?}");
            continue;
        }
        stripped += 1;
        for (x, y, text) in &split.tail {
            let created = page
                .objects_mut()
                .create_text_object(*x, *y, text, split.font, split.size)
                .and_then(|mut object| match split.color {
                    Some(color) => object.set_fill_color(color),
                    None => Ok(()),
                });
            if let Err(e) = created {
                debug!("text after a blank not redrawn: {e:?}");
            }
        }
    }
    stripped
}

fn plan_splits(page: &PdfPage<'_>, text_page: &PdfPageText<'_>, min_run_len: usize) -> Vec<SplitObject> {
    let mut splits = Vec::new();
    for (index, object) in page.objects().iter().enumerate() {
        let Some(text_object) = object.as_text_object() else {
            continue;
        };
        let Ok(chars) = text_page.chars_for_object(text_object) else {
            continue;
        };
        let glyphs: Vec<(char, Option<(PdfPoints, PdfPoints)>)> = chars
            .iter()
            .map(|ch| (ch.unicode_char().unwrap_or(' '), ch.origin().ok()))
            .collect();
        let line: String = glyphs.iter().map(|(c, _)| *c).collect();
        let Some(segments) = split_at_runs(&line, min_run_len) else {
            continue;
        };

        let first = glyphs.iter().position(|(c, _)| !c.is_whitespace());
        let mut head = String::new();
        let mut tail = Vec::new();
        for (offset, segment) in segments {
            if Some(offset) == first {
                head = segment;
                continue;
            }
            match glyphs.get(offset).and_then(|(_, origin)| *origin) {
                Some((x, y)) => tail.push((x, y, segment)),
                None => debug!("no origin for '{segment}', dropped with its blank"),
            }
        }
        splits.push(SplitObject {
            index,
            head,
            tail,
            font: text_object.font().token(),
            size: text_object.scaled_font_size(),
            color: text_object.fill_color().ok(),
        });
    }
    splits
}
