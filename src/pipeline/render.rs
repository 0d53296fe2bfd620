//! Form rendering: apply a [`LayoutPlan`] to the source document.
//!
//! PDFs are edited in place through pdfium ([`crate::pipeline::pdf::draw`]):
//! white rectangles, text objects in an embedded font, trailing dotted runs
//! removed from the text layer. Raster inputs are painted pixel by pixel with
//! ab_glyph and re-encoded in their original format.
//!
//! Page units map onto raster pixels by the ratio of image size to page
//! geometry, so the same plan drives both back ends.

use crate::config::PipelineConfig;
use crate::document::{Document, PageGeometry, PageText, RasterFormat, SourceFormat};
use crate::error::{FormFillError, PageWarning};
use crate::fields::{AnalysisResult, FillResult, RenderInstruction, TextOverlay};
use crate::geometry::BBox;
use crate::pipeline::fonts::{FontCatalog, FontFace};
use crate::pipeline::layout::{plan_document, LayoutPlan};
use crate::pipeline::pdf::{self, DrawOptions};
use ab_glyph::{point, Font, ScaleFont};
use image::{DynamicImage, Rgba, RgbaImage};
use std::io::Cursor;
use tracing::{debug, info};

/// A rendered document, ready for export.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedDocument {
    pub bytes: Vec<u8>,
    pub format: SourceFormat,
    pub instructions: Vec<RenderInstruction>,
}

impl RenderedDocument {
    pub fn whiteout_count(&self) -> usize {
        self.instructions.len()
    }

    pub fn overlay_count(&self) -> usize {
        self.instructions.iter().filter(|i| i.text.is_some()).count()
    }
}

/// Plan and draw.
pub async fn render_document(
    document: &Document,
    pages: &[PageText],
    analysis: &AnalysisResult,
    fill: &FillResult,
    fonts: &FontCatalog,
    config: &PipelineConfig,
) -> Result<(RenderedDocument, Vec<PageWarning>), FormFillError> {
    let plan = plan_document(pages, analysis, fill, fonts.faces(), config)?;
    info!(
        "Rendering {} whiteouts, {} overlays",
        plan.instructions.len(),
        plan.overlay_count()
    );
    let LayoutPlan {
        instructions,
        warnings,
    } = plan;

    let bytes = match document.format {
        SourceFormat::Pdf => {
            let options = DrawOptions {
                password: config.password.clone(),
                text_color: config.text_color,
                min_run_len: config.min_run_len,
            };
            pdf::draw(document.bytes.clone(), instructions.clone(), fonts.clone(), options).await?
        }
        SourceFormat::Image(raster) => {
            let bytes = document.bytes.clone();
            let geometry = document.pages.first().copied().ok_or(FormFillError::EmptyDocument)?;
            let plan = instructions.clone();
            let fonts = fonts.clone();
            let color = config.text_color;
            tokio::task::spawn_blocking(move || draw_raster(&bytes, raster, geometry, &plan, &fonts, color))
                .await
                .map_err(|e| FormFillError::Internal(format!("Raster render task panicked: {e}")))??
        }
    };

    Ok((
        RenderedDocument {
            bytes,
            format: document.format,
            instructions,
        },
        warnings,
    ))
}

// ── Raster back end ──────────────────────────────────────────────────────

/// Decode, paint and re-encode a raster page.
pub fn draw_raster(
    bytes: &[u8],
    format: RasterFormat,
    geometry: PageGeometry,
    instructions: &[RenderInstruction],
    fonts: &FontCatalog,
    text_color: [u8; 3],
) -> Result<Vec<u8>, FormFillError> {
    let image = image::load_from_memory_with_format(bytes, format.image_format())
        .map_err(|e| FormFillError::ImageDecodeFailed { detail: e.to_string() })?;
    let mut canvas = image.to_rgba8();
    let sx = canvas.width() as f32 / geometry.width;
    let sy = canvas.height() as f32 / geometry.height;
    let [r, g, b] = text_color;
    let ink = Rgba([r, g, b, 255]);

    for inst in instructions {
        fill_rect(&mut canvas, &inst.whiteout.scale(sx, sy), Rgba([255, 255, 255, 255]));
        if let Some(text) = &inst.text {
            let face = fonts.get(&text.font).ok_or_else(|| FormFillError::RenderFailed {
                page: inst.page + 1,
                detail: format!("font '{}' is not loaded", text.font),
            })?;
            draw_text(&mut canvas, face, text, sx, sy, ink);
        }
    }
    debug!("Raster: {} instructions painted", instructions.len());

    let out = match format {
        // No alpha channel in JPEG or BMP.
        RasterFormat::Jpeg | RasterFormat::Bmp => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).to_rgb8()),
        _ => DynamicImage::ImageRgba8(canvas),
    };
    let mut encoded = Vec::new();
    out.write_to(&mut Cursor::new(&mut encoded), format.image_format())
        .map_err(|e| FormFillError::RenderFailed {
            page: 1,
            detail: format!("{} encode failed: {e}", format.extension()),
        })?;
    Ok(encoded)
}

/// Paint the pixels whose centres lie inside `rect`.
fn fill_rect(canvas: &mut RgbaImage, rect: &BBox, color: Rgba<u8>) {
    let x0 = rect.x0.max(0.0).round() as u32;
    let y0 = rect.top.max(0.0).round() as u32;
    let x1 = (rect.x1.max(0.0).round() as u32).min(canvas.width());
    let y1 = (rect.bottom.max(0.0).round() as u32).min(canvas.height());
    for y in y0..y1 {
        for x in x0..x1 {
            canvas.put_pixel(x, y, color);
        }
    }
}

fn draw_text(canvas: &mut RgbaImage, face: &FontFace, text: &TextOverlay, sx: f32, sy: f32, ink: Rgba<u8>) {
    let font = face.font();
    let scale = face.px_scale(text.font_size * sy);
    let scaled = font.as_scaled(scale);
    let baseline = text.baseline * sy;
    let mut caret = text.x * sx;
    let (width, height) = canvas.dimensions();

    for c in text.text.chars() {
        let id = scaled.glyph_id(c);
        let glyph = id.with_scale_and_position(scale, point(caret, baseline));
        caret += scaled.h_advance(id);
        let Some(outlined) = font.outline_glyph(glyph) else {
            continue;
        };
        let bounds = outlined.px_bounds();
        outlined.draw(|gx, gy, coverage| {
            let x = bounds.min.x as i64 + gx as i64;
            let y = bounds.min.y as i64 + gy as i64;
            if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
                return;
            }
            let px = canvas.get_pixel_mut(x as u32, y as u32);
            blend(px, ink, coverage.clamp(0.0, 1.0));
        });
    }
}

fn blend(px: &mut Rgba<u8>, ink: Rgba<u8>, alpha: f32) {
    for i in 0..3 {
        let under = px.0[i] as f32;
        px.0[i] = (under + (ink.0[i] as f32 - under) * alpha).round() as u8;
    }
    px.0[3] = 255;
}
