//! Render planning: fields + fill values + page text → [`RenderInstruction`]s.
//!
//! Pure geometry, shared by the PDF and raster back ends. Coordinates are
//! page units with a top-left origin.
//!
//! ## Steps
//!
//! 1. Re-detect dotted runs on every page and tie them to fields: stored
//!    anchor first (IoU), then label for fields without an anchor. Runs no
//!    field claims still get a whiteout-only instruction.
//! 2. Whiteout = anchor grown by `whiteout_margin`, widened and heightened to
//!    hold the value at `font_size`, clipped at the surrounding printed text
//!    and at the page edge.
//! 3. Whiteouts that still collide are cut at the midpoint between their
//!    anchors, so they never overlap and always contain their own anchor.
//! 4. The value is fitted by shrinking towards `min_font_size`, then
//!    truncated with an ellipsis.

use crate::config::PipelineConfig;
use crate::document::PageText;
use crate::error::{FormFillError, PageWarning};
use crate::fields::{AnalysisResult, FillResult, FillValue, RenderInstruction, TextOverlay};
use crate::geometry::BBox;
use crate::pipeline::blanks::{detect_document_runs, is_separator, normalize_label, DottedRun};
use crate::pipeline::fonts::GlyphMetrics;
use std::collections::HashSet;
use tracing::debug;

/// Minimum IoU for a re-detected run to count as a field's stored anchor.
const ANCHOR_IOU: f32 = 0.3;
/// Font size decrement while fitting.
const FONT_STEP: f32 = 0.5;
/// Tolerance for anchors sitting on the page edge.
const EDGE_SLACK: f32 = 0.5;

const ELLIPSIS: &str = "…";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayoutPlan {
    pub instructions: Vec<RenderInstruction>,
    pub warnings: Vec<PageWarning>,
}

impl LayoutPlan {
    pub fn overlay_count(&self) -> usize {
        self.instructions.iter().filter(|i| i.text.is_some()).count()
    }
}

#[derive(Debug, Clone)]
struct Placement {
    field_id: String,
    label: String,
    anchor: BBox,
    value: Option<String>,
}

/// Plan every page.
pub fn plan_document<F: GlyphMetrics>(
    pages: &[PageText],
    analysis: &AnalysisResult,
    fill: &FillResult,
    fonts: &[F],
    config: &PipelineConfig,
) -> Result<LayoutPlan, FormFillError> {
    let mut warnings = Vec::new();

    // ── Step 1: runs ↔ fields ──
    let mut runs: Vec<Vec<DottedRun>> = vec![Vec::new(); pages.len()];
    for run in detect_document_runs(pages, config.min_run_len) {
        if let Some(slot) = slot_of(pages, run.page) {
            runs[slot].push(run);
        }
    }
    let mut claimed: Vec<Vec<bool>> = runs.iter().map(|r| vec![false; r.len()]).collect();
    let mut placements: Vec<Vec<Placement>> = vec![Vec::new(); pages.len()];

    let value_of = |id: &str| {
        fill.get(id)
            .and_then(FillValue::text)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    for field in &analysis.fields {
        let Some(anchor) = field.anchor else {
            continue;
        };
        let out_of_bounds = || FormFillError::AnchorOutOfBounds {
            page: anchor.page + 1,
            field_id: field.id.clone(),
        };
        let slot = slot_of(pages, anchor.page).ok_or_else(out_of_bounds)?;
        let page = &pages[slot];
        if !on_page(&anchor.bbox, page.width, page.height) {
            return Err(out_of_bounds());
        }

        let best = runs[slot]
            .iter()
            .enumerate()
            .filter(|(i, _)| !claimed[slot][*i])
            .map(|(i, r)| (i, r.bbox.iou(&anchor.bbox)))
            .filter(|(_, iou)| *iou >= ANCHOR_IOU)
            .max_by(|a, b| a.1.total_cmp(&b.1));
        if let Some((i, _)) = best {
            claimed[slot][i] = true;
        }
        placements[slot].push(Placement {
            field_id: field.id.clone(),
            label: field.label.clone(),
            anchor: anchor.bbox.clamp_to(page.width, page.height),
            value: value_of(&field.id),
        });
    }

    for field in analysis.fields.iter().filter(|f| f.anchor.is_none()) {
        let value = value_of(&field.id);
        match find_by_label(&field.label, &runs, &claimed) {
            Some((slot, i)) => {
                claimed[slot][i] = true;
                debug!("Layout: {} placed by label on page {}", field.id, pages[slot].page_index + 1);
                placements[slot].push(Placement {
                    field_id: field.id.clone(),
                    label: field.label.clone(),
                    anchor: runs[slot][i].bbox,
                    value,
                });
            }
            None if value.is_some() => warnings.push(PageWarning::FieldNotPlaced {
                field_id: field.id.clone(),
                label: field.label.clone(),
            }),
            None => {}
        }
    }

    let field_ids: HashSet<&str> = analysis.fields.iter().map(|f| f.id.as_str()).collect();
    for (slot, page_runs) in runs.iter().enumerate() {
        let unclaimed = page_runs
            .iter()
            .enumerate()
            .filter(|(i, _)| !claimed[slot][*i])
            .map(|(_, r)| r);
        for run in unclaimed {
            let field_id = if field_ids.contains(run.id.as_str()) {
                format!("{}-blank", run.id)
            } else {
                run.id.clone()
            };
            debug!("Layout: unclaimed blank {} on page {}", field_id, pages[slot].page_index + 1);
            placements[slot].push(Placement {
                field_id,
                label: run.label.clone(),
                anchor: run.bbox,
                value: None,
            });
        }
    }

    // ── Steps 2-4, page by page ──
    let mut instructions = Vec::new();
    for (slot, page_placements) in placements.into_iter().enumerate() {
        instructions.extend(plan_page(
            &pages[slot],
            &runs[slot],
            page_placements,
            fonts,
            config,
            &mut warnings,
        )?);
    }

    Ok(LayoutPlan {
        instructions,
        warnings,
    })
}

fn slot_of(pages: &[PageText], page_index: usize) -> Option<usize> {
    pages.iter().position(|p| p.page_index == page_index)
}

fn on_page(b: &BBox, width: f32, height: f32) -> bool {
    b.x0 >= -EDGE_SLACK && b.top >= -EDGE_SLACK && b.x1 <= width + EDGE_SLACK && b.bottom <= height + EDGE_SLACK
}

/// First unclaimed run whose label equals `label` after folding, then the
/// first whose label contains it or is contained in it.
fn find_by_label(label: &str, runs: &[Vec<DottedRun>], claimed: &[Vec<bool>]) -> Option<(usize, usize)> {
    let wanted = normalize_label(label);
    if wanted.is_empty() {
        return None;
    }
    let candidates = || {
        runs.iter().enumerate().flat_map(move |(slot, page_runs)| {
            page_runs
                .iter()
                .enumerate()
                .filter(move |(i, _)| !claimed[slot][*i])
                .map(move |(i, r)| (slot, i, normalize_label(&r.label)))
                .filter(|(_, _, l)| !l.is_empty())
        })
    };
    candidates()
        .find(|(_, _, l)| *l == wanted)
        .or_else(|| {
            candidates().find(|(_, _, l)| {
                l.chars().count() >= 3 && wanted.chars().count() >= 3 && (l.contains(&wanted) || wanted.contains(l.as_str()))
            })
        })
        .map(|(slot, i, _)| (slot, i))
}

struct Item<'f, F> {
    placement: Placement,
    font: Option<&'f F>,
    /// Whiteout before neighbour separation.
    base: BBox,
    whiteout: BBox,
}

fn plan_page<F: GlyphMetrics>(
    page: &PageText,
    runs: &[DottedRun],
    mut placements: Vec<Placement>,
    fonts: &[F],
    config: &PipelineConfig,
    warnings: &mut Vec<PageWarning>,
) -> Result<Vec<RenderInstruction>, FormFillError> {
    let page_no = page.page_index + 1;
    placements.sort_by(|a, b| {
        a.anchor
            .top
            .total_cmp(&b.anchor.top)
            .then(a.anchor.x0.total_cmp(&b.anchor.x0))
    });

    let mut kept: Vec<Placement> = Vec::with_capacity(placements.len());
    for p in placements {
        if kept.iter().any(|k| k.anchor.overlaps(&p.anchor)) {
            warnings.push(PageWarning::FieldNotPlaced {
                field_id: p.field_id,
                label: p.label,
            });
            continue;
        }
        kept.push(p);
    }

    let printed = printed_boxes(page, runs);
    let mut items: Vec<Item<'_, F>> = Vec::with_capacity(kept.len());
    for p in kept {
        let font = match &p.value {
            Some(value) => Some(fonts.iter().find(|f| f.covers(value)).ok_or_else(|| {
                FormFillError::NoCoveringFont {
                    page: page_no,
                    field_id: p.field_id.clone(),
                    missing: missing_chars(fonts, value),
                }
            })?),
            None => None,
        };

        // ── Step 2: predicted whiteout ──
        let base = p.anchor.expand(config.whiteout_margin).clamp_to(page.width, page.height);
        let mut predicted = base;
        if let (Some(value), Some(f)) = (&p.value, font) {
            let size = config.font_size;
            let right = p.anchor.x0 + f.text_width(value, size) + config.whiteout_margin;
            predicted.x1 = predicted.x1.max(right.min(page.width));
            let top = predicted.bottom - f.ascent(size) - f.descent(size) - config.whiteout_margin;
            predicted.top = predicted.top.min(top.max(0.0));
        }
        items.push(Item {
            base: clip_to_printed(base, &p.anchor, &printed),
            whiteout: clip_to_printed(predicted, &p.anchor, &printed),
            placement: p,
            font,
        });
    }

    // ── Step 3: separate neighbours ──
    for i in 0..items.len() {
        for j in (i + 1)..items.len() {
            if !items[i].whiteout.overlaps(&items[j].whiteout) {
                continue;
            }
            let (wi, wj) = separate(
                items[i].whiteout,
                items[j].whiteout,
                &items[i].placement.anchor,
                &items[j].placement.anchor,
            );
            items[i].whiteout = wi;
            items[j].whiteout = wj;
        }
    }

    // ── Step 4: fit ──
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let Item {
            placement,
            font,
            base,
            whiteout,
        } = item;
        if !whiteout.contains(&base) {
            warnings.push(PageWarning::WhiteoutShrunk {
                page: page_no,
                field_id: placement.field_id.clone(),
            });
        }

        let text = match (&placement.value, font) {
            (Some(value), Some(f)) => {
                let x = placement.anchor.x0;
                let fitted = fit_text(
                    f,
                    value,
                    whiteout.x1 - x,
                    whiteout.height(),
                    config.font_size,
                    config.min_font_size,
                );
                match fitted {
                    Some((text, size, truncated)) => {
                        if truncated {
                            warnings.push(PageWarning::TextTruncated {
                                page: page_no,
                                field_id: placement.field_id.clone(),
                            });
                        }
                        Some(TextOverlay {
                            text,
                            x,
                            baseline: whiteout.bottom - f.descent(size),
                            font_size: size,
                            font: f.name().to_string(),
                            truncated,
                        })
                    }
                    None if f.ascent(config.min_font_size) + f.descent(config.min_font_size)
                        > whiteout.height() =>
                    {
                        warnings.push(PageWarning::FieldNotPlaced {
                            field_id: placement.field_id.clone(),
                            label: placement.label.clone(),
                        });
                        None
                    }
                    None => {
                        warnings.push(PageWarning::TextTruncated {
                            page: page_no,
                            field_id: placement.field_id.clone(),
                        });
                        None
                    }
                }
            }
            _ => None,
        };

        out.push(RenderInstruction {
            field_id: placement.field_id,
            page: page.page_index,
            anchor: placement.anchor,
            whiteout,
            text,
        });
    }
    debug!(
        "Page {}: {} whiteouts, {} overlays planned",
        page_no,
        out.len(),
        out.iter().filter(|i| i.text.is_some()).count()
    );
    Ok(out)
}

/// Boxes of printed glyphs that are not part of a dotted run.
fn printed_boxes(page: &PageText, runs: &[DottedRun]) -> Vec<BBox> {
    let mut out = Vec::new();
    for (b, block) in page.blocks.iter().enumerate() {
        for (i, (c, bbox)) in block.text.chars().zip(&block.char_boxes).enumerate() {
            if c.is_whitespace() {
                continue;
            }
            if runs.iter().any(|r| r.block == b && (r.start..r.end).contains(&i)) {
                continue;
            }
            out.push(*bbox);
        }
    }
    out
}

/// Pull the edges of `w` back to printed glyphs around `anchor`. Glyphs that
/// overlap the anchor itself are ignored.
fn clip_to_printed(mut w: BBox, anchor: &BBox, printed: &[BBox]) -> BBox {
    for o in printed {
        if !w.overlaps(o) || o.overlaps(anchor) {
            continue;
        }
        if o.bottom <= anchor.top {
            w.top = w.top.max(o.bottom);
        } else if o.top >= anchor.bottom {
            w.bottom = w.bottom.min(o.top);
        } else if o.x0 >= anchor.x1 {
            w.x1 = w.x1.min(o.x0);
        } else if o.x1 <= anchor.x0 {
            w.x0 = w.x0.max(o.x1);
        }
    }
    w
}

/// Cut two overlapping whiteouts at the midpoint between their anchors,
/// vertically when the anchors sit on different lines.
fn separate(mut wa: BBox, mut wb: BBox, a: &BBox, b: &BBox) -> (BBox, BBox) {
    if a.bottom <= b.top {
        let mid = (a.bottom + b.top) / 2.0;
        wa.bottom = wa.bottom.min(mid);
        wb.top = wb.top.max(mid);
    } else if b.bottom <= a.top {
        let mid = (b.bottom + a.top) / 2.0;
        wb.bottom = wb.bottom.min(mid);
        wa.top = wa.top.max(mid);
    } else if a.x1 <= b.x0 {
        let mid = (a.x1 + b.x0) / 2.0;
        wa.x1 = wa.x1.min(mid);
        wb.x0 = wb.x0.max(mid);
    } else {
        let mid = (b.x1 + a.x0) / 2.0;
        wb.x1 = wb.x1.min(mid);
        wa.x0 = wa.x0.max(mid);
    }
    (wa, wb)
}

fn missing_chars<F: GlyphMetrics>(fonts: &[F], value: &str) -> String {
    let mut out = String::new();
    for c in value.chars().filter(|c| !c.is_whitespace()) {
        let mut buf = [0u8; 4];
        let covered = fonts.first().is_some_and(|f| f.covers(c.encode_utf8(&mut buf)));
        if !covered && !out.contains(c) {
            out.push(c);
        }
    }
    out
}

/// Largest size in `[min, max]` at which `value` fits, or the longest
/// ellipsis-terminated prefix at `min`. `None` when not even one char fits
/// or the box is shorter than a line at `min`.
fn fit_text<F: GlyphMetrics>(
    font: &F,
    value: &str,
    avail_w: f32,
    avail_h: f32,
    max: f32,
    min: f32,
) -> Option<(String, f32, bool)> {
    let mut size = max;
    loop {
        let tall = font.ascent(size) + font.descent(size);
        if font.text_width(value, size) <= avail_w && tall <= avail_h + f32::EPSILON {
            return Some((value.to_string(), size, false));
        }
        if size <= min {
            break;
        }
        size = (size - FONT_STEP).max(min);
    }
    if font.ascent(min) + font.descent(min) > avail_h + f32::EPSILON {
        return None;
    }
    if font.text_width(value, min) <= avail_w {
        return Some((value.to_string(), min, false));
    }

    let marker = if font.covers(ELLIPSIS) { ELLIPSIS } else { "" };
    let chars: Vec<char> = value.chars().collect();
    for k in (1..chars.len()).rev() {
        let prefix: String = chars[..k].iter().collect();
        // A prefix ending in dots plus the marker would read as a new blank.
        let prefix = prefix.trim_end_matches(|c: char| c.is_whitespace() || is_separator(c));
        if prefix.is_empty() {
            continue;
        }
        let candidate = format!("{prefix}{marker}");
        if font.text_width(&candidate, min) <= avail_w {
            return Some((candidate, min, true));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{TextBlock, TextSource};
    use crate::fields::{AnalysisSource, Anchor, ExtractedField, FillEntry, ValueSource};

    /// Fixed-pitch metrics: every char is half an em wide.
    struct Mono {
        name: &'static str,
        greek: bool,
    }

    impl GlyphMetrics for Mono {
        fn name(&self) -> &str {
            self.name
        }
        fn covers(&self, text: &str) -> bool {
            text.chars().all(|c| c.is_ascii() || c == '…' || self.greek)
        }
        fn text_width(&self, text: &str, size: f32) -> f32 {
            text.chars().count() as f32 * size * 0.5
        }
        fn ascent(&self, size: f32) -> f32 {
            size * 0.8
        }
        fn descent(&self, size: f32) -> f32 {
            size * 0.2
        }
    }

    const LATIN: Mono = Mono {
        name: "Latin",
        greek: false,
    };
    const FULL: Mono = Mono {
        name: "Full",
        greek: true,
    };

    /// Lines of 5-unit-wide, 10-unit-tall glyphs, 20 units apart.
    fn page(index: usize, lines: &[&str]) -> PageText {
        let blocks = lines
            .iter()
            .enumerate()
            .map(|(row, line)| {
                let glyphs: Vec<_> = line
                    .chars()
                    .enumerate()
                    .map(|(i, c)| {
                        let x = 50.0 + i as f32 * 5.0;
                        let top = 100.0 + row as f32 * 20.0;
                        (c, BBox::new(x, top, x + 5.0, top + 10.0))
                    })
                    .collect();
                TextBlock::from_glyphs(&glyphs).unwrap()
            })
            .collect();
        PageText {
            page_index: index,
            width: 595.0,
            height: 842.0,
            blocks,
            source: TextSource::Native,
            ocr_confidence: None,
        }
    }

    fn analysis_for(pages: &[PageText], labels: &[&str]) -> AnalysisResult {
        let runs = detect_document_runs(pages, 3);
        AnalysisResult {
            document_type: "application".into(),
            summary: String::new(),
            critical: false,
            amount_due: None,
            deadline: None,
            key_points: vec![],
            fields: runs
                .iter()
                .zip(labels)
                .map(|(r, label)| ExtractedField {
                    id: r.id.clone(),
                    label: label.to_string(),
                    value: None,
                    anchor: Some(Anchor {
                        page: r.page,
                        bbox: r.bbox,
                    }),
                })
                .collect(),
            source: AnalysisSource::Model,
        }
    }

    fn fill(values: &[(&str, Option<&str>)]) -> FillResult {
        FillResult {
            entries: values
                .iter()
                .map(|(id, v)| FillEntry {
                    field_id: id.to_string(),
                    value: match v {
                        Some(v) => FillValue::Resolved {
                            value: v.to_string(),
                            source: ValueSource::Profile { key: "k".into() },
                            confidence: 0.9,
                        },
                        None => FillValue::Unresolved,
                    },
                })
                .collect(),
        }
    }

    fn assert_no_overlaps(plan: &LayoutPlan) {
        for (i, a) in plan.instructions.iter().enumerate() {
            assert!(a.whiteout.contains(&a.anchor), "{} whiteout misses its anchor", a.field_id);
            for b in &plan.instructions[i + 1..] {
                if a.page == b.page {
                    assert!(
                        !a.whiteout.overlaps(&b.whiteout),
                        "{} and {} overlap",
                        a.field_id,
                        b.field_id
                    );
                }
            }
        }
    }

    #[test]
    fn surname_overlay_sits_inside_whiteout() {
        let pages = vec![page(0, &["Surname:...................."])];
        let analysis = analysis_for(&pages, &["Surname"]);
        let plan = plan_document(
            &pages,
            &analysis,
            &fill(&[("f001", Some("Papadopoulos"))]),
            &[LATIN],
            &PipelineConfig::default(),
        )
        .unwrap();

        assert_eq!(plan.instructions.len(), 1);
        let inst = &plan.instructions[0];
        let text = inst.text.as_ref().unwrap();
        assert_eq!(text.text, "Papadopoulos");
        assert_eq!(text.font_size, 11.0);
        assert_eq!(text.x, inst.anchor.x0);
        assert!(text.x + LATIN.text_width(&text.text, text.font_size) <= inst.whiteout.x1);
        assert!(text.baseline - LATIN.ascent(text.font_size) >= inst.whiteout.top);
        assert!(text.baseline + LATIN.descent(text.font_size) <= inst.whiteout.bottom + 1e-4);
        // The margin stops at the label's colon.
        assert_eq!(inst.whiteout.x0, 90.0);
        assert_eq!(inst.anchor.x0, 90.0);
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn n_whiteouts_m_overlays() {
        let pages = vec![page(
            0,
            &["Surname: ..............", "Name: ...............", "City: ..............."],
        )];
        let analysis = analysis_for(&pages, &["Surname", "Name", "City"]);
        let fill = fill(&[("f001", Some("Papadopoulos")), ("f002", None), ("f003", Some("Athens"))]);
        let plan = plan_document(&pages, &analysis, &fill, &[LATIN], &PipelineConfig::default()).unwrap();
        assert_eq!(plan.instructions.len(), 3);
        assert_eq!(plan.overlay_count(), 2);
        assert_no_overlaps(&plan);
    }

    #[test]
    fn crowded_blanks_are_separated() {
        // Two runs on a line two spaces apart, and one right below.
        let pages = vec![page(0, &["A ......  ......", "B ......"])];
        let analysis = analysis_for(&pages, &["A", "A2", "B"]);
        let fill = fill(&[("f001", Some("x")), ("f002", Some("y")), ("f003", Some("z"))]);
        let config = PipelineConfig::builder().whiteout_margin(6.0).build().unwrap();
        let plan = plan_document(&pages, &analysis, &fill, &[LATIN], &config).unwrap();
        assert_eq!(plan.instructions.len(), 3);
        assert_no_overlaps(&plan);
        assert!(plan
            .warnings
            .iter()
            .any(|w| matches!(w, PageWarning::WhiteoutShrunk { page: 1, .. })));
    }

    #[test]
    fn first_covering_font_wins() {
        let pages = vec![page(0, &["Επώνυμο: ...................."])];
        let analysis = analysis_for(&pages, &["Επώνυμο"]);
        let plan = plan_document(
            &pages,
            &analysis,
            &fill(&[("f001", Some("Παπαδόπουλος"))]),
            &[LATIN, FULL],
            &PipelineConfig::default(),
        )
        .unwrap();
        assert_eq!(plan.instructions[0].text.as_ref().unwrap().font, "Full");
    }

    #[test]
    fn no_covering_font_is_fatal() {
        let pages = vec![page(0, &["Name ........"])];
        let analysis = analysis_for(&pages, &["Name"]);
        let err = plan_document(
            &pages,
            &analysis,
            &fill(&[("f001", Some("Γιάννης"))]),
            &[LATIN],
            &PipelineConfig::default(),
        )
        .unwrap_err();
        match err {
            FormFillError::NoCoveringFont { page, field_id, missing } => {
                assert_eq!(page, 1);
                assert_eq!(field_id, "f001");
                assert!(missing.contains('Γ'));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn anchor_outside_page_is_fatal() {
        let pages = vec![page(0, &["Name ........"])];
        let mut analysis = analysis_for(&pages, &["Name"]);
        analysis.fields[0].anchor = Some(Anchor {
            page: 0,
            bbox: BBox::new(580.0, 100.0, 700.0, 110.0),
        });
        let err = plan_document(&pages, &analysis, &fill(&[("f001", None)]), &[LATIN], &PipelineConfig::default())
            .unwrap_err();
        assert!(matches!(err, FormFillError::AnchorOutOfBounds { page: 1, .. }));

        analysis.fields[0].anchor = Some(Anchor {
            page: 4,
            bbox: BBox::new(10.0, 10.0, 20.0, 20.0),
        });
        let err = plan_document(&pages, &analysis, &fill(&[("f001", None)]), &[LATIN], &PipelineConfig::default())
            .unwrap_err();
        assert!(matches!(err, FormFillError::AnchorOutOfBounds { page: 5, .. }));
    }

    #[test]
    fn long_value_shrinks_then_truncates() {
        // Blank fenced in by printed text on both sides.
        let pages = vec![page(0, &["Tel ...... ext"])];
        let analysis = analysis_for(&pages, &["Tel"]);
        let plan = plan_document(
            &pages,
            &analysis,
            &fill(&[("f001", Some("+30 210 123 4567"))]),
            &[LATIN],
            &PipelineConfig::default(),
        )
        .unwrap();
        let inst = &plan.instructions[0];
        let text = inst.text.as_ref().unwrap();
        assert!(text.truncated);
        assert!(text.text.ends_with('…'));
        assert_eq!(text.font_size, 6.0);
        assert!(text.x + LATIN.text_width(&text.text, text.font_size) <= inst.whiteout.x1);
        assert!(plan
            .warnings
            .contains(&PageWarning::TextTruncated {
                page: 1,
                field_id: "f001".into()
            }));
    }

    #[test]
    fn unanchored_field_placed_by_label() {
        let pages = vec![page(0, &["Intro"]), page(1, &["Πόλη: .........."])];
        let mut analysis = analysis_for(&pages, &[]);
        analysis.fields.push(ExtractedField {
            id: "m001".into(),
            label: "ΠΟΛΗ".into(),
            value: None,
            anchor: None,
        });
        analysis.fields.push(ExtractedField {
            id: "m002".into(),
            label: "Signature".into(),
            value: None,
            anchor: None,
        });
        let fill = fill(&[("m001", Some("Athens")), ("m002", Some("JP"))]);
        let plan = plan_document(&pages, &analysis, &fill, &[LATIN], &PipelineConfig::default()).unwrap();
        assert_eq!(plan.instructions.len(), 1);
        assert_eq!(plan.instructions[0].field_id, "m001");
        assert_eq!(plan.instructions[0].page, 1);
        assert!(plan.warnings.iter().any(|w| matches!(
            w,
            PageWarning::FieldNotPlaced { field_id, .. } if field_id == "m002"
        )));
    }

    #[test]
    fn unclaimed_blanks_get_whiteout_only() {
        let pages = vec![page(0, &["Name ........", "12 ........"])];
        let mut analysis = analysis_for(&pages, &["Name"]);
        analysis.fields.truncate(1);
        let plan = plan_document(
            &pages,
            &analysis,
            &fill(&[("f001", Some("Maria"))]),
            &[LATIN],
            &PipelineConfig::default(),
        )
        .unwrap();
        assert_eq!(plan.instructions.len(), 2);
        assert_eq!(plan.instructions[1].field_id, "f002");
        assert!(plan.instructions[1].text.is_none());
    }

    #[test]
    fn planning_is_deterministic() {
        let pages = vec![page(0, &["A ......  ......", "B ......"]), page(1, &["C ........"])];
        let analysis = analysis_for(&pages, &["A", "A2", "B", "C"]);
        let fill = fill(&[("f001", Some("1")), ("f002", None), ("f003", Some("3")), ("f004", Some("4"))]);
        let config = PipelineConfig::default();
        let a = plan_document(&pages, &analysis, &fill, &[LATIN], &config).unwrap();
        let b = plan_document(&pages, &analysis, &fill, &[LATIN], &config).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.instructions.iter().filter(|i| i.page == 1).count(), 1);
    }

    #[test]
    fn fit_keeps_separators_off_the_truncation_point() {
        let (text, _, truncated) = fit_text(&LATIN, "Leof. Kifisias 12", 20.0, 20.0, 11.0, 6.0).unwrap();
        assert!(truncated);
        assert!(!text.contains(".…"), "got {text}");
        assert!(fit_text(&LATIN, "abc", 1.0, 20.0, 11.0, 6.0).is_none());
    }

    #[test]
    fn fit_rejects_box_shorter_than_a_line() {
        // Wide enough at any size, but a 6pt line needs 6 units.
        assert!(fit_text(&LATIN, "Ab", 500.0, 3.0, 11.0, 6.0).is_none());
        assert!(fit_text(&LATIN, "A long value that would truncate", 20.0, 3.0, 11.0, 6.0).is_none());
        assert_eq!(fit_text(&LATIN, "Ab", 500.0, 6.0, 11.0, 6.0), Some(("Ab".into(), 6.0, false)));
    }

    #[test]
    fn blank_squeezed_under_a_heading_is_not_drawn() {
        // The heading caps the whiteout at 22 units; a 24pt line cannot fit.
        let pages = vec![page(0, &["Heading", "Name ........"])];
        let analysis = analysis_for(&pages, &["Name"]);
        let config = PipelineConfig::builder().font_size(30.0).min_font_size(24.0).build().unwrap();
        let plan = plan_document(&pages, &analysis, &fill(&[("f001", Some("Maria"))]), &[LATIN], &config).unwrap();

        let inst = &plan.instructions[0];
        assert!(inst.whiteout.height() < 24.0);
        assert!(inst.text.is_none());
        assert!(plan.warnings.iter().any(|w| matches!(
            w,
            PageWarning::FieldNotPlaced { field_id, .. } if field_id == "f001"
        )));
        assert!(!plan
            .warnings
            .iter()
            .any(|w| matches!(w, PageWarning::TextTruncated { .. })));
    }
}
