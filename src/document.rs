//! Document and page text model.
//!
//! A [`Document`] owns the original container bytes (PDF or raster image)
//! and the page geometry. Text acquisition turns every page into a
//! [`PageText`]: visual lines ([`TextBlock`]) with a box per character, so
//! that downstream stages can locate sub-line features such as dotted-line
//! runs regardless of whether the text came from the PDF text layer or OCR.

use crate::geometry::{union_all, BBox};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Container format of the input, preserved on export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceFormat {
    Pdf,
    Image(RasterFormat),
}

/// Raster formats accepted as input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RasterFormat {
    Png,
    Jpeg,
    Tiff,
    Bmp,
}

impl RasterFormat {
    pub fn image_format(self) -> image::ImageFormat {
        match self {
            RasterFormat::Png => image::ImageFormat::Png,
            RasterFormat::Jpeg => image::ImageFormat::Jpeg,
            RasterFormat::Tiff => image::ImageFormat::Tiff,
            RasterFormat::Bmp => image::ImageFormat::Bmp,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            RasterFormat::Png => "png",
            RasterFormat::Jpeg => "jpg",
            RasterFormat::Tiff => "tiff",
            RasterFormat::Bmp => "bmp",
        }
    }
}

impl SourceFormat {
    /// Sniff the container format from magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<SourceFormat> {
        if bytes.starts_with(b"%PDF") {
            Some(SourceFormat::Pdf)
        } else if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
            Some(SourceFormat::Image(RasterFormat::Png))
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(SourceFormat::Image(RasterFormat::Jpeg))
        } else if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") {
            Some(SourceFormat::Image(RasterFormat::Tiff))
        } else if bytes.starts_with(b"BM") {
            Some(SourceFormat::Image(RasterFormat::Bmp))
        } else {
            None
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            SourceFormat::Pdf => "pdf",
            SourceFormat::Image(r) => r.extension(),
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Size of one page in page units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageGeometry {
    pub width: f32,
    pub height: f32,
}

/// An ingested document. Cheap to clone; the bytes are shared.
#[derive(Debug, Clone)]
pub struct Document {
    pub format: SourceFormat,
    pub bytes: Arc<Vec<u8>>,
    pub pages: Vec<PageGeometry>,
}

impl Document {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

/// Where a page's text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextSource {
    Native,
    Ocr,
    /// Acquisition failed; the page carries no text.
    Empty,
}

/// One visual line of text.
///
/// `char_boxes` has exactly one entry per `char` of `text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
    pub bbox: BBox,
    pub char_boxes: Vec<BBox>,
}

impl TextBlock {
    /// Build a block from positioned characters. Returns `None` when empty.
    pub fn from_glyphs(glyphs: &[(char, BBox)]) -> Option<TextBlock> {
        let bbox = union_all(glyphs.iter().map(|(_, b)| b))?;
        Some(TextBlock {
            text: glyphs.iter().map(|(c, _)| *c).collect(),
            bbox,
            char_boxes: glyphs.iter().map(|(_, b)| *b).collect(),
        })
    }

    /// Box covering the characters in `start..end` (char indices).
    pub fn span_bbox(&self, start: usize, end: usize) -> Option<BBox> {
        union_all(self.char_boxes.get(start..end)?.iter())
    }
}

/// Acquired text for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageText {
    /// 0-based page index.
    pub page_index: usize,
    pub width: f32,
    pub height: f32,
    pub blocks: Vec<TextBlock>,
    pub source: TextSource,
    /// Mean OCR word confidence (0–100) when the text came from OCR.
    pub ocr_confidence: Option<f32>,
}

impl PageText {
    pub fn empty(page_index: usize, geometry: PageGeometry) -> Self {
        Self {
            page_index,
            width: geometry.width,
            height: geometry.height,
            blocks: Vec::new(),
            source: TextSource::Empty,
            ocr_confidence: None,
        }
    }

    /// Number of non-whitespace characters.
    pub fn char_count(&self) -> usize {
        self.blocks
            .iter()
            .map(|b| b.text.chars().filter(|c| !c.is_whitespace()).count())
            .sum()
    }

    /// Non-whitespace characters per 1000 square page units.
    pub fn char_density(&self) -> f32 {
        let area = self.width * self.height;
        if area <= 0.0 {
            return 0.0;
        }
        self.char_count() as f32 * 1000.0 / area
    }

    /// Lines joined with `\n`, in block order.
    pub fn plain_text(&self) -> String {
        self.blocks
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Group positioned characters (in content-stream order) into visual lines.
///
/// A character joins the current line when its vertical centre is within half
/// a line height and it does not jump backwards. A space is synthesised when
/// the horizontal gap exceeds a quarter of the line height. Lines are returned
/// in reading order (top to bottom, then left to right).
pub fn group_into_lines(glyphs: &[(char, BBox)]) -> Vec<TextBlock> {
    let mut lines: Vec<Vec<(char, BBox)>> = Vec::new();
    let mut current: Vec<(char, BBox)> = Vec::new();

    for &(ch, bbox) in glyphs {
        if ch.is_control() || bbox.width() < 0.0 || bbox.height() <= 0.0 {
            continue;
        }
        if let Some(&(_, last)) = current.last() {
            let line_box = union_all(current.iter().map(|(_, b)| b)).unwrap_or(last);
            let tolerance = line_box.height().max(bbox.height()) / 2.0;
            let same_row = (bbox.center_y() - line_box.center_y()).abs() <= tolerance;
            let forward = bbox.x0 >= last.x1 - tolerance;
            if !(same_row && forward) {
                lines.push(std::mem::take(&mut current));
            } else if !ch.is_whitespace()
                && !current.last().map(|(c, _)| c.is_whitespace()).unwrap_or(false)
                && bbox.x0 - last.x1 > line_box.height() / 4.0
            {
                current.push((' ', BBox::new(last.x1, last.top, bbox.x0, last.bottom)));
            }
        }
        current.push((ch, bbox));
    }
    if !current.is_empty() {
        lines.push(current);
    }

    let mut blocks: Vec<TextBlock> = lines
        .iter()
        .map(|line| trim_glyphs(line))
        .filter_map(TextBlock::from_glyphs)
        .collect();
    blocks.sort_by(|a, b| {
        let row = a.bbox.height().min(b.bbox.height()) / 2.0;
        if (a.bbox.center_y() - b.bbox.center_y()).abs() <= row {
            a.bbox.x0.total_cmp(&b.bbox.x0)
        } else {
            a.bbox.top.total_cmp(&b.bbox.top)
        }
    });
    blocks
}

fn trim_glyphs(line: &[(char, BBox)]) -> &[(char, BBox)] {
    let start = line.iter().position(|(c, _)| !c.is_whitespace()).unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|(c, _)| !c.is_whitespace())
        .map(|i| i + 1)
        .unwrap_or(start);
    &line[start..end.max(start)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glyphs(text: &str, x: f32, top: f32, advance: f32) -> Vec<(char, BBox)> {
        text.chars()
            .enumerate()
            .map(|(i, c)| {
                let x0 = x + i as f32 * advance;
                (c, BBox::new(x0, top, x0 + advance, top + 10.0))
            })
            .collect()
    }

    #[test]
    fn test_sniff_formats() {
        assert_eq!(SourceFormat::sniff(b"%PDF-1.7"), Some(SourceFormat::Pdf));
        assert_eq!(
            SourceFormat::sniff(&[0x89, b'P', b'N', b'G', 0x0D]),
            Some(SourceFormat::Image(RasterFormat::Png))
        );
        assert_eq!(
            SourceFormat::sniff(&[0xFF, 0xD8, 0xFF, 0xE0]),
            Some(SourceFormat::Image(RasterFormat::Jpeg))
        );
        assert_eq!(SourceFormat::sniff(b"PK\x03\x04"), None);
    }

    #[test]
    fn test_group_two_lines() {
        let mut g = glyphs("Name", 10.0, 10.0, 5.0);
        g.extend(glyphs("Date", 10.0, 30.0, 5.0));
        let lines = group_into_lines(&g);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "Name");
        assert_eq!(lines[1].text, "Date");
        assert_eq!(lines[0].char_boxes.len(), 4);
    }

    #[test]
    fn test_group_inserts_space_on_gap() {
        let mut g = glyphs("Name", 10.0, 10.0, 5.0);
        g.extend(glyphs("....", 50.0, 10.0, 2.0));
        let lines = group_into_lines(&g);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "Name ....");
        assert_eq!(lines[0].text.chars().count(), lines[0].char_boxes.len());
    }

    #[test]
    fn test_group_skips_control_chars() {
        let mut g = glyphs("AB", 0.0, 0.0, 5.0);
        g.push(('\n', BBox::new(0.0, 0.0, 0.0, 0.0)));
        g.extend(glyphs("C", 10.0, 0.0, 5.0));
        let lines = group_into_lines(&g);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "ABC");
    }

    #[test]
    fn test_page_text_counts() {
        let block = TextBlock::from_glyphs(&glyphs("ab c", 0.0, 0.0, 5.0)).unwrap();
        let page = PageText {
            page_index: 0,
            width: 100.0,
            height: 100.0,
            blocks: vec![block],
            source: TextSource::Native,
            ocr_confidence: None,
        };
        assert_eq!(page.char_count(), 3);
        assert!((page.char_density() - 0.3).abs() < 1e-6);
        assert_eq!(page.plain_text(), "ab c");
    }

    #[test]
    fn test_span_bbox() {
        let block = TextBlock::from_glyphs(&glyphs("abcd", 0.0, 0.0, 5.0)).unwrap();
        assert_eq!(block.span_bbox(1, 3), Some(BBox::new(5.0, 0.0, 15.0, 10.0)));
        assert_eq!(block.span_bbox(3, 9), None);
    }
}
