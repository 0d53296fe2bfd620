//! OCR collaborator.
//!
//! [`OcrEngine`] turns a page raster into positioned words; the default
//! [`TesseractOcr`] drives the `tesseract` CLI with TSV output. Words are
//! grouped into lines by tesseract's own block/paragraph/line numbering and
//! mapped into page coordinates by [`OcrPage::into_page_text`], so OCR text
//! has the same shape as native text.

use crate::config::PipelineConfig;
use crate::document::{PageGeometry, PageText, TextBlock, TextSource};
use crate::geometry::BBox;
use async_trait::async_trait;
use image::DynamicImage;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum OcrError {
    /// The engine cannot run at all (binary missing, not executable).
    #[error("{0}")]
    Unavailable(String),
    /// Recognition failed for this image.
    #[error("{0}")]
    Failed(String),
}

/// One recognised word, in raster pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrWord {
    pub text: String,
    pub bbox: BBox,
    /// 0–100.
    pub confidence: f32,
    /// (block, paragraph, line) as numbered by the engine.
    pub line_key: (u32, u32, u32),
}

/// Recognition result for one raster.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OcrPage {
    pub width: u32,
    pub height: u32,
    pub words: Vec<OcrWord>,
}

impl OcrPage {
    pub fn mean_confidence(&self) -> Option<f32> {
        if self.words.is_empty() {
            return None;
        }
        Some(self.words.iter().map(|w| w.confidence).sum::<f32>() / self.words.len() as f32)
    }

    /// Convert to page coordinates. Each word's box is split evenly among its
    /// characters; a space between words spans the gap.
    pub fn into_page_text(self, page_index: usize, geometry: PageGeometry) -> PageText {
        let sx = if self.width > 0 { geometry.width / self.width as f32 } else { 1.0 };
        let sy = if self.height > 0 { geometry.height / self.height as f32 } else { 1.0 };
        let confidence = self.mean_confidence();

        let mut lines: Vec<Vec<OcrWord>> = Vec::new();
        for word in self.words {
            if word.text.trim().is_empty() {
                continue;
            }
            match lines.last_mut() {
                Some(line) if line[0].line_key == word.line_key => line.push(word),
                _ => lines.push(vec![word]),
            }
        }

        let mut blocks: Vec<TextBlock> = lines
            .iter()
            .filter_map(|line| {
                let mut glyphs: Vec<(char, BBox)> = Vec::new();
                for (i, word) in line.iter().enumerate() {
                    let b = word.bbox.scale(sx, sy);
                    if i > 0 {
                        if let Some(&(_, prev)) = glyphs.last() {
                            glyphs.push((' ', BBox::new(prev.x1, b.top, b.x0.max(prev.x1), b.bottom)));
                        }
                    }
                    let chars: Vec<char> = word.text.chars().collect();
                    let step = b.width() / chars.len() as f32;
                    for (j, c) in chars.into_iter().enumerate() {
                        let x0 = b.x0 + step * j as f32;
                        glyphs.push((c, BBox::new(x0, b.top, x0 + step, b.bottom)));
                    }
                }
                TextBlock::from_glyphs(&glyphs)
            })
            .collect();
        blocks.sort_by(|a, b| a.bbox.top.total_cmp(&b.bbox.top).then(a.bbox.x0.total_cmp(&b.bbox.x0)));

        PageText {
            page_index,
            width: geometry.width,
            height: geometry.height,
            blocks,
            source: TextSource::Ocr,
            ocr_confidence: confidence,
        }
    }
}

/// Recognises text in a page raster.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn recognize(&self, image: &DynamicImage, dpi: u32) -> Result<OcrPage, OcrError>;
}

/// Tesseract CLI engine.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    binary: PathBuf,
    languages: String,
}

impl TesseractOcr {
    pub fn new(languages: impl Into<String>) -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            languages: languages.into(),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        let ocr = Self::new(config.ocr_languages.clone());
        match &config.tesseract_path {
            Some(path) => ocr.with_binary(path.clone()),
            None => ocr,
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// True when `tesseract --version` runs successfully.
    pub async fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn recognize(&self, image: &DynamicImage, dpi: u32) -> Result<OcrPage, OcrError> {
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .map_err(|e| OcrError::Failed(format!("PNG encode failed: {e}")))?;

        let file = tempfile::Builder::new()
            .prefix("formfill-ocr-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| OcrError::Failed(format!("temp file: {e}")))?;
        tokio::fs::write(file.path(), &png)
            .await
            .map_err(|e| OcrError::Failed(format!("temp file write: {e}")))?;

        let output = Command::new(&self.binary)
            .arg(file.path())
            .arg("stdout")
            .arg("-l")
            .arg(&self.languages)
            .arg("--dpi")
            .arg(dpi.to_string())
            .arg("tsv")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    OcrError::Unavailable(format!("'{}' not found on PATH", self.binary.display()))
                } else {
                    OcrError::Unavailable(format!("failed to start '{}': {e}", self.binary.display()))
                }
            })?;

        if !output.status.success() {
            return Err(OcrError::Failed(format!(
                "tesseract exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let words = parse_tsv(&String::from_utf8_lossy(&output.stdout));
        debug!("tesseract: {} words", words.len());
        Ok(OcrPage {
            width: image.width(),
            height: image.height(),
            words,
        })
    }
}

/// Parse tesseract TSV output, keeping word rows (level 5) with text.
pub fn parse_tsv(tsv: &str) -> Vec<OcrWord> {
    tsv.lines()
        .skip_while(|l| l.starts_with("level"))
        .filter_map(|line| {
            let cols: Vec<&str> = line.splitn(12, '\t').collect();
            if cols.len() < 12 || cols[0] != "5" {
                return None;
            }
            let num = |i: usize| cols[i].trim().parse::<f32>().ok();
            let key = |i: usize| cols[i].trim().parse::<u32>().ok();
            let text = cols[11].trim();
            if text.is_empty() {
                return None;
            }
            let (left, top, width, height) = (num(6)?, num(7)?, num(8)?, num(9)?);
            Some(OcrWord {
                text: text.to_string(),
                bbox: BBox::new(left, top, left + width, top + height),
                confidence: num(10)?.max(0.0),
                line_key: (key(2)?, key(3)?, key(4)?),
            })
        })
        .collect()
}
