//! Font collaborator.
//!
//! [`FontCatalog`] holds an ordered list of TrueType faces: configured extra
//! fonts first, then the per-platform candidates that exist on this machine.
//! The renderer asks for the first face that covers every character of a
//! value, and uses its metrics both for fitting and for drawing.

use crate::config::PipelineConfig;
use ab_glyph::{Font, FontVec, PxScale};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

#[cfg(target_os = "linux")]
const SYSTEM_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/truetype/freefont/FreeSans.ttf",
    "/usr/share/fonts/truetype/noto/NotoSans-Regular.ttf",
    "/usr/share/fonts/truetype/msttcorefonts/arial.ttf",
];

#[cfg(target_os = "macos")]
const SYSTEM_CANDIDATES: &[&str] = &[
    "/Library/Fonts/Arial Unicode.ttf",
    "/Library/Fonts/Arial.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/System/Library/Fonts/Supplemental/Arial Unicode.ttf",
    "/Library/Fonts/Times New Roman.ttf",
];

#[cfg(target_os = "windows")]
const SYSTEM_CANDIDATES: &[&str] = &[
    r"C:\Windows\Fonts\arial.ttf",
    r"C:\Windows\Fonts\calibri.ttf",
    r"C:\Windows\Fonts\tahoma.ttf",
    r"C:\Windows\Fonts\segoeui.ttf",
    r"C:\Windows\Fonts\times.ttf",
];

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
const SYSTEM_CANDIDATES: &[&str] = &[];

/// File names also looked up in the user font directory.
const USER_FONT_FILES: &[&str] = &["DejaVuSans.ttf", "LiberationSans-Regular.ttf", "NotoSans-Regular.ttf"];

/// What layout needs from a font.
pub trait GlyphMetrics {
    fn name(&self) -> &str;
    fn covers(&self, text: &str) -> bool;
    fn text_width(&self, text: &str, size: f32) -> f32;
    fn ascent(&self, size: f32) -> f32;
    fn descent(&self, size: f32) -> f32;
}

/// A loaded TrueType face.
#[derive(Clone)]
pub struct FontFace {
    name: String,
    data: Arc<Vec<u8>>,
    font: Arc<FontVec>,
}

impl std::fmt::Debug for FontFace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontFace")
            .field("name", &self.name)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl FontFace {
    pub fn from_bytes(name: impl Into<String>, data: Vec<u8>) -> Option<Self> {
        let font = FontVec::try_from_vec(data.clone()).ok()?;
        Some(Self {
            name: name.into(),
            data: Arc::new(data),
            font: Arc::new(font),
        })
    }

    pub fn load(path: &Path) -> Option<Self> {
        let data = std::fs::read(path).ok()?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let face = Self::from_bytes(name, data);
        if face.is_none() {
            warn!("Font {}: not a usable TrueType file", path.display());
        }
        face
    }

    /// Raw font file bytes, for embedding.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn font(&self) -> &FontVec {
        &self.font
    }

    /// Chars of `text` without a glyph, deduplicated, in order.
    pub fn missing(&self, text: &str) -> String {
        let mut out = String::new();
        for c in text.chars().filter(|c| !c.is_whitespace()) {
            if self.font.glyph_id(c).0 == 0 && !out.contains(c) {
                out.push(c);
            }
        }
        out
    }

    fn units_per_em(&self) -> f32 {
        self.font.units_per_em().unwrap_or(1000.0)
    }

    /// ab_glyph scale for an em size in pixels.
    pub fn px_scale(&self, em_px: f32) -> PxScale {
        PxScale::from(em_px * self.font.height_unscaled() / self.units_per_em())
    }
}

impl GlyphMetrics for FontFace {
    fn name(&self) -> &str {
        &self.name
    }

    /// True when every non-whitespace char of `text` has a glyph.
    fn covers(&self, text: &str) -> bool {
        text.chars()
            .filter(|c| !c.is_whitespace())
            .all(|c| self.font.glyph_id(c).0 != 0)
    }

    /// Advance width of `text` at `size` (points or pixels per em).
    fn text_width(&self, text: &str, size: f32) -> f32 {
        let units: f32 = text
            .chars()
            .map(|c| self.font.h_advance_unscaled(self.font.glyph_id(c)))
            .sum();
        units * size / self.units_per_em()
    }

    fn ascent(&self, size: f32) -> f32 {
        self.font.ascent_unscaled() * size / self.units_per_em()
    }

    /// Positive distance below the baseline.
    fn descent(&self, size: f32) -> f32 {
        -self.font.descent_unscaled() * size / self.units_per_em()
    }
}

/// Ordered font candidates.
#[derive(Debug, Clone, Default)]
pub struct FontCatalog {
    faces: Vec<FontFace>,
}

impl FontCatalog {
    pub fn new(faces: Vec<FontFace>) -> Self {
        Self { faces }
    }

    /// Candidate paths in lookup order: extra fonts, the user font directory,
    /// then system locations.
    pub fn candidate_paths(extra: &[PathBuf]) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = extra.to_vec();
        if let Some(dir) = dirs::font_dir() {
            paths.extend(USER_FONT_FILES.iter().map(|f| dir.join(f)));
        }
        paths.extend(SYSTEM_CANDIDATES.iter().map(PathBuf::from));
        paths
    }

    /// Load every candidate that exists and parses.
    pub fn discover(config: &PipelineConfig) -> Self {
        let faces: Vec<FontFace> = Self::candidate_paths(&config.extra_fonts)
            .iter()
            .filter(|p| p.is_file())
            .filter_map(|p| FontFace::load(p))
            .collect();
        debug!(
            "Fonts: {} candidates loaded ({})",
            faces.len(),
            faces.iter().map(FontFace::name).collect::<Vec<_>>().join(", ")
        );
        Self { faces }
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn faces(&self) -> &[FontFace] {
        &self.faces
    }

    pub fn get(&self, name: &str) -> Option<&FontFace> {
        self.faces.iter().find(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Any font installed on the test machine, if there is one.
    fn any_face() -> Option<FontFace> {
        FontCatalog::candidate_paths(&[])
            .iter()
            .filter(|p| p.is_file())
            .find_map(|p| FontFace::load(p))
    }

    #[test]
    fn garbage_bytes_are_rejected() {
        assert!(FontFace::from_bytes("junk", b"not a font".to_vec()).is_none());
    }

    #[test]
    fn candidate_order_starts_with_extra_fonts() {
        let extra = PathBuf::from("/opt/fonts/Custom.ttf");
        let paths = FontCatalog::candidate_paths(std::slice::from_ref(&extra));
        assert_eq!(paths[0], extra);
        assert!(paths.len() >= 1 + SYSTEM_CANDIDATES.len());
    }

    #[test]
    fn empty_catalog_has_no_faces() {
        let catalog = FontCatalog::default();
        assert!(catalog.is_empty());
        assert!(catalog.get("DejaVuSans").is_none());
    }

    #[test]
    fn metrics_scale_linearly() {
        let Some(face) = any_face() else {
            return;
        };
        let w10 = face.text_width("Papadopoulos", 10.0);
        let w20 = face.text_width("Papadopoulos", 20.0);
        assert!(w10 > 0.0);
        assert!((w20 - 2.0 * w10).abs() < 1e-3);
        assert!(face.ascent(10.0) > 0.0);
        assert!(face.descent(10.0) >= 0.0);
        assert!(face.covers("Papadopoulos"));
        assert_eq!(face.missing("abc"), "");
    }
}
