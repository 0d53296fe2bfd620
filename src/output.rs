//! Result types returned by the `process*` entry points.

use crate::document::SourceFormat;
use crate::error::PageWarning;
use crate::fields::{AnalysisResult, FillResult, RenderInstruction};
use serde::{Deserialize, Serialize};

/// A filled document plus everything needed to explain it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillOutput {
    /// Filled document in the input's container format.
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub format: SourceFormat,
    pub analysis: AnalysisResult,
    pub fill: FillResult,
    pub instructions: Vec<RenderInstruction>,
    pub warnings: Vec<PageWarning>,
    pub stats: ProcessingStats,
}

impl FillOutput {
    /// True when every field received a value.
    pub fn is_complete(&self) -> bool {
        self.fill.unresolved_count() == 0
    }
}

/// Counters and timings for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub total_pages: usize,
    pub native_pages: usize,
    pub ocr_pages: usize,
    pub empty_pages: usize,
    pub inference_calls: usize,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub fields_detected: usize,
    pub fields_resolved: usize,
    pub fields_unresolved: usize,
    pub whiteouts: usize,
    pub overlays: usize,
    pub acquisition_ms: u64,
    pub analysis_ms: u64,
    pub fill_ms: u64,
    pub render_ms: u64,
    pub total_duration_ms: u64,
}

/// What `inspect` reports without calling any model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub format: SourceFormat,
    pub page_count: usize,
    /// Pages whose native text is below the OCR threshold.
    pub scanned_pages: Vec<usize>,
    /// Dotted-line runs found in the native text layer, per page.
    pub blanks_per_page: Vec<usize>,
    pub file_size: u64,
}
