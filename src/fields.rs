//! Field, analysis and fill data types shared by the pipeline stages.

use crate::geometry::BBox;
use serde::{Deserialize, Serialize};

/// Location of a blank: 0-based page index and the box of its dotted-line run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub page: usize,
    pub bbox: BBox,
}

/// A fillable field found in the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedField {
    /// Unique within the document, e.g. `f003`.
    pub id: String,
    pub label: String,
    /// Value already present in the document, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// `None` only for model-reported fields that match no detected run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<Anchor>,
}

/// Which detector produced an [`AnalysisResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisSource {
    Model,
    Heuristic,
}

/// Output of the document analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub document_type: String,
    pub summary: String,
    /// Deadline, fine or penalty indicators were found.
    pub critical: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_due: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    #[serde(default)]
    pub key_points: Vec<String>,
    pub fields: Vec<ExtractedField>,
    pub source: AnalysisSource,
}

impl AnalysisResult {
    pub fn field(&self, id: &str) -> Option<&ExtractedField> {
        self.fields.iter().find(|f| f.id == id)
    }
}

/// Where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueSource {
    /// The value was already written in the document.
    Document,
    /// Matched to a profile key by the inference matcher.
    Profile { key: String },
    /// Matched to a profile key by the lexical fallback matcher.
    Lexical { key: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FillValue {
    Resolved {
        value: String,
        source: ValueSource,
        confidence: f32,
    },
    Unresolved,
}

impl FillValue {
    pub fn text(&self) -> Option<&str> {
        match self {
            FillValue::Resolved { value, .. } => Some(value),
            FillValue::Unresolved => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillEntry {
    pub field_id: String,
    #[serde(flatten)]
    pub value: FillValue,
}

/// Field id → value, one entry per analyzed field, in field order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FillResult {
    pub entries: Vec<FillEntry>,
}

impl FillResult {
    pub fn get(&self, field_id: &str) -> Option<&FillValue> {
        self.entries
            .iter()
            .find(|e| e.field_id == field_id)
            .map(|e| &e.value)
    }

    pub fn resolved_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.value, FillValue::Resolved { .. }))
            .count()
    }

    pub fn unresolved_count(&self) -> usize {
        self.entries.len() - self.resolved_count()
    }

    /// True when every field of `analysis` has exactly one entry, in order.
    pub fn covers(&self, analysis: &AnalysisResult) -> bool {
        self.entries.len() == analysis.fields.len()
            && self
                .entries
                .iter()
                .zip(&analysis.fields)
                .all(|(e, f)| e.field_id == f.id)
    }
}

/// Text to draw inside a whiteout rectangle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextOverlay {
    pub text: String,
    pub x: f32,
    /// Baseline, top-left origin.
    pub baseline: f32,
    pub font_size: f32,
    /// Family name of the chosen font candidate.
    pub font: String,
    pub truncated: bool,
}

/// Drawing plan for one blank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderInstruction {
    pub field_id: String,
    pub page: usize,
    pub anchor: BBox,
    pub whiteout: BBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextOverlay>,
}
