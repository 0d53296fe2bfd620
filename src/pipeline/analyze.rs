//! Document analysis ("Agent 1").
//!
//! Two [`FieldDetector`] strategies share one contract: given the acquired
//! pages and the dotted-line runs detected on them, produce an
//! [`AnalysisResult`]. [`InferenceFieldDetector`] asks the model for the
//! classification, summary and fields; [`PatternFieldDetector`] derives
//! fields from the runs alone. [`analyze_document`] runs the first and falls
//! back to the second when the model output stays unusable.

use crate::cancel::CancelToken;
use crate::config::PipelineConfig;
use crate::document::PageText;
use crate::error::{FormFillError, PageWarning};
use crate::fields::{AnalysisResult, AnalysisSource, Anchor, ExtractedField};
use crate::pipeline::blanks::{is_label_like, normalize_label, DottedRun};
use crate::pipeline::llm::{complete_with_retry, request, InferenceClient};
use crate::pipeline::sanitize::{clean_value, sanitize, Sanitized};
use crate::prompts::{analyzer_user_prompt, truncate_chars, ANALYZER_SYSTEM_PROMPT};
use crate::state::Stage;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{info, warn};

/// Why a detector produced nothing usable.
#[derive(Debug)]
pub enum DetectionError {
    /// Output stayed malformed, or transport failed; fall back.
    Unusable { attempts: u32, reason: String },
    /// Stop the pipeline (cancellation).
    Fatal(FormFillError),
}

#[async_trait]
pub trait FieldDetector: Send + Sync {
    async fn detect(&self, pages: &[PageText], runs: &[DottedRun]) -> Result<AnalysisResult, DetectionError>;
}

// ── Model-based detection ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AnalyzerReply {
    #[serde(default)]
    document_type: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    critical: Option<bool>,
    #[serde(default)]
    amount_due: Option<Value>,
    #[serde(default)]
    deadline: Option<Value>,
    #[serde(default)]
    key_points: Vec<Value>,
    fields: Vec<ReplyField>,
}

#[derive(Debug, Deserialize)]
struct ReplyField {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    value: Option<Value>,
}

fn value_text(v: &Option<Value>) -> Option<String> {
    match v.as_ref()? {
        Value::Null => None,
        Value::String(s) => clean_value(s),
        other => clean_value(&other.to_string()),
    }
}

pub struct InferenceFieldDetector<'a> {
    pub client: &'a dyn InferenceClient,
    pub config: &'a PipelineConfig,
    pub cancel: &'a CancelToken,
}

#[async_trait]
impl<'a> FieldDetector for InferenceFieldDetector<'a> {
    async fn detect(&self, pages: &[PageText], runs: &[DottedRun]) -> Result<AnalysisResult, DetectionError> {
        let text = pages
            .iter()
            .map(PageText::plain_text)
            .collect::<Vec<_>>()
            .join("\n\n");
        let text = truncate_chars(&text, self.config.max_prompt_chars);
        let req = request(
            self.config,
            ANALYZER_SYSTEM_PROMPT,
            analyzer_user_prompt(text, runs),
        );

        let mut reason = String::new();
        for attempt in 1..=self.config.analysis_attempts {
            let reply = match complete_with_retry(self.client, &req, self.config, self.cancel, Stage::Analyzed).await {
                Ok(r) => r,
                Err(e @ FormFillError::Cancelled { .. }) => return Err(DetectionError::Fatal(e)),
                Err(e) => {
                    return Err(DetectionError::Unusable {
                        attempts: attempt,
                        reason: e.to_string(),
                    })
                }
            };
            match sanitize::<AnalyzerReply>(&reply.content, self.config.max_repairs) {
                Sanitized::Success(parsed) => {
                    info!("Analyzer: {} fields reported, {} blanks detected", parsed.fields.len(), runs.len());
                    return Ok(merge_with_runs(parsed, runs));
                }
                failure => {
                    reason = failure.failure_reason().unwrap_or_default().to_string();
                    warn!("Analyzer: attempt {} unusable: {}", attempt, reason);
                }
            }
        }
        Err(DetectionError::Unusable {
            attempts: self.config.analysis_attempts,
            reason,
        })
    }
}

/// Tie model fields to detected runs, by id first and normalised label second.
/// Every run becomes a field; unmatched model fields keep no anchor.
fn merge_with_runs(reply: AnalyzerReply, runs: &[DottedRun]) -> AnalysisResult {
    let mut claimed: Vec<Option<(String, Option<String>)>> = vec![None; runs.len()];
    let mut unanchored: Vec<(String, Option<String>)> = Vec::new();

    for field in &reply.fields {
        let label = field
            .label
            .as_deref()
            .and_then(clean_value)
            .unwrap_or_default();
        let value = value_text(&field.value);

        let by_id = field
            .id
            .as_deref()
            .and_then(|id| runs.iter().position(|r| r.id == id.trim()))
            .filter(|&i| claimed[i].is_none());
        let by_label = || {
            let wanted = normalize_label(&label);
            if wanted.is_empty() {
                return None;
            }
            runs.iter()
                .enumerate()
                .position(|(i, r)| claimed[i].is_none() && normalize_label(&r.label) == wanted)
        };

        match by_id.or_else(by_label) {
            Some(i) => claimed[i] = Some((label, value)),
            None if !label.is_empty() => unanchored.push((label, value)),
            None => {}
        }
    }

    let mut fields: Vec<ExtractedField> = runs
        .iter()
        .zip(claimed)
        .map(|(run, claim)| {
            let (label, value) = claim.unwrap_or_default();
            ExtractedField {
                id: run.id.clone(),
                label: if label.is_empty() { run.label.clone() } else { label },
                value,
                anchor: Some(Anchor {
                    page: run.page,
                    bbox: run.bbox,
                }),
            }
        })
        .collect();

    let mut seen: HashSet<String> = fields.iter().map(|f| normalize_label(&f.label)).collect();
    for (n, (label, value)) in unanchored.into_iter().enumerate() {
        if !seen.insert(normalize_label(&label)) && value.is_none() {
            continue;
        }
        fields.push(ExtractedField {
            id: format!("m{:03}", n + 1),
            label,
            value,
            anchor: None,
        });
    }

    AnalysisResult {
        document_type: reply
            .document_type
            .as_deref()
            .and_then(clean_value)
            .unwrap_or_else(|| "unknown".to_string()),
        summary: reply
            .summary
            .as_deref()
            .and_then(clean_value)
            .unwrap_or_default(),
        critical: reply.critical.unwrap_or(false),
        amount_due: value_text(&reply.amount_due),
        deadline: value_text(&reply.deadline),
        key_points: reply
            .key_points
            .iter()
            .filter_map(|v| value_text(&Some(v.clone())))
            .collect(),
        fields,
        source: AnalysisSource::Model,
    }
}

// ── Pattern-based detection ──────────────────────────────────────────────

/// One field per label-like text immediately followed by a dotted run.
pub struct PatternFieldDetector;

impl PatternFieldDetector {
    pub fn analyze(&self, runs: &[DottedRun]) -> AnalysisResult {
        let fields = runs
            .iter()
            .filter(|r| is_label_like(&r.label))
            .map(|r| ExtractedField {
                id: r.id.clone(),
                label: r.label.clone(),
                value: None,
                anchor: Some(Anchor {
                    page: r.page,
                    bbox: r.bbox,
                }),
            })
            .collect();
        AnalysisResult {
            document_type: "unknown".to_string(),
            summary: String::new(),
            critical: false,
            amount_due: None,
            deadline: None,
            key_points: Vec::new(),
            fields,
            source: AnalysisSource::Heuristic,
        }
    }
}

#[async_trait]
impl FieldDetector for PatternFieldDetector {
    async fn detect(&self, _pages: &[PageText], runs: &[DottedRun]) -> Result<AnalysisResult, DetectionError> {
        Ok(self.analyze(runs))
    }
}

/// Run `primary`, falling back to [`PatternFieldDetector`] when its output is unusable.
pub async fn analyze_document(
    pages: &[PageText],
    runs: &[DottedRun],
    primary: &dyn FieldDetector,
) -> Result<(AnalysisResult, Option<PageWarning>), FormFillError> {
    match primary.detect(pages, runs).await {
        Ok(result) => Ok((result, None)),
        Err(DetectionError::Fatal(e)) => Err(e),
        Err(DetectionError::Unusable { attempts, reason }) => {
            warn!("Analyzer: falling back to pattern detection");
            let result = PatternFieldDetector.analyze(runs);
            Ok((result, Some(PageWarning::AnalysisFallback { attempts, reason })))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BBox;

    fn run(id: &str, page: usize, label: &str) -> DottedRun {
        DottedRun {
            id: id.into(),
            page,
            block: 0,
            start: 0,
            end: 5,
            bbox: BBox::new(100.0, 100.0, 200.0, 110.0),
            label: label.into(),
        }
    }

    fn reply(json: &str) -> AnalyzerReply {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn merge_ties_by_id_then_label() {
        let runs = vec![run("f001", 0, "Επώνυμο"), run("f002", 0, "Όνομα"), run("f003", 1, "")];
        let r = reply(
            r#"{"document_type": "application", "summary": "s", "critical": true,
                "fields": [
                    {"id": "f001", "label": "Surname", "value": null},
                    {"label": "ΟΝΟΜΑ", "value": "Γιάννης"},
                    {"label": "Email", "value": null}
                ]}"#,
        );
        let a = merge_with_runs(r, &runs);
        assert_eq!(a.fields.len(), 4);
        assert_eq!(a.fields[0].label, "Surname");
        assert_eq!(a.fields[1].value.as_deref(), Some("Γιάννης"));
        assert_eq!(a.fields[2].id, "f003");
        assert!(a.fields[2].anchor.is_some());
        assert_eq!(a.fields[3].id, "m001");
        assert!(a.fields[3].anchor.is_none());
        assert!(a.critical);
    }

    #[test]
    fn merge_cleans_placeholder_values() {
        let runs = vec![run("f001", 0, "Date")];
        let r = reply(r#"{"fields": [{"id": "f001", "label": "Date", "value": "[.....]"}], "amount_due": 120.5}"#);
        let a = merge_with_runs(r, &runs);
        assert_eq!(a.fields[0].value, None);
        assert_eq!(a.document_type, "unknown");
        assert_eq!(a.amount_due.as_deref(), Some("120.5"));
    }

    #[test]
    fn ids_are_unique() {
        let runs = vec![run("f001", 0, "A"), run("f002", 0, "B")];
        let r = reply(
            r#"{"fields": [{"id": "f001", "label": "A"}, {"id": "f001", "label": "Other"}, {"label": "X"}]}"#,
        );
        let a = merge_with_runs(r, &runs);
        let ids: HashSet<_> = a.fields.iter().map(|f| f.id.clone()).collect();
        assert_eq!(ids.len(), a.fields.len());
    }

    #[test]
    fn pattern_detector_uses_label_like_runs_only() {
        let runs = vec![run("f001", 0, "Επώνυμο"), run("f002", 0, ""), run("f003", 0, "12")];
        let a = PatternFieldDetector.analyze(&runs);
        assert_eq!(a.source, AnalysisSource::Heuristic);
        assert_eq!(a.document_type, "unknown");
        assert_eq!(a.fields.len(), 1);
        assert_eq!(a.fields[0].id, "f001");
        assert!(a.fields.iter().all(|f| f.value.is_none()));
    }
}
