//! Form filling ("Agent 2"): field → profile value.
//!
//! Values already present in the document win. For the remaining fields the
//! model only names a profile key and a confidence; the value itself is
//! always read from the [`UserProfile`]. Low confidence, unknown keys and
//! empty values leave the field unresolved.

use crate::cancel::CancelToken;
use crate::config::{FallbackMatching, PipelineConfig};
use crate::error::{FormFillError, PageWarning};
use crate::fields::{AnalysisResult, ExtractedField, FillEntry, FillResult, FillValue, ValueSource};
use crate::pipeline::blanks::normalize_label;
use crate::pipeline::llm::{complete_with_retry, request, InferenceClient};
use crate::pipeline::sanitize::{sanitize, Sanitized};
use crate::profile::UserProfile;
use crate::prompts::{filler_user_prompt, FILLER_SYSTEM_PROMPT};
use crate::state::Stage;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct FillerReply {
    matches: Vec<ReplyMatch>,
}

#[derive(Debug, Deserialize)]
struct ReplyMatch {
    field_id: String,
    #[serde(default)]
    profile_key: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

/// Resolve every field of `analysis`. The result has one entry per field,
/// in field order.
pub async fn fill_fields(
    analysis: &AnalysisResult,
    profile: &UserProfile,
    client: &dyn InferenceClient,
    config: &PipelineConfig,
    cancel: &CancelToken,
) -> Result<(FillResult, Vec<PageWarning>), FormFillError> {
    let mut resolved: HashMap<&str, FillValue> = HashMap::new();
    let mut warnings = Vec::new();

    for field in &analysis.fields {
        if let Some(value) = &field.value {
            resolved.insert(
                field.id.as_str(),
                FillValue::Resolved {
                    value: value.clone(),
                    source: ValueSource::Document,
                    confidence: 1.0,
                },
            );
        }
    }

    let pending: Vec<&ExtractedField> = analysis
        .fields
        .iter()
        .filter(|f| f.value.is_none())
        .collect();

    if pending.is_empty() || profile.is_empty() {
        debug!("Filler: nothing to match ({} pending, profile empty: {})", pending.len(), profile.is_empty());
    } else {
        match match_with_model(&pending, profile, client, config, cancel).await {
            Ok(matches) => resolved.extend(matches),
            Err(MatchFailure::Fatal(e)) => return Err(e),
            Err(MatchFailure::Degraded(reason)) => {
                warnings.push(PageWarning::FillDegraded {
                    fields: pending.len(),
                    reason,
                });
                if config.fallback_matching == FallbackMatching::Lexical {
                    resolved.extend(match_lexically(&pending, profile, config.match_threshold));
                }
            }
        }
    }

    let entries = analysis
        .fields
        .iter()
        .map(|f| FillEntry {
            field_id: f.id.clone(),
            value: resolved.remove(f.id.as_str()).unwrap_or(FillValue::Unresolved),
        })
        .collect::<Vec<_>>();
    let result = FillResult { entries };
    info!(
        "Filler: {}/{} fields resolved",
        result.resolved_count(),
        result.entries.len()
    );
    Ok((result, warnings))
}

enum MatchFailure {
    /// Reply unusable or transport failed; fields degrade.
    Degraded(String),
    /// Cancellation, or a transport failure with `halt_on_fill_error`.
    Fatal(FormFillError),
}

async fn match_with_model<'f>(
    pending: &[&'f ExtractedField],
    profile: &UserProfile,
    client: &dyn InferenceClient,
    config: &PipelineConfig,
    cancel: &CancelToken,
) -> Result<Vec<(&'f str, FillValue)>, MatchFailure> {
    let req = request(
        config,
        FILLER_SYSTEM_PROMPT,
        filler_user_prompt(
            pending.iter().map(|f| (f.id.as_str(), f.label.as_str())),
            profile.iter().map(|(k, _)| k),
        ),
    );

    let mut reason = String::new();
    for attempt in 1..=config.fill_attempts {
        let reply = match complete_with_retry(client, &req, config, cancel, Stage::Filled).await {
            Ok(r) => r,
            Err(e @ FormFillError::Cancelled { .. }) => return Err(MatchFailure::Fatal(e)),
            Err(e) if config.halt_on_fill_error => return Err(MatchFailure::Fatal(e)),
            Err(e) => return Err(MatchFailure::Degraded(e.to_string())),
        };
        match sanitize::<FillerReply>(&reply.content, config.max_repairs) {
            Sanitized::Success(parsed) => return Ok(accept_matches(pending, parsed, profile, config.match_threshold)),
            failure => {
                reason = failure.failure_reason().unwrap_or_default().to_string();
                warn!("Filler: attempt {} unusable: {}", attempt, reason);
            }
        }
    }
    Err(MatchFailure::Degraded(reason))
}

fn accept_matches<'f>(
    pending: &[&'f ExtractedField],
    reply: FillerReply,
    profile: &UserProfile,
    threshold: f32,
) -> Vec<(&'f str, FillValue)> {
    let mut out: Vec<(&'f str, FillValue)> = Vec::new();
    for m in reply.matches {
        let Some(field) = pending.iter().find(|f| f.id == m.field_id.trim()) else {
            debug!("Filler: ignoring match for unknown field '{}'", m.field_id);
            continue;
        };
        let confidence = m.confidence.unwrap_or(0.0).clamp(0.0, 1.0);
        let existing = out.iter().position(|(id, _)| *id == field.id);
        if let Some(i) = existing {
            if matches!(out[i].1, FillValue::Resolved { confidence: kept, .. } if kept >= confidence) {
                continue;
            }
        }
        let Some(key) = m.profile_key.as_deref().map(str::trim) else {
            continue;
        };
        if confidence < threshold {
            debug!("Filler: {} → {} below threshold ({:.2})", field.id, key, confidence);
            continue;
        }
        let Some(value) = profile.get(key).filter(|v| !v.trim().is_empty()) else {
            debug!("Filler: {} → unknown profile key '{}'", field.id, key);
            continue;
        };
        let entry = (
            field.id.as_str(),
            FillValue::Resolved {
                value: value.to_string(),
                source: ValueSource::Profile { key: key.to_string() },
                confidence,
            },
        );
        match existing {
            Some(i) => out[i] = entry,
            None => out.push(entry),
        }
    }
    out
}

// ── Lexical matcher ──────────────────────────────────────────────────────

/// Similarity of a field label and a profile key in [0, 1]: 1 for equal
/// folded text, 0.85 when one contains the other, token Jaccard otherwise.
pub fn lexical_score(label: &str, key: &str) -> f32 {
    let a = normalize_label(label);
    let b = normalize_label(key);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    if a.contains(&b) || b.contains(&a) {
        return 0.85;
    }
    let ta: HashSet<&str> = a.split(' ').collect();
    let tb: HashSet<&str> = b.split(' ').collect();
    let inter = ta.intersection(&tb).count() as f32;
    let union = ta.union(&tb).count() as f32;
    inter / union
}

fn match_lexically<'f>(
    pending: &[&'f ExtractedField],
    profile: &UserProfile,
    threshold: f32,
) -> Vec<(&'f str, FillValue)> {
    pending
        .iter()
        .filter_map(|field| {
            let (key, value, score) = profile
                .iter()
                .map(|(k, v)| (k, v, lexical_score(&field.label, k)))
                .max_by(|a, b| a.2.total_cmp(&b.2))?;
            (score >= threshold).then(|| {
                (
                    field.id.as_str(),
                    FillValue::Resolved {
                        value: value.to_string(),
                        source: ValueSource::Lexical { key: key.to_string() },
                        confidence: score,
                    },
                )
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::AnalysisSource;
    use crate::pipeline::llm::{InferenceError, InferenceReply, InferenceRequest};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().rev().map(|s| s.to_string()).collect()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl InferenceClient for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _r: &InferenceRequest) -> Result<InferenceReply, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let content = self.replies.lock().unwrap().pop().unwrap_or_default();
            Ok(InferenceReply {
                content,
                ..Default::default()
            })
        }
    }

    struct Failing;

    #[async_trait]
    impl InferenceClient for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn complete(&self, _r: &InferenceRequest) -> Result<InferenceReply, InferenceError> {
            Err(InferenceError::Api("connection refused".into()))
        }
    }

    fn analysis(fields: &[(&str, &str, Option<&str>)]) -> AnalysisResult {
        AnalysisResult {
            document_type: "application".into(),
            summary: String::new(),
            critical: false,
            amount_due: None,
            deadline: None,
            key_points: vec![],
            fields: fields
                .iter()
                .map(|(id, label, value)| ExtractedField {
                    id: id.to_string(),
                    label: label.to_string(),
                    value: value.map(str::to_string),
                    anchor: None,
                })
                .collect(),
            source: AnalysisSource::Model,
        }
    }

    fn profile() -> UserProfile {
        [("surname", "Papadopoulos"), ("city", "Athens")].into_iter().collect()
    }

    #[tokio::test]
    async fn resolves_from_profile_not_model_text() {
        let a = analysis(&[("f001", "Surname", None)]);
        let client = Scripted::new(&[
            r#"{"matches": [{"field_id": "f001", "profile_key": "surname", "confidence": 0.93, "value": "Smith"}]}"#,
        ]);
        let (fill, warnings) = fill_fields(&a, &profile(), &client, &PipelineConfig::default(), &CancelToken::new())
            .await
            .unwrap();
        assert!(warnings.is_empty());
        assert_eq!(
            fill.get("f001"),
            Some(&FillValue::Resolved {
                value: "Papadopoulos".into(),
                source: ValueSource::Profile { key: "surname".into() },
                confidence: 0.93,
            })
        );
    }

    #[tokio::test]
    async fn document_value_has_precedence() {
        let a = analysis(&[("f001", "Surname", Some("Georgiou")), ("f002", "City", None)]);
        let client = Scripted::new(&[
            r#"{"matches": [{"field_id": "f001", "profile_key": "surname", "confidence": 1.0},
                            {"field_id": "f002", "profile_key": "city", "confidence": 0.9}]}"#,
        ]);
        let (fill, _) = fill_fields(&a, &profile(), &client, &PipelineConfig::default(), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(fill.get("f001").and_then(FillValue::text), Some("Georgiou"));
        assert_eq!(fill.get("f002").and_then(FillValue::text), Some("Athens"));
    }

    #[tokio::test]
    async fn low_confidence_and_unknown_keys_are_unresolved() {
        let a = analysis(&[("f001", "Surname", None), ("f002", "Phone", None), ("f003", "Email", None)]);
        let client = Scripted::new(&[
            r#"{"matches": [{"field_id": "f001", "profile_key": "surname", "confidence": 0.5},
                            {"field_id": "f002", "profile_key": "phone", "confidence": 0.99},
                            {"field_id": "f003", "profile_key": null, "confidence": 0}]}"#,
        ]);
        let (fill, _) = fill_fields(&a, &profile(), &client, &PipelineConfig::default(), &CancelToken::new())
            .await
            .unwrap();
        assert!(fill.covers(&a));
        assert_eq!(fill.unresolved_count(), 3);
    }

    #[tokio::test]
    async fn malformed_twice_degrades_to_unresolved() {
        let a = analysis(&[("f001", "Surname", None)]);
        let client = Scripted::new(&["not json", "still not json"]);
        let (fill, warnings) = fill_fields(&a, &profile(), &client, &PipelineConfig::default(), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
        assert_eq!(fill.get("f001"), Some(&FillValue::Unresolved));
        assert!(matches!(warnings[0], PageWarning::FillDegraded { fields: 1, .. }));
    }

    #[tokio::test]
    async fn malformed_then_valid_recovers() {
        let a = analysis(&[("f001", "Surname", None)]);
        let client = Scripted::new(&[
            "oops",
            r#"{"matches": [{"field_id": "f001", "profile_key": "surname", "confidence": 0.8}]}"#,
        ]);
        let (fill, warnings) = fill_fields(&a, &profile(), &client, &PipelineConfig::default(), &CancelToken::new())
            .await
            .unwrap();
        assert!(warnings.is_empty());
        assert_eq!(fill.resolved_count(), 1);
    }

    #[tokio::test]
    async fn lexical_fallback_when_selected() {
        let a = analysis(&[("f001", "City:", None), ("f002", "Signature", None)]);
        let client = Scripted::new(&["garbage", "garbage"]);
        let config = PipelineConfig::builder()
            .fallback_matching(FallbackMatching::Lexical)
            .build()
            .unwrap();
        let (fill, _) = fill_fields(&a, &profile(), &client, &config, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(fill.get("f001").and_then(FillValue::text), Some("Athens"));
        assert_eq!(fill.get("f002"), Some(&FillValue::Unresolved));
    }

    #[tokio::test]
    async fn highest_confidence_match_wins() {
        let a = analysis(&[("f001", "Surname", None)]);
        let client = Scripted::new(&[
            r#"{"matches": [{"field_id": "f001", "profile_key": "city", "confidence": 0.8},
                            {"field_id": "f001", "profile_key": "surname", "confidence": 0.97},
                            {"field_id": "f001", "profile_key": "city", "confidence": 0.9}]}"#,
        ]);
        let (fill, _) = fill_fields(&a, &profile(), &client, &PipelineConfig::default(), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(fill.entries.len(), 1);
        assert_eq!(
            fill.get("f001"),
            Some(&FillValue::Resolved {
                value: "Papadopoulos".into(),
                source: ValueSource::Profile { key: "surname".into() },
                confidence: 0.97,
            })
        );
    }

    #[tokio::test]
    async fn transport_failure_degrades_and_keeps_document_values() {
        let a = analysis(&[("f001", "Surname", Some("Georgiou")), ("f002", "City", None)]);
        let config = PipelineConfig::builder().max_retries(0).build().unwrap();
        let (fill, warnings) = fill_fields(&a, &profile(), &Failing, &config, &CancelToken::new())
            .await
            .unwrap();
        assert!(fill.covers(&a));
        assert_eq!(fill.get("f001").and_then(FillValue::text), Some("Georgiou"));
        assert_eq!(fill.get("f002"), Some(&FillValue::Unresolved));
        assert!(matches!(warnings[..], [PageWarning::FillDegraded { fields: 1, .. }]));
    }

    #[tokio::test]
    async fn transport_failure_halts_when_configured() {
        let a = analysis(&[("f001", "Surname", None)]);
        let config = PipelineConfig::builder()
            .max_retries(0)
            .halt_on_fill_error(true)
            .build()
            .unwrap();
        let err = fill_fields(&a, &profile(), &Failing, &config, &CancelToken::new())
            .await
            .unwrap_err();
        assert!(err.is_resumable(), "{err}");
    }

    #[tokio::test]
    async fn empty_profile_skips_inference() {
        let a = analysis(&[("f001", "Surname", None)]);
        let client = Scripted::new(&[]);
        let (fill, _) = fill_fields(&a, &UserProfile::new(), &client, &PipelineConfig::default(), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert_eq!(fill.unresolved_count(), 1);
    }

    #[test]
    fn lexical_scores() {
        assert_eq!(lexical_score("Επώνυμο", "επωνυμο"), 1.0);
        assert_eq!(lexical_score("Date of birth", "birth"), 0.85);
        assert!(lexical_score("home address", "address_line") < 0.75);
        assert_eq!(lexical_score("", "x"), 0.0);
    }
}
