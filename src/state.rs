//! Per-document lifecycle.
//!
//! ```text
//! Ingested ─acquire─▶ TextAcquired ─analyze─▶ Analyzed ─fill─▶ Filled
//!          ─render─▶ Rendered ─export─▶ Exported
//! ```
//!
//! Any unrecoverable error marks the context failed while keeping the last
//! completed stage and its artifacts, so [`crate::process::resume`] can pick
//! up from there.

use crate::cancel::CancelToken;
use crate::document::{Document, PageText};
use crate::error::{FormFillError, PageWarning};
use crate::fields::{AnalysisResult, FillResult};
use crate::output::ProcessingStats;
use crate::pipeline::render::RenderedDocument;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ingested,
    TextAcquired,
    Analyzed,
    Filled,
    Rendered,
    Exported,
}

impl Stage {
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Ingested => Some(Stage::TextAcquired),
            Stage::TextAcquired => Some(Stage::Analyzed),
            Stage::Analyzed => Some(Stage::Filled),
            Stage::Filled => Some(Stage::Rendered),
            Stage::Rendered => Some(Stage::Exported),
            Stage::Exported => None,
        }
    }
}

/// Names the step that produces the stage.
impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Ingested => "ingestion",
            Stage::TextAcquired => "text acquisition",
            Stage::Analyzed => "analysis",
            Stage::Filled => "filling",
            Stage::Rendered => "rendering",
            Stage::Exported => "export",
        })
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineFailure {
    /// The stage that was being attempted.
    pub attempted: Stage,
    pub message: String,
    pub resumable: bool,
}

/// Everything known about one document during a run.
#[derive(Debug)]
pub struct DocumentContext {
    source_name: String,
    document: Document,
    stage: Stage,
    failure: Option<PipelineFailure>,
    cancel: CancelToken,
    pub(crate) pages: Vec<PageText>,
    pub(crate) analysis: Option<AnalysisResult>,
    pub(crate) fill: Option<FillResult>,
    pub(crate) rendered: Option<RenderedDocument>,
    pub(crate) warnings: Vec<PageWarning>,
    pub(crate) stats: ProcessingStats,
}

impl DocumentContext {
    pub fn new(source_name: impl Into<String>, document: Document, cancel: CancelToken) -> Self {
        let stats = ProcessingStats {
            total_pages: document.page_count(),
            ..Default::default()
        };
        Self {
            source_name: source_name.into(),
            document,
            stage: Stage::Ingested,
            failure: None,
            cancel,
            pages: Vec::new(),
            analysis: None,
            fill: None,
            rendered: None,
            warnings: Vec::new(),
            stats,
        }
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Last successfully completed stage.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn failure(&self) -> Option<&PipelineFailure> {
        self.failure.as_ref()
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Replace the token, e.g. before resuming a cancelled run.
    pub fn set_cancel_token(&mut self, token: CancelToken) {
        self.cancel = token;
    }

    pub fn pages(&self) -> &[PageText] {
        &self.pages
    }

    pub fn analysis(&self) -> Option<&AnalysisResult> {
        self.analysis.as_ref()
    }

    pub fn fill_result(&self) -> Option<&FillResult> {
        self.fill.as_ref()
    }

    pub fn rendered(&self) -> Option<&RenderedDocument> {
        self.rendered.as_ref()
    }

    pub fn warnings(&self) -> &[PageWarning] {
        &self.warnings
    }

    pub fn stats(&self) -> &ProcessingStats {
        &self.stats
    }

    /// Fail with `Cancelled` if the token has fired.
    pub(crate) fn check_cancelled(&self, attempted: Stage) -> Result<(), FormFillError> {
        if self.cancel.is_cancelled() {
            Err(FormFillError::Cancelled { stage: attempted })
        } else {
            Ok(())
        }
    }

    pub(crate) fn complete(&mut self, stage: Stage) {
        debug_assert_eq!(self.stage.next(), Some(stage), "stages complete in order");
        self.stage = stage;
        self.failure = None;
    }

    pub(crate) fn fail(&mut self, attempted: Stage, err: &FormFillError) {
        self.failure = Some(PipelineFailure {
            attempted,
            message: err.to_string(),
            resumable: err.is_resumable(),
        });
    }

    pub(crate) fn warn(&mut self, warning: PageWarning) {
        tracing::warn!("{}", warning);
        self.warnings.push(warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{PageGeometry, SourceFormat};
    use std::sync::Arc;

    fn ctx() -> DocumentContext {
        let doc = Document {
            format: SourceFormat::Pdf,
            bytes: Arc::new(b"%PDF-1.7".to_vec()),
            pages: vec![PageGeometry {
                width: 595.0,
                height: 842.0,
            }],
        };
        DocumentContext::new("form.pdf", doc, CancelToken::new())
    }

    #[test]
    fn stage_order() {
        assert!(Stage::Ingested < Stage::Exported);
        let mut s = Stage::Ingested;
        let mut seen = vec![s];
        while let Some(n) = s.next() {
            seen.push(n);
            s = n;
        }
        assert_eq!(seen.len(), 6);
        assert_eq!(seen.last(), Some(&Stage::Exported));
    }

    #[test]
    fn failure_keeps_last_stage() {
        let mut c = ctx();
        c.complete(Stage::TextAcquired);
        c.fail(
            Stage::Analyzed,
            &FormFillError::Cancelled {
                stage: Stage::Analyzed,
            },
        );
        assert!(c.is_failed());
        assert_eq!(c.stage(), Stage::TextAcquired);
        let failure = c.failure().unwrap();
        assert_eq!(failure.attempted, Stage::Analyzed);
        assert!(failure.resumable);

        c.complete(Stage::Analyzed);
        assert!(!c.is_failed());
    }

    #[test]
    fn cancelled_check() {
        let c = ctx();
        assert!(c.check_cancelled(Stage::TextAcquired).is_ok());
        c.cancel_token().cancel();
        assert!(matches!(
            c.check_cancelled(Stage::TextAcquired),
            Err(FormFillError::Cancelled { .. })
        ));
    }

    #[test]
    fn stats_start_with_page_count() {
        assert_eq!(ctx().stats().total_pages, 1);
    }
}
