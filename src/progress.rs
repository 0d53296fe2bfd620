//! Progress-callback trait for pipeline events.
//!
//! Inject an [`Arc<dyn FormFillProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as a document moves through acquisition, analysis, filling and
//! rendering.
//!
//! # Example
//!
//! ```rust
//! use edgequake_formfill::{FormFillProgressCallback, PipelineConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct OcrCounter(AtomicUsize);
//!
//! impl FormFillProgressCallback for OcrCounter {
//!     fn on_ocr_page(&self, page_num: usize, total_pages: usize) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("OCR on page {}/{}", page_num, total_pages);
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(OcrCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::document::TextSource;
use crate::error::PageWarning;
use crate::state::Stage;
use std::sync::Arc;

/// Called by the pipeline as it processes a document.
///
/// Implementations must be `Send + Sync`: `process_batch` drives several
/// documents concurrently and they share one callback. Every method has a
/// no-op default. Page numbers are 1-indexed.
pub trait FormFillProgressCallback: Send + Sync {
    /// Called once per document after ingestion.
    fn on_document_start(&self, source: &str, total_pages: usize) {
        let _ = (source, total_pages);
    }

    /// Called when a page's text has been acquired.
    fn on_page_acquired(&self, page_num: usize, total_pages: usize, source: TextSource, chars: usize) {
        let _ = (page_num, total_pages, source, chars);
    }

    /// Called exactly once for every page sent to OCR, before recognition.
    fn on_ocr_page(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called for every non-fatal warning as it is recorded.
    fn on_page_warning(&self, warning: &PageWarning) {
        let _ = warning;
    }

    /// Called when a lifecycle stage completes.
    fn on_stage_complete(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called once per document with the resolved/total field counts.
    fn on_document_complete(&self, source: &str, resolved: usize, total_fields: usize) {
        let _ = (source, resolved, total_fields);
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl FormFillProgressCallback for NoopProgressCallback {}

pub type ProgressCallback = Arc<dyn FormFillProgressCallback>;
