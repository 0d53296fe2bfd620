//! # edgequake-formfill
//!
//! Fill bureaucratic forms (scanned images or PDFs) from a user profile.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / PNG / JPEG / TIFF / BMP
//!  │
//!  ├─ 1. Input     resolve local file, URL or bytes; sniff the format
//!  ├─ 2. Acquire   pdfium text layer per page, tesseract OCR for scanned pages
//!  ├─ 3. Analyze   Agent 1: document type, summary, criticality, fields
//!  ├─ 4. Fill      Agent 2: field → profile key; values come from the profile
//!  ├─ 5. Layout    dotted-line blanks → whiteout rectangles + fitted text
//!  └─ 6. Render    draw into the PDF (pdfium) or the image (ab_glyph)
//! ```
//!
//! Every model reply passes through [`pipeline::sanitize`] before it is
//! trusted. When the analyzer's replies stay unusable, a pattern detector
//! builds the fields from the dotted-line runs alone; when the filler's do,
//! fields stay unresolved (or go through a lexical matcher, if configured).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_formfill::{process_to_file, PipelineConfig, UserProfile};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / EDGEQUAKE_LLM_PROVIDER / …
//!     let profile = UserProfile::load("profile.json")?;
//!     let config = PipelineConfig::default();
//!     let output = process_to_file("application.pdf", "filled.pdf", &profile, &config).await?;
//!     println!("{}: {}", output.analysis.document_type, output.analysis.summary);
//!     eprintln!("{}/{} fields filled", output.stats.fields_resolved, output.stats.fields_detected);
//!     Ok(())
//! }
//! ```
//!
//! ## External tools
//!
//! | Tool | Needed for | Lookup |
//! |------|-----------|--------|
//! | pdfium | PDF input | `PDFIUM_LIB_PATH`, current directory, system path |
//! | tesseract (`ell`, `eng`) | scanned pages, image input | `PATH` or `tesseract_path` |
//! | a TrueType font | drawing values | `extra_font`, user font dir, platform candidates |
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `formfill` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cancel;
pub mod config;
pub mod document;
pub mod error;
pub mod fields;
pub mod geometry;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod profile;
pub mod progress;
pub mod prompts;
pub mod state;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cancel::CancelToken;
pub use config::{FallbackMatching, PipelineConfig, PipelineConfigBuilder};
pub use document::{Document, PageText, SourceFormat, TextSource};
pub use error::{FormFillError, PageWarning};
pub use fields::{
    AnalysisResult, AnalysisSource, ExtractedField, FillResult, FillValue, RenderInstruction, ValueSource,
};
pub use output::{DocumentInfo, FillOutput, ProcessingStats};
pub use process::{
    inspect, process, process_batch, process_batch_with, process_document, process_from_bytes, process_sync,
    process_to_file, resume, start, Collaborators,
};
pub use profile::UserProfile;
pub use progress::{FormFillProgressCallback, NoopProgressCallback, ProgressCallback};
pub use state::{DocumentContext, Stage};
