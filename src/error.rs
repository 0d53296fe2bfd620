//! Error types for the edgequake-formfill library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`FormFillError`] (**fatal**): the document cannot be processed further
//!   (unreadable input, pdfium missing, an anchor outside the page, no font
//!   covering a value, cancellation). Returned as `Err(FormFillError)` from
//!   the `process*` entry points; the [`crate::state::DocumentContext`] keeps
//!   the last completed stage so the run can be resumed.
//!
//! * [`PageWarning`] (**non-fatal**): OCR failed on one page, a value had to
//!   be truncated, the analyzer fell back to heuristics. Collected in
//!   [`crate::output::FillOutput::warnings`].

use crate::state::Stage;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-formfill library.
#[derive(Debug, Error)]
pub enum FormFillError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The bytes are neither a PDF nor a supported raster image.
    #[error("Unsupported document format for '{source_name}'\nFirst bytes: {magic:?}\nSupported: PDF, PNG, JPEG, TIFF, BMP.")]
    UnsupportedFormat { source_name: String, magic: [u8; 4] },

    #[error("Input '{source_name}' is {size_mb:.1} MB, above the {limit_mb} MB limit")]
    FileTooLarge {
        source_name: String,
        size_mb: f64,
        limit_mb: u64,
    },

    // ── Document errors ───────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF is corrupt: {detail}\nTry repairing with: qpdf input.pdf output.pdf")]
    CorruptPdf { detail: String },

    #[error("PDF is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired,

    #[error("Image could not be decoded: {detail}")]
    ImageDecodeFailed { detail: String },

    /// The document has no pages at all.
    #[error("Document has no pages")]
    EmptyDocument,

    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium, place the library next to the binary,\n\
or install it system-wide.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Collaborator errors ───────────────────────────────────────────────
    /// The OCR engine binary is missing or cannot be started.
    #[error("OCR engine '{engine}' is unavailable: {detail}\nInstall tesseract with the 'ell' and 'eng' language packs.")]
    OcrUnavailable { engine: String, detail: String },

    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// An inference call timed out after all retries.
    #[error("{stage} inference timed out after {elapsed_ms}ms")]
    ApiTimeout { stage: Stage, elapsed_ms: u64 },

    /// The inference endpoint returned an error after all retries.
    #[error("LLM API error during {stage}: {message}")]
    LlmApiError { stage: Stage, message: String },

    #[error("Failed to load profile '{path}': {detail}")]
    ProfileLoadFailed { path: PathBuf, detail: String },

    // ── Rendering errors ──────────────────────────────────────────────────
    /// A field anchor lies outside its page; the document geometry is not trusted.
    #[error("Page {page}: anchor of field '{field_id}' lies outside the page bounds")]
    AnchorOutOfBounds { page: usize, field_id: String },

    /// No font candidate covers every character of a value.
    #[error("Page {page}: no font covers the value of field '{field_id}' (missing {missing:?})\nInstall DejaVu Sans or set --font.")]
    NoCoveringFont {
        page: usize,
        field_id: String,
        missing: String,
    },

    #[error("Page {page}: rendering failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    // ── Control ───────────────────────────────────────────────────────────
    #[error("Processing cancelled during {stage}")]
    Cancelled { stage: Stage },

    /// `resume` was called on a context that has nothing left to do.
    #[error("Document is already {stage}; nothing to resume")]
    NothingToResume { stage: Stage },

    // ── I/O errors ────────────────────────────────────────────────────────
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FormFillError {
    /// True for errors that abort the run but leave a resumable context.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            FormFillError::Cancelled { .. }
                | FormFillError::ApiTimeout { .. }
                | FormFillError::LlmApiError { .. }
        )
    }
}

/// A non-fatal problem recorded during processing.
///
/// Page numbers are 1-indexed in messages, matching what a reader of the
/// printed form sees.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageWarning {
    /// OCR failed; the page is treated as having no text.
    #[error("Page {page}: OCR failed: {detail}")]
    OcrFailed { page: usize, detail: String },

    /// The page could not be rasterised for OCR.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// OCR succeeded with low mean word confidence.
    #[error("Page {page}: low OCR confidence ({confidence:.0}%)")]
    LowOcrConfidence { page: usize, confidence: f32 },

    /// The analyzer output could not be used; the pattern detector ran instead.
    #[error("Document analysis fell back to pattern detection after {attempts} attempt(s): {reason}")]
    AnalysisFallback { attempts: u32, reason: String },

    /// The filler output could not be used for the listed fields.
    #[error("Form filling degraded for {fields} field(s): {reason}")]
    FillDegraded { fields: usize, reason: String },

    /// A value did not fit its blank even at the minimum font size.
    #[error("Page {page}: value of field '{field_id}' truncated to fit its blank")]
    TextTruncated { page: usize, field_id: String },

    /// A field with no anchor could not be tied to any blank by label.
    #[error("Field '{field_id}' ({label}) could not be placed on any page")]
    FieldNotPlaced { field_id: String, label: String },

    /// A whiteout had to shrink below the run it covers to avoid a neighbour.
    #[error("Page {page}: whiteout of field '{field_id}' shrunk to avoid an overlap")]
    WhiteoutShrunk { page: usize, field_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_names_stage() {
        let e = FormFillError::Cancelled {
            stage: Stage::TextAcquired,
        };
        assert!(e.to_string().contains("text acquisition"), "got: {e}");
        assert!(e.is_resumable());
    }

    #[test]
    fn no_covering_font_display() {
        let e = FormFillError::NoCoveringFont {
            page: 2,
            field_id: "f003".into(),
            missing: "Ω".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("Page 2"));
        assert!(msg.contains("f003"));
        assert!(!e.is_resumable());
    }

    #[test]
    fn too_large_display() {
        let e = FormFillError::FileTooLarge {
            source_name: "scan.png".into(),
            size_mb: 61.34,
            limit_mb: 50,
        };
        assert!(e.to_string().contains("61.3 MB"));
    }

    #[test]
    fn warning_display_and_serde() {
        let w = PageWarning::OcrFailed {
            page: 3,
            detail: "tesseract exited with 1".into(),
        };
        assert!(w.to_string().starts_with("Page 3: OCR failed"));
        let json = serde_json::to_string(&w).unwrap();
        let back: PageWarning = serde_json::from_str(&json).unwrap();
        assert_eq!(back, w);
    }
}
