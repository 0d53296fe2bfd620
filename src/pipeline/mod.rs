//! Pipeline stages for filling bureaucratic forms.
//!
//! Each submodule implements one step or one collaborator boundary.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ acquire ──▶ analyze ──▶ fill ──▶ layout ──▶ render
//! (path/URL) (pdfium/OCR) (Agent 1)  (Agent 2) (geometry)  (pdfium/ab_glyph)
//! ```
//!
//! 1. [`input`]:    read a path, URL or byte buffer and open its pages
//! 2. [`acquire`]:  native text layer per page, OCR for scanned pages
//! 3. [`analyze`]:  document analyzer; falls back to [`blanks`] patterns
//! 4. [`fill`]:     profile matcher; values always come from the profile
//! 5. [`layout`]:   whiteout rectangles, font choice, text fitting
//! 6. [`render`]:   draw the plan into a PDF or raster image
//!
//! [`sanitize`] sits between every inference reply and its consumer.

pub mod acquire;
pub mod analyze;
pub mod blanks;
pub mod fill;
pub mod fonts;
pub mod input;
pub mod layout;
pub mod llm;
pub mod ocr;
pub mod pdf;
pub mod render;
pub mod sanitize;
