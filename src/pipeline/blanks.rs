//! Dotted-line blank detection.
//!
//! A blank is a maximal run of separator glyphs (`.`, `…`, `_`, `·`, `‥`),
//! optionally with single spaces between them, whose length reaches
//! `min_run_len` (an ellipsis or two-dot leader counts as two, so a lone
//! ellipsis in prose is not a blank). The label of a blank is the
//! text between the previous blank on the same line (or the line start) and
//! the run, trimmed of whitespace, colons and stray separators.
//!
//! Runs are located on the per-character boxes of a [`PageText`], so the same
//! detector serves the analyzer's pre-step, the heuristic fallback and the
//! renderer, for native and OCR text alike.

use crate::document::PageText;
use crate::geometry::BBox;
use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// A detected dotted-line run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DottedRun {
    /// Document-wide id, assigned by [`assign_ids`].
    pub id: String,
    /// 0-based page index.
    pub page: usize,
    /// Index of the text block (line) on the page.
    pub block: usize,
    /// Char range of the run inside the block text.
    pub start: usize,
    pub end: usize,
    pub bbox: BBox,
    pub label: String,
}

fn separator_weight(c: char) -> usize {
    match c {
        '…' | '‥' => 2,
        '.' | '_' | '·' => 1,
        _ => 0,
    }
}

pub fn is_separator(c: char) -> bool {
    separator_weight(c) > 0
}

/// Char ranges of the runs in one line of text.
fn run_spans(chars: &[char], min_run_len: usize) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        if !is_separator(chars[i]) {
            i += 1;
            continue;
        }
        let start = i;
        let mut weight = 0;
        let mut end = i;
        let mut j = i;
        while j < chars.len() {
            if is_separator(chars[j]) {
                weight += separator_weight(chars[j]);
                j += 1;
                end = j;
            } else if chars[j] == ' ' && j + 1 < chars.len() && is_separator(chars[j + 1]) {
                j += 1;
            } else {
                break;
            }
        }
        if weight >= min_run_len {
            spans.push((start, end));
        }
        i = end.max(i + 1);
    }
    spans
}

/// Detect runs on one page, in reading order. Ids are left empty.
pub fn detect_runs(page: &PageText, min_run_len: usize) -> Vec<DottedRun> {
    let mut runs = Vec::new();
    for (block_idx, block) in page.blocks.iter().enumerate() {
        let chars: Vec<char> = block.text.chars().collect();
        let mut label_start = 0;
        for (start, end) in run_spans(&chars, min_run_len) {
            if let Some(bbox) = block.span_bbox(start, end) {
                let label: String = chars[label_start..start].iter().collect();
                runs.push(DottedRun {
                    id: String::new(),
                    page: page.page_index,
                    block: block_idx,
                    start,
                    end,
                    bbox,
                    label: clean_label(&label),
                });
            }
            label_start = end;
        }
    }
    runs
}

/// The text around the dotted runs of `text`, as `(char offset, segment)`
/// pairs, whitespace-trimmed, empty segments dropped. `None` when `text`
/// holds no run. Used to drop blanks from a PDF text layer.
pub fn split_at_runs(text: &str, min_run_len: usize) -> Option<Vec<(usize, String)>> {
    let chars: Vec<char> = text.chars().collect();
    let spans = run_spans(&chars, min_run_len);
    if spans.is_empty() {
        return None;
    }
    let mut segments = Vec::with_capacity(spans.len() + 1);
    let mut from = 0;
    for (start, end) in spans.into_iter().chain(std::iter::once((chars.len(), chars.len()))) {
        let piece = &chars[from..start];
        if let Some(lead) = piece.iter().position(|c| !c.is_whitespace()) {
            let segment: String = piece[lead..].iter().collect();
            segments.push((from + lead, segment.trim_end().to_string()));
        }
        from = end;
    }
    Some(segments)
}

/// Give runs of all pages (already in page order) ids `f001`, `f002`, ….
pub fn assign_ids(runs: &mut [DottedRun]) {
    for (n, run) in runs.iter_mut().enumerate() {
        run.id = format!("f{:03}", n + 1);
    }
}

/// Detect and number runs over a whole document.
pub fn detect_document_runs(pages: &[PageText], min_run_len: usize) -> Vec<DottedRun> {
    let mut runs: Vec<DottedRun> = pages
        .iter()
        .flat_map(|p| detect_runs(p, min_run_len))
        .collect();
    assign_ids(&mut runs);
    runs
}

fn clean_label(raw: &str) -> String {
    raw.trim_matches(|c: char| c.is_whitespace() || c == ':' || c == '-' || is_separator(c))
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// A label the pattern detector will turn into a field: 2–50 characters,
/// at least two letters.
pub fn is_label_like(label: &str) -> bool {
    let len = label.chars().count();
    (2..=50).contains(&len) && label.chars().filter(|c| c.is_alphabetic()).count() >= 2
}

/// Fold a label for comparison: NFD, combining marks removed, lowercase,
/// final sigma folded, punctuation dropped, whitespace collapsed.
pub fn normalize_label(s: &str) -> String {
    let folded: String = s
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'ς' => 'σ',
            c if c.is_alphanumeric() => c,
            _ => ' ',
        })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}
