//! Prompts for the two inference stages.
//!
//! Both stages ask for a single JSON object. Replies always go through
//! [`crate::pipeline::sanitize`] before anything in them is trusted.

use crate::pipeline::blanks::DottedRun;
use std::fmt::Write;

/// System prompt for the document analyzer.
pub const ANALYZER_SYSTEM_PROMPT: &str = r#"You are a document analyst for bureaucratic paperwork (Greek public administration forms, tax notices, applications, fines).

You receive the text of a document and a list of BLANKS: places where the form expects handwriting, each with an id and the text printed just before it.

Return ONLY a JSON object with this shape:
{
  "document_type": "short type, e.g. application, tax notice, fine",
  "summary": "two or three plain sentences",
  "critical": true or false,
  "amount_due": "amount with currency, or null",
  "deadline": "date or period, or null",
  "key_points": ["short point", "..."],
  "fields": [
    {"id": "f001", "label": "what the blank asks for", "value": "value already written in the document, or null"}
  ]
}

Rules:
- "critical" is true when the document mentions a deadline, a fine, a penalty or a legal consequence.
- Use the blank ids you were given. Add a field without an id only for a fillable item that has no blank.
- "label" is the name of the information requested, in the document's language, without dots or colons.
- "value" is only text that is actually written in the document for that field. Never guess, never copy placeholders such as dots, underscores or brackets.
- Do not wrap the JSON in markdown fences. Do not add commentary."#;

/// Build the analyzer user message.
pub fn analyzer_user_prompt(document_text: &str, runs: &[DottedRun]) -> String {
    let mut out = String::from("BLANKS:\n");
    if runs.is_empty() {
        out.push_str("(none detected)\n");
    }
    for run in runs {
        let _ = writeln!(
            out,
            "- id={} page={} printed_before={:?}",
            run.id,
            run.page + 1,
            run.label
        );
    }
    out.push_str("\nDOCUMENT TEXT:\n\"\"\"\n");
    out.push_str(document_text);
    out.push_str("\n\"\"\"");
    out
}

/// System prompt for the form filler.
pub const FILLER_SYSTEM_PROMPT: &str = r#"You match form fields to the keys of a user profile.

You receive FIELDS (id and label) and PROFILE_KEYS (the names of the information the user has stored). For every field choose the single profile key that holds the information the field asks for.

Return ONLY a JSON object:
{
  "matches": [
    {"field_id": "f001", "profile_key": "surname", "confidence": 0.95},
    {"field_id": "f002", "profile_key": null, "confidence": 0.0}
  ]
}

Rules:
- Use only keys from PROFILE_KEYS, spelled exactly as given.
- Use null when no key fits. A wrong match is worse than no match.
- "confidence" is a number between 0 and 1.
- Labels and keys may be in different languages (Greek and English); match by meaning.
- Do not write values. Do not wrap the JSON in markdown fences."#;

/// Build the filler user message.
pub fn filler_user_prompt<'a>(
    fields: impl IntoIterator<Item = (&'a str, &'a str)>,
    profile_keys: impl IntoIterator<Item = &'a str>,
) -> String {
    let mut out = String::from("FIELDS:\n");
    for (id, label) in fields {
        let _ = writeln!(out, "- {id}: {label}");
    }
    out.push_str("\nPROFILE_KEYS:\n");
    for key in profile_keys {
        let _ = writeln!(out, "- {key}");
    }
    out
}

/// Cut `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
