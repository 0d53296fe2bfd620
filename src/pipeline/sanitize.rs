//! Response sanitization: turn raw model text into a typed value or a typed
//! failure.
//!
//! Models asked for JSON still wrap it in fences, prepend chatter, leave
//! trailing commas, use typographic quotes, and echo the form's own
//! placeholders (`[...]`, `______`, `…`) back as "values". Everything here is
//! deletion-only, except the quote normalisation repair: characters are
//! removed, never reordered, never invented.
//!
//! ## Steps
//!
//! 1. Strip markdown fences
//! 2. Strip invisible Unicode
//! 3. Remove hallucination artifacts, repeated until nothing changes
//! 4. Parse against the target type
//! 5. Bounded corrective reparses (isolate object, trailing commas, quotes)

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::error::Category;
use tracing::debug;

/// Outcome of sanitizing one model response.
#[derive(Debug, Clone, PartialEq)]
pub enum Sanitized<T> {
    Success(T),
    /// No well-formed structure could be recovered.
    SanitizationFailure { reason: String },
    /// Well-formed JSON that does not match the expected shape.
    SchemaFailure { reason: String },
}

impl<T> Sanitized<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            Sanitized::Success(v) => Some(v),
            _ => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Sanitized::Success(_) => None,
            Sanitized::SanitizationFailure { reason } | Sanitized::SchemaFailure { reason } => {
                Some(reason)
            }
        }
    }
}

/// Sanitize `raw` and parse it as `T`, trying up to `max_repairs` repairs.
pub fn sanitize<T: DeserializeOwned>(raw: &str, max_repairs: u32) -> Sanitized<T> {
    let cleaned = strip_artifacts(&remove_invisible_chars(&strip_fences(raw)));
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return Sanitized::SanitizationFailure {
            reason: "response is empty after cleanup".into(),
        };
    }
    if !cleaned.contains('{') {
        return Sanitized::SanitizationFailure {
            reason: "response contains no JSON object".into(),
        };
    }

    let mut candidate = cleaned.to_string();
    let mut last_error = match parse::<T>(&candidate) {
        Ok(v) => return Sanitized::Success(v),
        Err(Failure::Schema(reason)) => return Sanitized::SchemaFailure { reason },
        Err(Failure::Syntax(reason)) => reason,
    };

    for (n, repair) in REPAIRS.iter().take(max_repairs as usize).enumerate() {
        let repaired = repair(&candidate);
        if repaired == candidate {
            continue;
        }
        debug!("sanitize: repair {} applied", n + 1);
        candidate = repaired;
        match parse::<T>(&candidate) {
            Ok(v) => return Sanitized::Success(v),
            Err(Failure::Schema(reason)) => return Sanitized::SchemaFailure { reason },
            Err(Failure::Syntax(reason)) => last_error = reason,
        }
    }

    Sanitized::SanitizationFailure { reason: last_error }
}

enum Failure {
    Syntax(String),
    Schema(String),
}

fn parse<T: DeserializeOwned>(s: &str) -> Result<T, Failure> {
    serde_json::from_str::<T>(s).map_err(|e| match e.classify() {
        Category::Data => Failure::Schema(e.to_string()),
        _ => Failure::Syntax(e.to_string()),
    })
}

/// Clean one string value. Artifact-only and placeholder values are absent.
pub fn clean_value(value: &str) -> Option<String> {
    let s = strip_artifacts(&remove_invisible_chars(value));
    let s = s.replace(['[', ']'], "");
    let s = s.trim_matches(|c: char| c.is_whitespace() || c == '"' || c == ':');
    if s.is_empty() || s.chars().all(|c| !c.is_alphanumeric()) {
        return None;
    }
    let lower = s.to_lowercase();
    if PLACEHOLDER_WORDS.contains(&lower.as_str()) {
        return None;
    }
    Some(s.to_string())
}

const PLACEHOLDER_WORDS: &[&str] = &["null", "none", "n/a", "na", "unknown", "κενό", "-"];

// ── Step 1: Strip markdown fences ────────────────────────────────────────────

static RE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```[A-Za-z]*").unwrap());

fn strip_fences(input: &str) -> String {
    RE_FENCE.replace_all(input, "").to_string()
}

// ── Step 2: Strip invisible Unicode ──────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| {
            !matches!(
                c,
                '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}' | '\u{00AD}'
            )
        })
        .collect()
}

// ── Step 3: Hallucination artifacts ──────────────────────────────────────────

static RE_ARTIFACT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[\s*(?:\.{2,}|…+|_{2,})\s*\]|_{3,}|\.{3,}|…+").unwrap()
});

/// Remove placeholder artifacts until the text stops changing.
pub fn strip_artifacts(input: &str) -> String {
    let mut current = input.to_string();
    loop {
        let next = RE_ARTIFACT.replace_all(&current, "").to_string();
        if next == current {
            return current;
        }
        current = next;
    }
}

// ── Step 5: Corrective repairs (applied cumulatively) ───────────────────────

type Repair = fn(&str) -> String;

const REPAIRS: &[Repair] = &[isolate_object, remove_trailing_commas, normalise_quotes];

fn isolate_object(input: &str) -> String {
    match (input.find('{'), input.rfind('}')) {
        (Some(start), Some(end)) if end > start => input[start..=end].to_string(),
        _ => input.to_string(),
    }
}

static RE_TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",(\s*[}\]])").unwrap());

fn remove_trailing_commas(input: &str) -> String {
    RE_TRAILING_COMMA.replace_all(input, "$1").to_string()
}

fn normalise_quotes(input: &str) -> String {
    input.replace(['\u{201C}', '\u{201D}', '\u{201E}', '\u{00AB}', '\u{00BB}'], "\"")
}
