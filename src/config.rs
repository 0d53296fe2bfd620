//! Configuration for the form-filling pipeline.
//!
//! All behaviour is controlled through [`PipelineConfig`], built via
//! [`PipelineConfigBuilder`]. Policy thresholds (OCR trigger, match
//! confidence, attempt counts, rendering sizes) live here with their
//! defaults so two runs can be compared by diffing their configs.

use crate::cancel::CancelToken;
use crate::error::FormFillError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for one pipeline run (or a batch of runs).
///
/// # Example
/// ```rust
/// use edgequake_formfill::{FallbackMatching, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .ocr_dpi(300)
///     .match_threshold(0.8)
///     .fallback_matching(FallbackMatching::Lexical)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    // ── Text acquisition ──────────────────────────────────────────────────
    /// Rasterisation DPI for OCR. Range: 72–600. Default: 300.
    pub ocr_dpi: u32,

    /// A page with fewer non-whitespace native characters is OCR'd. Default: 30.
    pub min_native_chars: usize,

    /// A page whose native character density (chars per 1000 square units)
    /// is below this is OCR'd. Default: 0.05.
    pub min_native_density: f32,

    /// Tesseract language string. Default: `ell+eng`.
    pub ocr_languages: String,

    /// Explicit tesseract binary. If None, `tesseract` on `PATH`.
    pub tesseract_path: Option<PathBuf>,

    /// Mean OCR confidence below which a page warning is emitted. Default: 60.
    pub low_ocr_confidence: f32,

    // ── Inference ─────────────────────────────────────────────────────────
    /// LLM model identifier. If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "ollama", "lmstudio").
    /// If None along with `provider`, uses `ProviderFactory::from_env()`.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens per inference reply. Default: 2048.
    pub max_tokens: usize,

    /// Transport retries per inference call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call inference timeout in seconds. Default: 240.
    pub api_timeout_secs: u64,

    /// Document text sent to the analyzer is cut at this many characters. Default: 8000.
    pub max_prompt_chars: usize,

    // ── Analysis / filling ────────────────────────────────────────────────
    /// Analyzer attempts before the pattern detector takes over. Default: 2.
    pub analysis_attempts: u32,

    /// Filler attempts before fields degrade. Default: 2.
    pub fill_attempts: u32,

    /// Corrective reparses the sanitizer may try per response. Default: 3.
    pub max_repairs: u32,

    /// Minimum matcher confidence to accept a profile key. Default: 0.75.
    pub match_threshold: f32,

    /// What to do with fields the inference matcher could not resolve.
    pub fallback_matching: FallbackMatching,

    /// Stop the run (resumable) when the matcher's transport fails instead of
    /// degrading the pending fields. Default: false.
    pub halt_on_fill_error: bool,

    // ── Blank detection / rendering ───────────────────────────────────────
    /// Minimum separator glyphs forming a dotted-line run. Default: 3.
    pub min_run_len: usize,

    /// Whiteout margin around a run, in page units. Default: 2.0.
    pub whiteout_margin: f32,

    /// Preferred overlay font size in points. Default: 11.
    pub font_size: f32,

    /// Smallest font size before truncation. Default: 6.
    pub min_font_size: f32,

    /// Overlay text colour. Default: dark blue `(0, 0, 204)`.
    pub text_color: [u8; 3],

    /// Font files tried before the platform candidates.
    pub extra_fonts: Vec<PathBuf>,

    // ── Input ─────────────────────────────────────────────────────────────
    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Input size cap in megabytes. Default: 50.
    pub max_file_size_mb: u64,

    // ── Orchestration ─────────────────────────────────────────────────────
    /// Documents processed concurrently by `process_batch`. Default: 4.
    pub batch_concurrency: usize,

    pub progress_callback: Option<ProgressCallback>,

    /// Cancellation shared by every document processed with this config.
    pub cancel: Option<CancelToken>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ocr_dpi: 300,
            min_native_chars: 30,
            min_native_density: 0.05,
            ocr_languages: "ell+eng".to_string(),
            tesseract_path: None,
            low_ocr_confidence: 60.0,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 2048,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 240,
            max_prompt_chars: 8000,
            analysis_attempts: 2,
            fill_attempts: 2,
            max_repairs: 3,
            match_threshold: 0.75,
            fallback_matching: FallbackMatching::default(),
            halt_on_fill_error: false,
            min_run_len: 3,
            whiteout_margin: 2.0,
            font_size: 11.0,
            min_font_size: 6.0,
            text_color: [0, 0, 204],
            extra_fonts: Vec::new(),
            password: None,
            download_timeout_secs: 120,
            max_file_size_mb: 50,
            batch_concurrency: 4,
            progress_callback: None,
            cancel: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("ocr_dpi", &self.ocr_dpi)
            .field("min_native_chars", &self.min_native_chars)
            .field("min_native_density", &self.min_native_density)
            .field("ocr_languages", &self.ocr_languages)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("analysis_attempts", &self.analysis_attempts)
            .field("fill_attempts", &self.fill_attempts)
            .field("match_threshold", &self.match_threshold)
            .field("fallback_matching", &self.fallback_matching)
            .field("halt_on_fill_error", &self.halt_on_fill_error)
            .field("min_run_len", &self.min_run_len)
            .field("whiteout_margin", &self.whiteout_margin)
            .field("font_size", &self.font_size)
            .field("min_font_size", &self.min_font_size)
            .field("batch_concurrency", &self.batch_concurrency)
            .finish()
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    pub(crate) fn cancel_token(&self) -> CancelToken {
        self.cancel.clone().unwrap_or_default()
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn ocr_dpi(mut self, dpi: u32) -> Self {
        self.config.ocr_dpi = dpi.clamp(72, 600);
        self
    }

    pub fn min_native_chars(mut self, n: usize) -> Self {
        self.config.min_native_chars = n;
        self
    }

    pub fn min_native_density(mut self, d: f32) -> Self {
        self.config.min_native_density = d.max(0.0);
        self
    }

    pub fn ocr_languages(mut self, langs: impl Into<String>) -> Self {
        self.config.ocr_languages = langs.into();
        self
    }

    pub fn tesseract_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.tesseract_path = Some(path.into());
        self
    }

    pub fn low_ocr_confidence(mut self, c: f32) -> Self {
        self.config.low_ocr_confidence = c.clamp(0.0, 100.0);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn max_prompt_chars(mut self, n: usize) -> Self {
        self.config.max_prompt_chars = n.max(500);
        self
    }

    pub fn analysis_attempts(mut self, n: u32) -> Self {
        self.config.analysis_attempts = n.max(1);
        self
    }

    pub fn fill_attempts(mut self, n: u32) -> Self {
        self.config.fill_attempts = n.max(1);
        self
    }

    pub fn max_repairs(mut self, n: u32) -> Self {
        self.config.max_repairs = n;
        self
    }

    pub fn match_threshold(mut self, t: f32) -> Self {
        self.config.match_threshold = t.clamp(0.0, 1.0);
        self
    }

    pub fn fallback_matching(mut self, mode: FallbackMatching) -> Self {
        self.config.fallback_matching = mode;
        self
    }

    pub fn halt_on_fill_error(mut self, halt: bool) -> Self {
        self.config.halt_on_fill_error = halt;
        self
    }

    pub fn min_run_len(mut self, n: usize) -> Self {
        self.config.min_run_len = n.max(2);
        self
    }

    pub fn whiteout_margin(mut self, m: f32) -> Self {
        self.config.whiteout_margin = m.max(0.0);
        self
    }

    pub fn font_size(mut self, size: f32) -> Self {
        self.config.font_size = size;
        self
    }

    pub fn min_font_size(mut self, size: f32) -> Self {
        self.config.min_font_size = size;
        self
    }

    pub fn text_color(mut self, rgb: [u8; 3]) -> Self {
        self.config.text_color = rgb;
        self
    }

    pub fn extra_font(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.extra_fonts.push(path.into());
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn max_file_size_mb(mut self, mb: u64) -> Self {
        self.config.max_file_size_mb = mb;
        self
    }

    pub fn batch_concurrency(mut self, n: usize) -> Self {
        self.config.batch_concurrency = n.max(1);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.config.cancel = Some(token);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, FormFillError> {
        let c = &self.config;
        if !(72..=600).contains(&c.ocr_dpi) {
            return Err(FormFillError::InvalidConfig(format!(
                "OCR DPI must be 72–600, got {}",
                c.ocr_dpi
            )));
        }
        if c.min_font_size <= 0.0 || c.font_size <= 0.0 {
            return Err(FormFillError::InvalidConfig(
                "Font sizes must be positive".into(),
            ));
        }
        if c.min_font_size > c.font_size {
            return Err(FormFillError::InvalidConfig(format!(
                "min_font_size ({}) exceeds font_size ({})",
                c.min_font_size, c.font_size
            )));
        }
        if c.ocr_languages.trim().is_empty() {
            return Err(FormFillError::InvalidConfig(
                "OCR languages must not be empty".into(),
            ));
        }
        if c.max_file_size_mb == 0 {
            return Err(FormFillError::InvalidConfig(
                "max_file_size_mb must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Degradation strategy for fields the inference matcher leaves unresolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackMatching {
    /// Leave them unresolved. (default)
    #[default]
    Unresolved,
    /// Try deterministic label ↔ profile-key token overlap.
    Lexical,
}
