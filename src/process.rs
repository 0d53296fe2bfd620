//! Public entry points: one document, a batch, an inspection, a resume.
//!
//! Every run drives a [`DocumentContext`] through the lifecycle stages in
//! order. A fatal error marks the context failed and leaves the artifacts of
//! the last completed stage in place; [`resume`] continues from there with
//! the same or a fresh cancel token.

use crate::config::PipelineConfig;
use crate::document::{PageText, TextSource};
use crate::error::{FormFillError, PageWarning};
use crate::output::{DocumentInfo, FillOutput};
use crate::pipeline::acquire::{acquire_text, native_text, needs_ocr, PageSource};
use crate::pipeline::analyze::{analyze_document, InferenceFieldDetector};
use crate::pipeline::blanks::{detect_document_runs, detect_runs};
use crate::pipeline::fill::fill_fields;
use crate::pipeline::fonts::FontCatalog;
use crate::pipeline::llm::{resolve_provider, InferenceClient, MeteredClient, ProviderClient};
use crate::pipeline::ocr::{OcrEngine, TesseractOcr};
use crate::pipeline::render::render_document;
use crate::pipeline::input;
use crate::profile::UserProfile;
use crate::progress::{FormFillProgressCallback, NoopProgressCallback};
use crate::state::{DocumentContext, Stage};
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// The external services a run talks to.
///
/// Built once per configuration and shared by every document of a batch.
#[derive(Clone)]
pub struct Collaborators {
    pub inference: Arc<dyn InferenceClient>,
    pub ocr: Arc<dyn OcrEngine>,
    pub fonts: FontCatalog,
}

impl Collaborators {
    /// Provider from config or environment, tesseract, discovered fonts.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, FormFillError> {
        let provider = resolve_provider(config)?;
        let name = format!(
            "{}/{}",
            config.provider_name.as_deref().unwrap_or("auto"),
            config.model.as_deref().unwrap_or("default")
        );
        info!("Using provider {}", name);
        let fonts = FontCatalog::discover(config);
        if fonts.is_empty() {
            warn!("No font candidates found; values cannot be drawn");
        }
        Ok(Self {
            inference: Arc::new(ProviderClient::new(provider, name)),
            ocr: Arc::new(TesseractOcr::from_config(config)),
            fonts,
        })
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("inference", &self.inference.name())
            .field("ocr", &self.ocr.name())
            .field("fonts", &self.fonts)
            .finish()
    }
}

// ── Entry points ─────────────────────────────────────────────────────────

/// Fill the document at `input` (a path or HTTP(S) URL) from `profile`.
///
/// # Example
/// ```rust,no_run
/// use edgequake_formfill::{process, PipelineConfig, UserProfile};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let profile = UserProfile::load("profile.json")?;
/// let output = process("application.pdf", &profile, &PipelineConfig::default()).await?;
/// println!("{} ({} fields)", output.analysis.document_type, output.fill.entries.len());
/// std::fs::write("filled.pdf", &output.bytes)?;
/// # Ok(())
/// # }
/// ```
pub async fn process(
    input_str: impl AsRef<str>,
    profile: &UserProfile,
    config: &PipelineConfig,
) -> Result<FillOutput, FormFillError> {
    let (name, bytes) = input::read_input(input_str.as_ref(), config).await?;
    process_from_bytes(&name, bytes, profile, config).await
}

/// Fill a document held in memory.
pub async fn process_from_bytes(
    source_name: &str,
    bytes: Vec<u8>,
    profile: &UserProfile,
    config: &PipelineConfig,
) -> Result<FillOutput, FormFillError> {
    let collaborators = Collaborators::from_config(config)?;
    process_document(source_name, bytes, profile, &collaborators, config).await
}

/// Fill a document with explicit collaborators.
pub async fn process_document(
    source_name: &str,
    bytes: Vec<u8>,
    profile: &UserProfile,
    collaborators: &Collaborators,
    config: &PipelineConfig,
) -> Result<FillOutput, FormFillError> {
    let (document, source) = input::ingest(source_name, bytes, config).await?;
    let mut ctx = DocumentContext::new(source_name, document, config.cancel_token());
    drive(&mut ctx, Some(source), profile, collaborators, config).await
}

/// Fill `input` and write the result to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn process_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    profile: &UserProfile,
    config: &PipelineConfig,
) -> Result<FillOutput, FormFillError> {
    let output = process(input_str, profile, config).await?;
    write_atomic(output_path.as_ref(), &output.bytes).await?;
    Ok(output)
}

/// Write `bytes` next to `path` and rename into place.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), FormFillError> {
    let failed = |source: std::io::Error| FormFillError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(failed)?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    tokio::fs::write(&tmp_path, bytes).await.map_err(failed)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(failed)?;
    debug!("Wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

/// Synchronous wrapper around [`process`].
///
/// Creates a temporary tokio runtime internally.
pub fn process_sync(
    input_str: impl AsRef<str>,
    profile: &UserProfile,
    config: &PipelineConfig,
) -> Result<FillOutput, FormFillError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| FormFillError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(process(input_str, profile, config))
}

/// Fill several documents concurrently with one profile.
///
/// Documents share the profile and the collaborators, nothing else; one
/// failure does not affect the others. Results come back in input order.
pub async fn process_batch(
    inputs: &[String],
    profile: Arc<UserProfile>,
    config: &PipelineConfig,
) -> Result<Vec<(String, Result<FillOutput, FormFillError>)>, FormFillError> {
    let collaborators = Collaborators::from_config(config)?;
    Ok(process_batch_with(inputs, profile, &collaborators, config).await)
}

/// [`process_batch`] with explicit collaborators.
pub async fn process_batch_with(
    inputs: &[String],
    profile: Arc<UserProfile>,
    collaborators: &Collaborators,
    config: &PipelineConfig,
) -> Vec<(String, Result<FillOutput, FormFillError>)> {
    info!(
        "Batch: {} documents, concurrency {}",
        inputs.len(),
        config.batch_concurrency
    );
    let mut results: Vec<(usize, String, Result<FillOutput, FormFillError>)> =
        stream::iter(inputs.iter().enumerate().map(|(i, input_str)| {
            let profile = Arc::clone(&profile);
            async move {
                let outcome = match input::read_input(input_str, config).await {
                    Ok((name, bytes)) => process_document(&name, bytes, &profile, collaborators, config).await,
                    Err(e) => Err(e),
                };
                if let Err(ref e) = outcome {
                    warn!("{}: {}", input_str, e);
                }
                (i, input_str.clone(), outcome)
            }
        }))
        .buffer_unordered(config.batch_concurrency.max(1))
        .collect()
        .await;
    results.sort_by_key(|(i, _, _)| *i);
    results.into_iter().map(|(_, name, r)| (name, r)).collect()
}

/// Page count, scanned pages and blanks, without calling any model.
///
/// Does not require an LLM provider or API key.
pub async fn inspect(input_str: impl AsRef<str>, config: &PipelineConfig) -> Result<DocumentInfo, FormFillError> {
    let (name, bytes) = input::read_input(input_str.as_ref(), config).await?;
    let file_size = bytes.len() as u64;
    let (document, source) = input::ingest(&name, bytes, config).await?;

    let mut scanned_pages = Vec::new();
    let mut blanks_per_page = Vec::new();
    for idx in 0..source.page_count() {
        let Some(page) = native_text(source.as_ref(), idx) else {
            continue;
        };
        if !source.has_text_layer() || needs_ocr(&page, config) {
            scanned_pages.push(idx + 1);
        }
        blanks_per_page.push(detect_runs(&page, config.min_run_len).len());
    }

    Ok(DocumentInfo {
        format: document.format,
        page_count: document.page_count(),
        scanned_pages,
        blanks_per_page,
        file_size,
    })
}

/// Ingest `bytes` into a fresh context without running any stage.
pub async fn start(source_name: &str, bytes: Vec<u8>, config: &PipelineConfig) -> Result<DocumentContext, FormFillError> {
    let (document, _source) = input::ingest(source_name, bytes, config).await?;
    Ok(DocumentContext::new(source_name, document, config.cancel_token()))
}

/// Continue `ctx` from its last completed stage.
pub async fn resume(
    ctx: &mut DocumentContext,
    profile: &UserProfile,
    collaborators: &Collaborators,
    config: &PipelineConfig,
) -> Result<FillOutput, FormFillError> {
    if ctx.stage() == Stage::Exported {
        return Err(FormFillError::NothingToResume { stage: ctx.stage() });
    }
    if ctx.cancel_token().is_cancelled() {
        ctx.set_cancel_token(config.cancel_token());
    }
    info!("Resuming '{}' after {}", ctx.source_name(), ctx.stage());
    drive(ctx, None, profile, collaborators, config).await
}

// ── Stage driver ─────────────────────────────────────────────────────────

async fn drive(
    ctx: &mut DocumentContext,
    source: Option<Box<dyn PageSource>>,
    profile: &UserProfile,
    collaborators: &Collaborators,
    config: &PipelineConfig,
) -> Result<FillOutput, FormFillError> {
    let noop = NoopProgressCallback;
    let progress: &dyn FormFillProgressCallback = config.progress_callback.as_deref().unwrap_or(&noop);
    let started = Instant::now();
    let metered = MeteredClient::new(Arc::clone(&collaborators.inference));

    if ctx.stage() == Stage::Ingested {
        progress.on_document_start(ctx.source_name(), ctx.document().page_count());
    }
    let outcome = advance(ctx, source, profile, collaborators, &metered, config, progress).await;

    let usage = metered.usage();
    ctx.stats.inference_calls += usage.calls;
    ctx.stats.input_tokens += usage.input_tokens;
    ctx.stats.output_tokens += usage.output_tokens;
    ctx.stats.total_duration_ms += started.elapsed().as_millis() as u64;
    outcome?;

    ctx.complete(Stage::Exported);
    progress.on_stage_complete(Stage::Exported);
    let output = export(ctx)?;
    progress.on_document_complete(ctx.source_name(), output.stats.fields_resolved, output.stats.fields_detected);
    info!(
        "'{}' filled: {}/{} fields, {} warnings, {}ms",
        ctx.source_name(),
        output.stats.fields_resolved,
        output.stats.fields_detected,
        output.warnings.len(),
        ctx.stats.total_duration_ms
    );
    Ok(output)
}

/// Record a stage outcome on the context.
fn settle<T>(ctx: &mut DocumentContext, attempted: Stage, outcome: Result<T, FormFillError>) -> Result<T, FormFillError> {
    outcome.map_err(|e| {
        warn!("'{}': {} failed: {}", ctx.source_name(), attempted, e);
        ctx.fail(attempted, &e);
        e
    })
}

fn record(ctx: &mut DocumentContext, warnings: Vec<PageWarning>, progress: &dyn FormFillProgressCallback) {
    for w in warnings {
        progress.on_page_warning(&w);
        ctx.warn(w);
    }
}

fn missing(what: &str) -> FormFillError {
    FormFillError::Internal(format!("{what} missing from a context past that stage"))
}

#[allow(clippy::too_many_arguments)]
async fn advance(
    ctx: &mut DocumentContext,
    source: Option<Box<dyn PageSource>>,
    profile: &UserProfile,
    collaborators: &Collaborators,
    client: &MeteredClient,
    config: &PipelineConfig,
    progress: &dyn FormFillProgressCallback,
) -> Result<(), FormFillError> {
    // ── Step 1: Acquire text ─────────────────────────────────────────────
    if ctx.stage() == Stage::Ingested {
        let t = Instant::now();
        let ready = ctx.check_cancelled(Stage::TextAcquired);
        settle(ctx, Stage::TextAcquired, ready)?;
        let source = match source {
            Some(s) => s,
            None => {
                let reopened = input::open_source(ctx.document(), config).await;
                settle(ctx, Stage::TextAcquired, reopened)?
            }
        };
        let cancel = ctx.cancel_token().clone();
        let outcome = acquire_text(source.as_ref(), collaborators.ocr.as_ref(), config, &cancel, progress).await;
        let acquired = settle(ctx, Stage::TextAcquired, outcome)?;

        ctx.stats.native_pages = count(&acquired.pages, TextSource::Native);
        ctx.stats.ocr_pages = count(&acquired.pages, TextSource::Ocr);
        ctx.stats.empty_pages = count(&acquired.pages, TextSource::Empty);
        ctx.pages = acquired.pages;
        record(ctx, acquired.warnings, progress);
        ctx.stats.acquisition_ms += t.elapsed().as_millis() as u64;
        ctx.complete(Stage::TextAcquired);
        progress.on_stage_complete(Stage::TextAcquired);
    }

    // ── Step 2: Analyze ──────────────────────────────────────────────────
    if ctx.stage() == Stage::TextAcquired {
        let t = Instant::now();
        let ready = ctx.check_cancelled(Stage::Analyzed);
        settle(ctx, Stage::Analyzed, ready)?;
        let cancel = ctx.cancel_token().clone();
        let runs = detect_document_runs(&ctx.pages, config.min_run_len);
        debug!("{} dotted runs across {} pages", runs.len(), ctx.pages.len());
        let detector = InferenceFieldDetector {
            client,
            config,
            cancel: &cancel,
        };
        let outcome = analyze_document(&ctx.pages, &runs, &detector).await;
        let (analysis, warning) = settle(ctx, Stage::Analyzed, outcome)?;

        ctx.stats.fields_detected = analysis.fields.len();
        ctx.analysis = Some(analysis);
        record(ctx, warning.into_iter().collect(), progress);
        ctx.stats.analysis_ms += t.elapsed().as_millis() as u64;
        ctx.complete(Stage::Analyzed);
        progress.on_stage_complete(Stage::Analyzed);
    }

    // ── Step 3: Fill ─────────────────────────────────────────────────────
    if ctx.stage() == Stage::Analyzed {
        let t = Instant::now();
        let ready = ctx.check_cancelled(Stage::Filled);
        settle(ctx, Stage::Filled, ready)?;
        let cancel = ctx.cancel_token().clone();
        let analysis = ctx.analysis.clone().ok_or_else(|| missing("analysis"))?;
        let outcome = fill_fields(&analysis, profile, client, config, &cancel).await;
        let (fill, warnings) = settle(ctx, Stage::Filled, outcome)?;

        ctx.stats.fields_resolved = fill.resolved_count();
        ctx.stats.fields_unresolved = fill.unresolved_count();
        ctx.fill = Some(fill);
        record(ctx, warnings, progress);
        ctx.stats.fill_ms += t.elapsed().as_millis() as u64;
        ctx.complete(Stage::Filled);
        progress.on_stage_complete(Stage::Filled);
    }

    // ── Step 4: Render ───────────────────────────────────────────────────
    if ctx.stage() == Stage::Filled {
        let t = Instant::now();
        let ready = ctx.check_cancelled(Stage::Rendered);
        settle(ctx, Stage::Rendered, ready)?;
        let analysis = ctx.analysis.clone().ok_or_else(|| missing("analysis"))?;
        let fill = ctx.fill.clone().ok_or_else(|| missing("fill result"))?;
        let outcome = render_document(ctx.document(), &ctx.pages, &analysis, &fill, &collaborators.fonts, config).await;
        let (rendered, warnings) = settle(ctx, Stage::Rendered, outcome)?;

        ctx.stats.whiteouts = rendered.whiteout_count();
        ctx.stats.overlays = rendered.overlay_count();
        ctx.rendered = Some(rendered);
        record(ctx, warnings, progress);
        ctx.stats.render_ms += t.elapsed().as_millis() as u64;
        ctx.complete(Stage::Rendered);
        progress.on_stage_complete(Stage::Rendered);
    }

    Ok(())
}

fn count(pages: &[PageText], source: TextSource) -> usize {
    pages.iter().filter(|p| p.source == source).count()
}

fn export(ctx: &DocumentContext) -> Result<FillOutput, FormFillError> {
    let rendered = ctx.rendered().ok_or_else(|| missing("rendered document"))?;
    Ok(FillOutput {
        bytes: rendered.bytes.clone(),
        format: rendered.format,
        analysis: ctx.analysis().cloned().ok_or_else(|| missing("analysis"))?,
        fill: ctx.fill_result().cloned().ok_or_else(|| missing("fill result"))?,
        instructions: rendered.instructions.clone(),
        warnings: ctx.warnings().to_vec(),
        stats: ctx.stats().clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_atomic_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("filled.pdf");
        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert!(!dir.path().join("out").join("filled.pdf.tmp").exists());
    }

    #[tokio::test]
    async fn inspect_reports_scanned_raster() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        let mut bytes = Vec::new();
        image::DynamicImage::new_rgb8(300, 300)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        std::fs::write(&path, &bytes).unwrap();

        let info = inspect(path.to_str().unwrap(), &PipelineConfig::default()).await.unwrap();
        assert_eq!(info.page_count, 1);
        assert_eq!(info.scanned_pages, vec![1]);
        assert_eq!(info.blanks_per_page, vec![0]);
        assert_eq!(info.file_size, bytes.len() as u64);
    }
}
