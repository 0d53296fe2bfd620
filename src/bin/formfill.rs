//! CLI binary for edgequake-formfill.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `PipelineConfig` and prints the document summary card.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_formfill::pipeline::ocr::TesseractOcr;
use edgequake_formfill::{
    inspect, process_to_file, FallbackMatching, FillOutput, FillValue, FormFillProgressCallback, PageWarning,
    PipelineConfig, ProgressCallback, Stage, TextSource, UserProfile, ValueSource,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner while the document opens, a page bar during acquisition, then one
/// line per completed stage.
struct CliProgressCallback {
    bar: ProgressBar,
    warnings: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening document…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            warnings: AtomicUsize::new(0),
        })
    }
}

impl FormFillProgressCallback for CliProgressCallback {
    fn on_document_start(&self, source: &str, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} pages  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        self.bar.set_length(total_pages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Reading");
        self.bar.set_message(String::new());
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{source}: {total_pages} page(s)"))
        ));
    }

    fn on_ocr_page(&self, page_num: usize, _total_pages: usize) {
        self.bar.set_message(format!("OCR page {page_num}"));
    }

    fn on_page_acquired(&self, page_num: usize, total_pages: usize, source: TextSource, chars: usize) {
        let how = match source {
            TextSource::Native => "text layer",
            TextSource::Ocr => "OCR",
            TextSource::Empty => "no text",
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<10}  {}",
            if source == TextSource::Empty { red("✗") } else { green("✓") },
            page_num,
            total_pages,
            how,
            dim(&format!("{chars:>5} chars")),
        ));
        self.bar.inc(1);
    }

    fn on_page_warning(&self, warning: &PageWarning) {
        self.warnings.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!("  {} {}", yellow("⚠"), warning));
    }

    fn on_stage_complete(&self, stage: Stage) {
        let next = match stage {
            Stage::TextAcquired => "Analyzing document…",
            Stage::Analyzed => "Matching profile…",
            Stage::Filled => "Drawing values…",
            _ => "",
        };
        if stage > Stage::TextAcquired {
            self.bar.println(format!("  {} {}", green("✓"), stage));
        }
        self.bar.set_prefix("Working");
        self.bar.set_message(next);
    }

    fn on_document_complete(&self, _source: &str, resolved: usize, total_fields: usize) {
        self.bar.finish_and_clear();
        let warnings = self.warnings.load(Ordering::SeqCst);
        eprintln!(
            "{} {}/{} fields filled{}",
            if resolved == total_fields { green("✔") } else { cyan("⚠") },
            bold(&resolved.to_string()),
            total_fields,
            if warnings > 0 {
                format!("  ({} warnings)", yellow(&warnings.to_string()))
            } else {
                String::new()
            }
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Fill a PDF form
  formfill application.pdf --profile me.json -o application_filled.pdf

  # A phone photo of a paper form
  formfill scan.jpg --profile me.json -o scan_filled.jpg

  # Local model through LM Studio or Ollama
  formfill form.pdf --profile me.json --provider ollama --model mistral-nemo-instruct

  # Count pages, scanned pages and blanks (no API key needed)
  formfill --inspect-only form.pdf

  # Machine-readable result
  formfill form.pdf --profile me.json --json > result.json

PROFILE FILE:
  A flat JSON object of profile keys to values:
    { "surname": "Papadopoulos", "given_name": "Maria", "afm": "123456789" }

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama, lmstudio)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
  FORMFILL_*              Every flag, e.g. FORMFILL_PROFILE, FORMFILL_OCR_DPI

SETUP:
  1. Install pdfium and tesseract with the 'ell' and 'eng' language packs.
  2. Set API key:     export OPENAI_API_KEY=sk-...
  3. Fill:            formfill form.pdf --profile me.json
"#;

/// Fill bureaucratic forms from a personal profile.
#[derive(Parser, Debug)]
#[command(
    name = "formfill",
    version,
    about = "Fill bureaucratic PDF or scanned forms from a personal profile",
    long_about = "Read a form (PDF or scanned image), explain what it is, find its blanks, \
match them to your profile with an LLM and write a filled copy in the same format.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local file (PDF, PNG, JPEG, TIFF, BMP) or HTTP/HTTPS URL.
    input: String,

    /// Profile JSON file.
    #[arg(short, long, env = "FORMFILL_PROFILE", required_unless_present = "inspect_only")]
    profile: Option<PathBuf>,

    /// Write the filled document here. Default: `<input>_filled.<ext>`.
    #[arg(short, long, env = "FORMFILL_OUTPUT")]
    output: Option<PathBuf>,

    /// LLM model ID.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, lmstudio.
    #[arg(
        long,
        env = "EDGEQUAKE_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set."
    )]
    provider: Option<String>,

    /// Rasterisation DPI for OCR (72–600).
    #[arg(long, env = "FORMFILL_OCR_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    ocr_dpi: u32,

    /// Tesseract languages.
    #[arg(long, env = "FORMFILL_OCR_LANG", default_value = "ell+eng")]
    ocr_lang: String,

    /// Explicit tesseract binary.
    #[arg(long, env = "FORMFILL_TESSERACT")]
    tesseract: Option<PathBuf>,

    /// Minimum matcher confidence (0.0–1.0).
    #[arg(long, env = "FORMFILL_MATCH_THRESHOLD", default_value_t = 0.75)]
    match_threshold: f32,

    /// Match labels to profile keys by word overlap when the model reply is unusable.
    #[arg(long, env = "FORMFILL_LEXICAL_FALLBACK")]
    lexical_fallback: bool,

    /// Stop (instead of leaving fields empty) when the matching call fails.
    #[arg(long, env = "FORMFILL_HALT_ON_FILL_ERROR")]
    halt_on_fill_error: bool,

    /// Extra TrueType font, tried before the system fonts. Repeatable.
    #[arg(long = "font", env = "FORMFILL_FONT", value_delimiter = ',')]
    fonts: Vec<PathBuf>,

    /// Overlay font size in points.
    #[arg(long, env = "FORMFILL_FONT_SIZE", default_value_t = 11.0)]
    font_size: f32,

    /// Smallest font size before values are truncated.
    #[arg(long, env = "FORMFILL_MIN_FONT_SIZE", default_value_t = 6.0)]
    min_font_size: f32,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "FORMFILL_PASSWORD")]
    password: Option<String>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "FORMFILL_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Transport retries per LLM call.
    #[arg(long, env = "FORMFILL_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "FORMFILL_API_TIMEOUT", default_value_t = 240)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "FORMFILL_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Output the result as JSON (analysis, fill, instructions, warnings, stats).
    #[arg(long, env = "FORMFILL_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "FORMFILL_NO_PROGRESS")]
    no_progress: bool,

    /// Print page and blank counts only; no model calls.
    #[arg(long)]
    inspect_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "FORMFILL_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "FORMFILL_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.inspect_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn FormFillProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    let tesseract = TesseractOcr::from_config(&config);
    if !cli.quiet && !tesseract.is_available().await {
        eprintln!(
            "{} tesseract not found ({}); scanned pages cannot be read",
            yellow("warning:"),
            dim(&tesseract.binary().display().to_string())
        );
    }

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let info = inspect(&cli.input, &config).await.context("Failed to inspect document")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&info).context("Failed to serialise document info")?
            );
        } else {
            println!("File:          {}", cli.input);
            println!("Format:        {}", info.format);
            println!("Size:          {} bytes", info.file_size);
            println!("Pages:         {}", info.page_count);
            let scanned = if info.scanned_pages.is_empty() {
                "none".to_string()
            } else {
                info.scanned_pages.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(", ")
            };
            println!("Needs OCR:     {}", scanned);
            for (i, n) in info.blanks_per_page.iter().enumerate() {
                println!("Blanks p.{:<4} {}", i + 1, n);
            }
        }
        return Ok(());
    }

    // ── Fill ─────────────────────────────────────────────────────────────
    let profile_path = cli
        .profile
        .as_ref()
        .context("--profile is required unless --inspect-only is set")?;
    let profile = UserProfile::load(profile_path)
        .with_context(|| format!("Failed to load profile {}", profile_path.display()))?;

    let output_path = match &cli.output {
        Some(p) => p.clone(),
        None => default_output_path(&cli.input),
    };
    let output = process_to_file(&cli.input, &output_path, &profile, &config)
        .await
        .context("Form filling failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("Failed to serialise output")?
        );
    } else if !cli.quiet {
        print_summary(&output, &output_path);
    }
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .ocr_dpi(cli.ocr_dpi)
        .ocr_languages(cli.ocr_lang.clone())
        .match_threshold(cli.match_threshold)
        .font_size(cli.font_size)
        .min_font_size(cli.min_font_size)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout)
        .halt_on_fill_error(cli.halt_on_fill_error);

    if cli.lexical_fallback {
        builder = builder.fallback_matching(FallbackMatching::Lexical);
    }
    for font in &cli.fonts {
        builder = builder.extra_font(font.clone());
    }
    if let Some(ref path) = cli.tesseract {
        builder = builder.tesseract_path(path.clone());
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    let mut config = builder.build().context("Invalid configuration")?;
    config.model = cli.model.clone();
    config.provider_name = cli.provider.clone();
    Ok(config)
}

/// `form.pdf` → `form_filled.pdf`; URLs land in the current directory.
fn default_output_path(input: &str) -> PathBuf {
    let name = if input.starts_with("http://") || input.starts_with("https://") {
        input.rsplit('/').next().unwrap_or("form").to_string()
    } else {
        input.to_string()
    };
    let path = Path::new(&name);
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "form".into());
    let ext = path.extension().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "pdf".into());
    let file = format!("{stem}_filled.{ext}");
    match path.parent() {
        Some(dir) if !input.contains("://") && !dir.as_os_str().is_empty() => dir.join(file),
        _ => PathBuf::from(file),
    }
}

/// Document card, field table, warnings and totals.
fn print_summary(output: &FillOutput, path: &Path) {
    let a = &output.analysis;
    println!();
    println!("{} {}", cyan("◆"), bold(&a.document_type));
    if a.critical {
        println!("  {}", red("CRITICAL: deadline or penalty mentioned"));
    }
    if !a.summary.is_empty() {
        println!("  {}", a.summary);
    }
    if let Some(ref amount) = a.amount_due {
        println!("  Amount due:  {}", bold(amount));
    }
    if let Some(ref deadline) = a.deadline {
        println!("  Deadline:    {}", bold(deadline));
    }
    for point in &a.key_points {
        println!("  • {point}");
    }

    println!();
    for (field, entry) in a.fields.iter().zip(&output.fill.entries) {
        let label: String = field.label.chars().take(32).collect();
        match &entry.value {
            FillValue::Resolved { value, source, .. } => {
                let from = match source {
                    ValueSource::Document => "document".to_string(),
                    ValueSource::Profile { key } | ValueSource::Lexical { key } => key.clone(),
                };
                println!("  {} {:<32}  {}  {}", green("✓"), label, value, dim(&format!("({from})")));
            }
            FillValue::Unresolved => println!("  {} {:<32}  {}", dim("·"), label, dim("unresolved")),
        }
    }
    if !output.warnings.is_empty() {
        println!();
        for w in &output.warnings {
            println!("  {} {}", yellow("⚠"), w);
        }
    }

    let s = &output.stats;
    eprintln!();
    eprintln!(
        "{}  {}/{} fields  {} pages ({} OCR)  {}ms  →  {}",
        if s.fields_unresolved == 0 { green("✔") } else { cyan("⚠") },
        s.fields_resolved,
        s.fields_detected,
        s.total_pages,
        s.ocr_pages,
        s.total_duration_ms,
        bold(&path.display().to_string()),
    );
    eprintln!(
        "   {} LLM calls  {} tokens in  /  {} tokens out",
        dim(&s.inference_calls.to_string()),
        dim(&s.input_tokens.to_string()),
        dim(&s.output_tokens.to_string()),
    );
}
