//! Input resolution: a local path, an HTTP(S) URL, or raw bytes become a
//! [`Document`] plus the [`PageSource`] that reads it.
//!
//! pdfium loads from a byte slice, so downloads stay in memory. The size cap
//! is checked before the body is read when the server sends a length, and
//! again on the bytes themselves.

use crate::config::PipelineConfig;
use crate::document::{Document, SourceFormat};
use crate::error::FormFillError;
use crate::pipeline::acquire::{PageSource, PdfiumSource, RasterSource};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Read a path or URL into memory. Returns a display name and the bytes.
pub async fn read_input(input: &str, config: &PipelineConfig) -> Result<(String, Vec<u8>), FormFillError> {
    if is_url(input) {
        download_url(input, config.download_timeout_secs, config.max_file_size_mb).await
    } else if input.contains("://") {
        Err(FormFillError::InvalidInput {
            input: input.to_string(),
        })
    } else {
        let path = PathBuf::from(input);
        let bytes = read_local(&path, config.max_file_size_mb).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| input.to_string());
        Ok((name, bytes))
    }
}

async fn read_local(path: &Path, limit_mb: u64) -> Result<Vec<u8>, FormFillError> {
    let meta = tokio::fs::metadata(path).await.map_err(|e| io_error(path, e))?;
    if !meta.is_file() {
        return Err(FormFillError::InvalidInput {
            input: path.display().to_string(),
        });
    }
    check_size(&path.display().to_string(), meta.len(), limit_mb)?;
    let bytes = tokio::fs::read(path).await.map_err(|e| io_error(path, e))?;
    debug!("Read {} bytes from {}", bytes.len(), path.display());
    Ok(bytes)
}

fn io_error(path: &Path, e: std::io::Error) -> FormFillError {
    let path = path.to_path_buf();
    match e.kind() {
        ErrorKind::PermissionDenied => FormFillError::PermissionDenied { path },
        _ => FormFillError::FileNotFound { path },
    }
}

/// Fail with `FileTooLarge` when `len` exceeds the cap.
pub fn check_size(source_name: &str, len: u64, limit_mb: u64) -> Result<(), FormFillError> {
    if len > limit_mb.saturating_mul(BYTES_PER_MB) {
        return Err(FormFillError::FileTooLarge {
            source_name: source_name.to_string(),
            size_mb: len as f64 / BYTES_PER_MB as f64,
            limit_mb,
        });
    }
    Ok(())
}

async fn download_url(url: &str, timeout_secs: u64, limit_mb: u64) -> Result<(String, Vec<u8>), FormFillError> {
    info!("Downloading document from: {}", url);
    let failed = |reason: String| FormFillError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            FormFillError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let name = filename_from_url(url);
    if let Some(len) = response.content_length() {
        check_size(&name, len, limit_mb)?;
    }

    let bytes = response.bytes().await.map_err(|e| {
        if e.is_timeout() {
            FormFillError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;
    check_size(&name, bytes.len() as u64, limit_mb)?;

    info!("Downloaded {} ({} bytes)", name, bytes.len());
    Ok((name, bytes.to_vec()))
}

/// Last path segment of the URL if it looks like a file name.
pub fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded".to_string()
}

/// Identify the container format or fail with the first bytes.
pub fn sniff_format(source_name: &str, bytes: &[u8]) -> Result<SourceFormat, FormFillError> {
    SourceFormat::sniff(bytes).ok_or_else(|| {
        let mut magic = [0u8; 4];
        let n = bytes.len().min(4);
        magic[..n].copy_from_slice(&bytes[..n]);
        FormFillError::UnsupportedFormat {
            source_name: source_name.to_string(),
            magic,
        }
    })
}

/// Sniff, size-check and open `bytes`.
pub async fn ingest(
    source_name: &str,
    bytes: Vec<u8>,
    config: &PipelineConfig,
) -> Result<(Document, Box<dyn PageSource>), FormFillError> {
    check_size(source_name, bytes.len() as u64, config.max_file_size_mb)?;
    let format = sniff_format(source_name, &bytes)?;
    let bytes = Arc::new(bytes);
    let source = open_bytes(Arc::clone(&bytes), format, config).await?;
    let pages = (0..source.page_count())
        .filter_map(|i| source.geometry(i))
        .collect::<Vec<_>>();
    if pages.is_empty() {
        return Err(FormFillError::EmptyDocument);
    }
    info!("Ingested '{}': {} ({} pages)", source_name, format, pages.len());
    Ok((
        Document {
            format,
            bytes,
            pages,
        },
        source,
    ))
}

/// Reopen an ingested document, e.g. when resuming before acquisition.
pub async fn open_source(document: &Document, config: &PipelineConfig) -> Result<Box<dyn PageSource>, FormFillError> {
    open_bytes(Arc::clone(&document.bytes), document.format, config).await
}

async fn open_bytes(
    bytes: Arc<Vec<u8>>,
    format: SourceFormat,
    config: &PipelineConfig,
) -> Result<Box<dyn PageSource>, FormFillError> {
    Ok(match format {
        SourceFormat::Pdf => Box::new(PdfiumSource::open(bytes, config.password.clone()).await?),
        SourceFormat::Image(raster) => {
            let dpi = config.ocr_dpi;
            let source = tokio::task::spawn_blocking(move || RasterSource::decode(&bytes, raster, dpi))
                .await
                .map_err(|e| FormFillError::Internal(format!("Image decode task panicked: {e}")))??;
            Box::new(source)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::RasterFormat;
    use image::{DynamicImage, ImageFormat};
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut out = Vec::new();
        DynamicImage::new_rgb8(width, height)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn test_filename_from_url() {
        assert_eq!(filename_from_url("https://gov.gr/forms/e1.pdf?x=1"), "e1.pdf");
        assert_eq!(filename_from_url("https://gov.gr/forms/"), "downloaded");
    }

    #[test]
    fn test_size_cap() {
        assert!(check_size("a.pdf", 50 * BYTES_PER_MB, 50).is_ok());
        let err = check_size("a.pdf", 50 * BYTES_PER_MB + 1, 50).unwrap_err();
        assert!(matches!(err, FormFillError::FileTooLarge { limit_mb: 50, .. }));
    }

    #[test]
    fn test_unsupported_format_reports_magic() {
        let err = sniff_format("archive.zip", b"PK\x03\x04rest").unwrap_err();
        match err {
            FormFillError::UnsupportedFormat { magic, .. } => assert_eq!(&magic, b"PK\x03\x04"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(sniff_format("x", b"").is_err());
    }

    #[tokio::test]
    async fn test_missing_file() {
        let config = PipelineConfig::default();
        let err = read_input("/definitely/not/here.pdf", &config).await.unwrap_err();
        assert!(matches!(err, FormFillError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn test_unknown_scheme() {
        let config = PipelineConfig::default();
        let err = read_input("ftp://example.com/a.pdf", &config).await.unwrap_err();
        assert!(matches!(err, FormFillError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_reads_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        std::fs::write(&path, png(4, 4)).unwrap();
        let (name, bytes) = read_input(path.to_str().unwrap(), &PipelineConfig::default())
            .await
            .unwrap();
        assert_eq!(name, "scan.png");
        assert!(bytes.starts_with(&[0x89, b'P', b'N', b'G']));
    }

    #[tokio::test]
    async fn test_ingest_raster() {
        let config = PipelineConfig::default();
        let (doc, source) = ingest("scan.png", png(600, 300), &config).await.unwrap();
        assert_eq!(doc.format, SourceFormat::Image(RasterFormat::Png));
        assert_eq!(doc.page_count(), 1);
        assert_eq!(doc.pages[0].width, 144.0);
        assert!(!source.has_text_layer());
    }
}
