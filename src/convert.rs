//! Driver entry points: detector output in, rendered document out.
//!
//! ```text
//! DocumentInput ─► build_document ─► run_processors ─► validate
//!                                                        │
//!                      render ◄─ CorrectionOrchestrator ◄┘  (only with use_llm)
//! ```
//!
//! Correction is a barrier: rendering starts only after every task has
//! finished.

use crate::builders::{build_document, DocumentInput, Recognitions};
use crate::config::AssemblyConfig;
use crate::correction::images::png_bytes;
use crate::correction::{resolve_generator, CorrectionOrchestrator};
use crate::error::AssemblyError;
use crate::output::{AssemblyStats, ConversionOutput};
use crate::processors::run_processors;
use crate::renderer;
use crate::schema::Document;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Read a [`DocumentInput`] JSON file. Relative `image_path`s are resolved
/// against the file's directory.
pub async fn load_input(path: impl AsRef<Path>) -> Result<DocumentInput, AssemblyError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(AssemblyError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| AssemblyError::InvalidInput(format!("cannot read '{}': {e}", path.display())))?;
    let mut input: DocumentInput = serde_json::from_str(&raw)?;

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    for page in &mut input.pages {
        if let Some(ref mut image_path) = page.image_path {
            if image_path.is_relative() {
                *image_path = base.join(&*image_path);
            }
        }
    }
    if input.filepath.is_none() {
        input.filepath = Some(path.display().to_string());
    }
    debug!("Loaded input with {} pages from {}", input.pages.len(), path.display());
    Ok(input)
}

/// Assemble and render detector output.
///
/// This is the primary entry point for the library.
///
/// # Errors
/// Returns `Err(AssemblyError)` only for fatal errors: bad input, a broken
/// tree, an unconfigured provider when `use_llm` is set. Individual
/// correction tasks never fail the conversion; see
/// [`AssemblyStats::task_errors`].
pub async fn convert(
    input: DocumentInput,
    config: &AssemblyConfig,
) -> Result<ConversionOutput, AssemblyError> {
    let total_start = Instant::now();
    info!("Starting assembly: {} input pages", input.pages.len());

    // Image decoding is CPU-bound.
    let pages = config.pages.clone();
    let (document, recognitions) = tokio::task::spawn_blocking(move || build_document(input, &pages))
        .await
        .map_err(|e| AssemblyError::Internal(format!("build task panicked: {e}")))??;

    assemble(document, &recognitions, config, total_start).await
}

/// Read a [`DocumentInput`] JSON file and convert it.
pub async fn convert_path(
    path: impl AsRef<Path>,
    config: &AssemblyConfig,
) -> Result<ConversionOutput, AssemblyError> {
    let input = load_input(path).await?;
    convert(input, config).await
}

/// Run the structural passes, correction and rendering over a document that
/// was built elsewhere.
pub async fn convert_document(
    document: Document,
    config: &AssemblyConfig,
) -> Result<ConversionOutput, AssemblyError> {
    assemble(document, &Recognitions::default(), config, Instant::now()).await
}

async fn assemble(
    mut document: Document,
    recognitions: &Recognitions,
    config: &AssemblyConfig,
    total_start: Instant,
) -> Result<ConversionOutput, AssemblyError> {
    config.thresholds.validate()?;
    if document.pages.is_empty() {
        return Err(AssemblyError::InvalidInput("no pages selected".into()));
    }

    let summary = run_processors(&mut document, recognitions, &config.thresholds);
    document.validate()?;

    let correction_start = Instant::now();
    let report = match resolve_generator(config)? {
        Some(generator) => Some(
            CorrectionOrchestrator::from_config(generator, config)
                .run(&mut document)
                .await?,
        ),
        None => None,
    };
    let correction_duration_ms = correction_start.elapsed().as_millis() as u64;

    let (content, images) = renderer::render(&document, config)?;

    let mut stats = AssemblyStats::new(&document, &summary, report.as_ref());
    stats.images = images.len();
    stats.correction_duration_ms = correction_duration_ms;
    stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

    info!(
        "Assembly complete: {} pages, {} blocks, {} images, {}ms total",
        stats.pages, stats.blocks, stats.images, stats.total_duration_ms
    );

    Ok(ConversionOutput {
        content,
        format: config.output_format,
        images,
        stats,
        document,
    })
}

/// Convert and write the content to `output_path`, with extracted images
/// alongside it.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn convert_to_file(
    input: DocumentInput,
    output_path: impl AsRef<Path>,
    config: &AssemblyConfig,
) -> Result<AssemblyStats, AssemblyError> {
    let output = convert(input, config).await?;
    write_output(&output, output_path.as_ref()).await?;
    Ok(output.stats)
}

/// Write a finished conversion to disk.
pub async fn write_output(output: &ConversionOutput, path: &Path) -> Result<(), AssemblyError> {
    let write_err = |source: std::io::Error| AssemblyError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => Path::new(".").to_path_buf(),
    };
    tokio::fs::create_dir_all(&dir).await.map_err(write_err)?;

    let tmp_path = path.with_extension(format!("{}.tmp", output.format.extension()));
    tokio::fs::write(&tmp_path, &output.content)
        .await
        .map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

    for (name, image) in &output.images {
        let image_path = dir.join(name);
        let bytes = png_bytes(image).map_err(|e| AssemblyError::OutputWriteFailed {
            path: image_path.clone(),
            source: std::io::Error::other(e),
        })?;
        tokio::fs::write(&image_path, bytes)
            .await
            .map_err(|e| AssemblyError::OutputWriteFailed {
                path: image_path.clone(),
                source: e,
            })?;
    }
    debug!("Wrote {} and {} images", path.display(), output.images.len());
    Ok(())
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    input: DocumentInput,
    config: &AssemblyConfig,
) -> Result<ConversionOutput, AssemblyError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| AssemblyError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(input, config))
}
