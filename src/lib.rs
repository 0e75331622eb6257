//! # pagetree
//!
//! Assemble detector output for PDF pages into a typed document tree,
//! optionally correct it with a vision-language model, and render it as
//! HTML, Markdown or JSON.
//!
//! ## Why this crate?
//!
//! Layout detectors, text extractors and table recognisers each see a page
//! in isolation. Their raw output is a flat pile of boxes: captions float
//! free of the figures they describe, table text is one blob, a paragraph
//! split across a page break reads as two. This crate turns that pile into
//! a tree with reading order, groups captions with their figures and
//! tables, rebuilds table grids, and marks paragraphs that continue
//! across boundaries, so that every output format renders from one model.
//!
//! ## Pipeline Overview
//!
//! ```text
//! DocumentInput (JSON from detectors)
//!  │
//!  ├─ 1. Build      page arenas of blocks, lines and spans
//!  ├─ 2. Structure  reading order, caption/footnote groups, list groups
//!  ├─ 3. Process    tables, equations, headings, lists, blockquotes, continuation
//!  ├─ 4. Correct    concurrent structured-generation tasks (optional, --llm)
//!  └─ 5. Render     content-ref HTML ─► Markdown | HTML | JSON
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pagetree::{convert_path, AssemblyConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AssemblyConfig::default();
//!     let output = convert_path("detections.json", &config).await?;
//!     println!("{}", output.content);
//!     eprintln!("{} blocks, {} tables", output.stats.blocks, output.stats.tables);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pagetree` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pagetree = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod builders;
pub mod config;
pub mod convert;
pub mod correction;
pub mod error;
pub mod geometry;
pub mod output;
pub mod processors;
pub mod progress;
pub mod prompts;
pub mod renderer;
pub mod schema;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use builders::{build_document, DocumentInput, PageInput, StructureBuilder};
pub use config::{
    AssemblyConfig, AssemblyConfigBuilder, OutputFormat, PageSelection, PageSeparator, Thresholds,
};
pub use convert::{
    convert, convert_document, convert_path, convert_sync, convert_to_file, load_input,
    write_output,
};
pub use correction::{
    CorrectionOrchestrator, CorrectionReport, CorrectionTask, LlmGenerator, StructuredGenerator,
};
pub use error::{AssemblyError, GenerationError, TaskError};
pub use geometry::PolygonBox;
pub use output::{AssemblyStats, ConversionOutput};
pub use processors::{ContinuationAnalyzer, TableReconstructor};
pub use progress::{CorrectionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use renderer::{HtmlRenderer, JsonDocument};
pub use schema::{Block, BlockId, BlockKind, BlockType, Document, Page};
