//! Concrete correction tasks.
//!
//! Every task needs a crop of its block, so blocks on pages without a raster
//! are never collected.

mod equation;
mod image_description;
mod inline_math;
mod table;

pub use equation::EquationCorrection;
pub use image_description::ImageDescription;
pub use inline_math::InlineMathCorrection;
pub use table::{parse_table_html, TableCorrection};

use super::images::crop_block;
use super::CorrectionTask;
use crate::config::AssemblyConfig;
use crate::schema::{Block, Document};
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

/// The task set for a configuration. Image description only runs when
/// `describe_images` is on.
pub fn default_tasks(config: &AssemblyConfig) -> Vec<Arc<dyn CorrectionTask>> {
    let t = &config.thresholds;
    let mut tasks: Vec<Arc<dyn CorrectionTask>> = vec![
        Arc::new(TableCorrection::new(
            t.min_table_length_ratio,
            t.max_table_row_delta,
            t.max_table_col_delta,
        )),
        Arc::new(InlineMathCorrection::new(t.min_text_length_ratio)),
        Arc::new(EquationCorrection::new(t.min_equation_length_ratio)),
    ];
    if config.describe_images {
        tasks.push(Arc::new(ImageDescription));
    }
    tasks
}

fn block_crop(document: &Document, block: &Block) -> Option<DynamicImage> {
    let page = document.get_page(block.page_id())?;
    crop_block(page, &block.polygon)
}

static RE_CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\s*\n(.*?)\n?```$").unwrap());

/// Trim, and drop a code fence around a single answer field.
fn unfence(text: &str) -> &str {
    let trimmed = text.trim();
    match RE_CODE_FENCE.captures(trimmed).and_then(|c| c.get(1)) {
        Some(m) => m.as_str().trim(),
        None => trimmed,
    }
}

/// Count of non-whitespace characters.
fn content_len(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}
