//! Output types returned by the driver functions.

use crate::config::OutputFormat;
use crate::correction::CorrectionReport;
use crate::error::TaskError;
use crate::processors::ProcessingSummary;
use crate::schema::{BlockType, Document};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Result of a full conversion.
#[derive(Debug, Clone)]
pub struct ConversionOutput {
    /// Rendered content in `format`.
    pub content: String,
    pub format: OutputFormat,
    /// Extracted image crops, keyed by the filename the content references.
    pub images: BTreeMap<String, DynamicImage>,
    pub stats: AssemblyStats,
    /// The final tree, after structure building and correction.
    pub document: Document,
}

/// Counters for one conversion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssemblyStats {
    pub pages: usize,
    pub blocks: usize,
    pub groups: usize,
    pub tables: usize,
    pub equations: usize,
    pub continuations: usize,
    pub tasks_submitted: usize,
    pub tasks_applied: usize,
    pub tasks_unchanged: usize,
    pub tasks_rejected: usize,
    pub tasks_failed: usize,
    pub tokens_used: u64,
    pub images: usize,
    pub total_duration_ms: u64,
    pub correction_duration_ms: u64,
    /// Per-task failures, in arrival order.
    #[serde(default)]
    pub task_errors: Vec<TaskError>,
}

impl AssemblyStats {
    pub(crate) fn new(
        document: &Document,
        summary: &ProcessingSummary,
        report: Option<&CorrectionReport>,
    ) -> Self {
        let mut stats = Self {
            pages: document.pages.len(),
            blocks: document.block_count(),
            groups: summary.groups,
            tables: summary.tables,
            equations: summary.equations,
            continuations: summary.continuations,
            ..Default::default()
        };
        if let Some(r) = report {
            stats.tasks_submitted = r.submitted;
            stats.tasks_applied = r.applied;
            stats.tasks_unchanged = r.unchanged;
            stats.tasks_rejected = r.rejected;
            stats.tasks_failed = r.failed;
            stats.tokens_used = r.tokens_used;
            stats.task_errors = r.errors.clone();
        }
        stats
    }

    /// Blocks of each type still reachable from a page.
    pub fn block_histogram(document: &Document) -> BTreeMap<BlockType, usize> {
        let mut counts = BTreeMap::new();
        for block in document.blocks_of_type(&BlockType::ALL) {
            *counts.entry(block.block_type()).or_insert(0) += 1;
        }
        counts
    }
}
