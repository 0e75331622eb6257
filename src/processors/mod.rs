//! Structural passes over a built document.
//!
//! [`run_processors`] applies them in a fixed order: grouping, tables and
//! forms, equations, section headers, list indentation, blockquotes, then
//! continuation (which needs the final reading order).

pub mod blockquote;
pub mod continuation;
pub mod equation;
pub mod list;
pub mod section_header;
pub mod table;

pub use blockquote::BlockquoteProcessor;
pub use continuation::ContinuationAnalyzer;
pub use equation::EquationProcessor;
pub use list::ListProcessor;
pub use section_header::SectionHeaderProcessor;
pub use table::TableReconstructor;

use crate::builders::{Recognitions, StructureBuilder};
use crate::config::Thresholds;
use crate::schema::Document;
use tracing::info;

/// Counts reported by the structural passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingSummary {
    pub groups: usize,
    pub tables: usize,
    pub equations: usize,
    pub continuations: usize,
}

pub fn run_processors(
    document: &mut Document,
    recognitions: &Recognitions,
    thresholds: &Thresholds,
) -> ProcessingSummary {
    StructureBuilder::new(thresholds).build(document);
    let groups = document
        .pages
        .iter()
        .flat_map(|p| p.blocks.iter())
        .filter(|b| b.block_type().is_group())
        .count();

    let tables = TableReconstructor::new(thresholds).process(document, recognitions);
    let equations = EquationProcessor::process(document, recognitions);
    SectionHeaderProcessor::new(thresholds).process(document);
    ListProcessor::new(thresholds).process(document);
    BlockquoteProcessor::new(thresholds).process(document);
    let continuations = ContinuationAnalyzer::new(thresholds).process(document);

    let summary = ProcessingSummary {
        groups,
        tables,
        equations,
        continuations,
    };
    info!(
        "Processed {} pages: {} groups, {} tables, {} equations, {} continuations",
        document.pages.len(),
        summary.groups,
        summary.tables,
        summary.equations,
        summary.continuations
    );
    summary
}
