//! Copies recognized LaTeX onto equation blocks.

use crate::builders::Recognitions;
use crate::schema::{BlockKind, Document};

pub struct EquationProcessor;

impl EquationProcessor {
    /// Returns the number of equations that received LaTeX.
    pub fn process(document: &mut Document, recognitions: &Recognitions) -> usize {
        let mut count = 0;
        for (id, rec) in &recognitions.equations {
            let latex = rec.latex.trim();
            if latex.is_empty() {
                continue;
            }
            if let Some(BlockKind::Equation { latex: slot }) =
                document.get_block_mut(id).map(|b| &mut b.kind)
            {
                *slot = Some(latex.to_string());
                count += 1;
            }
        }
        count
    }
}
