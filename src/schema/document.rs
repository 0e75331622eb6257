//! The document: an ordered sequence of pages plus cross-page traversal.

use super::{Block, BlockId, BlockType, Page};
use crate::error::AssemblyError;
use serde::{Deserialize, Serialize};

/// Block types that reading-order traversal skips by default.
pub const PAGE_FURNITURE: [BlockType; 2] = [BlockType::PageHeader, BlockType::PageFooter];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    /// Source path or name, used for image filenames and JSON export.
    #[serde(default)]
    pub filepath: Option<String>,
    pub pages: Vec<Page>,
}

impl Document {
    pub fn new(pages: Vec<Page>) -> Self {
        Self {
            filepath: None,
            pages,
        }
    }

    pub fn get_page(&self, page_id: u32) -> Option<&Page> {
        self.pages.iter().find(|p| p.page_id == page_id)
    }

    pub fn get_page_mut(&mut self, page_id: u32) -> Option<&mut Page> {
        self.pages.iter_mut().find(|p| p.page_id == page_id)
    }

    pub fn get_block(&self, id: &BlockId) -> Option<&Block> {
        self.get_page(id.page_id)?.get(id)
    }

    pub fn get_block_mut(&mut self, id: &BlockId) -> Option<&mut Block> {
        self.get_page_mut(id.page_id)?.get_mut(id)
    }

    /// Strict lookup: a missing block is a tree-integrity violation.
    pub fn block(&self, id: &BlockId) -> Result<&Block, AssemblyError> {
        self.get_block(id)
            .ok_or_else(|| AssemblyError::DanglingReference { id: id.to_string() })
    }

    pub fn block_mut(&mut self, id: &BlockId) -> Result<&mut Block, AssemblyError> {
        let path = id.to_string();
        self.get_block_mut(id)
            .ok_or(AssemblyError::DanglingReference { id: path })
    }

    fn page_index(&self, page_id: u32) -> Option<usize> {
        self.pages.iter().position(|p| p.page_id == page_id)
    }

    /// Next reading-order block, falling through to the first top-level block
    /// of later pages when `id` is the last one on its page.
    pub fn get_next_block(&self, id: &BlockId, ignored: &[BlockType]) -> Option<&Block> {
        let idx = self.page_index(id.page_id)?;
        if let Some(next) = self.pages[idx].get_next_block(Some(id), ignored) {
            return Some(next);
        }
        self.pages[idx + 1..]
            .iter()
            .find_map(|p| p.get_next_block(None, ignored))
    }

    /// Previous reading-order block, falling back to the last top-level block
    /// of earlier pages.
    pub fn get_prev_block(&self, id: &BlockId, ignored: &[BlockType]) -> Option<&Block> {
        let idx = self.page_index(id.page_id)?;
        if let Some(prev) = self.pages[idx].get_prev_block(Some(id), ignored) {
            return Some(prev);
        }
        self.pages[..idx]
            .iter()
            .rev()
            .find_map(|p| p.get_prev_block(None, ignored))
    }

    /// Swap in a new block under the same id. The replacement keeps the old
    /// block's id even if the caller built it with a different one.
    pub fn replace_block(&mut self, id: &BlockId, mut block: Block) -> Result<(), AssemblyError> {
        let slot = self.block_mut(id)?;
        block.id = *id;
        *slot = block;
        Ok(())
    }

    /// Descendants of `id` with one of `types` (all descendants if empty).
    pub fn contained_blocks(&self, id: &BlockId, types: &[BlockType]) -> Vec<&Block> {
        self.get_page(id.page_id)
            .map(|p| p.contained_blocks(id, types))
            .unwrap_or_default()
    }

    /// Every block of `types` reachable from any page structure, in order.
    pub fn blocks_of_type(&self, types: &[BlockType]) -> Vec<&Block> {
        self.pages
            .iter()
            .flat_map(|p| p.blocks_of_type(types))
            .collect()
    }

    pub fn raw_text(&self, id: &BlockId) -> String {
        self.get_page(id.page_id)
            .map(|p| p.raw_text(id))
            .unwrap_or_default()
    }

    pub fn block_count(&self) -> usize {
        self.pages.iter().map(|p| p.blocks.len()).sum()
    }

    /// Check that every referenced id resolves and that no block has two
    /// parents.
    pub fn validate(&self) -> Result<(), AssemblyError> {
        let mut seen = std::collections::HashSet::new();
        for page in &self.pages {
            let parents = std::iter::once(page.structure.as_slice())
                .chain(page.blocks.iter().map(|b| b.children()));
            for children in parents {
                for child in children {
                    self.block(child)?;
                    if !seen.insert(*child) {
                        return Err(AssemblyError::InvalidInput(format!(
                            "block {child} is referenced by more than one parent"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
