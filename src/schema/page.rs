//! A page: the arena that owns every block on it.

use super::{Block, BlockId, BlockKind, BlockType};
use crate::geometry::PolygonBox;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub page_id: u32,
    /// Page extent in document coordinates.
    pub polygon: PolygonBox,
    /// Direct children of the page, in reading order.
    pub structure: Vec<BlockId>,
    /// Registry; `blocks[i].id.block_id == Some(i)`.
    pub blocks: Vec<Block>,
    /// Page raster used for image crops and correction prompts.
    #[serde(skip)]
    pub image: Option<Arc<DynamicImage>>,
}

impl Page {
    pub fn new(page_id: u32, polygon: PolygonBox) -> Self {
        Self {
            page_id,
            polygon,
            structure: Vec::new(),
            blocks: Vec::new(),
            image: None,
        }
    }

    pub fn id(&self) -> BlockId {
        BlockId::page(self.page_id)
    }

    pub fn width(&self) -> f32 {
        self.polygon.width()
    }

    pub fn height(&self) -> f32 {
        self.polygon.height()
    }

    /// Register a new block, allocating the next `block_id`. The block is not
    /// placed in any structure.
    pub fn add_block(&mut self, polygon: PolygonBox, kind: BlockKind) -> BlockId {
        let block = Block::new(self.page_id, self.blocks.len() as u32, polygon, kind);
        let id = block.id;
        self.blocks.push(block);
        id
    }

    /// Register a block and append it to the page's top-level structure.
    pub fn add_top_level(&mut self, polygon: PolygonBox, kind: BlockKind) -> BlockId {
        let id = self.add_block(polygon, kind);
        self.structure.push(id);
        id
    }

    /// Resolve an id owned by this page. The type tag must match.
    pub fn get(&self, id: &BlockId) -> Option<&Block> {
        if id.page_id != self.page_id {
            return None;
        }
        let block = self.blocks.get(id.block_id? as usize)?;
        (block.id == *id).then_some(block)
    }

    pub fn get_mut(&mut self, id: &BlockId) -> Option<&mut Block> {
        if id.page_id != self.page_id {
            return None;
        }
        let block = self.blocks.get_mut(id.block_id? as usize)?;
        (block.id == *id).then_some(block)
    }

    /// Top-level blocks in reading order.
    pub fn top_level(&self) -> impl Iterator<Item = &Block> {
        self.structure.iter().filter_map(move |id| self.get(id))
    }

    /// Replace the first of `old` in the page structure with `new` and drop
    /// the rest of `old` from it.
    pub fn update_structure_item(&mut self, old: &[BlockId], new: BlockId) {
        let Some(pos) = self.structure.iter().position(|id| old.contains(id)) else {
            return;
        };
        self.structure[pos] = new;
        self.structure.retain(|id| !old.contains(id));
    }

    pub fn remove_structure_items(&mut self, ids: &[BlockId]) {
        self.structure.retain(|id| !ids.contains(id));
    }

    /// Next top-level block after `id`, skipping `ignored` types. `None` for
    /// `id` starts from the beginning.
    pub fn get_next_block(&self, id: Option<&BlockId>, ignored: &[BlockType]) -> Option<&Block> {
        let start = match id {
            Some(id) => self.structure.iter().position(|s| s == id)? + 1,
            None => 0,
        };
        self.structure[start..]
            .iter()
            .filter(|s| !ignored.contains(&s.block_type))
            .find_map(|s| self.get(s))
    }

    /// Previous top-level block before `id`, skipping `ignored` types. `None`
    /// for `id` starts from the end.
    pub fn get_prev_block(&self, id: Option<&BlockId>, ignored: &[BlockType]) -> Option<&Block> {
        let end = match id {
            Some(id) => self.structure.iter().position(|s| s == id)?,
            None => self.structure.len(),
        };
        self.structure[..end]
            .iter()
            .rev()
            .filter(|s| !ignored.contains(&s.block_type))
            .find_map(|s| self.get(s))
    }

    /// Depth-first descendants of `root` (excluding `root`) filtered by type.
    /// An empty filter returns every descendant.
    pub fn contained_blocks(&self, root: &BlockId, types: &[BlockType]) -> Vec<&Block> {
        let mut out = Vec::new();
        let mut stack: Vec<BlockId> = match self.get(root) {
            Some(b) => b.children().iter().rev().copied().collect(),
            None => return out,
        };
        while let Some(id) = stack.pop() {
            let Some(block) = self.get(&id) else {
                continue;
            };
            if types.is_empty() || types.contains(&block.block_type()) {
                out.push(block);
            }
            stack.extend(block.children().iter().rev().copied());
        }
        out
    }

    /// Every block of the given types reachable from the page structure.
    pub fn blocks_of_type(&self, types: &[BlockType]) -> Vec<&Block> {
        let mut out = Vec::new();
        for id in &self.structure {
            if let Some(block) = self.get(id) {
                if types.contains(&block.block_type()) {
                    out.push(block);
                }
                out.extend(self.contained_blocks(id, types));
            }
        }
        out
    }

    /// Plain text of a block: its spans joined, one line per `Line` child.
    pub fn raw_text(&self, id: &BlockId) -> String {
        let Some(block) = self.get(id) else {
            return String::new();
        };
        if let Some(span) = block.span() {
            return span.text.clone();
        }
        if let Some(cell) = block.table_cell() {
            return cell.text();
        }
        let mut text = String::new();
        for child in block.children() {
            text.push_str(&self.raw_text(child));
            if child.block_type == BlockType::Line && !text.ends_with('\n') {
                text.push('\n');
            }
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SpanData, TextData};

    fn page() -> Page {
        Page::new(0, PolygonBox::from_bbox([0.0, 0.0, 600.0, 800.0]))
    }

    fn bx(y: f32) -> PolygonBox {
        PolygonBox::from_bbox([50.0, y, 550.0, y + 20.0])
    }

    #[test]
    fn add_block_allocates_sequential_ids() {
        let mut p = page();
        let a = p.add_top_level(bx(0.0), BlockKind::Caption);
        let b = p.add_block(bx(30.0), BlockKind::Line);
        assert_eq!(a.block_id, Some(0));
        assert_eq!(b.block_id, Some(1));
        assert_eq!(p.structure, vec![a]);
        assert!(p.get(&b).is_some());
    }

    #[test]
    fn get_checks_type_tag() {
        let mut p = page();
        let a = p.add_block(bx(0.0), BlockKind::Caption);
        let wrong = BlockId::new(0, 0, BlockType::Text);
        assert!(p.get(&a).is_some());
        assert!(p.get(&wrong).is_none());
        assert!(p.get(&BlockId::new(1, 0, BlockType::Caption)).is_none());
    }

    #[test]
    fn update_structure_replaces_first_and_drops_rest() {
        let mut p = page();
        let a = p.add_top_level(bx(0.0), BlockKind::Caption);
        let b = p.add_top_level(bx(30.0), BlockKind::Table);
        let c = p.add_top_level(bx(60.0), BlockKind::Footnote);
        let g = p.add_block(bx(0.0), BlockKind::TableGroup);
        p.update_structure_item(&[a, b], g);
        assert_eq!(p.structure, vec![g, c]);
    }

    #[test]
    fn next_and_prev_skip_ignored_types() {
        let mut p = page();
        let h = p.add_top_level(bx(0.0), BlockKind::PageHeader);
        let t = p.add_top_level(bx(30.0), BlockKind::Text(TextData::default()));
        let f = p.add_top_level(bx(60.0), BlockKind::PageFooter);
        let skip = [BlockType::PageHeader, BlockType::PageFooter];
        assert_eq!(p.get_next_block(None, &skip).map(|b| b.id), Some(t));
        assert_eq!(p.get_next_block(Some(&t), &skip).map(|b| b.id), None);
        assert_eq!(p.get_prev_block(Some(&f), &[]).map(|b| b.id), Some(t));
        assert_eq!(p.get_prev_block(Some(&t), &[]).map(|b| b.id), Some(h));
    }

    #[test]
    fn raw_text_joins_lines() {
        let mut p = page();
        let text = p.add_top_level(bx(0.0), BlockKind::Text(TextData::default()));
        for word in ["hello", "world"] {
            let line = p.add_block(bx(0.0), BlockKind::Line);
            let span = p.add_block(bx(0.0), BlockKind::Span(SpanData::plain(word)));
            p.get_mut(&line).unwrap().add_structure(span);
            p.get_mut(&text).unwrap().add_structure(line);
        }
        assert_eq!(p.raw_text(&text), "hello\nworld\n");
        assert_eq!(p.contained_blocks(&text, &[BlockType::Line]).len(), 2);
        assert_eq!(p.contained_blocks(&text, &[]).len(), 4);
    }
}
