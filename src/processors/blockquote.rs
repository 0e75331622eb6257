//! Marks indented paragraphs as blockquotes.

use crate::config::Thresholds;
use crate::schema::{Block, BlockId, BlockType, Document, TextData};
use std::collections::HashMap;

const MAX_BLOCKQUOTE_LEVEL: u8 = 3;
/// Edge alignment tolerance as a fraction of the previous block's width.
const ALIGN_TOLERANCE: f32 = 0.01;

const TEXT_TYPES: [BlockType; 2] = [BlockType::Text, BlockType::TextInlineMath];

pub struct BlockquoteProcessor<'a> {
    thresholds: &'a Thresholds,
}

impl<'a> BlockquoteProcessor<'a> {
    pub fn new(thresholds: &'a Thresholds) -> Self {
        Self { thresholds }
    }

    /// Compare each top-level text block with the text block before it.
    /// A block indented past its predecessor, below it, and ending in the
    /// same right-edge region opens (or deepens) a blockquote; a block
    /// aligned with a quoted predecessor stays in the quote.
    pub fn process(&self, document: &mut Document) {
        let mut updates: HashMap<BlockId, TextData> = HashMap::new();
        for page in &document.pages {
            let min_indent = self.thresholds.blockquote_min_indent * page.width();
            let texts: Vec<&Block> = page
                .top_level()
                .filter(|b| TEXT_TYPES.contains(&b.block_type()) && !b.ignore_for_output)
                .collect();
            for pair in texts.windows(2) {
                let (prev, block) = (pair[0], pair[1]);
                let prev_data = updates
                    .get(&prev.id)
                    .copied()
                    .or_else(|| prev.kind.text_data().copied())
                    .unwrap_or_default();
                let Some(mut data) = block.kind.text_data().copied() else {
                    continue;
                };

                let tol = ALIGN_TOLERANCE * prev.polygon.width();
                let aligned = (block.polygon.x_start() - prev.polygon.x_start()).abs() <= tol
                    && (block.polygon.x_end() - prev.polygon.x_end()).abs() <= tol;
                let indented = block.polygon.x_start() > prev.polygon.x_start() + min_indent
                    && (block.polygon.x_end() - prev.polygon.x_end()).abs() <= min_indent
                    && block.polygon.y_start() > prev.polygon.y_end();

                if indented {
                    data.blockquote = true;
                    data.blockquote_level = (prev_data.blockquote_level + 1).min(MAX_BLOCKQUOTE_LEVEL);
                } else if prev_data.blockquote && aligned {
                    data.blockquote = true;
                    data.blockquote_level = prev_data.blockquote_level;
                } else {
                    continue;
                }
                updates.insert(block.id, data);
            }
        }
        for (id, data) in updates {
            if let Some(slot) = document.get_block_mut(&id).and_then(|b| b.kind.text_data_mut()) {
                *slot = data;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PolygonBox;
    use crate::schema::{BlockKind, Page};

    fn data(doc: &Document, id: &BlockId) -> TextData {
        *doc.block(id).unwrap().kind.text_data().unwrap()
    }

    #[test]
    fn indented_paragraph_becomes_quote() {
        let mut p = Page::new(0, PolygonBox::from_bbox([0.0, 0.0, 600.0, 800.0]));
        let text = |x0: f32, y0: f32| PolygonBox::from_bbox([x0, y0, 550.0, y0 + 40.0]);
        let body = p.add_top_level(text(50.0, 100.0), BlockKind::Text(TextData::default()));
        let quote = p.add_top_level(text(100.0, 150.0), BlockKind::Text(TextData::default()));
        let quote_cont = p.add_top_level(text(100.0, 200.0), BlockKind::Text(TextData::default()));
        let nested = p.add_top_level(text(150.0, 250.0), BlockKind::Text(TextData::default()));
        let back = p.add_top_level(text(50.0, 300.0), BlockKind::Text(TextData::default()));
        let mut doc = Document::new(vec![p]);
        let t = Thresholds::default();
        BlockquoteProcessor::new(&t).process(&mut doc);

        assert!(!data(&doc, &body).blockquote);
        assert_eq!(data(&doc, &quote).blockquote_level, 1);
        assert!(data(&doc, &quote_cont).blockquote);
        assert_eq!(data(&doc, &quote_cont).blockquote_level, 1);
        assert_eq!(data(&doc, &nested).blockquote_level, 2);
        assert!(!data(&doc, &back).blockquote);
    }
}
