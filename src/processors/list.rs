//! List indentation levels from left-edge offsets inside each list group.

use crate::config::Thresholds;
use crate::schema::{BlockId, BlockKind, BlockType, Document};

const MAX_INDENT_LEVEL: u8 = 4;

pub struct ListProcessor<'a> {
    thresholds: &'a Thresholds,
}

impl<'a> ListProcessor<'a> {
    pub fn new(thresholds: &'a Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn process(&self, document: &mut Document) {
        let mut levels: Vec<(BlockId, u8)> = Vec::new();
        for page in &document.pages {
            let step = self.thresholds.list_indent_step * page.width();
            if step <= 0.0 {
                continue;
            }
            for group in page.blocks_of_type(&[BlockType::ListGroup]) {
                let items: Vec<_> = group
                    .children()
                    .iter()
                    .filter_map(|id| page.get(id))
                    .filter(|b| b.block_type() == BlockType::ListItem)
                    .collect();
                let Some(first) = items.first() else {
                    continue;
                };
                let base = first.polygon.x_start();
                for item in &items {
                    let offset = (item.polygon.x_start() - base).max(0.0);
                    let level = ((offset / step).floor() as u8).min(MAX_INDENT_LEVEL);
                    levels.push((item.id, level));
                }
            }
        }
        for (id, level) in levels {
            if let Some(BlockKind::ListItem { list_indent_level }) =
                document.get_block_mut(&id).map(|b| &mut b.kind)
            {
                *list_indent_level = level;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PolygonBox;
    use crate::schema::Page;

    #[test]
    fn indents_relative_to_first_item() {
        // Page width 500: one level per 10pt.
        let mut p = Page::new(0, PolygonBox::from_bbox([0.0, 0.0, 500.0, 800.0]));
        let xs = [50.0, 62.0, 75.0, 50.0, 200.0];
        let ids: Vec<BlockId> = xs
            .iter()
            .enumerate()
            .map(|(i, x)| {
                let y = i as f32 * 20.0;
                p.add_block(
                    PolygonBox::from_bbox([*x, y, 450.0, y + 15.0]),
                    BlockKind::ListItem { list_indent_level: 0 },
                )
            })
            .collect();
        let group = p.add_top_level(PolygonBox::from_bbox([50.0, 0.0, 450.0, 100.0]), BlockKind::ListGroup);
        p.get_mut(&group).unwrap().set_structure(ids.clone());
        let mut doc = Document::new(vec![p]);
        let t = Thresholds::default();
        ListProcessor::new(&t).process(&mut doc);
        let levels: Vec<u8> = ids
            .iter()
            .map(|id| match doc.block(id).unwrap().kind {
                BlockKind::ListItem { list_indent_level } => list_indent_level,
                _ => 99,
            })
            .collect();
        assert_eq!(levels, vec![0, 1, 2, 0, 4]);
    }
}
