//! Groups captions around tables/figures and runs of list items.
//!
//! Both passes rewrite the page's top-level structure in place: the absorbed
//! ids leave the page structure and become the children of a new group
//! block. The absorbed blocks stay in the page registry.

use crate::config::Thresholds;
use crate::geometry::PolygonBox;
use crate::schema::{BlockId, BlockKind, BlockType, Document, Page};
use std::collections::HashSet;
use tracing::debug;

const CAPTION_ANCHORS: [BlockType; 3] = [BlockType::Table, BlockType::Figure, BlockType::Picture];
const CAPTION_TYPES: [BlockType; 2] = [BlockType::Caption, BlockType::Footnote];

pub struct StructureBuilder<'a> {
    thresholds: &'a Thresholds,
}

impl<'a> StructureBuilder<'a> {
    pub fn new(thresholds: &'a Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn build(&self, document: &mut Document) {
        for page in &mut document.pages {
            let mut absorbed = HashSet::new();
            let captions = self.group_caption_blocks(page, &mut absorbed);
            let lists = self.group_lists(page, &mut absorbed);
            debug!(
                "Page {}: {captions} caption groups, {lists} list groups",
                page.page_id
            );
        }
    }

    /// Bind each table/figure/picture with an adjacent caption or footnote.
    /// Returns the number of groups created.
    pub fn group_caption_blocks(&self, page: &mut Page, absorbed: &mut HashSet<BlockId>) -> usize {
        let gap_threshold = self.thresholds.caption_gap_threshold * page.height();
        let anchors: Vec<BlockId> = page
            .structure
            .iter()
            .filter(|id| CAPTION_ANCHORS.contains(&id.block_type))
            .copied()
            .collect();

        let mut created = 0;
        for anchor_id in anchors {
            if absorbed.contains(&anchor_id) {
                continue;
            }
            let Some(anchor) = page.get(&anchor_id) else {
                continue;
            };
            let anchor_poly = anchor.polygon;
            let qualifies = |id: &BlockId, poly: &PolygonBox| {
                CAPTION_TYPES.contains(&id.block_type)
                    && poly.minimum_gap(&anchor_poly) < gap_threshold
                    && !absorbed.contains(id)
            };

            let mut members = Vec::with_capacity(3);
            if let Some(prev) = page.get_prev_block(Some(&anchor_id), &[]) {
                if qualifies(&prev.id, &prev.polygon) {
                    members.push((prev.id, prev.polygon));
                }
            }
            members.push((anchor_id, anchor_poly));
            if let Some(next) = page.get_next_block(Some(&anchor_id), &[]) {
                if qualifies(&next.id, &next.polygon) {
                    members.push((next.id, next.polygon));
                }
            }

            if members.len() > 1 {
                let Some(group_type) = anchor_id.block_type.group_type() else {
                    continue;
                };
                absorbed.extend(members.iter().map(|(id, _)| *id));
                insert_group(page, group_type, &members);
                created += 1;
            }
        }
        created
    }

    /// Collect runs of consecutive list items into list groups. Each item
    /// must lie within the gap threshold of the last item accepted into the
    /// run. Returns the number of groups created.
    pub fn group_lists(&self, page: &mut Page, absorbed: &mut HashSet<BlockId>) -> usize {
        let gap_threshold = self.thresholds.list_gap_threshold * page.height();
        let snapshot = page.structure.clone();

        let mut runs: Vec<Vec<(BlockId, PolygonBox)>> = Vec::new();
        let mut run: Vec<(BlockId, PolygonBox)> = Vec::new();
        for id in &snapshot {
            let item = page
                .get(id)
                .filter(|b| b.block_type() == BlockType::ListItem && !absorbed.contains(id));
            let Some(item) = item else {
                runs.push(std::mem::take(&mut run));
                continue;
            };
            let extends = run
                .last()
                .is_some_and(|(_, last)| item.polygon.minimum_gap(last) < gap_threshold);
            if !extends {
                runs.push(std::mem::take(&mut run));
            }
            run.push((item.id, item.polygon));
        }
        runs.push(run);

        let mut created = 0;
        for run in runs.into_iter().filter(|r| r.len() > 1) {
            absorbed.extend(run.iter().map(|(id, _)| *id));
            insert_group(page, BlockType::ListGroup, &run);
            created += 1;
        }
        created
    }
}

/// Create a group around `members` (in order) and splice it into the page
/// structure at the first member's position.
fn insert_group(page: &mut Page, group_type: BlockType, members: &[(BlockId, PolygonBox)]) -> BlockId {
    let polygons: Vec<PolygonBox> = members.iter().map(|(_, p)| *p).collect();
    let ids: Vec<BlockId> = members.iter().map(|(id, _)| *id).collect();
    let kind = BlockKind::for_type(group_type).unwrap_or(BlockKind::ListGroup);
    let group_id = page.add_block(PolygonBox::merge(&polygons), kind);
    if let Some(group) = page.get_mut(&group_id) {
        group.set_structure(ids.clone());
    }
    page.update_structure_item(&ids, group_id);
    group_id
}
