//! Heading levels from relative line height.

use crate::config::Thresholds;
use crate::schema::{BlockId, BlockKind, BlockType, Document};
use tracing::debug;

/// Headers whose line heights are within this ratio of a bucket's tallest
/// member share its level.
const BUCKET_TOLERANCE: f32 = 0.9;
const DEFAULT_LEVEL: u8 = 2;

pub struct SectionHeaderProcessor<'a> {
    thresholds: &'a Thresholds,
}

impl<'a> SectionHeaderProcessor<'a> {
    pub fn new(thresholds: &'a Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn process(&self, document: &mut Document) {
        let mut measured: Vec<(BlockId, Option<f32>)> = Vec::new();
        for header in document.blocks_of_type(&[BlockType::SectionHeader]) {
            let lines = document.contained_blocks(&header.id, &[BlockType::Line]);
            let avg = (!lines.is_empty()).then(|| {
                lines.iter().map(|l| l.polygon.height()).sum::<f32>() / lines.len() as f32
            });
            measured.push((header.id, avg));
        }

        let mut heights: Vec<f32> = measured.iter().filter_map(|(_, h)| *h).collect();
        heights.sort_by(|a, b| b.total_cmp(a));
        let buckets = bucket_starts(&heights, self.thresholds.heading_levels as usize);

        for (id, height) in measured {
            let level = match height {
                Some(h) => level_for(h, &buckets),
                None => DEFAULT_LEVEL.min(self.thresholds.heading_levels),
            };
            if let Some(BlockKind::SectionHeader { heading_level }) =
                document.get_block_mut(&id).map(|b| &mut b.kind)
            {
                *heading_level = Some(level);
            }
        }
        debug!("Section headers: {} height buckets", buckets.len());
    }
}

/// Tallest height of each bucket, descending. Heights must be sorted
/// descending. At most `max_buckets` are returned.
fn bucket_starts(heights: &[f32], max_buckets: usize) -> Vec<f32> {
    let mut starts: Vec<f32> = Vec::new();
    for &h in heights {
        match starts.last() {
            Some(&start) if h >= start * BUCKET_TOLERANCE => {}
            _ if starts.len() < max_buckets => starts.push(h),
            _ => {}
        }
    }
    starts
}

/// First bucket (from the tallest) the height reaches; anything shorter than
/// every bucket lands in the last one.
fn level_for(height: f32, buckets: &[f32]) -> u8 {
    let idx = buckets
        .iter()
        .position(|&start| height >= start * BUCKET_TOLERANCE)
        .unwrap_or(buckets.len().saturating_sub(1));
    (idx + 1) as u8
}
