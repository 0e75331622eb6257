//! Decides whether a paragraph flows on across a column or page break.

use crate::config::Thresholds;
use crate::schema::{Block, BlockId, BlockType, Document, PAGE_FURNITURE};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// A line ending in a hyphen that follows a letter or digit.
static HYPHENATED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)^.*[\p{L}\d][-—¬]\s?$").unwrap());

const TEXT_TYPES: [BlockType; 2] = [BlockType::Text, BlockType::TextInlineMath];

pub struct ContinuationAnalyzer<'a> {
    thresholds: &'a Thresholds,
}

impl<'a> ContinuationAnalyzer<'a> {
    pub fn new(thresholds: &'a Thresholds) -> Self {
        Self { thresholds }
    }

    /// Flag every text block whose paragraph continues in the next block.
    /// Returns the number of flags set.
    pub fn process(&self, document: &mut Document) -> usize {
        let candidates: Vec<BlockId> = document
            .blocks_of_type(&TEXT_TYPES)
            .into_iter()
            .map(|b| b.id)
            .collect();

        let flagged: Vec<BlockId> = candidates
            .into_iter()
            .filter(|id| self.continues(document, id))
            .collect();

        for id in &flagged {
            if let Some(data) = document.get_block_mut(id).and_then(|b| b.kind.text_data_mut()) {
                data.has_continuation = true;
            }
        }
        debug!("Continuation: {} blocks flagged", flagged.len());
        flagged.len()
    }

    /// Whether the paragraph in `id` flows into the next reading-order block.
    pub fn continues(&self, document: &Document, id: &BlockId) -> bool {
        let Some(block) = document.get_block(id) else {
            return false;
        };
        if block.children().len() < self.thresholds.continuation_min_lines {
            return false;
        }
        let Some(next) = document.get_next_block(id, &PAGE_FURNITURE) else {
            return false;
        };
        if !TEXT_TYPES.contains(&next.block_type())
            || next.structure.is_none()
            || next.ignore_for_output
        {
            return false;
        }

        let column_gap = block.polygon.width() * self.thresholds.column_gap_ratio;
        let same_page = next.page_id() == block.page_id();
        let column_break = same_page
            && next.polygon.y_start().floor() <= block.polygon.y_start().ceil()
            && next.polygon.x_start() > block.polygon.x_end() + column_gap;
        let page_break = !same_page && self.in_first_quadrant(document, next);
        if !(column_break || page_break) {
            return false;
        }

        let next_lines = lines_of(document, next);
        let starts_indented = match next_lines.first() {
            Some(first) => {
                let min_x = next_lines
                    .iter()
                    .map(|l| l.polygon.x_start())
                    .fold(f32::INFINITY, f32::min)
                    .ceil();
                first.polygon.x_start() > min_x
            }
            None => true,
        };
        if starts_indented {
            return false;
        }

        let lines = lines_of(document, block);
        let Some(last) = lines.last() else {
            return false;
        };
        let max_x = lines
            .iter()
            .map(|l| l.polygon.x_end())
            .fold(f32::NEG_INFINITY, f32::max)
            .floor();
        let full_width = last.polygon.x_end() >= max_x;
        let hyphenated = HYPHENATED.is_match(document.raw_text(&last.id).trim());
        full_width || hyphenated
    }

    fn in_first_quadrant(&self, document: &Document, block: &Block) -> bool {
        let Some(page) = document.get_page(block.page_id()) else {
            return false;
        };
        block.polygon.x_start() < page.width() * self.thresholds.first_quadrant_x
            && block.polygon.y_start() < page.height() * self.thresholds.first_quadrant_y
    }
}

fn lines_of<'d>(document: &'d Document, block: &Block) -> Vec<&'d Block> {
    document.contained_blocks(&block.id, &[BlockType::Line])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PolygonBox;
    use crate::schema::{BlockKind, Page, SpanData, TextData};

    fn add_text(page: &mut Page, lines: &[([f32; 4], &str)]) -> BlockId {
        let polys: Vec<PolygonBox> = lines.iter().map(|(b, _)| PolygonBox::from_bbox(*b)).collect();
        let id = page.add_top_level(PolygonBox::merge(&polys), BlockKind::Text(TextData::default()));
        for (bbox, text) in lines {
            let line = page.add_block(PolygonBox::from_bbox(*bbox), BlockKind::Line);
            let span = page.add_block(PolygonBox::from_bbox(*bbox), BlockKind::Span(SpanData::plain(*text)));
            page.get_mut(&line).unwrap().add_structure(span);
            page.get_mut(&id).unwrap().add_structure(line);
        }
        id
    }

    fn page(id: u32) -> Page {
        Page::new(id, PolygonBox::from_bbox([0.0, 0.0, 600.0, 800.0]))
    }

    fn page_break_doc(next_first_x: f32) -> (Document, BlockId) {
        let mut p0 = page(0);
        let b = add_text(
            &mut p0,
            &[
                ([50.0, 600.0, 550.0, 612.0], "this paragraph runs for a while and"),
                ([50.0, 614.0, 400.0, 626.0], "ends with an examp-"),
            ],
        );
        p0.add_top_level(PolygonBox::from_bbox([0.0, 760.0, 600.0, 780.0]), BlockKind::PageFooter);
        let mut p1 = page(1);
        p1.add_top_level(PolygonBox::from_bbox([0.0, 10.0, 600.0, 30.0]), BlockKind::PageHeader);
        add_text(
            &mut p1,
            &[
                ([next_first_x, 50.0, 550.0, 62.0], "le, this is the rest of it"),
                ([50.0, 64.0, 300.0, 76.0], "and it ends here."),
            ],
        );
        (Document::new(vec![p0, p1]), b)
    }

    #[test]
    fn hyphenated_page_break_continues() {
        let (mut doc, b) = page_break_doc(50.0);
        let t = Thresholds::default();
        assert_eq!(ContinuationAnalyzer::new(&t).process(&mut doc), 1);
        assert!(doc.block(&b).unwrap().has_continuation());
    }

    #[test]
    fn indented_next_block_does_not_continue() {
        let (mut doc, b) = page_break_doc(80.0);
        let t = Thresholds::default();
        ContinuationAnalyzer::new(&t).process(&mut doc);
        assert!(!doc.block(&b).unwrap().has_continuation());
    }

    #[test]
    fn next_block_outside_first_quadrant_does_not_continue() {
        let mut p0 = page(0);
        let b = add_text(
            &mut p0,
            &[
                ([50.0, 600.0, 550.0, 612.0], "full width line"),
                ([50.0, 614.0, 550.0, 626.0], "another full width line"),
            ],
        );
        let mut p1 = page(1);
        add_text(
            &mut p1,
            &[
                ([50.0, 500.0, 550.0, 512.0], "starts low on the page"),
                ([50.0, 514.0, 550.0, 526.0], "second"),
            ],
        );
        let doc = Document::new(vec![p0, p1]);
        let t = Thresholds::default();
        assert!(!ContinuationAnalyzer::new(&t).continues(&doc, &b));
    }

    #[test]
    fn column_break_with_full_width_last_line() {
        let mut p = page(0);
        let left = add_text(
            &mut p,
            &[
                ([40.0, 100.0, 280.0, 112.0], "left column text that"),
                ([40.0, 700.0, 280.0, 712.0], "fills the line"),
            ],
        );
        add_text(
            &mut p,
            &[
                ([320.0, 100.0, 560.0, 112.0], "carries on in the right"),
                ([320.0, 114.0, 500.0, 126.0], "column."),
            ],
        );
        let doc = Document::new(vec![p]);
        let t = Thresholds::default();
        assert!(ContinuationAnalyzer::new(&t).continues(&doc, &left));
    }

    #[test]
    fn next_block_below_is_not_a_break() {
        let mut p = page(0);
        let first = add_text(
            &mut p,
            &[
                ([50.0, 100.0, 550.0, 112.0], "one"),
                ([50.0, 114.0, 550.0, 126.0], "two"),
            ],
        );
        add_text(
            &mut p,
            &[
                ([50.0, 140.0, 550.0, 152.0], "three"),
                ([50.0, 154.0, 550.0, 166.0], "four"),
            ],
        );
        let doc = Document::new(vec![p]);
        let t = Thresholds::default();
        assert!(!ContinuationAnalyzer::new(&t).continues(&doc, &first));
    }

    #[test]
    fn single_line_block_is_skipped() {
        let (mut doc, b) = page_break_doc(50.0);
        let t = Thresholds {
            continuation_min_lines: 3,
            ..Default::default()
        };
        ContinuationAnalyzer::new(&t).process(&mut doc);
        assert!(!doc.block(&b).unwrap().has_continuation());
    }
}
