//! Table reconstruction: recognized cell grids plus raw text become
//! `TableCell` children of the table block.
//!
//! Three steps run per table: text assignment by maximal intersection area,
//! splitting of rows the recognizer merged, and folding of columns that only
//! hold currency signs into the column to their right.

use crate::builders::{FormRecognition, Recognitions, RecognizedCell, TableRecognition, TextFragment};
use crate::config::Thresholds;
use crate::geometry::PolygonBox;
use crate::schema::{
    BlockId, BlockKind, BlockType, Document, Page, TableCellData, TextExtractionMethod,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

static SPACED_LEADER_DOTS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:\s\.){2,}").unwrap());
static LEADER_DOTS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.{2,}").unwrap());

/// Working copy of a cell while the grid is being rebuilt.
#[derive(Debug, Clone, PartialEq)]
pub struct CellDraft {
    pub polygon: PolygonBox,
    pub row_id: u32,
    pub col_id: u32,
    pub rowspan: u32,
    pub colspan: u32,
    pub is_header: bool,
    pub text_lines: Vec<String>,
}

impl CellDraft {
    pub fn new(polygon: PolygonBox, row_id: u32, col_id: u32) -> Self {
        Self {
            polygon,
            row_id,
            col_id,
            rowspan: 1,
            colspan: 1,
            is_header: false,
            text_lines: Vec::new(),
        }
    }

    fn text(&self) -> String {
        self.text_lines.join("\n").trim().to_string()
    }

    fn into_data(self) -> TableCellData {
        TableCellData {
            row_id: self.row_id,
            col_id: self.col_id,
            rowspan: self.rowspan,
            colspan: self.colspan,
            is_header: self.is_header,
            text_lines: self.text_lines,
        }
    }
}

impl From<&RecognizedCell> for CellDraft {
    fn from(cell: &RecognizedCell) -> Self {
        Self {
            polygon: PolygonBox::from_bbox(cell.bbox),
            row_id: cell.row_id,
            col_id: cell.col_id,
            rowspan: cell.rowspan.max(1),
            colspan: cell.colspan.max(1),
            is_header: cell.is_header,
            text_lines: Vec::new(),
        }
    }
}

pub struct TableReconstructor<'a> {
    thresholds: &'a Thresholds,
}

impl<'a> TableReconstructor<'a> {
    pub fn new(thresholds: &'a Thresholds) -> Self {
        Self { thresholds }
    }

    /// Rebuild every recognized table and form. Returns the number of blocks
    /// that received cells.
    pub fn process(&self, document: &mut Document, recognitions: &Recognitions) -> usize {
        let mut done = 0;

        let mut tables: Vec<(&BlockId, &TableRecognition)> = recognitions.tables.iter().collect();
        tables.sort_by_key(|(id, _)| **id);
        for (id, rec) in tables {
            let Some(page) = document.get_page_mut(id.page_id) else {
                continue;
            };
            if page.get(id).is_none() {
                continue;
            }
            let (fragments, method) = if rec.text.is_empty() {
                (line_fragments(page, id), TextExtractionMethod::Pdftext)
            } else {
                (rec.text.clone(), TextExtractionMethod::Surya)
            };
            let cells = self.reconstruct(rec, &fragments);
            debug!("{id}: {} cells from {} fragments", cells.len(), fragments.len());
            install_cells(page, id, cells, method);
            done += 1;
        }

        let mut forms: Vec<(&BlockId, &FormRecognition)> = recognitions.forms.iter().collect();
        forms.sort_by_key(|(id, _)| **id);
        for (id, rec) in forms {
            if recognitions.tables.contains_key(id) {
                continue;
            }
            let Some(page) = document.get_page_mut(id.page_id) else {
                continue;
            };
            let Some(form) = page.get(id) else {
                continue;
            };
            let cells = form_cells(rec, &form.polygon);
            install_cells(page, id, cells, TextExtractionMethod::Pdftext);
            done += 1;
        }
        done
    }

    /// Assignment, row splitting and dollar folding for one table.
    pub fn reconstruct(&self, rec: &TableRecognition, fragments: &[TextFragment]) -> Vec<CellDraft> {
        let mut cells: Vec<CellDraft> = rec.cells.iter().map(CellDraft::from).collect();
        assign_text(&mut cells, fragments);
        let cells = split_combined_rows(cells, self.thresholds.row_split_threshold);
        combine_dollar_column(cells)
    }
}

/// Provider lines under a table, one fragment per line.
fn line_fragments(page: &Page, table: &BlockId) -> Vec<TextFragment> {
    page.contained_blocks(table, &[BlockType::Line])
        .into_iter()
        .map(|line| TextFragment {
            bbox: line.polygon.bbox(),
            text: page.raw_text(&line.id).trim_end_matches('\n').to_string(),
        })
        .collect()
}

/// Normalise exotic spaces, drop leader dots and escape for HTML.
pub fn clean_fragment(text: &str) -> String {
    let text: String = text
        .chars()
        .map(|c| match c {
            '\n' | '\u{00a0}' | '\u{2000}'..='\u{200a}' | '\u{202f}' | '\u{205f}' | '\u{3000}' => ' ',
            c => c,
        })
        .collect();
    let text = SPACED_LEADER_DOTS.replace_all(&text, "");
    let text = LEADER_DOTS.replace_all(&text, "");
    html_escape::encode_text(text.trim()).into_owned()
}

/// Give each fragment to the cell it overlaps most. Equal overlaps go to the
/// lowest `(row_id, col_id)`; fragments touching no cell are dropped.
pub fn assign_text(cells: &mut [CellDraft], fragments: &[TextFragment]) {
    for fragment in fragments {
        let poly = PolygonBox::from_bbox(fragment.bbox);
        let mut best: Option<(usize, f32)> = None;
        for (idx, cell) in cells.iter().enumerate() {
            let area = poly.intersection_area(&cell.polygon, 0.0, 0.0);
            if area <= 0.0 {
                continue;
            }
            let better = match best {
                None => true,
                Some((b, best_area)) => {
                    area > best_area
                        || (area == best_area
                            && (cell.row_id, cell.col_id) < (cells[b].row_id, cells[b].col_id))
                }
            };
            if better {
                best = Some((idx, area));
            }
        }
        let Some((idx, _)) = best else {
            continue;
        };
        let text = clean_fragment(&fragment.text);
        if !text.is_empty() {
            cells[idx].text_lines.push(text);
        }
    }
}

struct RowInfo {
    row_id: u32,
    cells: Vec<CellDraft>,
    line_counts: Vec<usize>,
    should_split: bool,
}

/// Split rows whose cells stack several logical rows of text, when enough
/// of the table looks that way.
pub fn split_combined_rows(cells: Vec<CellDraft>, threshold: f32) -> Vec<CellDraft> {
    if cells.is_empty() {
        return cells;
    }
    let mut by_row: BTreeMap<u32, Vec<CellDraft>> = BTreeMap::new();
    for cell in &cells {
        by_row.entry(cell.row_id).or_default().push(cell.clone());
    }

    let rows: Vec<RowInfo> = by_row
        .into_iter()
        .map(|(row_id, row_cells)| {
            let line_counts: Vec<usize> = row_cells.iter().map(|c| c.text_lines.len()).collect();
            let spans_into = cells
                .iter()
                .any(|c| c.row_id < row_id && c.row_id.saturating_add(c.rowspan) > row_id);
            let no_rowspans = !spans_into && row_cells.iter().all(|c| c.rowspan == 1);

            let full = row_cells.len() > 1
                && no_rowspans
                && line_counts.iter().all(|&n| n > 1 && n == line_counts[0]);

            let mut counter: BTreeMap<usize, usize> = BTreeMap::new();
            for &n in &line_counts {
                *counter.entry(n).or_default() += 1;
            }
            let keys: Vec<(usize, usize)> = counter.into_iter().collect();
            let partial = row_cells.len() > 3
                && no_rowspans
                && keys.len() == 2
                && keys[0].0 <= 1
                && keys[1].0 > 1
                && keys[0].1 == 1;

            RowInfo {
                row_id,
                cells: row_cells,
                line_counts,
                should_split: full || partial,
            }
        })
        .collect();

    let qualifying = rows.iter().filter(|r| r.should_split).count();
    if (qualifying as f32) / (rows.len() as f32) < threshold || qualifying == 0 {
        return cells;
    }

    let mut out = Vec::with_capacity(cells.len());
    let mut shift = 0u32;
    for row in rows {
        let max_lines = row.line_counts.iter().copied().max().unwrap_or(1).max(1);
        if !row.should_split {
            for mut cell in row.cells {
                cell.row_id = cell.row_id.saturating_add(shift);
                out.push(cell);
            }
            continue;
        }
        for i in 0..max_lines {
            for cell in &row.cells {
                let [x0, y0, x1, y1] = cell.polygon.bbox();
                let h = (y1 - y0) / max_lines as f32;
                let mut new_cell = CellDraft {
                    polygon: PolygonBox::from_bbox([x0, y0 + i as f32 * h, x1, y0 + (i + 1) as f32 * h]),
                    row_id: row.row_id.saturating_add(shift).saturating_add(i as u32),
                    text_lines: Vec::new(),
                    ..cell.clone()
                };
                if let Some(line) = cell.text_lines.get(i) {
                    new_cell.text_lines.push(line.clone());
                }
                out.push(new_cell);
            }
        }
        shift += max_lines as u32 - 1;
    }
    out
}

/// Fold columns holding nothing but `$` into the column to their right.
pub fn combine_dollar_column(mut cells: Vec<CellDraft>) -> Vec<CellDraft> {
    if cells.is_empty() {
        return cells;
    }
    let cols: Vec<u32> = cells.iter().map(|c| c.col_id).collect::<BTreeSet<_>>().into_iter().collect();
    let rows_of = |cells: &[CellDraft], col: u32| -> Vec<u32> {
        let mut rows: Vec<u32> = cells.iter().filter(|c| c.col_id == col).map(|c| c.row_id).collect();
        rows.sort_unstable();
        rows
    };

    let mut dollar_cols: Vec<(u32, u32)> = Vec::new();
    for pair in cols.windows(2) {
        let (col, next) = (pair[0], pair[1]);
        let col_cells: Vec<&CellDraft> = cells.iter().filter(|c| c.col_id == col).collect();
        let all_dollars = col_cells.iter().all(|c| {
            let t = c.text();
            t.is_empty() || t == "$"
        });
        let single_width = col_cells.iter().all(|c| c.colspan == 1);
        let spanned_into = cells
            .iter()
            .any(|c| c.col_id < col && c.col_id.saturating_add(c.colspan) > col);
        if all_dollars && single_width && !spanned_into && rows_of(&cells, col) == rows_of(&cells, next) {
            dollar_cols.push((col, next));
        }
    }
    if dollar_cols.is_empty() {
        return cells;
    }

    for &(col, next) in &dollar_cols {
        let moved: HashMap<u32, String> = cells
            .iter()
            .filter(|c| c.col_id == col)
            .map(|c| (c.row_id, c.text()))
            .collect();
        cells.retain(|c| c.col_id != col);
        for cell in cells.iter_mut().filter(|c| c.col_id == next) {
            let Some(prefix) = moved.get(&cell.row_id).filter(|p| !p.is_empty()) else {
                continue;
            };
            match cell.text_lines.first_mut() {
                Some(first) => first.insert_str(0, prefix),
                None => cell.text_lines.push(prefix.clone()),
            }
        }
    }

    let removed: Vec<u32> = dollar_cols.iter().map(|(c, _)| *c).collect();
    for cell in &mut cells {
        let shift = removed.iter().filter(|&&c| c < cell.col_id).count() as u32;
        cell.col_id -= shift;
    }
    cells
}

/// Lay form fields out as a two-column key/value grid over the form.
pub fn form_cells(rec: &FormRecognition, polygon: &PolygonBox) -> Vec<CellDraft> {
    let n = rec.fields.len().max(1) as f32;
    let [x0, y0, x1, y1] = polygon.bbox();
    let h = (y1 - y0) / n;
    let mid = (x0 + x1) / 2.0;
    let mut cells = Vec::with_capacity(rec.fields.len() * 2);
    for (i, field) in rec.fields.iter().enumerate() {
        let top = y0 + i as f32 * h;
        for (col, (left, right, text)) in [(x0, mid, &field.key), (mid, x1, &field.value)]
            .into_iter()
            .enumerate()
        {
            let mut cell = CellDraft::new(PolygonBox::from_bbox([left, top, right, top + h]), i as u32, col as u32);
            let text = clean_fragment(text);
            if !text.is_empty() {
                cell.text_lines.push(text);
            }
            cells.push(cell);
        }
    }
    cells
}

/// Register cells as `TableCell` blocks and make them the table's only
/// children, in row-major order.
pub fn install_cells(
    page: &mut Page,
    table: &BlockId,
    mut cells: Vec<CellDraft>,
    method: TextExtractionMethod,
) -> Vec<BlockId> {
    cells.sort_by_key(|c| (c.row_id, c.col_id));
    let ids: Vec<BlockId> = cells
        .into_iter()
        .map(|cell| {
            let polygon = cell.polygon;
            let id = page.add_block(polygon, BlockKind::TableCell(cell.into_data()));
            if let Some(b) = page.get_mut(&id) {
                b.text_extraction_method = method;
            }
            id
        })
        .collect();
    if let Some(block) = page.get_mut(table) {
        block.set_structure(ids.clone());
    }
    ids
}
