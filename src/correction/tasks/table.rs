use super::{block_crop, content_len, unfence};
use crate::correction::service::{FieldKind, GenerationRequest, ResponseSchema, SchemaField};
use crate::correction::{strip_tags, BlockPatch, CorrectionTask, TaskContext, TaskInput};
use crate::geometry::PolygonBox;
use crate::processors::table::CellDraft;
use crate::prompts::{fill, TABLE_CORRECTION_PROMPT};
use crate::renderer::html::table_html;
use crate::schema::{BlockType, Document};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::debug;

const SCHEMA: ResponseSchema = ResponseSchema {
    name: "TableCorrection",
    fields: &[
        SchemaField { name: "comparison", kind: FieldKind::String },
        SchemaField { name: "corrected_html", kind: FieldKind::String },
    ],
};

static ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").unwrap());
static CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("th, td").unwrap());
static LINE_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());

/// Re-checks recognized tables and forms against the page raster.
pub struct TableCorrection {
    min_length_ratio: f32,
    max_row_delta: usize,
    max_col_delta: usize,
}

impl TableCorrection {
    pub fn new(min_length_ratio: f32, max_row_delta: usize, max_col_delta: usize) -> Self {
        Self {
            min_length_ratio,
            max_row_delta,
            max_col_delta,
        }
    }
}

/// One cell of a parsed HTML table, positioned on the occupancy grid.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCell {
    pub row_id: u32,
    pub col_id: u32,
    pub rowspan: u32,
    pub colspan: u32,
    pub is_header: bool,
    pub text_lines: Vec<String>,
}

/// Parse `<tr>`/`<th>`/`<td>` markup into grid cells, honouring rowspan and
/// colspan the way a browser lays them out.
///
/// Spans larger than `max_rowspan`/`max_colspan` fail the parse.
pub fn parse_table_html(
    html: &str,
    max_rowspan: u32,
    max_colspan: u32,
) -> Result<Vec<ParsedCell>, String> {
    let fragment = Html::parse_fragment(html);
    let mut occupied: HashSet<(u32, u32)> = HashSet::new();
    let mut cells = Vec::new();

    for (r, row) in fragment.select(&ROW).enumerate() {
        let r = u32::try_from(r).unwrap_or(u32::MAX);
        let mut c = 0u32;
        for cell in row.select(&CELL) {
            while occupied.contains(&(r, c)) {
                c = c.saturating_add(1);
            }
            let span = |name: &str| {
                cell.value()
                    .attr(name)
                    .and_then(|v| v.trim().parse::<u32>().ok())
                    .unwrap_or(1)
                    .max(1)
            };
            let (rowspan, colspan) = (span("rowspan"), span("colspan"));
            if rowspan > max_rowspan || colspan > max_colspan {
                return Err(format!(
                    "cell span {rowspan}x{colspan} exceeds the {max_rowspan}x{max_colspan} grid"
                ));
            }
            for dr in 0..rowspan {
                for dc in 0..colspan {
                    occupied.insert((r.saturating_add(dr), c.saturating_add(dc)));
                }
            }
            let text_lines = LINE_BREAK
                .split(&cell.inner_html())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            cells.push(ParsedCell {
                row_id: r,
                col_id: c,
                rowspan,
                colspan,
                is_header: cell.value().name() == "th",
                text_lines,
            });
            c = c.saturating_add(colspan);
        }
    }
    Ok(cells)
}

fn grid_size<I: Iterator<Item = (u32, u32, u32, u32)>>(cells: I) -> (usize, usize) {
    cells.fold((0, 0), |(rows, cols), (r, c, rs, cs)| {
        (
            rows.max(r.saturating_add(rs) as usize),
            cols.max(c.saturating_add(cs) as usize),
        )
    })
}

/// Lay parsed cells out on a uniform grid over the table's polygon.
fn to_drafts(cells: Vec<ParsedCell>, polygon: &PolygonBox, rows: usize, cols: usize) -> Vec<CellDraft> {
    let [x0, y0, x1, y1] = polygon.bbox();
    let w = (x1 - x0) / cols.max(1) as f32;
    let h = (y1 - y0) / rows.max(1) as f32;
    cells
        .into_iter()
        .map(|cell| {
            let left = x0 + cell.col_id as f32 * w;
            let top = y0 + cell.row_id as f32 * h;
            let poly = PolygonBox::from_bbox([
                left,
                top,
                left + cell.colspan as f32 * w,
                top + cell.rowspan as f32 * h,
            ]);
            let mut draft = CellDraft::new(poly, cell.row_id, cell.col_id);
            draft.rowspan = cell.rowspan;
            draft.colspan = cell.colspan;
            draft.is_header = cell.is_header;
            draft.text_lines = cell.text_lines;
            draft
        })
        .collect()
}

impl CorrectionTask for TableCorrection {
    fn name(&self) -> &'static str {
        "TableCorrection"
    }

    fn collect(&self, document: &Document) -> Vec<TaskInput> {
        let mut inputs = Vec::new();
        for block in document.blocks_of_type(&[BlockType::Table, BlockType::Form]) {
            if block.ignore_for_output {
                continue;
            }
            let cells: Vec<_> = document
                .contained_blocks(&block.id, &[BlockType::TableCell])
                .into_iter()
                .filter_map(|b| b.table_cell().map(|c| (c.row_id, c.col_id, c.rowspan, c.colspan)))
                .collect();
            if cells.is_empty() {
                continue;
            }
            let Some(crop) = block_crop(document, block) else {
                debug!("{}: no raster, skipping table correction", block.id);
                continue;
            };
            let (rows, cols) = grid_size(cells.into_iter());
            let original_html = table_html(document, &block.id);
            inputs.push(TaskInput {
                task: self.name(),
                request: GenerationRequest {
                    block: block.id,
                    prompt: fill(TABLE_CORRECTION_PROMPT, &[("block_html", original_html.as_str())]),
                    images: vec![crop],
                    schema: SCHEMA,
                },
                context: TaskContext::Table {
                    original_html,
                    rows,
                    cols,
                },
            });
        }
        inputs
    }

    fn apply(
        &self,
        response: &Map<String, Value>,
        input: &TaskInput,
        document: &Document,
    ) -> Result<BlockPatch, String> {
        let TaskContext::Table { original_html, rows, cols } = &input.context else {
            return Err("table task without table context".into());
        };
        let corrected = unfence(
            response
                .get("corrected_html")
                .and_then(Value::as_str)
                .unwrap_or_default(),
        );
        if corrected.to_lowercase().contains("no corrections") {
            return Ok(BlockPatch::NoChange);
        }

        let span_limit = |n: usize, delta: usize| u32::try_from(n.saturating_add(delta)).unwrap_or(u32::MAX);
        let parsed = parse_table_html(
            corrected,
            span_limit(*rows, self.max_row_delta),
            span_limit(*cols, self.max_col_delta),
        )?;
        if parsed.is_empty() {
            return Err("corrected HTML contains no table cells".into());
        }

        let original_len = content_len(&strip_tags(original_html));
        let corrected_len = content_len(&strip_tags(corrected));
        if (corrected_len as f32) < original_len as f32 * self.min_length_ratio {
            return Err(format!(
                "corrected table too short ({corrected_len} vs {original_len} chars)"
            ));
        }

        let (new_rows, new_cols) = grid_size(
            parsed
                .iter()
                .map(|c| (c.row_id, c.col_id, c.rowspan, c.colspan)),
        );
        if new_rows.abs_diff(*rows) > self.max_row_delta {
            return Err(format!("row count changed from {rows} to {new_rows}"));
        }
        if new_cols.abs_diff(*cols) > self.max_col_delta {
            return Err(format!("column count changed from {cols} to {new_cols}"));
        }

        let table = document.block(input.block()).map_err(|e| e.to_string())?;
        Ok(BlockPatch::ReplaceTableCells {
            block: table.id,
            cells: to_drafts(parsed, &table.polygon, new_rows, new_cols),
        })
    }
}
