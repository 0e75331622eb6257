//! Builds a [`Document`] from upstream detector output.
//!
//! Layout polygons arrive in the detector's image space and are rescaled to
//! page space. Provider lines are already in page space and are attached to
//! the layout block that covers the largest share of each line.

use crate::config::PageSelection;
use crate::error::AssemblyError;
use crate::geometry::PolygonBox;
use crate::schema::{
    BlockId, BlockKind, BlockType, Document, Page, SpanData, SpanFormat, TextExtractionMethod,
};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Everything the upstream detectors produced for one document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentInput {
    #[serde(default)]
    pub filepath: Option<String>,
    pub pages: Vec<PageInput>,
}

/// Detector output for one page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageInput {
    /// Page size in document coordinates.
    pub width: f32,
    pub height: f32,
    /// Path to the page raster, loaded at build time if `image` is unset.
    #[serde(default)]
    pub image_path: Option<PathBuf>,
    #[serde(skip)]
    pub image: Option<Arc<DynamicImage>>,
    pub layout: LayoutResult,
    #[serde(default)]
    pub lines: Vec<ProviderLine>,
    #[serde(default)]
    pub tables: Vec<TableRecognition>,
    #[serde(default)]
    pub equations: Vec<EquationRecognition>,
    #[serde(default)]
    pub forms: Vec<FormRecognition>,
}

/// Labeled boxes in the detector's own image space.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayoutResult {
    /// `(width, height)` of the image the detector ran on.
    pub image_size: (f32, f32),
    pub boxes: Vec<LayoutBox>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutBox {
    pub label: BlockType,
    pub bbox: [f32; 4],
    #[serde(default)]
    pub confidence: Option<f32>,
}

/// One text line from a text or OCR provider, in page space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderLine {
    pub bbox: [f32; 4],
    pub spans: Vec<ProviderSpan>,
    #[serde(default)]
    pub origin: TextExtractionMethod,
}

impl ProviderLine {
    pub fn text(&self) -> String {
        self.spans.iter().map(|s| s.text.as_str()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSpan {
    pub text: String,
    pub bbox: [f32; 4],
    #[serde(default)]
    pub font: String,
    #[serde(default)]
    pub font_size: f32,
    #[serde(default)]
    pub font_weight: f32,
    #[serde(default)]
    pub formats: Vec<SpanFormat>,
    #[serde(default)]
    pub url: Option<String>,
}

/// A recognized table cell, in page space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizedCell {
    pub bbox: [f32; 4],
    pub row_id: u32,
    pub col_id: u32,
    #[serde(default = "one")]
    pub rowspan: u32,
    #[serde(default = "one")]
    pub colspan: u32,
    #[serde(default)]
    pub is_header: bool,
}

fn one() -> u32 {
    1
}

/// A raw text fragment positioned in page space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextFragment {
    pub bbox: [f32; 4],
    pub text: String,
}

/// Cell grid for the table or form at `block_index`. When `text` is empty
/// the provider lines that fell inside the block are used instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRecognition {
    pub block_index: usize,
    pub cells: Vec<RecognizedCell>,
    #[serde(default)]
    pub text: Vec<TextFragment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquationRecognition {
    pub block_index: usize,
    pub latex: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormField {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

/// Key/value pairs for the form at `block_index`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormRecognition {
    pub block_index: usize,
    pub fields: Vec<FormField>,
}

/// Recognizer outputs re-keyed by the block they belong to.
#[derive(Debug, Clone, Default)]
pub struct Recognitions {
    pub tables: HashMap<BlockId, TableRecognition>,
    pub equations: HashMap<BlockId, EquationRecognition>,
    pub forms: HashMap<BlockId, FormRecognition>,
}

/// Build the document tree for the selected pages.
pub fn build_document(
    input: DocumentInput,
    pages: &PageSelection,
) -> Result<(Document, Recognitions), AssemblyError> {
    let total = input.pages.len();
    let selected = pages.to_indices(total);
    let mut recognitions = Recognitions::default();
    let mut out = Vec::with_capacity(selected.len());

    for (idx, page_input) in input.pages.into_iter().enumerate() {
        if !selected.contains(&idx) {
            continue;
        }
        let page = build_page(idx as u32, page_input, &mut recognitions)?;
        out.push(page);
    }

    let mut document = Document::new(out);
    document.filepath = input.filepath;
    debug!(
        "Built document: {} pages, {} blocks",
        document.pages.len(),
        document.block_count()
    );
    Ok((document, recognitions))
}

fn build_page(
    page_id: u32,
    input: PageInput,
    recognitions: &mut Recognitions,
) -> Result<Page, AssemblyError> {
    if input.width <= 0.0 || input.height <= 0.0 {
        return Err(AssemblyError::InvalidInput(format!(
            "page {page_id} has non-positive size {}x{}",
            input.width, input.height
        )));
    }
    let mut page = Page::new(
        page_id,
        PolygonBox::from_bbox([0.0, 0.0, input.width, input.height]),
    );
    page.image = match (input.image, &input.image_path) {
        (Some(img), _) => Some(img),
        (None, Some(path)) => Some(Arc::new(load_image(path)?)),
        (None, None) => None,
    };

    let page_size = (input.width, input.height);
    let mut layout_ids = Vec::with_capacity(input.layout.boxes.len());
    for layout_box in &input.layout.boxes {
        let kind = BlockKind::for_type(layout_box.label)
            .filter(|_| is_layout_label(layout_box.label))
            .ok_or_else(|| {
                AssemblyError::InvalidInput(format!(
                    "page {page_id}: '{}' is not a layout label",
                    layout_box.label
                ))
            })?;
        let polygon = PolygonBox::from_bbox(layout_box.bbox)
            .rescale(input.layout.image_size, page_size)
            .fit_to_bounds(input.width, input.height);
        layout_ids.push(page.add_top_level(polygon, kind));
    }

    attach_lines(&mut page, &layout_ids, &input.lines);

    for table in input.tables {
        if let Some(id) = recognition_target(&layout_ids, table.block_index, &[BlockType::Table, BlockType::Form]) {
            recognitions.tables.insert(id, table);
        } else {
            warn!("Page {page_id}: table recognition for box {} has no table block", table.block_index);
        }
    }
    for eq in input.equations {
        if let Some(id) = recognition_target(&layout_ids, eq.block_index, &[BlockType::Equation]) {
            recognitions.equations.insert(id, eq);
        } else {
            warn!("Page {page_id}: equation recognition for box {} has no equation block", eq.block_index);
        }
    }
    for form in input.forms {
        if let Some(id) = recognition_target(&layout_ids, form.block_index, &[BlockType::Form]) {
            recognitions.forms.insert(id, form);
        } else {
            warn!("Page {page_id}: form recognition for box {} has no form block", form.block_index);
        }
    }

    Ok(page)
}

fn is_layout_label(label: BlockType) -> bool {
    !matches!(
        label,
        BlockType::Span | BlockType::Line | BlockType::TableCell | BlockType::Page | BlockType::Document
    ) && !label.is_group()
}

fn recognition_target(layout_ids: &[BlockId], index: usize, types: &[BlockType]) -> Option<BlockId> {
    layout_ids
        .get(index)
        .copied()
        .filter(|id| types.contains(&id.block_type))
}

/// Attach every line to the layout block covering most of it (ties go to the
/// earliest block). Lines no block touches are dropped.
fn attach_lines(page: &mut Page, layout_ids: &[BlockId], lines: &[ProviderLine]) {
    let mut dropped = 0usize;
    for line in lines {
        let line_poly = PolygonBox::from_bbox(line.bbox);
        let mut best: Option<(BlockId, f32)> = None;
        for id in layout_ids {
            let Some(block) = page.get(id) else { continue };
            let pct = line_poly.intersection_pct(&block.polygon);
            if pct > 0.0 && best.is_none_or(|(_, b)| pct > b) {
                best = Some((*id, pct));
            }
        }
        let Some((parent, _)) = best else {
            dropped += 1;
            continue;
        };

        let line_id = page.add_block(line_poly, BlockKind::Line);
        for span in &line.spans {
            let span_id = page.add_block(
                PolygonBox::from_bbox(span.bbox),
                BlockKind::Span(SpanData {
                    text: span.text.clone(),
                    font: span.font.clone(),
                    font_size: span.font_size,
                    font_weight: span.font_weight,
                    formats: span.formats.clone(),
                    url: span.url.clone(),
                }),
            );
            if let Some(b) = page.get_mut(&span_id) {
                b.text_extraction_method = line.origin;
            }
            if let Some(b) = page.get_mut(&line_id) {
                b.add_structure(span_id);
            }
        }
        if let Some(b) = page.get_mut(&line_id) {
            b.text_extraction_method = line.origin;
        }
        if let Some(b) = page.get_mut(&parent) {
            b.text_extraction_method = line.origin;
            b.add_structure(line_id);
        }
    }
    if dropped > 0 {
        debug!("Page {}: dropped {dropped} lines outside every layout block", page.page_id);
    }
}

fn load_image(path: &PathBuf) -> Result<DynamicImage, AssemblyError> {
    if !path.exists() {
        return Err(AssemblyError::FileNotFound { path: path.clone() });
    }
    image::open(path).map_err(|e| AssemblyError::ImageLoad {
        path: path.clone(),
        detail: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(bbox: [f32; 4], text: &str) -> ProviderLine {
        ProviderLine {
            bbox,
            spans: vec![ProviderSpan {
                text: text.into(),
                bbox,
                font: String::new(),
                font_size: 10.0,
                font_weight: 400.0,
                formats: vec![],
                url: None,
            }],
            origin: TextExtractionMethod::Pdftext,
        }
    }

    fn page_input() -> PageInput {
        PageInput {
            width: 600.0,
            height: 800.0,
            layout: LayoutResult {
                // Detector ran at half resolution.
                image_size: (300.0, 400.0),
                boxes: vec![
                    LayoutBox {
                        label: BlockType::SectionHeader,
                        bbox: [25.0, 25.0, 275.0, 40.0],
                        confidence: None,
                    },
                    LayoutBox {
                        label: BlockType::Text,
                        bbox: [25.0, 50.0, 275.0, 150.0],
                        confidence: Some(0.9),
                    },
                ],
            },
            lines: vec![
                line([50.0, 52.0, 500.0, 78.0], "Intro"),
                line([50.0, 110.0, 540.0, 130.0], "first line"),
                line([50.0, 700.0, 540.0, 720.0], "orphan"),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn rescales_layout_and_attaches_lines() {
        let input = DocumentInput {
            filepath: None,
            pages: vec![page_input()],
        };
        let (doc, _) = build_document(input, &PageSelection::All).unwrap();
        let page = &doc.pages[0];
        assert_eq!(page.structure.len(), 2);
        let header = page.get(&page.structure[0]).unwrap();
        assert_eq!(header.polygon.bbox(), [50.0, 50.0, 550.0, 80.0]);
        assert_eq!(page.raw_text(&page.structure[0]), "Intro\n");
        assert_eq!(page.raw_text(&page.structure[1]), "first line\n");
        // header, text, 2 lines, 2 spans; the orphan line is dropped
        assert_eq!(page.blocks.len(), 6);
    }

    #[test]
    fn page_selection_keeps_original_page_ids() {
        let input = DocumentInput {
            filepath: Some("doc.pdf".into()),
            pages: vec![page_input(), page_input(), page_input()],
        };
        let (doc, _) = build_document(input, &PageSelection::Single(2)).unwrap();
        assert_eq!(doc.pages.len(), 1);
        assert_eq!(doc.pages[0].page_id, 1);
        assert_eq!(doc.filepath.as_deref(), Some("doc.pdf"));
    }

    #[test]
    fn rejects_non_layout_labels() {
        let mut p = page_input();
        p.layout.boxes[0].label = BlockType::TableGroup;
        let input = DocumentInput {
            filepath: None,
            pages: vec![p],
        };
        assert!(matches!(
            build_document(input, &PageSelection::All),
            Err(AssemblyError::InvalidInput(_))
        ));
    }

    #[test]
    fn recognitions_are_keyed_by_block() {
        let mut p = page_input();
        p.layout.boxes.push(LayoutBox {
            label: BlockType::Equation,
            bbox: [25.0, 200.0, 275.0, 230.0],
            confidence: None,
        });
        p.equations.push(EquationRecognition {
            block_index: 2,
            latex: "E=mc^2".into(),
        });
        // Wrong target type: tolerated and skipped.
        p.equations.push(EquationRecognition {
            block_index: 0,
            latex: "x".into(),
        });
        let input = DocumentInput {
            filepath: None,
            pages: vec![p],
        };
        let (_, rec) = build_document(input, &PageSelection::All).unwrap();
        assert_eq!(rec.equations.len(), 1);
        let id = BlockId::new(0, 2, BlockType::Equation);
        assert_eq!(rec.equations[&id].latex, "E=mc^2");
    }

    #[test]
    fn input_deserializes_from_json() {
        let json = r#"{
            "pages": [{
                "width": 100, "height": 100,
                "layout": {"image_size": [100, 100],
                           "boxes": [{"label": "Text", "bbox": [0, 0, 100, 50]}]},
                "lines": [{"bbox": [0, 0, 100, 10],
                           "spans": [{"text": "hi", "bbox": [0, 0, 100, 10]}],
                           "origin": "surya"}]
            }]
        }"#;
        let input: DocumentInput = serde_json::from_str(json).unwrap();
        let (doc, _) = build_document(input, &PageSelection::All).unwrap();
        let text = doc.pages[0].get(&doc.pages[0].structure[0]).unwrap();
        assert_eq!(text.text_extraction_method, TextExtractionMethod::Surya);
    }
}
