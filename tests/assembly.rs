//! End-to-end assembly without correction: detector output in, rendered
//! Markdown, HTML and JSON out.

use pagetree::builders::{
    EquationRecognition, LayoutBox, LayoutResult, ProviderLine, ProviderSpan, RecognizedCell,
    TableRecognition, TextFragment,
};
use pagetree::renderer::HtmlRenderer;
use pagetree::schema::TextExtractionMethod;
use pagetree::{
    convert, convert_sync, load_input, write_output, AssemblyConfig, BlockType, DocumentInput,
    OutputFormat, PageInput, PageSeparator,
};

// ── Fixtures ─────────────────────────────────────────────────────────────────

fn line(text: &str, bbox: [f32; 4]) -> ProviderLine {
    ProviderLine {
        bbox,
        spans: vec![ProviderSpan {
            text: text.into(),
            bbox,
            font: "Times".into(),
            font_size: 10.0,
            font_weight: 400.0,
            formats: vec![],
            url: None,
        }],
        origin: TextExtractionMethod::Pdftext,
    }
}

fn layout(boxes: &[(BlockType, [f32; 4])]) -> LayoutResult {
    LayoutResult {
        image_size: (600.0, 800.0),
        boxes: boxes
            .iter()
            .map(|(label, bbox)| LayoutBox {
                label: *label,
                bbox: *bbox,
                confidence: Some(0.95),
            })
            .collect(),
    }
}

fn page(boxes: &[(BlockType, [f32; 4])], lines: Vec<ProviderLine>) -> PageInput {
    PageInput {
        width: 600.0,
        height: 800.0,
        layout: layout(boxes),
        lines,
        ..Default::default()
    }
}

/// A paragraph hyphenated across a page break, with running headers and
/// footers on both pages.
fn two_page_paragraph(next_first_x: f32) -> DocumentInput {
    let p0 = page(
        &[
            (BlockType::PageHeader, [0.0, 10.0, 600.0, 30.0]),
            (BlockType::Text, [40.0, 595.0, 560.0, 630.0]),
            (BlockType::PageFooter, [0.0, 760.0, 600.0, 780.0]),
        ],
        vec![
            line("Journal of Layout Studies", [200.0, 12.0, 400.0, 26.0]),
            line("this paragraph runs for a while and", [50.0, 600.0, 550.0, 612.0]),
            line("ends with an examp-", [50.0, 614.0, 400.0, 626.0]),
            line("Page 1 of 2", [270.0, 762.0, 330.0, 776.0]),
        ],
    );
    let p1 = page(
        &[
            (BlockType::PageHeader, [0.0, 10.0, 600.0, 30.0]),
            (BlockType::Text, [40.0, 45.0, 560.0, 80.0]),
        ],
        vec![
            line("Journal of Layout Studies", [200.0, 12.0, 400.0, 26.0]),
            line("le, this is the rest of it", [next_first_x, 50.0, 550.0, 62.0]),
            line("and it ends here.", [50.0, 64.0, 300.0, 76.0]),
        ],
    );
    DocumentInput {
        filepath: Some("paper.pdf".into()),
        pages: vec![p0, p1],
    }
}

/// A captioned price table whose currency symbols sit in their own column.
fn priced_table() -> DocumentInput {
    let rows = [("Revenue", "10"), ("Costs", "20"), ("Net", "30")];
    let mut cells = Vec::new();
    let mut text = Vec::new();
    for (r, (label, amount)) in rows.iter().enumerate() {
        let y0 = 130.0 + r as f32 * 20.0;
        for (c, (x0, x1, cell_text)) in [(50.0, 250.0, *label), (250.0, 270.0, "$"), (270.0, 550.0, *amount)]
            .into_iter()
            .enumerate()
        {
            cells.push(RecognizedCell {
                bbox: [x0, y0, x1, y0 + 20.0],
                row_id: r as u32,
                col_id: c as u32,
                rowspan: 1,
                colspan: 1,
                is_header: false,
            });
            text.push(TextFragment {
                bbox: [x0 + 2.0, y0 + 4.0, x1 - 2.0, y0 + 16.0],
                text: cell_text.into(),
            });
        }
    }
    let mut p = page(
        &[
            (BlockType::Caption, [50.0, 100.0, 550.0, 120.0]),
            (BlockType::Table, [50.0, 125.0, 550.0, 195.0]),
        ],
        vec![line("Table 1: Quarterly figures", [55.0, 104.0, 300.0, 116.0])],
    );
    p.tables.push(TableRecognition {
        block_index: 1,
        cells,
        text,
    });
    DocumentInput {
        filepath: None,
        pages: vec![p],
    }
}

// ── Continuation and furniture ───────────────────────────────────────────────

#[tokio::test]
async fn hyphenated_page_break_joins_in_markdown() {
    let out = convert(two_page_paragraph(50.0), &AssemblyConfig::default())
        .await
        .unwrap();
    assert_eq!(out.stats.continuations, 1);
    assert!(
        out.content.contains(
            "this paragraph runs for a while and ends with an example, this is the rest of it and it ends here."
        ),
        "{}",
        out.content
    );
}

#[tokio::test]
async fn indented_next_paragraph_stays_separate() {
    let out = convert(two_page_paragraph(80.0), &AssemblyConfig::default())
        .await
        .unwrap();
    assert_eq!(out.stats.continuations, 0);
    assert!(out.content.contains("ends with an examp-\n\nle, this is the rest"), "{}", out.content);
}

#[tokio::test]
async fn headers_and_footers_never_render() {
    for format in [OutputFormat::Markdown, OutputFormat::Html] {
        let config = AssemblyConfig::builder().output_format(format).build().unwrap();
        let out = convert(two_page_paragraph(50.0), &config).await.unwrap();
        assert!(!out.content.contains("Journal of Layout Studies"), "{format:?}");
        assert!(!out.content.contains("Page 1 of 2"), "{format:?}");
    }
}

#[tokio::test]
async fn separators_go_between_pages_only() {
    let config = AssemblyConfig::builder()
        .output_format(OutputFormat::Html)
        .page_separator(PageSeparator::Comment)
        .build()
        .unwrap();
    let out = convert(two_page_paragraph(80.0), &config).await.unwrap();
    assert!(!out.content.contains("<!-- page 1 -->"));
    assert_eq!(out.content.matches("<!-- page 2 -->").count(), 1);
}

#[tokio::test]
async fn separator_waits_for_the_continued_paragraph() {
    for separator in [PageSeparator::HorizontalRule, PageSeparator::Comment] {
        let config = AssemblyConfig::builder()
            .page_separator(separator.clone())
            .build()
            .unwrap();
        let out = convert(two_page_paragraph(50.0), &config).await.unwrap();
        let marker = separator.render_markdown(2).unwrap();
        let joined = "ends with an example, this is the rest of it and it ends here.";
        assert!(
            out.content.contains(&format!("{joined}\n\n{marker}")),
            "{}",
            out.content
        );
        assert_eq!(out.content.matches(marker.as_str()).count(), 1);
    }
}

// ── Tables ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn caption_and_table_form_one_group() {
    let out = convert(priced_table(), &AssemblyConfig::default()).await.unwrap();
    let doc = &out.document;
    let page = &doc.pages[0];
    assert_eq!(page.structure.len(), 1);
    let group = doc.block(&page.structure[0]).unwrap();
    assert_eq!(group.block_type(), BlockType::TableGroup);
    let kinds: Vec<BlockType> = group.children().iter().map(|id| id.block_type).collect();
    assert_eq!(kinds, vec![BlockType::Caption, BlockType::Table]);
    assert_eq!(out.stats.groups, 1);
    assert_eq!(out.stats.tables, 1);
}

#[tokio::test]
async fn dollar_column_is_folded_into_amounts() {
    let out = convert(priced_table(), &AssemblyConfig::default()).await.unwrap();
    let doc = &out.document;
    let table = doc.blocks_of_type(&[BlockType::Table])[0];
    let cells: Vec<_> = table
        .children()
        .iter()
        .map(|id| doc.block(id).unwrap().table_cell().unwrap().clone())
        .collect();
    assert_eq!(cells.len(), 6);
    let amounts: Vec<String> = cells.iter().filter(|c| c.col_id == 1).map(|c| c.text()).collect();
    assert_eq!(amounts, vec!["$10", "$20", "$30"]);
    assert!(out.content.contains("| Revenue | $10 |"), "{}", out.content);
    assert!(out.content.starts_with("Table 1: Quarterly figures\n\n"), "{}", out.content);
}

#[test]
fn stacked_rows_are_split() {
    let mut p = page(&[(BlockType::Table, [50.0, 100.0, 550.0, 160.0])], vec![]);
    p.tables.push(TableRecognition {
        block_index: 0,
        cells: vec![
            RecognizedCell { bbox: [50.0, 100.0, 300.0, 160.0], row_id: 0, col_id: 0, rowspan: 1, colspan: 1, is_header: false },
            RecognizedCell { bbox: [300.0, 100.0, 550.0, 160.0], row_id: 0, col_id: 1, rowspan: 1, colspan: 1, is_header: false },
        ],
        text: ["Alpha", "Beta", "Gamma"]
            .iter()
            .enumerate()
            .flat_map(|(i, name)| {
                let y = 102.0 + i as f32 * 20.0;
                [
                    TextFragment { bbox: [60.0, y, 200.0, y + 14.0], text: name.to_string() },
                    TextFragment { bbox: [310.0, y, 400.0, y + 14.0], text: format!("{}", i + 1) },
                ]
            })
            .collect(),
    });
    let input = DocumentInput { filepath: None, pages: vec![p] };
    let out = convert_sync(input, &AssemblyConfig::default()).unwrap();

    let doc = &out.document;
    let table = doc.blocks_of_type(&[BlockType::Table])[0];
    let grid: Vec<(u32, u32, String)> = table
        .children()
        .iter()
        .map(|id| {
            let cell = doc.block(id).unwrap().table_cell().unwrap();
            (cell.row_id, cell.col_id, cell.text())
        })
        .collect();
    assert_eq!(
        grid,
        vec![
            (0, 0, "Alpha".to_string()),
            (0, 1, "1".to_string()),
            (1, 0, "Beta".to_string()),
            (1, 1, "2".to_string()),
            (2, 0, "Gamma".to_string()),
            (2, 1, "3".to_string()),
        ]
    );
}

// ── Renderer properties ──────────────────────────────────────────────────────

#[tokio::test]
async fn resolving_twice_gives_identical_markup() {
    let out = convert(priced_table(), &AssemblyConfig::default()).await.unwrap();
    let first = HtmlRenderer::new(&out.document).render().unwrap();
    let second = HtmlRenderer::new(&out.document).render().unwrap();
    assert_eq!(first.html, second.html);
    assert!(first.html.contains("<table>"));
}

#[tokio::test]
async fn equation_latex_renders_as_display_math() {
    let mut p = page(&[(BlockType::Equation, [100.0, 200.0, 500.0, 240.0])], vec![]);
    p.equations.push(EquationRecognition {
        block_index: 0,
        latex: r"a^2 + b^2 = c^2".into(),
    });
    let input = DocumentInput { filepath: None, pages: vec![p] };
    let out = convert(input, &AssemblyConfig::default()).await.unwrap();
    assert_eq!(out.content, "$$\na^2 + b^2 = c^2\n$$\n");
    assert_eq!(out.stats.equations, 1);
}

#[tokio::test]
async fn json_export_nests_by_structure() {
    let config = AssemblyConfig::builder()
        .output_format(OutputFormat::Json)
        .build()
        .unwrap();
    let out = convert(priced_table(), &config).await.unwrap();
    let json: serde_json::Value = serde_json::from_str(&out.content).unwrap();
    let group = &json["pages"][0]["children"][0];
    assert_eq!(group["block_type"], "TableGroup");
    assert_eq!(group["children"][1]["block_type"], "Table");
    assert_eq!(group["children"][1]["children"].as_array().unwrap().len(), 6);
}

// ── File I/O ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn input_file_with_raster_writes_images_next_to_output() {
    let dir = tempfile::tempdir().unwrap();
    image::RgbaImage::from_pixel(300, 400, image::Rgba([200, 200, 200, 255]))
        .save(dir.path().join("page0.png"))
        .unwrap();
    let json = serde_json::json!({
        "pages": [{
            "width": 600.0,
            "height": 800.0,
            "image_path": "page0.png",
            "layout": {
                "image_size": [600.0, 800.0],
                "boxes": [{ "label": "Picture", "bbox": [100.0, 100.0, 300.0, 300.0] }]
            }
        }]
    });
    let input_path = dir.path().join("detections.json");
    std::fs::write(&input_path, serde_json::to_string(&json).unwrap()).unwrap();

    let input = load_input(&input_path).await.unwrap();
    assert!(input.pages[0].image_path.as_ref().unwrap().is_absolute());

    let out = convert(input, &AssemblyConfig::default()).await.unwrap();
    assert_eq!(out.stats.images, 1);
    assert!(out.content.contains("![](_page_0_Picture_0.png)"), "{}", out.content);

    let out_path = dir.path().join("render/doc.md");
    write_output(&out, &out_path).await.unwrap();
    let crop = image::open(dir.path().join("render/_page_0_Picture_0.png")).unwrap();
    assert_eq!((crop.width(), crop.height()), (100, 100));
}

#[tokio::test]
async fn no_images_mode_drops_picture_files() {
    let mut p = page(&[(BlockType::Picture, [100.0, 100.0, 300.0, 300.0])], vec![]);
    p.image = Some(std::sync::Arc::new(image::DynamicImage::new_rgba8(300, 400)));
    let config = AssemblyConfig::builder().extract_images(false).build().unwrap();
    let out = convert(DocumentInput { filepath: None, pages: vec![p] }, &config)
        .await
        .unwrap();
    assert!(out.images.is_empty());
    assert!(!out.content.contains("_page_0_Picture_0.png"));
}
