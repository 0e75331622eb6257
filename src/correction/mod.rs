//! Correction layer: send blocks to a structured-generation service and
//! fold validated answers back into the tree.
//!
//! ## Flow
//!
//! ```text
//! CorrectionTask::collect ──► TaskInput (prompt + crops + schema)
//!            │
//!            ▼
//! StructuredGenerator::generate   (bounded: max_concurrency in flight)
//!            │
//!            ▼
//! CorrectionTask::apply ──► BlockPatch ──► applied on the driving task
//! ```
//!
//! Tasks never touch the document while their request is in flight. `apply`
//! reads the document and returns a [`BlockPatch`]; the orchestrator writes
//! patches one at a time, in arrival order. A task that is rejected, fails
//! or panics leaves its block unchanged and bumps `llm_error_count`.

pub mod images;
pub mod service;
pub mod tasks;

pub use service::{
    parse_structured, resolve_generator, resolve_provider, FieldKind, GenerationRequest,
    GenerationResponse, LlmGenerator, ResponseSchema, SchemaField, StructuredGenerator,
};
pub use tasks::{
    default_tasks, EquationCorrection, ImageDescription, InlineMathCorrection, TableCorrection,
};

use crate::config::AssemblyConfig;
use crate::error::{AssemblyError, TaskError};
use crate::processors::table::{install_cells, CellDraft};
use crate::progress::ProgressCallback;
use crate::schema::{BlockId, BlockKind, Document, SpanData, TextExtractionMethod};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde_json::{Map, Value};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Task-specific state carried from `collect` to `apply`.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskContext {
    Table {
        original_html: String,
        rows: usize,
        cols: usize,
    },
    Lines {
        line_ids: Vec<BlockId>,
        original: Vec<String>,
    },
    Equation {
        original: String,
    },
    Image,
}

/// One collected unit of correction work.
#[derive(Debug, Clone)]
pub struct TaskInput {
    pub task: &'static str,
    pub request: GenerationRequest,
    pub context: TaskContext,
}

impl TaskInput {
    pub fn block(&self) -> &BlockId {
        &self.request.block
    }
}

/// The effect of one successful task. Each variant touches only its target
/// block and that block's direct children.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockPatch {
    NoChange,
    SetHtml {
        block: BlockId,
        html: String,
    },
    SetDescription {
        block: BlockId,
        description: String,
    },
    /// New cells replace the table's children wholesale.
    ReplaceTableCells {
        block: BlockId,
        cells: Vec<CellDraft>,
    },
    /// Each line's spans are replaced by a single span holding the HTML.
    ReplaceLineSpans {
        lines: Vec<(BlockId, String)>,
    },
}

/// A correction task type.
pub trait CorrectionTask: Send + Sync {
    fn name(&self) -> &'static str;

    /// Build one input per eligible block.
    fn collect(&self, document: &Document) -> Vec<TaskInput>;

    /// Validate a response. `Err` carries the rejection reason.
    fn apply(
        &self,
        response: &Map<String, Value>,
        input: &TaskInput,
        document: &Document,
    ) -> Result<BlockPatch, String>;
}

/// Outcome counts for one orchestrator run.
#[derive(Debug, Clone, Default)]
pub struct CorrectionReport {
    pub submitted: usize,
    pub applied: usize,
    pub unchanged: usize,
    pub rejected: usize,
    pub failed: usize,
    pub tokens_used: u64,
    pub errors: Vec<TaskError>,
}

pub struct CorrectionOrchestrator {
    generator: Arc<dyn StructuredGenerator>,
    tasks: Vec<Arc<dyn CorrectionTask>>,
    max_concurrency: usize,
    progress: Option<ProgressCallback>,
}

impl CorrectionOrchestrator {
    pub fn new(
        generator: Arc<dyn StructuredGenerator>,
        tasks: Vec<Arc<dyn CorrectionTask>>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            generator,
            tasks,
            max_concurrency: max_concurrency.max(1),
            progress: None,
        }
    }

    /// Orchestrator with the default task set and the config's concurrency
    /// and progress callback.
    pub fn from_config(generator: Arc<dyn StructuredGenerator>, config: &AssemblyConfig) -> Self {
        let mut orchestrator = Self::new(generator, default_tasks(config), config.max_concurrency);
        orchestrator.progress = config.progress_callback.clone();
        orchestrator
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Run every task to completion and apply the results.
    ///
    /// Only a patch that names a block the document does not own is an
    /// error; every per-task failure is recorded in the report instead.
    pub async fn run(&self, document: &mut Document) -> Result<CorrectionReport, AssemblyError> {
        let inputs: Vec<(usize, TaskInput)> = self
            .tasks
            .iter()
            .enumerate()
            .flat_map(|(i, task)| task.collect(document).into_iter().map(move |input| (i, input)))
            .collect();

        let total = inputs.len();
        let mut report = CorrectionReport {
            submitted: total,
            ..Default::default()
        };
        if let Some(ref cb) = self.progress {
            cb.on_correction_start(total);
        }
        if total == 0 {
            debug!("No correction tasks collected");
            if let Some(ref cb) = self.progress {
                cb.on_correction_complete(0, 0);
            }
            return Ok(report);
        }
        info!(
            "Submitting {} correction tasks ({} concurrent)",
            total, self.max_concurrency
        );

        let generator = &self.generator;
        let mut results = stream::iter(inputs.iter().enumerate().map(|(idx, (_, input))| {
            async move {
                // Call inside the guarded future so a panic before the first
                // await is caught too.
                let outcome = AssertUnwindSafe(async { generator.generate(&input.request).await })
                    .catch_unwind()
                    .await;
                (idx, outcome)
            }
        }))
        .buffer_unordered(self.max_concurrency);

        let mut done = 0usize;
        while let Some((idx, outcome)) = results.next().await {
            done += 1;
            let (task_idx, input) = &inputs[idx];
            let task = &self.tasks[*task_idx];
            let block_path = input.block().to_path();

            let error = match outcome {
                Ok(Ok(response)) => {
                    document
                        .block_mut(input.block())?
                        .metadata
                        .record_request(response.tokens_used);
                    report.tokens_used += response.tokens_used;

                    let snapshot: &Document = document;
                    let applied = std::panic::catch_unwind(AssertUnwindSafe(|| {
                        task.apply(&response.value, input, snapshot)
                    }));
                    match applied {
                        Ok(Ok(patch)) => {
                            if apply_patch(document, patch)? {
                                report.applied += 1;
                            } else {
                                report.unchanged += 1;
                            }
                            None
                        }
                        Ok(Err(reason)) => {
                            report.rejected += 1;
                            Some(TaskError::Rejected {
                                task: input.task.to_string(),
                                block: block_path.clone(),
                                reason,
                            })
                        }
                        Err(payload) => {
                            report.failed += 1;
                            Some(TaskError::Panicked {
                                task: input.task.to_string(),
                                block: block_path.clone(),
                                detail: panic_message(payload.as_ref()),
                            })
                        }
                    }
                }
                Ok(Err(e)) => {
                    report.failed += 1;
                    Some(TaskError::Failed {
                        task: input.task.to_string(),
                        block: block_path.clone(),
                        detail: e.to_string(),
                    })
                }
                Err(payload) => {
                    report.failed += 1;
                    Some(TaskError::Panicked {
                        task: input.task.to_string(),
                        block: block_path.clone(),
                        detail: panic_message(payload.as_ref()),
                    })
                }
            };

            match error {
                Some(err) => {
                    warn!("{}", err);
                    document.block_mut(input.block())?.metadata.record_error();
                    if let Some(ref cb) = self.progress {
                        cb.on_task_error(input.task, &block_path, &err.to_string());
                    }
                    report.errors.push(err);
                }
                None => {
                    debug!("{} on {}: done ({}/{})", input.task, block_path, done, total);
                    if let Some(ref cb) = self.progress {
                        cb.on_task_complete(input.task, &block_path, done, total);
                    }
                }
            }
        }

        info!(
            "Correction finished: {} applied, {} unchanged, {} rejected, {} failed",
            report.applied, report.unchanged, report.rejected, report.failed
        );
        if let Some(ref cb) = self.progress {
            cb.on_correction_complete(total, report.applied);
        }
        Ok(report)
    }
}

/// Write a patch into the tree. Returns whether anything changed.
pub fn apply_patch(document: &mut Document, patch: BlockPatch) -> Result<bool, AssemblyError> {
    match patch {
        BlockPatch::NoChange => Ok(false),
        BlockPatch::SetHtml { block, html } => {
            document.block_mut(&block)?.html = Some(html);
            Ok(true)
        }
        BlockPatch::SetDescription { block, description } => {
            let target = document.block_mut(&block)?;
            match &mut target.kind {
                BlockKind::Picture { description: slot } | BlockKind::Figure { description: slot } => {
                    *slot = Some(description);
                    Ok(true)
                }
                _ => Err(AssemblyError::Internal(format!(
                    "{block} cannot carry a description"
                ))),
            }
        }
        BlockPatch::ReplaceTableCells { block, cells } => {
            document.block(&block)?;
            let total = document.pages.len();
            let page = document
                .get_page_mut(block.page_id)
                .ok_or(AssemblyError::PageNotFound { page: block.page_id, total })?;
            install_cells(page, &block, cells, TextExtractionMethod::Gemini);
            Ok(true)
        }
        BlockPatch::ReplaceLineSpans { lines } => {
            for (line_id, html) in lines {
                let polygon = document.block(&line_id)?.polygon;
                let total = document.pages.len();
                let page = document
                    .get_page_mut(line_id.page_id)
                    .ok_or(AssemblyError::PageNotFound { page: line_id.page_id, total })?;
                let span_id = page.add_block(polygon, BlockKind::Span(SpanData::plain(strip_tags(&html))));
                if let Some(span) = page.get_mut(&span_id) {
                    span.html = Some(html);
                    span.text_extraction_method = TextExtractionMethod::Gemini;
                }
                if let Some(line) = page.get_mut(&line_id) {
                    line.set_structure(vec![span_id]);
                }
            }
            Ok(true)
        }
    }
}

/// Text content of an HTML fragment.
pub(crate) fn strip_tags(html: &str) -> String {
    scraper::Html::parse_fragment(html)
        .root_element()
        .text()
        .collect::<String>()
}

/// Whether `<math ...>` openings match `</math>` closings.
pub(crate) fn math_balanced(html: &str) -> bool {
    html.matches("<math").count() == html.matches("</math>").count()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationError;
    use crate::geometry::PolygonBox;
    use crate::progress::CorrectionProgressCallback;
    use crate::schema::{BlockType, Page};
    use futures::future::BoxFuture;
    use image::{DynamicImage, RgbaImage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const ANSWER: ResponseSchema = ResponseSchema {
        name: "Answer",
        fields: &[SchemaField { name: "html", kind: FieldKind::String }],
    };

    /// Answers `{"html": <prompt>}`, fails on "fail", panics on "panic".
    struct EchoGenerator;

    impl StructuredGenerator for EchoGenerator {
        fn generate<'a>(
            &'a self,
            request: &'a GenerationRequest,
        ) -> BoxFuture<'a, Result<GenerationResponse, GenerationError>> {
            Box::pin(async move {
                match request.prompt.as_str() {
                    "fail" => Err(GenerationError::Timeout { secs: 1 }),
                    "panic" => panic!("generator exploded"),
                    prompt => {
                        let mut value = Map::new();
                        value.insert("html".into(), Value::String(prompt.to_string()));
                        Ok(GenerationResponse { value, tokens_used: 7 })
                    }
                }
            })
        }
    }

    /// Uses each Text block's raw text as the prompt; rejects "short".
    struct SetHtmlTask;

    impl CorrectionTask for SetHtmlTask {
        fn name(&self) -> &'static str {
            "SetHtml"
        }

        fn collect(&self, document: &Document) -> Vec<TaskInput> {
            document
                .blocks_of_type(&[BlockType::Text])
                .into_iter()
                .map(|b| TaskInput {
                    task: self.name(),
                    request: GenerationRequest {
                        block: b.id,
                        prompt: document.raw_text(&b.id).trim().to_string(),
                        images: vec![DynamicImage::ImageRgba8(RgbaImage::new(1, 1))],
                        schema: ANSWER,
                    },
                    context: TaskContext::Image,
                })
                .collect()
        }

        fn apply(
            &self,
            response: &Map<String, Value>,
            input: &TaskInput,
            _document: &Document,
        ) -> Result<BlockPatch, String> {
            let html = response["html"].as_str().unwrap_or_default();
            match html {
                "short" => Err("too short".into()),
                "same" => Ok(BlockPatch::NoChange),
                "apply-panic" => panic!("apply exploded"),
                _ => Ok(BlockPatch::SetHtml { block: *input.block(), html: format!("<p>{html}</p>") }),
            }
        }
    }

    fn doc_with_texts(texts: &[&str]) -> (Document, Vec<BlockId>) {
        let mut page = Page::new(0, PolygonBox::from_bbox([0.0, 0.0, 600.0, 800.0]));
        let mut ids = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            let y = i as f32 * 40.0;
            let poly = PolygonBox::from_bbox([10.0, y, 500.0, y + 20.0]);
            let block = page.add_top_level(poly, BlockKind::Text(Default::default()));
            let line = page.add_block(poly, BlockKind::Line);
            let span = page.add_block(poly, BlockKind::Span(SpanData::plain(*text)));
            page.get_mut(&line).unwrap().add_structure(span);
            page.get_mut(&block).unwrap().add_structure(line);
            ids.push(block);
        }
        (Document::new(vec![page]), ids)
    }

    fn orchestrator() -> CorrectionOrchestrator {
        CorrectionOrchestrator::new(Arc::new(EchoGenerator), vec![Arc::new(SetHtmlTask)], 2)
    }

    #[tokio::test]
    async fn applies_and_counts_tokens() {
        let (mut doc, ids) = doc_with_texts(&["alpha", "beta"]);
        let report = orchestrator().run(&mut doc).await.unwrap();
        assert_eq!(report.submitted, 2);
        assert_eq!(report.applied, 2);
        assert_eq!(report.tokens_used, 14);
        let a = doc.block(&ids[0]).unwrap();
        assert_eq!(a.html.as_deref(), Some("<p>alpha</p>"));
        assert_eq!(a.metadata.llm_request_count, 1);
        assert_eq!(a.metadata.llm_tokens_used, 7);
        assert_eq!(a.metadata.llm_error_count, 0);
    }

    #[tokio::test]
    async fn failures_stay_on_their_block() {
        let (mut doc, ids) = doc_with_texts(&["short", "fail", "panic", "apply-panic", "same", "ok"]);
        let report = orchestrator().run(&mut doc).await.unwrap();

        assert_eq!(report.submitted, 6);
        assert_eq!(report.applied, 1);
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.failed, 3);
        assert_eq!(report.errors.len(), 4);

        for id in &ids[..4] {
            let b = doc.block(id).unwrap();
            assert!(b.html.is_none());
            assert_eq!(b.metadata.llm_error_count, 1);
        }
        assert!(doc.block(&ids[4]).unwrap().html.is_none());
        assert_eq!(doc.block(&ids[5]).unwrap().html.as_deref(), Some("<p>ok</p>"));
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, TaskError::Panicked { detail, .. } if detail.contains("generator exploded"))));
    }

    #[derive(Default)]
    struct Recorder {
        started: AtomicUsize,
        completed: AtomicUsize,
        errors: Mutex<Vec<String>>,
        applied: AtomicUsize,
    }

    impl CorrectionProgressCallback for Recorder {
        fn on_correction_start(&self, total_tasks: usize) {
            self.started.store(total_tasks, Ordering::SeqCst);
        }
        fn on_task_complete(&self, _task: &str, _block: &str, _done: usize, _total: usize) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
        fn on_task_error(&self, _task: &str, block: &str, _error: &str) {
            self.errors.lock().unwrap().push(block.to_string());
        }
        fn on_correction_complete(&self, _total_tasks: usize, applied: usize) {
            self.applied.store(applied, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn progress_events_are_reported() {
        let (mut doc, ids) = doc_with_texts(&["one", "fail", "two"]);
        let recorder = Arc::new(Recorder::default());
        let report = orchestrator()
            .with_progress(recorder.clone())
            .run(&mut doc)
            .await
            .unwrap();
        assert_eq!(report.applied, 2);
        assert_eq!(recorder.started.load(Ordering::SeqCst), 3);
        assert_eq!(recorder.completed.load(Ordering::SeqCst), 2);
        assert_eq!(*recorder.errors.lock().unwrap(), vec![ids[1].to_path()]);
        assert_eq!(recorder.applied.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_document_submits_nothing() {
        let mut doc = Document::new(vec![]);
        let report = orchestrator().run(&mut doc).await.unwrap();
        assert_eq!(report.submitted, 0);
    }

    #[test]
    fn line_span_patch_replaces_children() {
        let (mut doc, ids) = doc_with_texts(&["E = mc2"]);
        let line = doc.block(&ids[0]).unwrap().children()[0];
        let changed = apply_patch(
            &mut doc,
            BlockPatch::ReplaceLineSpans { lines: vec![(line, "E = <math>mc^2</math>".into())] },
        )
        .unwrap();
        assert!(changed);
        let children = doc.block(&line).unwrap().children().to_vec();
        assert_eq!(children.len(), 1);
        let span = doc.block(&children[0]).unwrap();
        assert_eq!(span.span().unwrap().text, "E = mc^2");
        assert_eq!(span.html.as_deref(), Some("E = <math>mc^2</math>"));
        assert_eq!(span.text_extraction_method, TextExtractionMethod::Gemini);
    }

    #[test]
    fn patch_on_unknown_block_is_an_error() {
        let (mut doc, _) = doc_with_texts(&["x"]);
        let ghost = BlockId::new(0, 99, BlockType::Text);
        let err = apply_patch(&mut doc, BlockPatch::SetHtml { block: ghost, html: "<p/>".into() });
        assert!(matches!(err, Err(AssemblyError::DanglingReference { .. })));
    }

    #[test]
    fn math_balance() {
        assert!(math_balanced("a <math>x</math> b <math display=\"block\">y</math>"));
        assert!(!math_balanced("a <math>x"));
    }
}
