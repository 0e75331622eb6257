use super::{block_crop, content_len};
use crate::correction::service::{FieldKind, GenerationRequest, ResponseSchema, SchemaField};
use crate::correction::{math_balanced, strip_tags, BlockPatch, CorrectionTask, TaskContext, TaskInput};
use crate::prompts::{fill, INLINE_MATH_PROMPT};
use crate::schema::{BlockType, Document, SpanFormat};
use serde_json::{Map, Value};
use tracing::debug;

const SCHEMA: ResponseSchema = ResponseSchema {
    name: "InlineMathCorrection",
    fields: &[SchemaField { name: "corrected_lines", kind: FieldKind::StringArray }],
};

/// Plain text types that are only sent when a span was flagged as math.
const MATH_HOSTS: [BlockType; 3] = [BlockType::Text, BlockType::Caption, BlockType::Footnote];

/// Line-by-line rewrite of text blocks that carry inline math.
pub struct InlineMathCorrection {
    min_length_ratio: f32,
}

impl InlineMathCorrection {
    pub fn new(min_length_ratio: f32) -> Self {
        Self { min_length_ratio }
    }
}

impl CorrectionTask for InlineMathCorrection {
    fn name(&self) -> &'static str {
        "InlineMathCorrection"
    }

    fn collect(&self, document: &Document) -> Vec<TaskInput> {
        let mut types = vec![BlockType::TextInlineMath];
        types.extend(MATH_HOSTS);

        let mut inputs = Vec::new();
        for block in document.blocks_of_type(&types) {
            if block.ignore_for_output || block.html.is_some() {
                continue;
            }
            if MATH_HOSTS.contains(&block.block_type()) {
                let has_math = document
                    .contained_blocks(&block.id, &[BlockType::Span])
                    .iter()
                    .any(|s| s.span().is_some_and(|d| d.has_format(SpanFormat::Math)));
                if !has_math {
                    continue;
                }
            }

            let line_ids: Vec<_> = document
                .contained_blocks(&block.id, &[BlockType::Line])
                .iter()
                .map(|l| l.id)
                .collect();
            if line_ids.is_empty() {
                continue;
            }
            let Some(crop) = block_crop(document, block) else {
                debug!("{}: no raster, skipping inline math", block.id);
                continue;
            };
            let original: Vec<String> = line_ids
                .iter()
                .map(|id| document.raw_text(id).trim().to_string())
                .collect();
            let listing = serde_json::to_string_pretty(&original).unwrap_or_default();
            inputs.push(TaskInput {
                task: self.name(),
                request: GenerationRequest {
                    block: block.id,
                    prompt: fill(INLINE_MATH_PROMPT, &[("lines", listing.as_str())]),
                    images: vec![crop],
                    schema: SCHEMA,
                },
                context: TaskContext::Lines { line_ids, original },
            });
        }
        inputs
    }

    fn apply(
        &self,
        response: &Map<String, Value>,
        input: &TaskInput,
        _document: &Document,
    ) -> Result<BlockPatch, String> {
        let TaskContext::Lines { line_ids, original } = &input.context else {
            return Err("inline math task without line context".into());
        };
        let corrected: Vec<String> = response
            .get("corrected_lines")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|s| s.trim().to_string())
                    .collect()
            })
            .unwrap_or_default();

        if corrected.len() != line_ids.len() {
            return Err(format!(
                "expected {} lines, got {}",
                line_ids.len(),
                corrected.len()
            ));
        }
        let joined = corrected.join("\n");
        if !math_balanced(&joined) {
            return Err("unbalanced math tags".into());
        }
        let original_len: usize = original.iter().map(|l| content_len(l)).sum();
        let corrected_len = content_len(&strip_tags(&joined));
        if (corrected_len as f32) < original_len as f32 * self.min_length_ratio {
            return Err(format!(
                "corrected text too short ({corrected_len} vs {original_len} chars)"
            ));
        }
        if corrected == *original {
            return Ok(BlockPatch::NoChange);
        }
        Ok(BlockPatch::ReplaceLineSpans {
            lines: line_ids.iter().copied().zip(corrected).collect(),
        })
    }
}
