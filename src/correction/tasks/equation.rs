use super::{block_crop, content_len, unfence};
use crate::correction::service::{FieldKind, GenerationRequest, ResponseSchema, SchemaField};
use crate::correction::{math_balanced, BlockPatch, CorrectionTask, TaskContext, TaskInput};
use crate::prompts::{fill, EQUATION_PROMPT};
use crate::schema::{BlockKind, BlockType, Document};
use serde_json::{Map, Value};
use tracing::debug;

const SCHEMA: ResponseSchema = ResponseSchema {
    name: "EquationCorrection",
    fields: &[SchemaField { name: "corrected_equation", kind: FieldKind::String }],
};

/// Display-equation rewrite into `<math display="block">` HTML.
pub struct EquationCorrection {
    min_length_ratio: f32,
}

impl EquationCorrection {
    pub fn new(min_length_ratio: f32) -> Self {
        Self { min_length_ratio }
    }
}

impl CorrectionTask for EquationCorrection {
    fn name(&self) -> &'static str {
        "EquationCorrection"
    }

    fn collect(&self, document: &Document) -> Vec<TaskInput> {
        let mut inputs = Vec::new();
        for block in document.blocks_of_type(&[BlockType::Equation]) {
            if block.ignore_for_output {
                continue;
            }
            let original = match &block.kind {
                BlockKind::Equation { latex: Some(latex) } => latex.clone(),
                _ => document.raw_text(&block.id).trim().to_string(),
            };
            if original.is_empty() {
                continue;
            }
            let Some(crop) = block_crop(document, block) else {
                debug!("{}: no raster, skipping equation", block.id);
                continue;
            };
            inputs.push(TaskInput {
                task: self.name(),
                request: GenerationRequest {
                    block: block.id,
                    prompt: fill(EQUATION_PROMPT, &[("equation", original.as_str())]),
                    images: vec![crop],
                    schema: SCHEMA,
                },
                context: TaskContext::Equation { original },
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
        let TaskContext::Equation { original } = &input.context else {
            return Err("equation task without equation context".into());
        };
        let corrected = unfence(
            response
                .get("corrected_equation")
                .and_then(Value::as_str)
                .unwrap_or_default(),
        );
        if !math_balanced(corrected) {
            return Err("unbalanced math tags".into());
        }
        let body = corrected.replace("<math display=\"block\">", "").replace("</math>", "");
        let (new_len, old_len) = (content_len(&body), content_len(original));
        if (new_len as f32) < old_len as f32 * self.min_length_ratio {
            return Err(format!("corrected equation too short ({new_len} vs {old_len} chars)"));
        }
        let html = if corrected.contains("<math") {
            corrected.to_string()
        } else {
            format!("<math display=\"block\">{corrected}</math>")
        };
        Ok(BlockPatch::SetHtml {
            block: *input.block(),
            html,
        })
    }
}
