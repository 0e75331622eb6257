use super::block_crop;
use crate::correction::service::{FieldKind, GenerationRequest, ResponseSchema, SchemaField};
use crate::correction::{BlockPatch, CorrectionTask, TaskContext, TaskInput};
use crate::prompts::IMAGE_DESCRIPTION_PROMPT;
use crate::schema::{BlockType, Document};
use serde_json::{Map, Value};

const SCHEMA: ResponseSchema = ResponseSchema {
    name: "ImageDescription",
    fields: &[SchemaField { name: "image_description", kind: FieldKind::String }],
};

const MIN_DESCRIPTION_CHARS: usize = 10;

/// Alt text for pictures and figures.
pub struct ImageDescription;

impl CorrectionTask for ImageDescription {
    fn name(&self) -> &'static str {
        "ImageDescription"
    }

    fn collect(&self, document: &Document) -> Vec<TaskInput> {
        document
            .blocks_of_type(&[BlockType::Picture, BlockType::Figure])
            .into_iter()
            .filter(|b| !b.ignore_for_output)
            .filter_map(|block| {
                let crop = block_crop(document, block)?;
                Some(TaskInput {
                    task: self.name(),
                    request: GenerationRequest {
                        block: block.id,
                        prompt: IMAGE_DESCRIPTION_PROMPT.to_string(),
                        images: vec![crop],
                        schema: SCHEMA,
                    },
                    context: TaskContext::Image,
                })
            })
            .collect()
    }

    fn apply(
        &self,
        response: &Map<String, Value>,
        input: &TaskInput,
        _document: &Document,
    ) -> Result<BlockPatch, String> {
        let description = response
            .get("image_description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim();
        if description.chars().count() < MIN_DESCRIPTION_CHARS {
            return Err(format!("description too short: {description:?}"));
        }
        Ok(BlockPatch::SetDescription {
            block: *input.block(),
            description: description.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correction::apply_patch;
    use crate::correction::tasks::test_support::page_with_raster;
    use crate::geometry::PolygonBox;
    use crate::schema::BlockKind;
    use serde_json::json;

    #[test]
    fn description_is_stored_on_picture() {
        let mut page = page_with_raster();
        let pic = page.add_top_level(
            PolygonBox::from_bbox([0.0, 0.0, 300.0, 300.0]),
            BlockKind::Picture { description: None },
        );
        let mut doc = Document::new(vec![page]);
        let input = ImageDescription.collect(&doc).remove(0);

        let short = json!({ "image_description": "A chart" });
        assert!(ImageDescription.apply(short.as_object().unwrap(), &input, &doc).is_err());

        let good = json!({ "image_description": "A bar chart of revenue by quarter." });
        let patch = ImageDescription.apply(good.as_object().unwrap(), &input, &doc).unwrap();
        apply_patch(&mut doc, patch).unwrap();
        assert_eq!(
            doc.block(&pic).unwrap().kind,
            BlockKind::Picture { description: Some("A bar chart of revenue by quarter.".into()) }
        );
    }
}
