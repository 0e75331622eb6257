//! Structured-generation service: a prompt and page crops in, a JSON object
//! that matches a small schema out.
//!
//! [`StructuredGenerator`] is the seam the orchestrator talks to. The
//! production implementation, [`LlmGenerator`], wraps an `edgequake-llm`
//! provider and owns retries, timeouts and response validation, so nothing
//! above it ever retries.
//!
//! ## Retry Strategy
//!
//! Provider errors and timeouts are retried with exponential backoff
//! (`retry_backoff_ms * 2^(attempt-1)`). A response that arrives but does not
//! parse is not retried: the model answered, and asking again rarely fixes a
//! malformed answer while doubling the spend.

use super::images::encode_png;
use crate::config::AssemblyConfig;
use crate::error::{AssemblyError, GenerationError};
use crate::prompts::STRUCTURED_SYSTEM_PROMPT;
use crate::schema::BlockId;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use futures::future::BoxFuture;
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Shape of one response field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    StringArray,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaField {
    pub name: &'static str,
    pub kind: FieldKind,
}

/// The response a task expects. Every field is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseSchema {
    pub name: &'static str,
    pub fields: &'static [SchemaField],
}

impl ResponseSchema {
    pub fn required(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|f| f.name)
    }

    /// JSON Schema rendering, appended to the prompt.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in self.fields {
            let shape = match field.kind {
                FieldKind::String => json!({ "type": "string" }),
                FieldKind::StringArray => json!({ "type": "array", "items": { "type": "string" } }),
            };
            properties.insert(field.name.to_string(), shape);
        }
        json!({
            "title": self.name,
            "type": "object",
            "properties": properties,
            "required": self.required().collect::<Vec<_>>(),
        })
    }
}

/// One unit of work for the service.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub block: BlockId,
    pub prompt: String,
    pub images: Vec<DynamicImage>,
    pub schema: ResponseSchema,
}

/// A schema-valid answer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationResponse {
    pub value: Map<String, Value>,
    pub tokens_used: u64,
}

/// Anything that can answer a [`GenerationRequest`].
///
/// Implementations must validate the response against `request.schema`
/// before returning `Ok`.
pub trait StructuredGenerator: Send + Sync {
    fn generate<'a>(
        &'a self,
        request: &'a GenerationRequest,
    ) -> BoxFuture<'a, Result<GenerationResponse, GenerationError>>;
}

/// [`StructuredGenerator`] over an `edgequake-llm` vision provider.
pub struct LlmGenerator {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    api_timeout_secs: u64,
}

impl LlmGenerator {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &AssemblyConfig) -> Self {
        Self {
            provider,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            api_timeout_secs: config.api_timeout_secs,
        }
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }

    async fn run(&self, request: &GenerationRequest) -> Result<GenerationResponse, GenerationError> {
        let start = Instant::now();
        let images = request
            .images
            .iter()
            .map(encode_png)
            .collect::<Result<Vec<_>, _>>()?;

        let user_text = format!(
            "{}\n\nAnswer with a JSON object matching this schema:\n{}",
            request.prompt,
            request.schema.to_json_schema()
        );
        let messages = vec![
            ChatMessage::system(STRUCTURED_SYSTEM_PROMPT),
            ChatMessage::user_with_images(&user_text, images),
        ];
        let options = self.options();
        let block = request.block.to_path();

        let mut last_err: Option<GenerationError> = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "{}: retry {}/{} after {}ms",
                    block, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            let call = self.provider.chat(&messages, Some(&options));
            match timeout(Duration::from_secs(self.api_timeout_secs), call).await {
                Ok(Ok(response)) => {
                    debug!(
                        "{}: {} input tokens, {} output tokens, {:?}",
                        block,
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    let value = parse_structured(&response.content, &request.schema)?;
                    return Ok(GenerationResponse {
                        value,
                        tokens_used: (response.prompt_tokens + response.completion_tokens) as u64,
                    });
                }
                Ok(Err(e)) => {
                    warn!("{}: attempt {} failed: {}", block, attempt + 1, e);
                    last_err = Some(GenerationError::Service {
                        retries: self.max_retries,
                        message: e.to_string(),
                    });
                }
                Err(_) => {
                    warn!(
                        "{}: attempt {} timed out after {}s",
                        block,
                        attempt + 1,
                        self.api_timeout_secs
                    );
                    last_err = Some(GenerationError::Timeout {
                        secs: self.api_timeout_secs,
                    });
                }
            }
        }

        Err(last_err.unwrap_or_else(|| GenerationError::Service {
            retries: self.max_retries,
            message: "Unknown error".to_string(),
        }))
    }
}

impl StructuredGenerator for LlmGenerator {
    fn generate<'a>(
        &'a self,
        request: &'a GenerationRequest,
    ) -> BoxFuture<'a, Result<GenerationResponse, GenerationError>> {
        Box::pin(self.run(request))
    }
}

static RE_JSON_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json)?\s*\n(.*?)\n?```\s*$").unwrap());

/// Drop an outer code fence the model added despite the instructions.
pub fn strip_json_fences(content: &str) -> &str {
    let trimmed = content.trim();
    match RE_JSON_FENCES.captures(trimmed).and_then(|c| c.get(1)) {
        Some(m) => m.as_str().trim(),
        None => trimmed,
    }
}

/// Parse a model answer and check it against `schema`.
///
/// Text around the outermost `{...}` is tolerated.
pub fn parse_structured(
    content: &str,
    schema: &ResponseSchema,
) -> Result<Map<String, Value>, GenerationError> {
    let body = strip_json_fences(content);
    let parsed: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(first) => {
            let (Some(open), Some(close)) = (body.find('{'), body.rfind('}')) else {
                return Err(GenerationError::MalformedResponse(first.to_string()));
            };
            if close <= open {
                return Err(GenerationError::MalformedResponse(first.to_string()));
            }
            serde_json::from_str(&body[open..=close])
                .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?
        }
    };

    let Value::Object(map) = parsed else {
        return Err(GenerationError::MalformedResponse(
            "response is not a JSON object".into(),
        ));
    };

    for field in schema.fields {
        let value = map
            .get(field.name)
            .ok_or_else(|| GenerationError::MissingKey(field.name.to_string()))?;
        let ok = match field.kind {
            FieldKind::String => value.is_string(),
            FieldKind::StringArray => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
        };
        if !ok {
            return Err(GenerationError::MalformedResponse(format!(
                "'{}' has the wrong type",
                field.name
            )));
        }
    }
    Ok(map)
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, AssemblyError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        AssemblyError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`)
/// 2. **Named provider + model** (`config.provider_name`)
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`)
/// 4. **OpenAI** when `OPENAI_API_KEY` is set
/// 5. **Full auto-detection** (`ProviderFactory::from_env`)
pub fn resolve_provider(config: &AssemblyConfig) -> Result<Arc<dyn LLMProvider>, AssemblyError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| AssemblyError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

/// The generator the correction layer should use, or `None` when it is off.
///
/// A pre-built `config.generator` wins over every provider setting.
pub fn resolve_generator(
    config: &AssemblyConfig,
) -> Result<Option<Arc<dyn StructuredGenerator>>, AssemblyError> {
    if !config.use_llm {
        return Ok(None);
    }
    if let Some(ref generator) = config.generator {
        return Ok(Some(Arc::clone(generator)));
    }
    let provider = resolve_provider(config)?;
    Ok(Some(Arc::new(LlmGenerator::new(provider, config))))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: ResponseSchema = ResponseSchema {
        name: "Example",
        fields: &[
            SchemaField { name: "answer", kind: FieldKind::String },
            SchemaField { name: "lines", kind: FieldKind::StringArray },
        ],
    };

    #[test]
    fn json_schema_lists_required_keys() {
        let schema = SCHEMA.to_json_schema();
        assert_eq!(schema["required"], json!(["answer", "lines"]));
        assert_eq!(schema["properties"]["lines"]["type"], "array");
    }

    #[test]
    fn parses_plain_and_fenced_json() {
        let plain = r#"{"answer": "x", "lines": ["a", "b"]}"#;
        assert_eq!(parse_structured(plain, &SCHEMA).unwrap()["answer"], "x");

        let fenced = "```json\n{\"answer\": \"y\", \"lines\": []}\n```";
        assert_eq!(parse_structured(fenced, &SCHEMA).unwrap()["answer"], "y");
    }

    #[test]
    fn tolerates_chatter_around_object() {
        let noisy = "Sure! Here it is: {\"answer\": \"z\", \"lines\": [\"q\"]} Hope that helps.";
        assert_eq!(parse_structured(noisy, &SCHEMA).unwrap()["lines"], json!(["q"]));
    }

    #[test]
    fn missing_key_is_reported() {
        let err = parse_structured(r#"{"answer": "x"}"#, &SCHEMA).unwrap_err();
        assert!(matches!(err, GenerationError::MissingKey(k) if k == "lines"));
    }

    #[test]
    fn wrong_type_and_non_object_are_malformed() {
        let err = parse_structured(r#"{"answer": 3, "lines": []}"#, &SCHEMA).unwrap_err();
        assert!(matches!(err, GenerationError::MalformedResponse(_)));
        let err = parse_structured("[1, 2]", &SCHEMA).unwrap_err();
        assert!(matches!(err, GenerationError::MalformedResponse(_)));
        let err = parse_structured("no json here", &SCHEMA).unwrap_err();
        assert!(matches!(err, GenerationError::MalformedResponse(_)));
    }

    #[test]
    fn disabled_correction_resolves_to_none() {
        let config = AssemblyConfig::default();
        assert!(resolve_generator(&config).unwrap().is_none());
    }

    #[test]
    fn prebuilt_generator_wins() {
        struct Fixed;
        impl StructuredGenerator for Fixed {
            fn generate<'a>(
                &'a self,
                _request: &'a GenerationRequest,
            ) -> BoxFuture<'a, Result<GenerationResponse, GenerationError>> {
                Box::pin(async {
                    Ok(GenerationResponse {
                        value: Map::new(),
                        tokens_used: 3,
                    })
                })
            }
        }
        let config = AssemblyConfig::builder()
            .generator(Arc::new(Fixed))
            .build()
            .unwrap();
        let generator = resolve_generator(&config).unwrap().unwrap();
        let request = GenerationRequest {
            block: crate::schema::BlockId::new(0, 0, crate::schema::BlockType::Text),
            prompt: String::new(),
            images: vec![],
            schema: SCHEMA,
        };
        let response = tokio_test::block_on(generator.generate(&request)).unwrap();
        assert_eq!(response.tokens_used, 3);
    }
}
