//! Configuration types for document assembly and rendering.
//!
//! All assembly behaviour is controlled through [`AssemblyConfig`], built via
//! its [`AssemblyConfigBuilder`]. The geometric heuristics are empirically
//! tuned, so every one of them is a field of [`Thresholds`] rather than a
//! constant buried in a processor.

use crate::correction::StructuredGenerator;
use crate::error::AssemblyError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Tunable heuristics used by the structural passes and the correction
/// rejection policy.
///
/// Serialisable so callers can keep per-corpus tunings in a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Caption/footnote to anchor gap, as a fraction of page height. Default: 0.05.
    pub caption_gap_threshold: f32,
    /// Gap between consecutive list items, as a fraction of page height. Default: 0.10.
    pub list_gap_threshold: f32,
    /// Fraction of rows that must qualify before a table is row-split. Default: 0.5.
    pub row_split_threshold: f32,
    /// Horizontal gap for a column break, as a fraction of the block width. Default: 0.02.
    pub column_gap_ratio: f32,
    /// Minimum line count before a text block is considered for continuation. Default: 2.
    pub continuation_min_lines: usize,
    /// A page-break continuation must start left of this fraction of page width. Default: 0.5.
    pub first_quadrant_x: f32,
    /// A page-break continuation must start above this fraction of page height. Default: 0.5.
    pub first_quadrant_y: f32,
    /// One list indent level per this fraction of page width. Default: 0.02.
    pub list_indent_step: f32,
    /// Indent beyond the previous paragraph that starts a blockquote, as a
    /// fraction of page width. Default: 0.05.
    pub blockquote_min_indent: f32,
    /// Number of heading levels section headers are bucketed into. Default: 4.
    pub heading_levels: u8,
    /// Corrected text shorter than this ratio of the original is rejected. Default: 0.6.
    pub min_text_length_ratio: f32,
    /// Corrected equation shorter than this ratio of the original is rejected. Default: 0.5.
    pub min_equation_length_ratio: f32,
    /// Corrected table shorter than this ratio of the original is rejected. Default: 0.5.
    pub min_table_length_ratio: f32,
    /// Maximum row count change accepted from a table correction. Default: 2.
    pub max_table_row_delta: usize,
    /// Maximum column count change accepted from a table correction. Default: 2.
    pub max_table_col_delta: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            caption_gap_threshold: 0.05,
            list_gap_threshold: 0.10,
            row_split_threshold: 0.5,
            column_gap_ratio: 0.02,
            continuation_min_lines: 2,
            first_quadrant_x: 0.5,
            first_quadrant_y: 0.5,
            list_indent_step: 0.02,
            blockquote_min_indent: 0.05,
            heading_levels: 4,
            min_text_length_ratio: 0.6,
            min_equation_length_ratio: 0.5,
            min_table_length_ratio: 0.5,
            max_table_row_delta: 2,
            max_table_col_delta: 2,
        }
    }
}

impl Thresholds {
    /// Check every field lies in its meaningful range.
    pub fn validate(&self) -> Result<(), AssemblyError> {
        let fractions = [
            ("caption_gap_threshold", self.caption_gap_threshold),
            ("list_gap_threshold", self.list_gap_threshold),
            ("row_split_threshold", self.row_split_threshold),
            ("column_gap_ratio", self.column_gap_ratio),
            ("first_quadrant_x", self.first_quadrant_x),
            ("first_quadrant_y", self.first_quadrant_y),
            ("list_indent_step", self.list_indent_step),
            ("blockquote_min_indent", self.blockquote_min_indent),
            ("min_text_length_ratio", self.min_text_length_ratio),
            ("min_equation_length_ratio", self.min_equation_length_ratio),
            ("min_table_length_ratio", self.min_table_length_ratio),
        ];
        for (name, value) in fractions {
            if !(0.0..=1.0).contains(&value) {
                return Err(AssemblyError::InvalidConfig(format!(
                    "{name} must be within 0.0–1.0, got {value}"
                )));
            }
        }
        if self.list_indent_step <= 0.0 {
            return Err(AssemblyError::InvalidConfig(
                "list_indent_step must be > 0".into(),
            ));
        }
        if self.heading_levels == 0 || self.heading_levels > 6 {
            return Err(AssemblyError::InvalidConfig(format!(
                "heading_levels must be 1–6, got {}",
                self.heading_levels
            )));
        }
        Ok(())
    }
}

/// Configuration for assembling and rendering a document.
///
/// Built via [`AssemblyConfig::builder()`] or using
/// [`AssemblyConfig::default()`].
///
/// # Example
/// ```rust
/// use pagetree::{AssemblyConfig, OutputFormat};
///
/// let config = AssemblyConfig::builder()
///     .max_concurrency(5)
///     .caption_gap_threshold(0.08)
///     .output_format(OutputFormat::Html)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_concurrency, 5);
/// ```
#[derive(Clone)]
pub struct AssemblyConfig {
    /// Geometric heuristics and rejection ratios.
    pub thresholds: Thresholds,

    /// Run the correction layer. Default: false.
    pub use_llm: bool,

    /// Number of correction tasks in flight at once. Default: 3.
    pub max_concurrency: usize,

    /// Ask the service to describe pictures and figures. Default: false.
    pub describe_images: bool,

    /// Crop image blocks into the output side-table. Default: true.
    ///
    /// When false, image blocks render as their description (if any) instead
    /// of an `<img>` tag.
    pub extract_images: bool,

    /// Final output format. Default: [`OutputFormat::Markdown`].
    pub output_format: OutputFormat,

    /// Separator between pages in the rendered output. Default: None.
    pub page_separator: PageSeparator,

    /// Page selection applied when building from detector output. Default: all.
    pub pages: PageSelection,

    /// Pre-constructed generator. Takes precedence over every provider field.
    pub generator: Option<Arc<dyn StructuredGenerator>>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, uses `ProviderFactory::from_env()`.
    pub provider_name: Option<String>,

    /// LLM model identifier. If None, uses the provider default.
    pub model: Option<String>,

    /// Sampling temperature for correction calls. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the service may generate per task. Default: 4096.
    pub max_tokens: usize,

    /// Maximum retry attempts on a transient service failure. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Receives correction-task events. Default: None.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            use_llm: false,
            max_concurrency: 3,
            describe_images: false,
            extract_images: true,
            output_format: OutputFormat::default(),
            page_separator: PageSeparator::default(),
            pages: PageSelection::default(),
            generator: None,
            provider: None,
            provider_name: None,
            model: None,
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for AssemblyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssemblyConfig")
            .field("thresholds", &self.thresholds)
            .field("use_llm", &self.use_llm)
            .field("max_concurrency", &self.max_concurrency)
            .field("describe_images", &self.describe_images)
            .field("extract_images", &self.extract_images)
            .field("output_format", &self.output_format)
            .field("page_separator", &self.page_separator)
            .field("pages", &self.pages)
            .field(
                "generator",
                &self.generator.as_ref().map(|_| "<dyn StructuredGenerator>"),
            )
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn CorrectionProgressCallback>"),
            )
            .finish()
    }
}

impl AssemblyConfig {
    /// Create a new builder for `AssemblyConfig`.
    pub fn builder() -> AssemblyConfigBuilder {
        AssemblyConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`AssemblyConfig`].
#[derive(Debug)]
pub struct AssemblyConfigBuilder {
    config: AssemblyConfig,
}

impl AssemblyConfigBuilder {
    pub fn thresholds(mut self, thresholds: Thresholds) -> Self {
        self.config.thresholds = thresholds;
        self
    }

    pub fn caption_gap_threshold(mut self, v: f32) -> Self {
        self.config.thresholds.caption_gap_threshold = v.clamp(0.0, 1.0);
        self
    }

    pub fn list_gap_threshold(mut self, v: f32) -> Self {
        self.config.thresholds.list_gap_threshold = v.clamp(0.0, 1.0);
        self
    }

    pub fn row_split_threshold(mut self, v: f32) -> Self {
        self.config.thresholds.row_split_threshold = v.clamp(0.0, 1.0);
        self
    }

    pub fn column_gap_ratio(mut self, v: f32) -> Self {
        self.config.thresholds.column_gap_ratio = v.clamp(0.0, 1.0);
        self
    }

    pub fn continuation_min_lines(mut self, n: usize) -> Self {
        self.config.thresholds.continuation_min_lines = n;
        self
    }

    pub fn first_quadrant(mut self, x: f32, y: f32) -> Self {
        self.config.thresholds.first_quadrant_x = x.clamp(0.0, 1.0);
        self.config.thresholds.first_quadrant_y = y.clamp(0.0, 1.0);
        self
    }

    pub fn min_text_length_ratio(mut self, v: f32) -> Self {
        self.config.thresholds.min_text_length_ratio = v.clamp(0.0, 1.0);
        self
    }

    pub fn min_equation_length_ratio(mut self, v: f32) -> Self {
        self.config.thresholds.min_equation_length_ratio = v.clamp(0.0, 1.0);
        self
    }

    pub fn min_table_length_ratio(mut self, v: f32) -> Self {
        self.config.thresholds.min_table_length_ratio = v.clamp(0.0, 1.0);
        self
    }

    pub fn max_table_deltas(mut self, rows: usize, cols: usize) -> Self {
        self.config.thresholds.max_table_row_delta = rows;
        self.config.thresholds.max_table_col_delta = cols;
        self
    }

    pub fn use_llm(mut self, v: bool) -> Self {
        self.config.use_llm = v;
        self
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.config.max_concurrency = n.max(1);
        self
    }

    pub fn describe_images(mut self, v: bool) -> Self {
        self.config.describe_images = v;
        self
    }

    pub fn extract_images(mut self, v: bool) -> Self {
        self.config.extract_images = v;
        self
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.config.output_format = format;
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.page_separator = sep;
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    /// Use a pre-built generator; implies `use_llm(true)`.
    pub fn generator(mut self, generator: Arc<dyn StructuredGenerator>) -> Self {
        self.config.generator = Some(generator);
        self.config.use_llm = true;
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.config.progress_callback = Some(callback);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AssemblyConfig, AssemblyError> {
        let c = &self.config;
        if c.max_concurrency == 0 {
            return Err(AssemblyError::InvalidConfig(
                "max_concurrency must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(AssemblyError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        c.thresholds.validate()?;
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Final markup produced by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// HTML converted to Markdown. (default)
    #[default]
    Markdown,
    /// Fully resolved HTML.
    Html,
    /// Nested JSON mirroring the block structure.
    Json,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Markdown => "md",
            OutputFormat::Html => "html",
            OutputFormat::Json => "json",
        }
    }
}

/// Specifies which pages of the input to assemble.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageSelection {
    /// Every page (default).
    #[default]
    All,
    /// A single page (1-indexed).
    Single(usize),
    /// A contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

/// How to separate pages in the rendered output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSeparator {
    /// No separator; pages joined with a blank line. (default)
    #[default]
    None,
    /// Horizontal rule: `<hr>` in HTML, `---` in Markdown.
    HorizontalRule,
    /// HTML comment with the 1-indexed page number: `<!-- page N -->`.
    Comment,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// HTML inserted before the page with 1-indexed number `page_num`.
    pub fn render_html(&self, page_num: usize) -> String {
        match self {
            PageSeparator::None => String::new(),
            PageSeparator::HorizontalRule => "<hr>".to_string(),
            PageSeparator::Comment => format!("<!-- page {} -->", page_num),
            PageSeparator::Custom(s) => html_escape::encode_text(s).into_owned(),
        }
    }

    /// Markdown block inserted before the page with 1-indexed number
    /// `page_num`, if any.
    pub fn render_markdown(&self, page_num: usize) -> Option<String> {
        match self {
            PageSeparator::None => None,
            PageSeparator::HorizontalRule => Some("---".to_string()),
            PageSeparator::Comment => Some(format!("<!-- page {} -->", page_num)),
            PageSeparator::Custom(s) if s.trim().is_empty() => None,
            PageSeparator::Custom(s) => Some(s.trim().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = AssemblyConfig::default();
        assert_eq!(c.max_concurrency, 3);
        assert!(!c.use_llm);
        assert!(c.extract_images);
        assert_eq!(c.output_format, OutputFormat::Markdown);
        let t = &c.thresholds;
        assert_eq!(t.caption_gap_threshold, 0.05);
        assert_eq!(t.list_gap_threshold, 0.10);
        assert_eq!(t.row_split_threshold, 0.5);
        assert_eq!(t.continuation_min_lines, 2);
    }

    #[test]
    fn builder_clamps() {
        let c = AssemblyConfig::builder()
            .max_concurrency(0)
            .caption_gap_threshold(4.0)
            .temperature(9.0)
            .build()
            .unwrap();
        assert_eq!(c.max_concurrency, 1);
        assert_eq!(c.thresholds.caption_gap_threshold, 1.0);
        assert_eq!(c.temperature, 2.0);
    }

    #[test]
    fn build_rejects_bad_thresholds() {
        let t = Thresholds {
            heading_levels: 0,
            ..Default::default()
        };
        assert!(AssemblyConfig::builder().thresholds(t).build().is_err());

        let t = Thresholds {
            row_split_threshold: -0.1,
            ..Default::default()
        };
        assert!(AssemblyConfig::builder().thresholds(t).build().is_err());
    }

    #[test]
    fn thresholds_load_partially_from_json() {
        let t: Thresholds = serde_json::from_str(r#"{"list_gap_threshold": 0.2}"#).unwrap();
        assert_eq!(t.list_gap_threshold, 0.2);
        assert_eq!(t.caption_gap_threshold, 0.05);
    }

    #[test]
    fn page_selection_indices() {
        assert_eq!(PageSelection::All.to_indices(3), vec![0, 1, 2]);
        assert_eq!(PageSelection::Single(2).to_indices(3), vec![1]);
        assert_eq!(PageSelection::Single(9).to_indices(3), Vec::<usize>::new());
        assert_eq!(PageSelection::Range(2, 10).to_indices(4), vec![1, 2, 3]);
        assert_eq!(PageSelection::Set(vec![3, 1, 3]).to_indices(4), vec![0, 2]);
    }

    #[test]
    fn separator_html() {
        assert_eq!(PageSeparator::None.render_html(2), "");
        assert_eq!(PageSeparator::Comment.render_html(2), "<!-- page 2 -->");
        assert_eq!(PageSeparator::HorizontalRule.render_markdown(3).as_deref(), Some("---"));
        assert_eq!(PageSeparator::None.render_markdown(2), None);
        assert_eq!(
            PageSeparator::Custom("a<b".into()).render_html(1),
            "a&lt;b"
        );
    }
}
