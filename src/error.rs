//! Error types for the pagetree library.
//!
//! Three error types map onto three failure scopes:
//!
//! * [`AssemblyError`] — **Fatal**: the tree is broken or the input cannot be
//!   assembled at all (dangling child id, render cycle, bad configuration,
//!   unwritable output). Returned as `Err(AssemblyError)` from the
//!   document-level entry points.
//!
//! * [`TaskError`] — **Non-fatal**: one correction task was rejected, its
//!   service call failed, or it panicked. The target block keeps its
//!   content, its `llm_error_count` goes up, and sibling tasks carry on.
//!
//! * [`GenerationError`] — what a [`crate::correction::StructuredGenerator`]
//!   returns when it cannot produce a schema-valid response. The orchestrator
//!   folds it into a [`TaskError::Failed`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pagetree library.
#[derive(Debug, Error)]
pub enum AssemblyError {
    // ── Tree integrity ────────────────────────────────────────────────────
    /// A `structure` entry names a block that no page owns.
    #[error("Dangling block reference '{id}': no page owns this block")]
    DanglingReference { id: String },

    /// Content-ref resolution revisited a block already on the render stack.
    #[error("Render cycle detected at block '{id}'")]
    CycleDetected { id: String },

    /// A page id was requested that the document does not contain.
    #[error("Page {page} not found (document has {total} pages)")]
    PageNotFound { page: u32, total: usize },

    // ── Input errors ──────────────────────────────────────────────────────
    /// Detector output is inconsistent (bad index, unknown label, ...).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// A page raster could not be decoded.
    #[error("Failed to load page image '{path}': {detail}")]
    ImageLoad { path: PathBuf, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single correction task.
///
/// Never propagated past the orchestrator; reported to progress callbacks
/// and counted on the target block.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum TaskError {
    /// The response was well-formed but failed a content check.
    #[error("{task} on {block}: rejected: {reason}")]
    Rejected {
        task: String,
        block: String,
        reason: String,
    },

    /// The structured-generation call failed.
    #[error("{task} on {block}: generation failed: {detail}")]
    Failed {
        task: String,
        block: String,
        detail: String,
    },

    /// The task panicked; the panic was contained at the task boundary.
    #[error("{task} on {block}: task panicked: {detail}")]
    Panicked {
        task: String,
        block: String,
        detail: String,
    },
}

impl TaskError {
    pub fn task(&self) -> &str {
        match self {
            TaskError::Rejected { task, .. }
            | TaskError::Failed { task, .. }
            | TaskError::Panicked { task, .. } => task,
        }
    }
}

/// Failures of the structured-generation service.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    /// Provider returned an error after all retries.
    #[error("service error after {retries} retries: {message}")]
    Service { retries: u32, message: String },

    /// A single call exceeded the configured timeout.
    #[error("call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The response was not a JSON object.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The response lacked a key the schema marks as required.
    #[error("response is missing required key '{0}'")]
    MissingKey(String),

    /// A crop could not be encoded for the request.
    #[error("image encoding failed: {0}")]
    ImageEncoding(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dangling_reference_display() {
        let e = AssemblyError::DanglingReference {
            id: "/page/0/Text/4".into(),
        };
        assert!(e.to_string().contains("/page/0/Text/4"));
    }

    #[test]
    fn page_not_found_display() {
        let e = AssemblyError::PageNotFound { page: 9, total: 3 };
        let msg = e.to_string();
        assert!(msg.contains("Page 9"), "got: {msg}");
        assert!(msg.contains("3 pages"), "got: {msg}");
    }

    #[test]
    fn task_error_display_names_block() {
        let e = TaskError::Rejected {
            task: "EquationCorrection".into(),
            block: "/page/1/Equation/2".into(),
            reason: "too short".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("/page/1/Equation/2"));
        assert!(msg.contains("too short"));
        assert_eq!(e.task(), "EquationCorrection");
    }

    #[test]
    fn serde_error_converts() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let e: AssemblyError = err.into();
        assert!(matches!(e, AssemblyError::Serialization(_)));
    }

    #[test]
    fn generation_error_display() {
        let e = GenerationError::MissingKey("corrected_html".into());
        assert!(e.to_string().contains("corrected_html"));
    }
}
