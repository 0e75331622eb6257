//! Progress-callback trait for correction-task events.
//!
//! Inject an [`Arc<dyn CorrectionProgressCallback>`] via
//! [`crate::config::AssemblyConfigBuilder::progress_callback`] to receive
//! events as the orchestrator works through its tasks.
//!
//! # Example
//!
//! ```rust
//! use pagetree::{AssemblyConfig, CorrectionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     applied: Arc<AtomicUsize>,
//! }
//!
//! impl CorrectionProgressCallback for CountingCallback {
//!     fn on_task_complete(&self, task: &str, block: &str, done: usize, total: usize) {
//!         self.applied.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{task} on {block}: {done}/{total}");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     applied: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = AssemblyConfig::builder()
//!     .progress_callback(counter as Arc<dyn CorrectionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the correction orchestrator as tasks finish.
///
/// Completions are reported from the single thread that applies results, in
/// arrival order. All methods have default no-op implementations so callers
/// only override what they care about.
pub trait CorrectionProgressCallback: Send + Sync {
    /// Called once after tasks are collected, before any is submitted.
    ///
    /// # Arguments
    /// * `total_tasks` — number of tasks that will be submitted
    fn on_correction_start(&self, total_tasks: usize) {
        let _ = total_tasks;
    }

    /// Called when a task's result was applied (or it reported no change).
    ///
    /// # Arguments
    /// * `task`  — task type name, e.g. `"TableCorrection"`
    /// * `block` — target block id in path form
    /// * `done`  — tasks finished so far, including this one
    /// * `total` — tasks submitted
    fn on_task_complete(&self, task: &str, block: &str, done: usize, total: usize) {
        let _ = (task, block, done, total);
    }

    /// Called when a task was rejected, failed, or panicked.
    ///
    /// # Arguments
    /// * `task`  — task type name
    /// * `block` — target block id in path form
    /// * `error` — human-readable error description
    fn on_task_error(&self, task: &str, block: &str, error: &str) {
        let _ = (task, block, error);
    }

    /// Called once after every task has finished.
    ///
    /// # Arguments
    /// * `total_tasks` — tasks submitted
    /// * `applied`     — tasks whose result changed the tree
    fn on_correction_complete(&self, total_tasks: usize, applied: usize) {
        let _ = (total_tasks, applied);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl CorrectionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::AssemblyConfig`].
pub type ProgressCallback = Arc<dyn CorrectionProgressCallback>;
