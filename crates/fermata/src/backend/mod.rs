//! # Model Backend
//!
//! This module defines the seam between the generation worker and whatever
//! runs the actual model: a process-local runtime, an FFI wrapper around a
//! native inference library, or a network client.
//!
//! ## Usage
//!
//! Implementors provide [`InferenceBackend`]; the worker drives it from its
//! generation thread only, so implementations need `Send` but never `Sync`.
//! Batches are identified by opaque [`BatchId`]s so a backend can keep
//! per-stream state (caches, sessions) keyed independently of the worker.
//!
//! All fallible operations return [`BackendError`] values; a backend must
//! never panic across this boundary.

use std::path::Path;

use uuid::Uuid;

use crate::error::BackendError;
use crate::tokenizer::Token;

/// Opaque identity of one generation stream inside a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchId(Uuid);

impl BatchId {
    /// Creates a fresh unique id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A model runtime capable of scoring next-token logits for a token context.
///
/// The worker calls these methods in a fixed order per stream:
/// [`load_model`](Self::load_model) once, [`create_batch`](Self::create_batch)
/// once, then repeated [`inference_step`](Self::inference_step)s interleaved
/// with [`rewind_batch`](Self::rewind_batch) on cache invalidation, and
/// finally [`destroy_batch`](Self::destroy_batch) during teardown.
pub trait InferenceBackend: Send {
    /// Loads model weights from `path`.
    fn load_model(&mut self, path: &Path) -> Result<(), BackendError>;

    /// Size of the model's token vocabulary. Every logit vector returned by
    /// [`inference_step`](Self::inference_step) has exactly this length.
    fn vocab_size(&self) -> usize;

    /// Maximum context length the model accepts.
    fn max_context(&self) -> usize;

    /// Creates a generation stream seeded with `initial` tokens.
    fn create_batch(&mut self, initial: &[Token]) -> Result<BatchId, BackendError>;

    /// Runs one forward pass over `context` and returns raw next-token
    /// logits, one per vocabulary entry.
    ///
    /// `context` is the full (possibly window-trimmed) token sequence; a
    /// caching backend may use `batch` to reuse earlier computation.
    fn inference_step(&mut self, batch: BatchId, context: &[Token]) -> Result<Vec<f32>, BackendError>;

    /// Informs the backend that generated state after `target_tick` has been
    /// discarded, so any internal cache keyed past that point is stale.
    fn rewind_batch(&mut self, batch: BatchId, target_tick: i64) -> Result<(), BackendError>;

    /// Releases the stream's backend-side state. Called exactly once per
    /// created batch, before the backend itself is dropped.
    fn destroy_batch(&mut self, batch: BatchId);
}
