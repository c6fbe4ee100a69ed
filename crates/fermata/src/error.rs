//! Error taxonomy for the generation core.
//!
//! Three families of failure exist, and they are deliberately kept apart:
//!
//! * **Configuration errors** ([`TokenizerError`], the setup variants of
//!   [`WorkerError`]) are reported once, at startup, and prevent the worker
//!   from ever reaching its generating state.
//! * **Backend errors** ([`BackendError`]) are fatal to the worker instance
//!   that observed them. The loop exits; recovery (recreating a worker from
//!   the last-known-good history) is the consumer's policy, not ours.
//! * **Sampling errors** ([`SampleError`]) signal a misconfigured grammar or
//!   sampler; they are programming/configuration faults and also terminate
//!   the worker rather than silently degrading.
//!
//! Errors cross the backend boundary as values, never as panics.

use std::fmt;

use thiserror::Error;

/// The phase of an inference iteration a backend fault occurred in, so a
/// failure can be attributed when the backend wraps a multi-stage runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Input staging, before the forward pass.
    PreGenerate,
    /// The forward pass itself.
    Generate,
    /// Output extraction after the forward pass.
    PostGenerate,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::PreGenerate => write!(f, "pre-generate"),
            Stage::Generate => write!(f, "generate"),
            Stage::PostGenerate => write!(f, "post-generate"),
        }
    }
}

/// An error reported by the model backend.
#[derive(Debug, Clone, Error)]
#[error("backend {stage} step failed: {message}")]
pub struct BackendError {
    /// The stage the fault is attributed to.
    pub stage: Stage,
    /// Backend-provided description.
    pub message: String,
}

impl BackendError {
    /// Creates a backend error for the given stage.
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

/// Errors loading or validating a tokenizer vocabulary.
#[derive(Debug, Error)]
pub enum TokenizerError {
    /// The vocabulary file could not be read.
    #[error("failed to read tokenizer file: {0}")]
    Io(#[from] std::io::Error),

    /// The vocabulary file could not be parsed.
    #[error("malformed tokenizer file: {0}")]
    Parse(#[from] serde_json::Error),

    /// The vocabulary defines no symbols.
    #[error("tokenizer defines no symbols")]
    EmptyVocabulary,

    /// A decode-table entry references a symbol id outside the symbol table.
    #[error("decode table entry for token {token} references unknown symbol {symbol}")]
    UnknownSymbol {
        /// The offending token id.
        token: i32,
        /// The out-of-range symbol id.
        symbol: i32,
    },
}

/// Errors from the logit-processing and sampling pipeline.
///
/// Both variants indicate a grammar or sampler misconfiguration; the pipeline
/// fails loudly rather than returning an arbitrary token.
#[derive(Debug, Clone, Copy, Error)]
pub enum SampleError {
    /// The active range group enumerates no candidate tokens.
    #[error("active range group is empty; nothing to sample from")]
    EmptyCandidateSet,

    /// The active range group holds fewer candidates than top-k requires.
    #[error("range group holds {available} candidates but top-k selection needs {needed}")]
    GroupTooSmall {
        /// Candidates enumerable from the active group.
        available: usize,
        /// The configured top-k size.
        needed: usize,
    },
}

/// Errors surfaced by the generation worker's control surface or recorded by
/// its loop before terminating.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// `start` was called on a worker that already has a thread.
    #[error("generation worker has already started")]
    AlreadyStarted,

    /// The seed context is empty; the model needs at least one token.
    #[error("initial token context is empty")]
    EmptyContext,

    /// The seed context exceeds the model's maximum context length.
    #[error("initial context of {got} tokens exceeds model max context of {max}")]
    ContextTooLong {
        /// Seed length supplied.
        got: usize,
        /// The backend's maximum context length.
        max: usize,
    },

    /// The generation thread could not be spawned.
    #[error("failed to spawn generation thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// Tokenizer loading or validation failed during initialization.
    #[error(transparent)]
    Tokenizer(#[from] TokenizerError),

    /// The model backend reported a fault.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The sampling pipeline reported a misconfiguration.
    #[error(transparent)]
    Sample(#[from] SampleError),
}
