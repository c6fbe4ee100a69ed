//! Per-stream token context handed to the backend.
//!
//! A [`Batch`] pairs a backend [`BatchId`] with the token context the worker
//! feeds into each inference step. The context grows one token per step and
//! is windowed to the model's maximum context when handed to the backend, so
//! a long-running stream never overruns the model while the full sequence
//! stays addressable for rewinds.

use crate::backend::BatchId;
use crate::tokenizer::Token;

/// One generation stream's token context.
#[derive(Debug)]
pub struct Batch {
    id: BatchId,
    context: Vec<Token>,
    max_context: usize,
}

impl Batch {
    /// Creates a batch over an existing backend stream, seeded with the
    /// initial context.
    pub fn new(id: BatchId, seed: &[Token], max_context: usize) -> Self {
        Self {
            id,
            context: seed.to_vec(),
            max_context,
        }
    }

    /// The backend stream this batch drives.
    pub fn id(&self) -> BatchId {
        self.id
    }

    /// Appends one generated token.
    pub fn push(&mut self, token: Token) {
        self.context.push(token);
    }

    /// The full token sequence, seed included.
    pub fn context(&self) -> &[Token] {
        &self.context
    }

    /// The trailing window that fits the model's maximum context, together
    /// with the index of its first token in the full sequence.
    pub fn trimmed_context(&self) -> (usize, &[Token]) {
        let start = self.context.len().saturating_sub(self.max_context);
        (start, &self.context[start..])
    }

    /// Cuts the context back to `len` tokens after a rewind.
    pub fn truncate(&mut self, len: usize) {
        self.context.truncate(len);
    }

    /// Total tokens in the full sequence.
    pub fn len(&self) -> usize {
        self.context.len()
    }

    /// Returns whether the context holds no tokens.
    pub fn is_empty(&self) -> bool {
        self.context.is_empty()
    }

    /// The most recent token, if any.
    pub fn last_token(&self) -> Option<Token> {
        self.context.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trimmed_context_under_limit_is_whole() {
        let b = Batch::new(BatchId::new(), &[1, 2, 3], 8);
        let (start, window) = b.trimmed_context();
        assert_eq!(start, 0);
        assert_eq!(window, &[1, 2, 3]);
    }

    #[test]
    fn test_trimmed_context_windows_the_tail() {
        let mut b = Batch::new(BatchId::new(), &[1, 2, 3], 4);
        for t in 4..=7 {
            b.push(t);
        }
        let (start, window) = b.trimmed_context();
        assert_eq!(start, 3);
        assert_eq!(window, &[4, 5, 6, 7]);
        assert_eq!(b.len(), 7);
    }

    #[test]
    fn test_truncate_after_rewind() {
        let mut b = Batch::new(BatchId::new(), &[1, 2, 3, 4, 5], 8);
        b.truncate(2);
        assert_eq!(b.context(), &[1, 2]);
        assert_eq!(b.last_token(), Some(2));
    }
}
