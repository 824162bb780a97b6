//! Token length estimation used for budget checks.

use std::sync::Arc;

use tiktoken_rs::CoreBPE;
use tracing::warn;

pub trait TokenCounter: Send + Sync {
    fn estimate(&self, text: &str) -> usize;
}

/// Rough estimate: ~4 characters per token, rounded up.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicCounter;

impl TokenCounter for HeuristicCounter {
    fn estimate(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }
}

/// BPE counter backed by the `cl100k_base` vocabulary.
pub struct TiktokenCounter {
    bpe: CoreBPE,
}

impl TiktokenCounter {
    pub fn cl100k() -> anyhow::Result<Self> {
        Ok(Self {
            bpe: tiktoken_rs::cl100k_base()?,
        })
    }
}

impl TokenCounter for TiktokenCounter {
    fn estimate(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// The BPE counter when its vocabulary loads, the heuristic otherwise.
#[must_use]
pub fn default_counter() -> Arc<dyn TokenCounter> {
    match TiktokenCounter::cl100k() {
        Ok(counter) => Arc::new(counter),
        Err(e) => {
            warn!("Falling back to heuristic token counting: {e}");
            Arc::new(HeuristicCounter)
        }
    }
}
