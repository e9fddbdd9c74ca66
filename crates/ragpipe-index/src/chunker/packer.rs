//! Greedy sentence packer shared by every chunking path.

use std::sync::Arc;

use unicode_segmentation::UnicodeSegmentation;

use crate::tokenizer::Tokenizer;

/// Packs sentences into chunks that stay within a token budget.
///
/// Sentences are UAX #29 sentence bounds, each carrying its trailing
/// whitespace, so concatenating the output reproduces the input exactly. A
/// sentence that alone exceeds the budget is emitted whole; nothing is ever
/// truncated or dropped. Whitespace-only sentences never open a new chunk.
#[derive(Clone)]
pub struct TokenPacker {
    budget: usize,
    tokenizer: Arc<dyn Tokenizer>,
}

impl TokenPacker {
    pub fn new(budget: usize, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self { budget, tokenizer }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        self.tokenizer.count_tokens(text)
    }

    pub fn pack(&self, text: &str) -> Vec<String> {
        pack(text, self.budget, self.tokenizer.as_ref())
    }
}

/// Split `text` into sentences and greedily pack them under `budget` tokens.
pub fn pack(text: &str, budget: usize, tokenizer: &dyn Tokenizer) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_tokens = 0usize;

    for sentence in text.split_sentence_bounds() {
        let tokens = tokenizer.count_tokens(sentence);
        let opens_chunk = !sentence.trim().is_empty();
        if opens_chunk && !current.is_empty() && current_tokens + tokens > budget {
            chunks.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        current.push_str(sentence);
        current_tokens += tokens;
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}
