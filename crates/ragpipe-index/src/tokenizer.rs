//! Token counting used by the chunk packer.

use tiktoken_rs::CoreBPE;

use crate::error::{Result, SearchError};

/// Counts tokens the way the downstream model will see them.
pub trait Tokenizer: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
}

/// BPE tokenizer backed by tiktoken.
pub struct TiktokenTokenizer {
    bpe: CoreBPE,
}

impl TiktokenTokenizer {
    /// The `o200k_base` encoding used by the gpt-4o model family.
    pub fn o200k() -> Result<Self> {
        let bpe = tiktoken_rs::o200k_base().map_err(|e| SearchError::Tokenizer(e.to_string()))?;
        Ok(Self { bpe })
    }

    /// The encoding tiktoken associates with a model name.
    pub fn for_model(model: &str) -> Result<Self> {
        let bpe = tiktoken_rs::get_bpe_from_model(model)
            .map_err(|e| SearchError::Tokenizer(format!("{}: {}", model, e)))?;
        Ok(Self { bpe })
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Counts whitespace-separated words. Deterministic and dependency free, used
/// where exact model token counts do not matter.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceTokenizer;

impl Tokenizer for WhitespaceTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_tokenizer() {
        let t = WhitespaceTokenizer;
        assert_eq!(t.count_tokens(""), 0);
        assert_eq!(t.count_tokens("  one two\nthree "), 3);
    }

    #[test]
    fn test_tiktoken_counts_tokens() {
        let t = TiktokenTokenizer::o200k().unwrap();
        assert_eq!(t.count_tokens(""), 0);
        let n = t.count_tokens("Revenue grew twelve percent year over year.");
        assert!(n > 0 && n < 20);
    }

    #[test]
    fn test_tiktoken_for_model() {
        assert!(TiktokenTokenizer::for_model("gpt-4o-mini").is_ok());
        assert!(TiktokenTokenizer::for_model("definitely-not-a-model").is_err());
    }
}
