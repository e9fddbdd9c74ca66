//! BM25 keyword search.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tantivy::tokenizer::{
    Language, LowerCaser, SimpleTokenizer, Stemmer, StopWordFilter, TextAnalyzer, TokenStream,
};
use tracing::debug;

use super::{passes, rank, SearchBackend, SearchFilter};
use crate::error::{Result, SearchError};
use crate::types::{Chunk, SearchResult};

/// BM25 parameters
const K1: f64 = 1.2; // Term frequency saturation
const B: f64 = 0.75; // Length normalization

const ENGLISH_STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "as", "at", "be", "because", "been", "before", "being", "below", "between", "both", "but",
    "by", "can", "did", "do", "does", "doing", "down", "during", "each", "few", "for", "from",
    "further", "had", "has", "have", "having", "he", "her", "here", "hers", "herself", "him",
    "himself", "his", "how", "i", "if", "in", "into", "is", "it", "its", "itself", "just", "me",
    "more", "most", "my", "myself", "no", "nor", "not", "now", "of", "off", "on", "once", "only",
    "or", "other", "our", "ours", "ourselves", "out", "over", "own", "same", "she", "should",
    "so", "some", "such", "than", "that", "the", "their", "theirs", "them", "themselves", "then",
    "there", "these", "they", "this", "those", "through", "to", "too", "under", "until", "up",
    "very", "was", "we", "were", "what", "when", "where", "which", "while", "who", "whom", "why",
    "will", "with", "you", "your", "yours", "yourself", "yourselves",
];

/// Lower-casing, English stop-word removal and Snowball stemming.
pub fn english_analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(LowerCaser)
        .filter(StopWordFilter::remove(
            ENGLISH_STOP_WORDS.iter().map(|s| s.to_string()),
        ))
        .filter(Stemmer::new(Language::English))
        .build()
}

/// Run `text` through `analyzer` and collect the resulting terms.
pub fn analyze(analyzer: &mut TextAnalyzer, text: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut stream = analyzer.token_stream(text);
    while stream.advance() {
        terms.push(stream.token().text.clone());
    }
    terms
}

/// Term statistics for a fixed corpus, addressed by corpus position.
#[derive(Debug, Clone, Default)]
pub struct BM25Index {
    /// Term frequencies per document
    term_freqs: Vec<HashMap<String, usize>>,
    /// Number of documents containing each term
    doc_freqs: HashMap<String, usize>,
    /// Document lengths (in terms)
    doc_lengths: Vec<usize>,
    avg_doc_length: f64,
}

impl BM25Index {
    /// Build the index from already analyzed documents.
    pub fn build(documents: Vec<Vec<String>>) -> Self {
        let mut index = Self::default();
        for terms in documents {
            let mut tf: HashMap<String, usize> = HashMap::new();
            for term in &terms {
                *tf.entry(term.clone()).or_insert(0) += 1;
            }
            let unique: HashSet<&String> = terms.iter().collect();
            for term in unique {
                *index.doc_freqs.entry(term.clone()).or_insert(0) += 1;
            }
            index.doc_lengths.push(terms.len());
            index.term_freqs.push(tf);
        }
        let total: usize = index.doc_lengths.iter().sum();
        index.avg_doc_length = if index.doc_lengths.is_empty() {
            0.0
        } else {
            total as f64 / index.doc_lengths.len() as f64
        };
        index
    }

    pub fn len(&self) -> usize {
        self.doc_lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_lengths.is_empty()
    }

    /// Inverse document frequency with the +1 smoothing that keeps it positive
    fn idf(&self, term: &str) -> f64 {
        let doc_freq = self.doc_freqs.get(term).copied().unwrap_or(0) as f64;
        if doc_freq == 0.0 {
            return 0.0;
        }
        let n = self.len() as f64;
        ((n - doc_freq + 0.5) / (doc_freq + 0.5) + 1.0).ln()
    }

    /// Raw BM25 score of document `doc` for the given query terms.
    pub fn score(&self, doc: usize, query_terms: &[String]) -> f64 {
        let Some(term_freqs) = self.term_freqs.get(doc) else {
            return 0.0;
        };
        let doc_length = self.doc_lengths[doc] as f64;
        let length_ratio = if self.avg_doc_length > 0.0 {
            doc_length / self.avg_doc_length
        } else {
            0.0
        };

        query_terms
            .iter()
            .map(|term| {
                let tf = term_freqs.get(term).copied().unwrap_or(0) as f64;
                if tf == 0.0 {
                    return 0.0;
                }
                let numerator = tf * (K1 + 1.0);
                let denominator = tf + K1 * (1.0 - B + B * length_ratio);
                self.idf(term) * (numerator / denominator)
            })
            .sum()
    }
}

struct FittedBm25 {
    corpus: Vec<Chunk>,
    index: BM25Index,
}

/// Lexical backend scoring chunks with Okapi BM25.
///
/// Raw scores are divided by the best raw score among the candidates, so the
/// top hit always scores 1.0. Chunks sharing no term with the query are not
/// returned.
pub struct Bm25Backend {
    analyzer: TextAnalyzer,
    fitted: Option<FittedBm25>,
}

impl Bm25Backend {
    pub fn new() -> Self {
        Self {
            analyzer: english_analyzer(),
            fitted: None,
        }
    }
}

impl Default for Bm25Backend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchBackend for Bm25Backend {
    fn name(&self) -> &str {
        "bm25"
    }

    async fn fit(&mut self, corpus: Vec<Chunk>) -> Result<()> {
        let documents: Vec<Vec<String>> = corpus
            .iter()
            .map(|chunk| analyze(&mut self.analyzer, &chunk.text))
            .collect();
        let index = BM25Index::build(documents);
        debug!(
            documents = index.len(),
            terms = index.doc_freqs.len(),
            "Fitted BM25 index"
        );
        self.fitted = Some(FittedBm25 { corpus, index });
        Ok(())
    }

    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchResult>> {
        let fitted = self.fitted.as_ref().ok_or_else(|| SearchError::NotFitted {
            backend: self.name().to_string(),
        })?;

        let mut analyzer = self.analyzer.clone();
        let query_terms = analyze(&mut analyzer, query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let raw: Vec<(usize, f64)> = fitted
            .corpus
            .iter()
            .enumerate()
            .filter(|(_, chunk)| passes(filter, chunk))
            .map(|(idx, _)| (idx, fitted.index.score(idx, &query_terms)))
            .filter(|(_, score)| *score > 0.0)
            .collect();

        let best = raw.iter().map(|(_, s)| *s).fold(0.0f64, f64::max);
        if best <= 0.0 {
            return Ok(Vec::new());
        }
        let scored = raw
            .into_iter()
            .map(|(idx, s)| (idx, (s / best) as f32))
            .collect();

        Ok(rank(scored, &fitted.corpus, top_k))
    }
}
