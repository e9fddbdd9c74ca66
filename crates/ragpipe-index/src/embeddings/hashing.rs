//! Offline feature-hashing embeddings.

use async_trait::async_trait;

use super::{EmbeddingProvider, EmbeddingResult, InputType};

/// Deterministic bag-of-words embeddings.
///
/// Terms are hashed into fixed-dimension buckets with FNV-1a, weighted by term
/// frequency and L2-normalized. Far weaker than a neural model but needs no
/// network, which makes it the provider of choice for air-gapped runs and
/// tests.
#[derive(Debug, Clone)]
pub struct HashingEmbeddings {
    dimensions: usize,
}

impl HashingEmbeddings {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn bucket(term: &str, dims: usize) -> usize {
        let mut h: u64 = 0xcbf29ce484222325;
        for b in term.as_bytes() {
            h ^= *b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        (h % dims as u64) as usize
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dimensions];
        let terms = text
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);
        for term in terms {
            vec[Self::bucket(&term, self.dimensions)] += 1.0;
        }

        let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vec {
                *v /= norm;
            }
        }
        vec
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddings {
    async fn embed_batch(
        &self,
        texts: &[String],
        _input_type: InputType,
    ) -> EmbeddingResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "feature-hashing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_is_zero_vector() {
        let v = HashingEmbeddings::new(64).vector("");
        assert_eq!(v.len(), 64);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_vectors_are_normalized_and_deterministic() {
        let e = HashingEmbeddings::new(128);
        let a = e.vector("Revenue grew in the third quarter");
        let b = e.vector("Revenue grew in the third quarter");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_embed_is_case_insensitive() {
        let e = HashingEmbeddings::new(32);
        let a = e.embed("Cash Flow", InputType::Query).await.unwrap();
        let b = e.embed("cash flow", InputType::Passage).await.unwrap();
        assert_eq!(a, b);
    }
}
