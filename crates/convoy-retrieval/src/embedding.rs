use crate::bm25::tokenize;
use async_trait::async_trait;
use convoy_core::{ConvoyError, ConvoyResult};
use std::collections::HashMap;

/// Trait for computing text embeddings.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embedding vector for a single text.
    async fn embed(&self, text: &str) -> ConvoyResult<Vec<f32>>;

    /// Dimension of the vectors produced by this provider.
    fn dimension(&self) -> usize;
}

/// Hashed bag-of-words embedding that needs no external service.
///
/// Each token contributes its term frequency to three hashed slots with
/// decreasing weight, and the vector is L2-normalised.
pub struct LocalEmbedding {
    dimension: usize,
}

impl LocalEmbedding {
    /// Create an embedder producing vectors of `dimension` entries.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return vector;
        }

        let mut freq: HashMap<&str, f32> = HashMap::new();
        for token in tokens.iter() {
            *freq.entry(token.as_str()).or_insert(0.0) += 1.0;
        }
        let total = tokens.len() as f32;

        for (token, count) in freq {
            let tf = count / total;
            for (salt, weight) in [(0u8, 1.0f32), (1, 0.7), (2, 0.5)] {
                let slot = fnv1a(token.as_bytes(), salt) as usize % self.dimension;
                vector[slot] += tf * weight;
            }
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

impl Default for LocalEmbedding {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedding {
    async fn embed(&self, text: &str) -> ConvoyResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(ConvoyError::Retrieval("cannot embed empty text".to_string()));
        }
        Ok(self.vectorize(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// FNV-1a over the bytes followed by a salt byte.
fn fnv1a(data: &[u8], salt: u8) -> u32 {
    let mut hash: u32 = 2_166_136_261;
    for &byte in data.iter().chain(std::iter::once(&salt)) {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(16_777_619);
    }
    hash
}

/// Cosine similarity; zero when either vector is all zeros or lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dimension_and_norm() {
        let emb = LocalEmbedding::new(64);
        let v = emb.embed("the quick brown fox").await.unwrap();
        assert_eq!(v.len(), 64);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_similar_texts_closer() {
        let emb = LocalEmbedding::default();
        let v1 = emb.embed("rust programming language").await.unwrap();
        let v2 = emb.embed("rust programming systems").await.unwrap();
        let v3 = emb.embed("cooking recipes for dinner").await.unwrap();
        assert!(cosine_similarity(&v1, &v2) > cosine_similarity(&v1, &v3));
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let emb = LocalEmbedding::default();
        assert!(emb.embed("   ").await.is_err());
    }

    #[tokio::test]
    async fn test_deterministic() {
        let emb = LocalEmbedding::default();
        assert_eq!(
            emb.embed("same input").await.unwrap(),
            emb.embed("same input").await.unwrap()
        );
    }

    #[test]
    fn test_cosine_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
