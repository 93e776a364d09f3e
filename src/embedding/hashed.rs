//! Feature-hashed token embedder
//!
//! Deterministic and dependency-free: tokens and bigrams are hashed into a
//! fixed number of signed buckets, then L2-normalized. Useful as a stand-in
//! wherever a real embedding model is unavailable, and for tests.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::embedding::Embedder;
use crate::error::Result;

/// Embedder based on the hashing trick over unigrams and bigrams
pub struct HashedTokenEmbedder {
    dimensions: usize,
}

impl HashedTokenEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }

    fn bucket(&self, feature: &str) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        feature.hash(&mut hasher);
        (hasher.finish() as usize) % self.dimensions
    }

    /// Sign hashing reduces the impact of bucket collisions
    fn sign(feature: &str) -> f32 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        feature.hash(&mut hasher);
        0x5f.hash(&mut hasher);
        if hasher.finish() % 2 == 0 {
            1.0
        } else {
            -1.0
        }
    }
}

impl Embedder for HashedTokenEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = Self::tokenize(text);
        let mut embedding = vec![0.0_f32; self.dimensions];

        if tokens.is_empty() {
            return Ok(embedding);
        }

        let mut counts: HashMap<&str, f32> = HashMap::new();
        for token in &tokens {
            *counts.entry(token.as_str()).or_insert(0.0) += 1.0;
        }

        for (token, count) in counts {
            let weight = 1.0 + count.ln();
            embedding[self.bucket(token)] += weight * Self::sign(token);
        }

        // Bigrams carry word order at reduced weight
        for window in tokens.windows(2) {
            let bigram = format!("{} {}", window[0], window[1]);
            embedding[self.bucket(&bigram)] += 0.5 * Self::sign(&bigram);
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }

        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "hashed-token"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[test]
    fn test_deterministic() {
        let embedder = HashedTokenEmbedder::new(256);
        let a = embedder.embed("rollout plan for the new queue").unwrap();
        let b = embedder.embed("rollout plan for the new queue").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_similar_texts_score_higher() {
        let embedder = HashedTokenEmbedder::new(384);

        let base = embedder
            .embed("architecture decision: adopt message queue")
            .unwrap();
        let related = embedder.embed("message queue adoption decision").unwrap();
        let unrelated = embedder.embed("lunch menu on friday").unwrap();

        assert!(cosine_similarity(&base, &related) > cosine_similarity(&base, &unrelated));
    }

    #[test]
    fn test_query_overlaps_document() {
        let embedder = HashedTokenEmbedder::new(384);
        let doc = embedder
            .embed("architecture decision: adopt queue X")
            .unwrap();
        let query = embedder.embed("queue X").unwrap();
        assert!(cosine_similarity(&doc, &query) >= 0.4);
    }

    #[test]
    fn test_empty_is_zero_vector() {
        let embedder = HashedTokenEmbedder::new(64);
        let v = embedder.embed("").unwrap();
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_normalized() {
        let embedder = HashedTokenEmbedder::new(384);
        let v = embedder.embed("a sentence with several words").unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.001);
    }
}
