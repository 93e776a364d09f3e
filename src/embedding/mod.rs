//! Embedding contract and the built-in deterministic embedder
//!
//! The service treats the embedding model as a pure `text -> vector`
//! function. Deployments plug a real model in behind [`Embedder`]; the
//! built-in hashed-token embedder keeps semantic search functional with no
//! external dependencies.

mod hashed;

pub use hashed::HashedTokenEmbedder;

use std::sync::Arc;

use crate::error::Result;

/// Pure text-to-vector function
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single text
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Output dimension, fixed per model
    fn dimensions(&self) -> usize;

    /// Model identifier
    fn model_name(&self) -> &str;
}

/// Default embedder for the configured dimension
pub fn default_embedder(dimensions: usize) -> Arc<dyn Embedder> {
    Arc::new(HashedTokenEmbedder::new(dimensions))
}

/// Cosine similarity between two vectors
///
/// Mismatched or empty inputs score 0 rather than erroring; backends treat
/// that as "no match".
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_mismatched_lengths() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_default_embedder_dimension() {
        let embedder = default_embedder(128);
        let v = embedder.embed("hello world").unwrap();
        assert_eq!(v.len(), 128);
    }
}
