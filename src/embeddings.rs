use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Representation of a vector embedding
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Embedding { values }
    }
}

impl Embedding {
    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    pub fn cosine_similarity(&self, other: &Embedding) -> f32 {
        cosine_similarity(&self.values, &other.values)
    }
}

/// Cosine similarity of two vectors, 0.0 when either is a zero vector
pub fn cosine_similarity(query: &[f32], candidate: &[f32]) -> f32 {
    let dot: f32 = query.iter().zip(candidate).map(|(a, b)| a * b).sum();
    let norm = |v: &[f32]| v.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm(query) * norm(candidate);
    if denom <= f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

/// Turns text into embeddings. Queries and chunks must go through the same
/// implementation for search results to be meaningful.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn get_embedding(&self, text: &str) -> Result<Embedding>;
}
