use anyhow::Result;
use async_trait::async_trait;
use log::{debug, error, info};
use serde::Serialize;
use std::sync::Arc;

use crate::embeddings::Embedder;
use crate::vector_store::{StoredChunk, VectorStore};

pub const DEFAULT_TOP_K: usize = 4;
pub const NO_ANSWER: &str = "I don't know.";

/// Produces text for a prompt
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Embeds a query and runs a k-nearest-neighbour search against the store
pub struct Retriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    k: usize,
}

impl Retriever {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>, k: usize) -> Self {
        Retriever { store, embedder, k }
    }

    /// Top-k chunks closest to the query, best first
    pub async fn get_relevant_documents(&self, query: &str) -> Result<Vec<StoredChunk>> {
        let result = self.search(query).await;
        if let Err(e) = &result {
            error!("Error retrieving documents: {:#}", e);
        }
        result
    }

    async fn search(&self, query: &str) -> Result<Vec<StoredChunk>> {
        let query_embedding = self.embedder.get_embedding(query).await?;
        let scored = self.store.similarity_search(&query_embedding, self.k).await?;
        debug!(
            "Retrieved {} chunks (best score {:?})",
            scored.len(),
            scored.first().map(|s| s.score)
        );
        Ok(scored.into_iter().map(|s| s.chunk).collect())
    }
}

/// Answer plus the chunks it was based on
#[derive(Debug, Clone, Serialize)]
pub struct RagAnswer {
    pub answer: String,
    pub sources: Vec<StoredChunk>,
}

/// RAG (Retrieval-Augmented Generation) pipeline
pub struct RagPipeline {
    retriever: Retriever,
    generator: Arc<dyn TextGenerator>,
}

impl RagPipeline {
    pub fn new(retriever: Retriever, generator: Arc<dyn TextGenerator>) -> Self {
        RagPipeline {
            retriever,
            generator,
        }
    }

    /// Answer a question from the retrieved context.
    ///
    /// When nothing is retrieved the canned "I don't know." answer is returned
    /// and the model is not called.
    pub async fn answer_question(&self, question: &str) -> Result<RagAnswer> {
        let relevant_docs = self.retriever.get_relevant_documents(question).await?;

        if relevant_docs.is_empty() {
            info!("No relevant chunks for question, answering without the model");
            return Ok(RagAnswer {
                answer: NO_ANSWER.to_string(),
                sources: Vec::new(),
            });
        }

        let context = relevant_docs
            .iter()
            .map(|chunk| chunk.content.as_str())
            .collect::<Vec<&str>>()
            .join("\n\n");
        let prompt = build_prompt(&context, question);

        let answer = self.generator.generate(&prompt).await?;

        Ok(RagAnswer {
            answer,
            sources: relevant_docs,
        })
    }
}

pub fn build_prompt(context: &str, question: &str) -> String {
    format!(
        "Based on the following context, please answer the question. If you cannot answer based on the context alone, say so.\n\nContext:\n{}\n\nQuestion: {}",
        context, question
    )
}
