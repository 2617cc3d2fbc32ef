use anyhow::Result;
use async_trait::async_trait;
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::chunking::TextChunk;
use crate::database::{QdrantConfig, QdrantStore};
use crate::document::DocumentMetadata;
use crate::embeddings::{Embedder, Embedding};
use crate::errors::RagError;
use crate::local_store::LocalStore;

/// A chunk as it comes back out of the store, cited as an answer source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChunk {
    pub content: String,
    pub metadata: DocumentMetadata,
}

/// Result of a similarity search
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: StoredChunk,
    /// Similarity score (higher = closer)
    pub score: f32,
}

/// Persisted collection of embedded chunks supporting nearest-neighbour search
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Append chunks with their embeddings and persist them
    async fn add(&self, entries: Vec<(TextChunk, Embedding)>) -> Result<()>;

    /// Return at most `limit` chunks ordered by decreasing similarity
    async fn similarity_search(&self, query: &Embedding, limit: usize) -> Result<Vec<ScoredChunk>>;

    async fn count(&self) -> Result<usize>;
}

/// Where the vector store lives
#[derive(Debug, Clone, PartialEq)]
pub enum StoreBackend {
    /// A directory on local disk
    Local { persist_directory: PathBuf },
    Qdrant(QdrantConfig),
}

impl StoreBackend {
    pub fn describe(&self) -> String {
        match self {
            StoreBackend::Local { persist_directory } => persist_directory.display().to_string(),
            StoreBackend::Qdrant(config) => format!("{} ({})", config.url, config.collection),
        }
    }
}

/// Bridges chunks and the persisted store. Holds the single opened store so
/// ingestion and queries share one instance.
pub struct VectorStoreManager {
    backend: StoreBackend,
    store: Mutex<Option<Arc<dyn VectorStore>>>,
}

impl VectorStoreManager {
    pub fn new(backend: StoreBackend) -> Self {
        VectorStoreManager {
            backend,
            store: Mutex::new(None),
        }
    }

    /// Embed every chunk and append the results to the store, creating it if needed.
    /// Returns the number of chunks written.
    pub async fn build(&self, embedder: &dyn Embedder, chunks: Vec<TextChunk>) -> Result<usize> {
        let result = self.embed_and_store(embedder, chunks).await;
        if let Err(e) = &result {
            error!("Error creating vector store: {:#}", e);
        }
        result
    }

    async fn embed_and_store(
        &self,
        embedder: &dyn Embedder,
        chunks: Vec<TextChunk>,
    ) -> Result<usize> {
        let mut entries = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let embedding = embedder.get_embedding(&chunk.text).await?;
            entries.push((chunk, embedding));
        }
        let count = entries.len();

        let store = self.open_or_create().await?;
        store.add(entries).await?;

        info!("Stored {} chunks in {}", count, self.backend.describe());
        Ok(count)
    }

    /// Open the existing store. Fails if nothing has been persisted yet.
    pub async fn load(&self) -> Result<Arc<dyn VectorStore>, RagError> {
        let mut guard = self.store.lock().await;
        if let Some(store) = guard.as_ref() {
            return Ok(Arc::clone(store));
        }

        let store: Arc<dyn VectorStore> = match &self.backend {
            StoreBackend::Local { persist_directory } => match LocalStore::open(persist_directory)? {
                Some(store) => Arc::new(store),
                None => return Err(RagError::VectorStoreNotFound),
            },
            StoreBackend::Qdrant(config) => match QdrantStore::open(config.clone()).await? {
                Some(store) => Arc::new(store),
                None => return Err(RagError::VectorStoreNotFound),
            },
        };

        info!("Loaded vector store from {}", self.backend.describe());
        *guard = Some(Arc::clone(&store));
        Ok(store)
    }

    async fn open_or_create(&self) -> Result<Arc<dyn VectorStore>> {
        let mut guard = self.store.lock().await;
        if let Some(store) = guard.as_ref() {
            return Ok(Arc::clone(store));
        }

        let store: Arc<dyn VectorStore> = match &self.backend {
            StoreBackend::Local { persist_directory } => {
                Arc::new(LocalStore::open_or_create(persist_directory)?)
            }
            StoreBackend::Qdrant(config) => Arc::new(QdrantStore::connect(config.clone())?),
        };

        *guard = Some(Arc::clone(&store));
        Ok(store)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::document::SourceType;
    use anyhow::bail;
    use tempfile::tempdir;

    /// Deterministic embedder: counts a few letters so related texts land close together
    pub(crate) struct LetterEmbedder;

    #[async_trait]
    impl Embedder for LetterEmbedder {
        async fn get_embedding(&self, text: &str) -> Result<Embedding> {
            let lower = text.to_lowercase();
            let values = ['a', 'e', 'r', 's', 'x']
                .iter()
                .map(|c| lower.matches(*c).count() as f32 + 0.01)
                .collect();
            Ok(Embedding { values })
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn get_embedding(&self, _text: &str) -> Result<Embedding> {
            bail!("quota exceeded")
        }
    }

    pub(crate) fn chunk(text: &str, source: &str) -> TextChunk {
        TextChunk {
            text: text.to_string(),
            metadata: DocumentMetadata {
                source: source.to_string(),
                source_type: SourceType::Webpage,
                path: PathBuf::from("0000.txt"),
            },
            start_position: 0,
        }
    }

    #[tokio::test]
    async fn test_load_before_build_is_not_found() {
        let dir = tempdir().unwrap();
        let manager = VectorStoreManager::new(StoreBackend::Local {
            persist_directory: dir.path().join("store"),
        });

        assert!(matches!(
            manager.load().await,
            Err(RagError::VectorStoreNotFound)
        ));
    }

    #[tokio::test]
    async fn test_build_then_load_shares_store() {
        let dir = tempdir().unwrap();
        let manager = VectorStoreManager::new(StoreBackend::Local {
            persist_directory: dir.path().join("store"),
        });

        let written = manager
            .build(&LetterEmbedder, vec![chunk("Refunds take 5 days.", "faq")])
            .await
            .unwrap();
        assert_eq!(written, 1);

        let store = manager.load().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);

        manager
            .build(&LetterEmbedder, vec![chunk("Shipping is free.", "faq")])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_embedding_failure_is_returned() {
        let dir = tempdir().unwrap();
        let persist_directory = dir.path().join("store");
        let manager = VectorStoreManager::new(StoreBackend::Local {
            persist_directory: persist_directory.clone(),
        });

        let err = manager
            .build(&FailingEmbedder, vec![chunk("text", "faq")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
        assert!(!persist_directory.exists());
    }
}
