use crate::chunking::TextChunk;
use crate::document::{DocumentMetadata, SourceType};
use crate::embeddings::Embedding;
use crate::vector_store::{ScoredChunk, StoredChunk, VectorStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use qdrant_client::qdrant::{
    CountPointsBuilder, CreateCollectionBuilder, Distance, PointStruct, SearchPointsBuilder,
    UpsertPointsBuilder, Value, VectorParams,
};
use qdrant_client::{Payload, Qdrant};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use uuid::Uuid;

pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6334";
pub const DEFAULT_COLLECTION: &str = "support_rag";

/// Configuration for Qdrant
#[derive(Debug, Clone, PartialEq)]
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub collection: String,
}

/// Vector store backed by a single Qdrant collection
pub struct QdrantStore {
    client: Qdrant,
    collection: String,
    /// Whether the collection is known to exist
    ready: Mutex<bool>,
}

impl QdrantStore {
    /// Create a client without touching the server. The collection is created
    /// lazily on the first `add`.
    pub fn connect(config: QdrantConfig) -> Result<Self> {
        let config_builder = Qdrant::from_url(&config.url);
        let config_builder = if let Some(api_key) = config.api_key {
            config_builder.api_key(api_key)
        } else {
            config_builder
        };

        let client = config_builder
            .build()
            .with_context(|| format!("Failed to initialize Qdrant client for {}", config.url))?;

        Ok(QdrantStore {
            client,
            collection: config.collection,
            ready: Mutex::new(false),
        })
    }

    /// Connect to an existing collection, `None` if it has not been created
    pub async fn open(config: QdrantConfig) -> Result<Option<Self>> {
        let store = Self::connect(config)?;
        if !store.collection_exists().await? {
            return Ok(None);
        }
        *store.ready.lock().await = true;
        Ok(Some(store))
    }

    /// Check if the collection exists
    pub async fn collection_exists(&self) -> Result<bool> {
        self.client
            .collection_exists(self.collection.as_str())
            .await
            .with_context(|| format!("Failed to check collection {}", self.collection))
    }

    async fn ensure_collection(&self, vector_size: u64) -> Result<()> {
        let mut ready = self.ready.lock().await;
        if *ready {
            return Ok(());
        }

        if !self.collection_exists().await? {
            let create_collection = CreateCollectionBuilder::new(self.collection.clone())
                .vectors_config(VectorParams {
                    size: vector_size,
                    distance: Distance::Cosine.into(),
                    ..Default::default()
                });

            self.client
                .create_collection(create_collection)
                .await
                .with_context(|| format!("Failed to create collection {}", self.collection))?;
            debug!("Created collection {}", self.collection);
        }

        *ready = true;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn add(&self, entries: Vec<(TextChunk, Embedding)>) -> Result<()> {
        let Some(vector_size) = entries.first().map(|(_, e)| e.dimension() as u64) else {
            return Ok(());
        };
        self.ensure_collection(vector_size).await?;

        let points = entries
            .into_iter()
            .map(|(chunk, embedding)| {
                let payload = Payload::try_from(json!({
                    "content": chunk.text,
                    "source": chunk.metadata.source,
                    "type": chunk.metadata.source_type,
                    "path": chunk.metadata.path,
                    "start_position": chunk.start_position,
                }))?;
                Ok(PointStruct::new(
                    Uuid::new_v4().to_string(),
                    embedding.values,
                    payload,
                ))
            })
            .collect::<Result<Vec<PointStruct>>>()?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(self.collection.clone(), points).wait(true))
            .await
            .with_context(|| format!("Failed to upsert points in collection {}", self.collection))?;

        Ok(())
    }

    async fn similarity_search(&self, query: &Embedding, limit: usize) -> Result<Vec<ScoredChunk>> {
        let search_request =
            SearchPointsBuilder::new(self.collection.clone(), query.values.clone(), limit as u64)
                .with_payload(true);

        let search_response = self
            .client
            .search_points(search_request)
            .await
            .with_context(|| format!("Failed to search collection {}", self.collection))?;

        let chunks = search_response
            .result
            .into_iter()
            .filter_map(|scored_point| {
                let score = scored_point.score;
                let chunk = stored_chunk_from_payload(&scored_point.payload);
                if chunk.is_none() {
                    warn!("Skipping point without content in {}", self.collection);
                }
                chunk.map(|chunk| ScoredChunk { chunk, score })
            })
            .collect();

        Ok(chunks)
    }

    async fn count(&self) -> Result<usize> {
        let response = self
            .client
            .count(CountPointsBuilder::new(self.collection.clone()).exact(true))
            .await
            .with_context(|| format!("Failed to count points in {}", self.collection))?;

        Ok(response.result.map(|r| r.count as usize).unwrap_or(0))
    }
}

/// Rebuild a chunk from the payload written by `add`
fn stored_chunk_from_payload(payload: &HashMap<String, Value>) -> Option<StoredChunk> {
    let text_field = |key: &str| payload.get(key).and_then(|v| v.as_str()).cloned();

    let content = text_field("content")?;
    let source_type = match text_field("type").as_deref() {
        Some("webpage") => SourceType::Webpage,
        _ => SourceType::Pdf,
    };

    Some(StoredChunk {
        content,
        metadata: DocumentMetadata {
            source: text_field("source").unwrap_or_default(),
            source_type,
            path: PathBuf::from(text_field("path").unwrap_or_default()),
        },
    })
}
