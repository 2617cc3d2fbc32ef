//! On-disk vector store: one JSON index file inside the persist directory,
//! searched exhaustively by cosine similarity.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use crate::chunking::TextChunk;
use crate::document::DocumentMetadata;
use crate::embeddings::{cosine_similarity, Embedding};
use crate::vector_store::{ScoredChunk, StoredChunk, VectorStore};

const INDEX_FILE: &str = "index.json";
const INDEX_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    content: String,
    metadata: DocumentMetadata,
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    entries: Vec<Entry>,
}

pub struct LocalStore {
    directory: PathBuf,
    entries: RwLock<Vec<Entry>>,
}

impl LocalStore {
    /// Open an existing store, `None` if the directory holds no index
    pub fn open<P: AsRef<Path>>(directory: P) -> Result<Option<Self>> {
        let directory = directory.as_ref();
        let index_path = directory.join(INDEX_FILE);
        if !index_path.is_file() {
            return Ok(None);
        }

        let raw = fs::read_to_string(&index_path)
            .with_context(|| format!("Failed to read {}", index_path.display()))?;
        let index: IndexFile = serde_json::from_str(&raw)
            .with_context(|| format!("Corrupt vector index {}", index_path.display()))?;
        if index.version != INDEX_VERSION {
            bail!(
                "Unsupported vector index version {} in {}",
                index.version,
                index_path.display()
            );
        }

        debug!(
            "Opened local vector store with {} entries",
            index.entries.len()
        );
        Ok(Some(LocalStore {
            directory: directory.to_path_buf(),
            entries: RwLock::new(index.entries),
        }))
    }

    /// Open the store, or start an empty one that is written on first `add`
    pub fn open_or_create<P: AsRef<Path>>(directory: P) -> Result<Self> {
        let directory = directory.as_ref();
        match Self::open(directory)? {
            Some(store) => Ok(store),
            None => Ok(LocalStore {
                directory: directory.to_path_buf(),
                entries: RwLock::new(Vec::new()),
            }),
        }
    }

    async fn persist(&self, entries: &[Entry]) -> Result<()> {
        tokio::fs::create_dir_all(&self.directory)
            .await
            .with_context(|| format!("Failed to create {}", self.directory.display()))?;

        let index = IndexFileRef {
            version: INDEX_VERSION,
            entries,
        };
        let serialized = serde_json::to_vec(&index)?;

        // index.json is replaced atomically via rename
        let tmp_path = self.directory.join(format!("{}.tmp", INDEX_FILE));
        tokio::fs::write(&tmp_path, serialized)
            .await
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, self.directory.join(INDEX_FILE))
            .await
            .with_context(|| format!("Failed to replace index in {}", self.directory.display()))?;
        Ok(())
    }
}

#[derive(Serialize)]
struct IndexFileRef<'a> {
    version: u32,
    entries: &'a [Entry],
}

#[async_trait]
impl VectorStore for LocalStore {
    async fn add(&self, new_entries: Vec<(TextChunk, Embedding)>) -> Result<()> {
        let mut entries = self.entries.write().await;

        let expected_dimension = entries
            .first()
            .map(|e| e.embedding.len())
            .or_else(|| new_entries.first().map(|(_, e)| e.dimension()));
        if let Some(dimension) = expected_dimension {
            if let Some((_, bad)) = new_entries.iter().find(|(_, e)| e.dimension() != dimension) {
                bail!(
                    "Embedding dimension {} does not match store dimension {}",
                    bad.dimension(),
                    dimension
                );
            }
        }

        let previous_len = entries.len();
        entries.extend(new_entries.into_iter().map(|(chunk, embedding)| Entry {
            content: chunk.text,
            metadata: chunk.metadata,
            embedding: embedding.values,
        }));

        if let Err(e) = self.persist(&entries).await {
            // Keep memory consistent with disk
            entries.truncate(previous_len);
            return Err(e);
        }
        Ok(())
    }

    async fn similarity_search(&self, query: &Embedding, limit: usize) -> Result<Vec<ScoredChunk>> {
        let entries = self.entries.read().await;

        let mut scored: Vec<(usize, f32)> = Vec::with_capacity(entries.len());
        for (idx, entry) in entries.iter().enumerate() {
            if entry.embedding.len() != query.dimension() {
                bail!(
                    "Query embedding dimension {} does not match store dimension {}",
                    query.dimension(),
                    entry.embedding.len()
                );
            }
            scored.push((idx, cosine_similarity(&query.values, &entry.embedding)));
        }

        scored.sort_by(|left, right| right.1.partial_cmp(&left.1).unwrap_or(Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(idx, score)| ScoredChunk {
                chunk: StoredChunk {
                    content: entries[idx].content.clone(),
                    metadata: entries[idx].metadata.clone(),
                },
                score,
            })
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }
}
