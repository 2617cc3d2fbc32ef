use anyhow::Result;
use log::info;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::config::AppConfig;
use crate::crawler::WebCrawler;
use crate::embeddings::Embedder;
use crate::errors::RagError;
use crate::gemini::GeminiClient;
use crate::ingest::Ingestor;
use crate::jobs::JobQueue;
use crate::rag::{RagPipeline, Retriever, TextGenerator};
use crate::vector_store::VectorStoreManager;

/// Model backends shared by ingestion and question answering
#[derive(Clone)]
pub struct Providers {
    pub embedder: Arc<dyn Embedder>,
    pub generator: Arc<dyn TextGenerator>,
}

impl Providers {
    pub fn gemini(client: GeminiClient) -> Self {
        let client = Arc::new(client);
        Providers {
            embedder: client.clone(),
            generator: client,
        }
    }
}

/// Process-wide state handed to every request handler
pub struct AppState {
    pub config: AppConfig,
    providers: Option<Providers>,
    stores: Arc<VectorStoreManager>,
    pipeline: OnceCell<Arc<RagPipeline>>,
    pub jobs: JobQueue,
}

impl AppState {
    /// Wire up state from explicit providers. `None` means no API key is
    /// configured: the server still starts but chat and ingestion fail.
    ///
    /// Spawns the ingestion worker, so it must run inside a tokio runtime.
    pub fn new(config: AppConfig, providers: Option<Providers>) -> Result<Arc<Self>> {
        let stores = Arc::new(VectorStoreManager::new(config.store.clone()));
        let ingestor = Ingestor::new(
            providers.as_ref().map(|p| Arc::clone(&p.embedder)),
            Arc::clone(&stores),
            WebCrawler::new(config.crawler.clone())?,
            config.chunking,
            config.sources.clone(),
        );
        let jobs = JobQueue::start(Arc::new(ingestor));

        Ok(Arc::new(AppState {
            config,
            providers,
            stores,
            pipeline: OnceCell::new(),
            jobs,
        }))
    }

    /// Build providers from the Gemini settings, if any
    pub fn from_config(config: AppConfig) -> Result<Arc<Self>> {
        let providers = config
            .gemini
            .clone()
            .map(|gemini| Providers::gemini(GeminiClient::new(gemini)));
        Self::new(config, providers)
    }

    /// The query pipeline, built on first use.
    ///
    /// A failed build is not cached, so a later call retries once documents
    /// have been processed.
    pub async fn pipeline(&self) -> Result<Arc<RagPipeline>, RagError> {
        self.pipeline
            .get_or_try_init(|| async {
                let providers = self.providers.as_ref().ok_or(RagError::MissingApiKey)?;
                let store = self.stores.load().await?;
                info!("Initialized RAG pipeline");

                let retriever = Retriever::new(
                    store,
                    Arc::clone(&providers.embedder),
                    self.config.retrieval_k,
                );
                Ok::<_, RagError>(Arc::new(RagPipeline::new(
                    retriever,
                    Arc::clone(&providers.generator),
                )))
            })
            .await
            .cloned()
    }

    pub fn pipeline_ready(&self) -> bool {
        self.pipeline.initialized()
    }
}
