use anyhow::{bail, Result};
use log::{error, info};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::chunking::{split_documents, ChunkingConfig};
use crate::config::DefaultSources;
use crate::crawler::WebCrawler;
use crate::document::{extract_pdf_directory, load_documents, DocumentMetadata};
use crate::embeddings::Embedder;
use crate::errors::RagError;
use crate::vector_store::VectorStoreManager;

/// Outcome of a successful ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestionReport {
    /// Metadata records produced by extraction or crawling
    pub documents: usize,
    /// Chunks embedded into the vector store
    pub chunks: usize,
}

/// Runs the extract → chunk → embed → persist pipeline
pub struct Ingestor {
    embedder: Option<Arc<dyn Embedder>>,
    stores: Arc<VectorStoreManager>,
    crawler: WebCrawler,
    chunking: ChunkingConfig,
    sources: DefaultSources,
}

impl Ingestor {
    pub fn new(
        embedder: Option<Arc<dyn Embedder>>,
        stores: Arc<VectorStoreManager>,
        crawler: WebCrawler,
        chunking: ChunkingConfig,
        sources: DefaultSources,
    ) -> Self {
        Ingestor {
            embedder,
            stores,
            crawler,
            chunking,
            sources,
        }
    }

    /// Extract a directory of PDFs and index the results
    pub async fn process_documents(
        &self,
        pdf_directory: &Path,
        output_directory: &Path,
    ) -> Result<IngestionReport> {
        let result = async {
            let metadata_list = extract_pdf_directory(pdf_directory, output_directory).await?;
            info!("Processed {} documents", metadata_list.len());
            self.index(&metadata_list).await
        }
        .await;

        if let Err(e) = &result {
            error!("Error processing documents: {:#}", e);
        }
        result
    }

    /// Crawl a website and index the pages
    pub async fn scrape_website(
        &self,
        base_url: &str,
        output_directory: &Path,
    ) -> Result<IngestionReport> {
        let result = async {
            let metadata_list = self.crawler.crawl(base_url, output_directory).await?;
            info!("Scraped {} pages", metadata_list.len());
            self.index(&metadata_list).await
        }
        .await;

        if let Err(e) = &result {
            error!("Error scraping website: {:#}", e);
        }
        result
    }

    /// Ingest the configured PDF directory and support site in one batch
    pub async fn process_all(&self) -> Result<IngestionReport> {
        let result = async {
            let sources = &self.sources;
            let pdf_metadata = extract_pdf_directory(
                &sources.insurance_pdf_directory,
                &sources.insurance_output_directory,
            )
            .await?;
            let site_metadata = self
                .crawler
                .crawl(&sources.support_site_url, &sources.support_output_directory)
                .await?;

            info!(
                "Processed {} insurance documents and {} support pages",
                pdf_metadata.len(),
                site_metadata.len()
            );

            let mut metadata_list = pdf_metadata;
            metadata_list.extend(site_metadata);
            self.index(&metadata_list).await
        }
        .await;

        if let Err(e) = &result {
            error!("Error in process_all: {:#}", e);
        }
        result
    }

    async fn index(&self, metadata_list: &[DocumentMetadata]) -> Result<IngestionReport> {
        let Some(embedder) = self.embedder.as_deref() else {
            return Err(RagError::MissingApiKey.into());
        };
        if metadata_list.is_empty() {
            bail!("No documents were produced, nothing to index");
        }

        let documents = load_documents(metadata_list);
        let chunks = split_documents(&documents, &self.chunking);
        if chunks.is_empty() {
            bail!("No documents could be loaded for indexing");
        }
        info!(
            "Split {} documents into {} chunks",
            documents.len(),
            chunks.len()
        );

        let stored = self.stores.build(embedder, chunks).await?;
        info!("Vector store created successfully");

        Ok(IngestionReport {
            documents: metadata_list.len(),
            chunks: stored,
        })
    }
}
