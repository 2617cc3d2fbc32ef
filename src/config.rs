use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::chunking::ChunkingConfig;
use crate::crawler::CrawlerConfig;
use crate::database::{QdrantConfig, DEFAULT_COLLECTION, DEFAULT_QDRANT_URL};
use crate::gemini::{
    GeminiConfig, DEFAULT_EMBEDDINGS_URL, DEFAULT_EMBEDDING_MODEL, DEFAULT_GENERATE_URL,
    DEFAULT_TEMPERATURE,
};
use crate::rag::DEFAULT_TOP_K;
use crate::vector_store::StoreBackend;

/// Inputs of the "process everything" job
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultSources {
    pub insurance_pdf_directory: PathBuf,
    pub insurance_output_directory: PathBuf,
    pub support_site_url: String,
    pub support_output_directory: PathBuf,
}

/// Application configuration, read from the environment
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// `None` when no API key is configured
    pub gemini: Option<GeminiConfig>,
    pub chunking: ChunkingConfig,
    pub retrieval_k: usize,
    pub store: StoreBackend,
    pub bind_address: String,
    pub crawler: CrawlerConfig,
    pub sources: DefaultSources,
}

impl AppConfig {
    /// Create a new configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let var_or = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let gemini = match var("GEMINI_API_KEY") {
            Some(api_key) => Some(GeminiConfig {
                api_key,
                embeddings_url: var_or("GEMINI_EMBEDDINGS_URL", DEFAULT_EMBEDDINGS_URL),
                generate_url: var_or("GEMINI_GENERATE_URL", DEFAULT_GENERATE_URL),
                embedding_model: var_or("GEMINI_EMBEDDING_MODEL", DEFAULT_EMBEDDING_MODEL),
                temperature: parse(&var, "GEMINI_TEMPERATURE")?.unwrap_or(DEFAULT_TEMPERATURE),
            }),
            None => None,
        };

        let defaults = ChunkingConfig::default();
        let chunking = ChunkingConfig::new(
            parse(&var, "CHUNK_SIZE")?.unwrap_or(defaults.chunk_size),
            parse(&var, "CHUNK_OVERLAP")?.unwrap_or(defaults.chunk_overlap),
        )?;

        let retrieval_k = parse(&var, "RETRIEVAL_K")?.unwrap_or(DEFAULT_TOP_K);
        if retrieval_k == 0 {
            bail!("RETRIEVAL_K must be greater than zero");
        }

        let store = match var_or("VECTOR_STORE_BACKEND", "local").to_lowercase().as_str() {
            "local" => StoreBackend::Local {
                persist_directory: PathBuf::from(var_or(
                    "PERSIST_DIRECTORY",
                    "data/processed/vector_store",
                )),
            },
            "qdrant" => StoreBackend::Qdrant(QdrantConfig {
                url: var_or("QDRANT_URL", DEFAULT_QDRANT_URL),
                api_key: var("QDRANT_API_KEY"),
                collection: var_or("QDRANT_COLLECTION", DEFAULT_COLLECTION),
            }),
            other => bail!(
                "Unknown VECTOR_STORE_BACKEND '{}', expected 'local' or 'qdrant'",
                other
            ),
        };

        let crawler_defaults = CrawlerConfig::default();
        let crawler = CrawlerConfig {
            user_agent: var_or("CRAWL_USER_AGENT", &crawler_defaults.user_agent),
            timeout_seconds: parse(&var, "CRAWL_TIMEOUT_SECONDS")?
                .unwrap_or(crawler_defaults.timeout_seconds),
            max_pages: parse(&var, "CRAWL_MAX_PAGES")?,
            max_depth: parse(&var, "CRAWL_MAX_DEPTH")?,
        };

        let sources = DefaultSources {
            insurance_pdf_directory: var_or("INSURANCE_PDF_DIRECTORY", "Insurance PDFs").into(),
            insurance_output_directory: var_or("INSURANCE_OUTPUT_DIRECTORY", "data/insurance_docs")
                .into(),
            support_site_url: var_or("SUPPORT_SITE_URL", "https://support.angelone.in"),
            support_output_directory: var_or("SUPPORT_OUTPUT_DIRECTORY", "data/angelone_support")
                .into(),
        };

        Ok(AppConfig {
            gemini,
            chunking,
            retrieval_k,
            store,
            bind_address: var_or("BIND_ADDRESS", "0.0.0.0:8000"),
            crawler,
            sources,
        })
    }
}

fn parse<T, F>(var: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    var(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("Invalid value for {}: '{}'", key, raw))
        })
        .transpose()
}
