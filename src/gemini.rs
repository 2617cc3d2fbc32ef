use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::embeddings::{Embedder, Embedding};
use crate::rag::TextGenerator;

pub const DEFAULT_EMBEDDINGS_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/embedding-001:embedContent";
pub const DEFAULT_GENERATE_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_EMBEDDING_MODEL: &str = "models/embedding-001";

/// Configuration for Gemini API
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub embeddings_url: String,
    pub generate_url: String,
    pub embedding_model: String,
    pub temperature: f32,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        GeminiConfig {
            api_key: api_key.into(),
            embeddings_url: DEFAULT_EMBEDDINGS_URL.to_string(),
            generate_url: DEFAULT_GENERATE_URL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

/// Client for interacting with Gemini API
#[derive(Clone)]
pub struct GeminiClient {
    config: GeminiConfig,
    client: reqwest::Client,
}

impl GeminiClient {
    /// Create a new Gemini client
    pub fn new(config: GeminiConfig) -> Self {
        let client = reqwest::Client::new();
        GeminiClient { config, client }
    }

    /// Generate embeddings for a text
    pub async fn embed_text(&self, text: &str) -> Result<Embedding> {
        let request = EmbeddingRequest {
            model: &self.config.embedding_model,
            content: Content {
                parts: vec![Part { text }],
                role: None,
            },
        };

        let url = format!("{}?key={}", self.config.embeddings_url, self.config.api_key);
        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "Embedding request failed: {} {}",
                status,
                error_text
            ));
        }

        let response_data: EmbeddingResponse = response.json().await?;
        debug!(
            "Received embedding with {} dimensions",
            response_data.embedding.values.len()
        );

        Ok(Embedding {
            values: response_data.embedding.values,
        })
    }

    /// Generate text for a prompt in a single call
    pub async fn generate_text(&self, prompt: &str) -> Result<String> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
                role: Some("user"),
            }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
            },
        };

        let url = format!("{}?key={}", self.config.generate_url, self.config.api_key);
        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "Generation request failed: {} {}",
                status,
                error_text
            ));
        }

        let response_data: GenerateResponse = response.json().await?;

        // Extract the generated text from the response
        response_data
            .candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<String>()
            })
            .filter(|text| !text.is_empty())
            .ok_or_else(|| anyhow!("No response generated"))
    }
}

#[async_trait]
impl Embedder for GeminiClient {
    async fn get_embedding(&self, text: &str) -> Result<Embedding> {
        self.embed_text(text).await
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.generate_text(prompt).await
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    content: Content<'a>,
}

#[derive(Deserialize, Debug)]
struct EmbeddingResponse {
    embedding: EmbeddingData,
}

#[derive(Deserialize, Debug)]
struct EmbeddingData {
    values: Vec<f32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize, Debug)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Deserialize, Debug)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}
