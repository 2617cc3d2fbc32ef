use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use support_rag::api::router;
use support_rag::config::AppConfig;
use support_rag::embeddings::{Embedder, Embedding};
use support_rag::rag::TextGenerator;
use support_rag::state::{AppState, Providers};

/// Bag-of-letters embedding, enough to rank short sentences
struct LetterEmbedder;

#[async_trait]
impl Embedder for LetterEmbedder {
    async fn get_embedding(&self, text: &str) -> Result<Embedding> {
        let lower = text.to_lowercase();
        let values = ['a', 'd', 'e', 'f', 'r', 's']
            .iter()
            .map(|c| lower.matches(*c).count() as f32 + 0.01)
            .collect::<Vec<f32>>();
        Ok(Embedding::from(values))
    }
}

#[derive(Default)]
struct RecordingGenerator {
    prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl TextGenerator for RecordingGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok("Refunds are processed within 5 days.".to_string())
    }
}

struct TestServer {
    base: String,
    dir: TempDir,
    generator: Arc<RecordingGenerator>,
    client: reqwest::Client,
}

async fn start_server(with_key: bool) -> TestServer {
    let dir = tempdir().unwrap();
    let vars: HashMap<&str, String> = HashMap::from([(
        "PERSIST_DIRECTORY",
        dir.path().join("store").display().to_string(),
    )]);
    let config = AppConfig::from_lookup(|key| vars.get(key).cloned()).unwrap();

    let generator = Arc::new(RecordingGenerator::default());
    let providers = with_key.then(|| Providers {
        embedder: Arc::new(LetterEmbedder),
        generator: generator.clone(),
    });
    let state = AppState::new(config, providers).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });

    TestServer {
        base: format!("http://{}", addr),
        dir,
        generator,
        client: reqwest::Client::new(),
    }
}

impl TestServer {
    async fn post(&self, route: &str, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.base, route))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn get(&self, route: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.base, route))
            .send()
            .await
            .unwrap()
    }

    async fn wait_for_job(&self, job_id: &str) -> Value {
        for _ in 0..300 {
            let job: Value = self
                .get(&format!("/process/jobs/{}", job_id))
                .await
                .json()
                .await
                .unwrap();
            if job["status"] == "succeeded" || job["status"] == "failed" {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job {job_id} did not finish");
    }
}

async fn support_site() -> MockServer {
    let site = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<html><body><main>Refunds take 5 days.</main></body></html>",
        ))
        .mount(&site)
        .await;
    site
}

#[tokio::test]
async fn test_root_and_health() {
    let server = start_server(true).await;

    let root: Value = server.get("/").await.json().await.unwrap();
    assert_eq!(root, json!({ "message": "RAG Customer Support Chatbot API" }));

    let health: Value = server.get("/health").await.json().await.unwrap();
    assert_eq!(health, json!({ "status": "ok", "pipeline_ready": false }));
}

#[tokio::test]
async fn test_chat_without_store_is_not_found() {
    let server = start_server(true).await;

    let response = server
        .post("/chat", json!({ "question": "How long do refunds take?" }))
        .await;
    assert_eq!(response.status(), 404);

    let body: Value = response.json().await.unwrap();
    assert!(body["detail"]
        .as_str()
        .unwrap()
        .contains("Vector store not found."));
}

#[tokio::test]
async fn test_empty_question_is_rejected() {
    let server = start_server(true).await;

    let response = server.post("/chat", json!({ "question": "   " })).await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_chat_without_api_key() {
    let server = start_server(false).await;

    let response = server.post("/chat", json!({ "question": "Hello?" })).await;
    assert_eq!(response.status(), 500);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["detail"], "GEMINI API key not configured");
}

#[tokio::test]
async fn test_scrape_then_chat() {
    let site = support_site().await;
    let server = start_server(true).await;
    let pages = server.dir.path().join("pages");

    let response = server
        .post(
            "/process/website",
            json!({ "base_url": site.uri(), "output_directory": pages }),
        )
        .await;
    assert_eq!(response.status(), 202);
    let accepted: Value = response.json().await.unwrap();
    assert_eq!(accepted["status"], "pending");
    assert_eq!(accepted["message"], "Website scraping started in background");

    let job = server
        .wait_for_job(accepted["job_id"].as_str().unwrap())
        .await;
    assert_eq!(job["status"], "succeeded");
    assert_eq!(job["report"]["chunks"], 1);

    let response = server
        .post("/chat", json!({ "question": "How long do refunds take?\n" }))
        .await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();

    assert_eq!(body["confidence"], "high");
    assert_eq!(body["answer"], "Refunds are processed within 5 days.");
    assert_eq!(body["sources"][0]["content"], "Refunds take 5 days.");
    assert_eq!(body["sources"][0]["metadata"]["type"], "webpage");

    let prompts = server.generator.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Refunds take 5 days."));
    assert!(prompts[0].ends_with("Question: How long do refunds take?\n"));
}

#[tokio::test]
async fn test_failed_job_is_reported() {
    let server = start_server(true).await;
    let missing = server.dir.path().join("no-such-dir");

    let response = server
        .post(
            "/process/documents",
            json!({ "pdf_directory": missing, "output_directory": server.dir.path().join("out") }),
        )
        .await;
    assert_eq!(response.status(), 202);
    let accepted: Value = response.json().await.unwrap();

    let job = server
        .wait_for_job(accepted["job_id"].as_str().unwrap())
        .await;
    assert_eq!(job["status"], "failed");
    assert!(job["error"].as_str().is_some());

    let jobs: Value = server.get("/process/jobs").await.json().await.unwrap();
    assert_eq!(jobs.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let server = start_server(true).await;

    let response = server
        .get("/process/jobs/00000000-0000-0000-0000-000000000000")
        .await;
    assert_eq!(response.status(), 404);
}
