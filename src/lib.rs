pub mod api;
pub mod chunking;
pub mod config;
pub mod crawler;
pub mod database;
pub mod document;
pub mod embeddings;
pub mod errors;
pub mod gemini;
pub mod ingest;
pub mod jobs;
pub mod local_store;
pub mod rag;
pub mod state;
pub mod vector_store;
