use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;

use support_rag::api;
use support_rag::config::AppConfig;
use support_rag::crawler::WebCrawler;
use support_rag::embeddings::Embedder;
use support_rag::gemini::GeminiClient;
use support_rag::ingest::{IngestionReport, Ingestor};
use support_rag::state::AppState;
use support_rag::vector_store::VectorStoreManager;

/// Customer-support RAG backend: ingest PDFs and support pages, answer questions over HTTP
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API (default)
    Serve {
        /// Address to listen on, overrides BIND_ADDRESS
        #[arg(long)]
        bind: Option<String>,
    },
    /// Extract a directory of PDFs and add them to the vector store
    IngestPdfs {
        pdf_dir: PathBuf,
        output_dir: PathBuf,
    },
    /// Crawl a website and add its pages to the vector store
    Crawl {
        base_url: String,
        output_dir: PathBuf,
    },
    /// Ingest the configured insurance PDFs and support site
    IngestAll,
    /// Answer one question from the command line
    Ask { question: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = AppConfig::from_env().context("Invalid configuration")?;

    match args.command.unwrap_or(Command::Serve { bind: None }) {
        Command::Serve { bind } => {
            let bind_address = bind.unwrap_or_else(|| config.bind_address.clone());
            let state = AppState::from_config(config)?;
            api::serve(state, &bind_address).await?;
        }
        Command::IngestPdfs {
            pdf_dir,
            output_dir,
        } => {
            let report = ingestor(&config)?
                .process_documents(&pdf_dir, &output_dir)
                .await?;
            print_report(&report);
        }
        Command::Crawl {
            base_url,
            output_dir,
        } => {
            let report = ingestor(&config)?
                .scrape_website(&base_url, &output_dir)
                .await?;
            print_report(&report);
        }
        Command::IngestAll => {
            let report = ingestor(&config)?.process_all().await?;
            print_report(&report);
        }
        Command::Ask { question } => {
            let state = AppState::from_config(config)?;
            let pipeline = state.pipeline().await?;
            let result = pipeline
                .answer_question(&question)
                .await
                .context("Failed to answer question")?;

            println!("{}", result.answer);
            for source in &result.sources {
                println!("  - {}", source.metadata.source);
            }
        }
    }

    Ok(())
}

fn ingestor(config: &AppConfig) -> Result<Ingestor> {
    let embedder = config
        .gemini
        .clone()
        .map(|gemini| Arc::new(GeminiClient::new(gemini)) as Arc<dyn Embedder>);

    Ok(Ingestor::new(
        embedder,
        Arc::new(VectorStoreManager::new(config.store.clone())),
        WebCrawler::new(config.crawler.clone())?,
        config.chunking,
        config.sources.clone(),
    ))
}

fn print_report(report: &IngestionReport) {
    info!(
        "Indexed {} chunks from {} documents",
        report.chunks, report.documents
    );
}
