use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{error, info};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::ingest::{IngestionReport, Ingestor};

/// What an ingestion job processes
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobKind {
    Documents {
        pdf_directory: PathBuf,
        output_directory: PathBuf,
    },
    Website {
        base_url: String,
        output_directory: PathBuf,
    },
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: Uuid,
    #[serde(flatten)]
    pub kind: JobKind,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub report: Option<IngestionReport>,
    pub error: Option<String>,
}

/// Executes one ingestion job
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, kind: &JobKind) -> Result<IngestionReport>;
}

#[async_trait]
impl JobRunner for Ingestor {
    async fn run(&self, kind: &JobKind) -> Result<IngestionReport> {
        match kind {
            JobKind::Documents {
                pdf_directory,
                output_directory,
            } => self.process_documents(pdf_directory, output_directory).await,
            JobKind::Website {
                base_url,
                output_directory,
            } => self.scrape_website(base_url, output_directory).await,
            JobKind::All => self.process_all().await,
        }
    }
}

/// Finished jobs kept for status queries; older ones are evicted
pub const DEFAULT_RETAINED_JOBS: usize = 100;

/// Background ingestion queue.
///
/// Jobs run one at a time on a single worker task, so two ingestions never
/// write into the store concurrently. Pending and running jobs are always
/// kept; only the most recent finished jobs are retained.
#[derive(Clone)]
pub struct JobQueue {
    records: Arc<RwLock<HashMap<Uuid, JobRecord>>>,
    sender: mpsc::UnboundedSender<Uuid>,
}

impl JobQueue {
    /// Spawn the worker. Must be called inside a tokio runtime.
    pub fn start(runner: Arc<dyn JobRunner>) -> Self {
        Self::with_retention(runner, DEFAULT_RETAINED_JOBS)
    }

    /// Like `start`, keeping at most `retained` finished jobs
    pub fn with_retention(runner: Arc<dyn JobRunner>, retained: usize) -> Self {
        let records: Arc<RwLock<HashMap<Uuid, JobRecord>>> = Arc::new(RwLock::new(HashMap::new()));
        let (sender, mut receiver) = mpsc::unbounded_channel::<Uuid>();

        let worker_records = Arc::clone(&records);
        tokio::spawn(async move {
            while let Some(id) = receiver.recv().await {
                let Some(kind) = set_status(&worker_records, id, JobStatus::Running).await else {
                    continue;
                };
                info!("Starting job {} ({:?})", id, kind);

                let result = runner.run(&kind).await;

                let mut records = worker_records.write().await;
                if let Some(record) = records.get_mut(&id) {
                    record.updated_at = Utc::now();
                    match result {
                        Ok(report) => {
                            info!("Job {} succeeded: {} chunks", id, report.chunks);
                            record.status = JobStatus::Succeeded;
                            record.report = Some(report);
                        }
                        Err(e) => {
                            error!("Job {} failed: {:#}", id, e);
                            record.status = JobStatus::Failed;
                            record.error = Some(format!("{:#}", e));
                        }
                    }
                }
                evict_finished(&mut records, retained);
            }
        });

        JobQueue { records, sender }
    }

    /// Queue a job and return its pending record
    pub async fn submit(&self, kind: JobKind) -> Result<JobRecord> {
        let now = Utc::now();
        let record = JobRecord {
            id: Uuid::new_v4(),
            kind,
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            report: None,
            error: None,
        };

        self.records
            .write()
            .await
            .insert(record.id, record.clone());
        if self.sender.send(record.id).is_err() {
            self.records.write().await.remove(&record.id);
            anyhow::bail!("Job worker is not running");
        }
        Ok(record)
    }

    pub async fn get(&self, id: Uuid) -> Option<JobRecord> {
        self.records.read().await.get(&id).cloned()
    }

    /// All known jobs, oldest first
    pub async fn list(&self) -> Vec<JobRecord> {
        let mut jobs: Vec<JobRecord> = self.records.read().await.values().cloned().collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }
}

fn evict_finished(records: &mut HashMap<Uuid, JobRecord>, retained: usize) {
    let mut finished: Vec<(DateTime<Utc>, Uuid)> = records
        .values()
        .filter(|job| matches!(job.status, JobStatus::Succeeded | JobStatus::Failed))
        .map(|job| (job.updated_at, job.id))
        .collect();
    if finished.len() <= retained {
        return;
    }

    finished.sort();
    let excess = finished.len() - retained;
    for (_, id) in finished.into_iter().take(excess) {
        records.remove(&id);
    }
}

async fn set_status(
    records: &RwLock<HashMap<Uuid, JobRecord>>,
    id: Uuid,
    status: JobStatus,
) -> Option<JobKind> {
    let mut records = records.write().await;
    let record = records.get_mut(&id)?;
    record.status = status;
    record.updated_at = Utc::now();
    Some(record.kind.clone())
}
