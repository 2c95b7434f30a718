use crate::ingestion::IngestionPipeline;
use serde::Serialize;
use sitechat_common::{IngestionReport, Result, SiteChatError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info};
use uuid::Uuid;

/// Observable state of a submitted ingestion job.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded { report: IngestionReport },
    Failed { error: String },
}

#[derive(Debug)]
struct IngestionJob {
    id: Uuid,
    tenant_id: Uuid,
    url: String,
}

/// In-process task queue for background ingestion.
///
/// Jobs run on a single worker in submission order, which also serializes
/// concurrent ingestion of the same (tenant, url) pair. Failures land in the
/// status map instead of disappearing into a dropped future.
pub struct IngestionQueue {
    sender: mpsc::Sender<IngestionJob>,
    statuses: Arc<RwLock<HashMap<Uuid, JobStatus>>>,
}

impl IngestionQueue {
    pub fn start(pipeline: Arc<IngestionPipeline>, capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<IngestionJob>(capacity);
        let statuses: Arc<RwLock<HashMap<Uuid, JobStatus>>> = Arc::new(RwLock::new(HashMap::new()));

        let worker_statuses = statuses.clone();
        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                {
                    let mut map = worker_statuses.write().await;
                    map.insert(job.id, JobStatus::Running);
                }
                info!(job_id = %job.id, tenant_id = %job.tenant_id, url = %job.url, "ingestion job started");

                let outcome = pipeline.ingest(job.tenant_id, &job.url).await;
                let mut map = worker_statuses.write().await;
                match outcome {
                    Ok(report) => {
                        info!(job_id = %job.id, stored = report.chunks_stored, "ingestion job succeeded");
                        map.insert(job.id, JobStatus::Succeeded { report });
                    }
                    Err(e) => {
                        error!(job_id = %job.id, error = %e, "ingestion job failed");
                        map.insert(
                            job.id,
                            JobStatus::Failed {
                                error: e.to_string(),
                            },
                        );
                    }
                }
            }
        });

        Self { sender, statuses }
    }

    /// Enqueues a job and returns its id; the caller polls `status` for the
    /// outcome.
    pub async fn submit(&self, tenant_id: Uuid, url: String) -> Result<Uuid> {
        let id = Uuid::new_v4();
        {
            let mut map = self.statuses.write().await;
            map.insert(id, JobStatus::Queued);
        }
        self.sender
            .send(IngestionJob { id, tenant_id, url })
            .await
            .map_err(|_| SiteChatError::Internal("ingestion queue is closed".to_string()))?;
        Ok(id)
    }

    pub async fn status(&self, id: Uuid) -> Option<JobStatus> {
        self.statuses.read().await.get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::{Chunker, ChunkerConfig};
    use crate::embedder::MockEmbeddingProvider;
    use crate::ingestion::{IngestionConfig, MockPageFetcher};
    use crate::store::MockKnowledgeStore;
    use std::time::Duration;

    fn page() -> String {
        let body: String = (0..80)
            .map(|i| format!("content{i}"))
            .collect::<Vec<_>>()
            .join(" ");
        format!("<h1>Docs</h1><p>{body}</p>")
    }

    fn test_pipeline(fetch_fails: bool) -> Arc<IngestionPipeline> {
        let mut fetcher = MockPageFetcher::new();
        if fetch_fails {
            fetcher
                .expect_fetch()
                .returning(|_| Err(SiteChatError::Fetch("unreachable".to_string())));
        } else {
            fetcher.expect_fetch().returning(|_| Ok(page()));
        }

        let mut embedder = MockEmbeddingProvider::new();
        embedder
            .expect_embed_batch()
            .returning(|texts| Ok(texts.iter().map(|_| Some(vec![0.1])).collect()));

        let mut store = MockKnowledgeStore::new();
        store.expect_delete_by_source().returning(|_, _| Ok(()));
        store
            .expect_upsert_chunks()
            .returning(|_, chunks| Ok(chunks.len()));

        Arc::new(IngestionPipeline::new(
            Arc::new(fetcher),
            Chunker::new(ChunkerConfig::default()),
            Arc::new(embedder),
            Arc::new(store),
            IngestionConfig {
                batch_delay: Duration::ZERO,
                ..IngestionConfig::default()
            },
        ))
    }

    async fn wait_for_terminal(queue: &IngestionQueue, id: Uuid) -> JobStatus {
        for _ in 0..200 {
            match queue.status(id).await {
                Some(JobStatus::Succeeded { .. }) | Some(JobStatus::Failed { .. }) => {
                    return queue.status(id).await.unwrap();
                }
                _ => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        }
        panic!("job {id} never reached a terminal state");
    }

    #[tokio::test]
    async fn test_submitted_job_runs_to_success() {
        let queue = IngestionQueue::start(test_pipeline(false), 8);
        let tenant = Uuid::new_v4();

        let id = queue
            .submit(tenant, "https://example.com/docs".to_string())
            .await
            .unwrap();

        match wait_for_terminal(&queue, id).await {
            JobStatus::Succeeded { report } => {
                assert_eq!(report.tenant_id, tenant);
                assert_eq!(report.chunks_stored, 1);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_job_is_observable() {
        let queue = IngestionQueue::start(test_pipeline(true), 8);

        let id = queue
            .submit(Uuid::new_v4(), "https://example.com/docs".to_string())
            .await
            .unwrap();

        match wait_for_terminal(&queue, id).await {
            JobStatus::Failed { error } => assert!(error.contains("unreachable")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_job_has_no_status() {
        let queue = IngestionQueue::start(test_pipeline(false), 8);
        assert!(queue.status(Uuid::new_v4()).await.is_none());
    }
}
