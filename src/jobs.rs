use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::analysis::run_analysis;
use crate::db::DbPool;
use crate::llm::LlmGateway;

/// A queued request to complete one placeholder analysis.
#[derive(Debug, Clone)]
pub struct AnalysisJob {
    pub analysis_id: i32,
    pub document_id: i32,
}

#[derive(Debug, Error)]
#[error("analysis queue is closed")]
pub struct QueueClosed;

/// Producer half of the analysis queue. Cloneable; held in application state.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<AnalysisJob>,
}

impl JobQueue {
    /// Enqueue a job, waiting for channel capacity when the queue is full.
    pub async fn enqueue(&self, job: AnalysisJob) -> Result<(), QueueClosed> {
        self.tx.send(job).await.map_err(|_| QueueClosed)
    }
}

/// Create a bounded queue and the runner that drains it.
pub fn analysis_queue(
    depth: usize,
    pool: DbPool,
    llm: Arc<dyn LlmGateway>,
) -> (JobQueue, JobRunner) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    (JobQueue { tx }, JobRunner { rx, pool, llm })
}

/// Consumer half of the analysis queue. Deliberately holds no [`JobQueue`]
/// sender so that dropping all producers ends [`JobRunner::run`] after the
/// remaining jobs drain.
pub struct JobRunner {
    rx: mpsc::Receiver<AnalysisJob>,
    pool: DbPool,
    llm: Arc<dyn LlmGateway>,
}

impl JobRunner {
    pub async fn run(mut self) {
        info!("analysis worker started");
        while let Some(job) = self.rx.recv().await {
            self.handle(job).await;
        }
        info!("analysis queue closed, worker drained");
    }

    /// Process at most one queued job; returns whether one was handled.
    /// Lets tests single-step the worker deterministically.
    pub async fn tick(&mut self) -> bool {
        match self.rx.try_recv() {
            Ok(job) => {
                self.handle(job).await;
                true
            }
            Err(_) => false,
        }
    }

    async fn handle(&self, job: AnalysisJob) {
        match run_analysis(&self.pool, self.llm.as_ref(), &job).await {
            Ok(()) => {
                info!(
                    analysis_id = job.analysis_id,
                    document_id = job.document_id,
                    "analysis job finished"
                );
            }
            Err(err) => {
                error!(
                    analysis_id = job.analysis_id,
                    document_id = job.document_id,
                    %err,
                    "analysis job failed"
                );
            }
        }
    }
}
