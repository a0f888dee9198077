//! Polling run worker.
//!
//! Claims queued runs, executes them through an [`AgentExecutor`] outside
//! any store transaction, and reports the outcome back through the queue.
//! Many workers may poll the same queue concurrently; the claim transaction
//! guarantees each run is handed to exactly one of them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::WorkerConfig;
use crate::error::ErrorCode;

use super::{AgentExecutor, ExecutionRequest, ExecutionStatus, RunQueue, RunRecord, RunStatus};

/// Statistics for the run worker.
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    /// Total runs processed
    pub processed: Arc<AtomicU64>,
    /// Total runs succeeded
    pub succeeded: Arc<AtomicU64>,
    /// Total runs failed
    pub failed: Arc<AtomicU64>,
    /// Completions rejected because the run was finalized elsewhere
    pub lost_races: Arc<AtomicU64>,
}

impl WorkerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn lost_races(&self) -> u64 {
        self.lost_races.load(Ordering::Relaxed)
    }
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown: tokio::sync::watch::Sender<bool>,
    stats: WorkerStats,
    join: tokio::task::JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Get worker statistics.
    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Wait for the worker loop to exit.
    pub async fn join(self) {
        let _ = self.join.await;
    }
}

/// Worker that processes agent runs from the queue.
pub struct RunWorker {
    config: WorkerConfig,
    queue: RunQueue,
    executor: Arc<dyn AgentExecutor>,
    stats: WorkerStats,
}

impl RunWorker {
    pub fn new(config: WorkerConfig, queue: RunQueue, executor: Arc<dyn AgentExecutor>) -> Self {
        Self {
            config,
            queue,
            executor,
            stats: WorkerStats::new(),
        }
    }

    /// Start the worker, returning a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
        let stats = self.stats.clone();
        let config = self.config.clone();
        let queue = self.queue.clone();
        let executor = self.executor.clone();

        let join = tokio::spawn(async move {
            tracing::info!(
                runner = %config.runner_id,
                poll_interval = ?config.poll_interval,
                "Run worker started"
            );

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!(runner = %config.runner_id, "Worker shutting down");
                            break;
                        }
                    }
                    _ = tokio::time::sleep(config.poll_interval) => {
                        // Drain everything currently eligible before sleeping again.
                        loop {
                            match queue.claim_queued_run(&config.runner_id).await {
                                Ok(Some(run)) => {
                                    process_run(&queue, executor.as_ref(), &stats, run).await;
                                }
                                Ok(None) => break,
                                Err(err) => {
                                    tracing::warn!(error = %err, "Claim attempt failed");
                                    break;
                                }
                            }
                            if *shutdown_rx.borrow() {
                                break;
                            }
                        }
                    }
                }
            }

            tracing::info!(runner = %config.runner_id, "Worker stopped");
        });

        WorkerHandle {
            shutdown: shutdown_tx,
            stats: self.stats,
            join,
        }
    }
}

/// Execute one claimed run and feed the outcome back through the queue.
async fn process_run(
    queue: &RunQueue,
    executor: &dyn AgentExecutor,
    stats: &WorkerStats,
    run: RunRecord,
) {
    stats.processed.fetch_add(1, Ordering::Relaxed);
    let run_id = run.id;
    let request = ExecutionRequest::for_run(&run);

    let (status, mut messages, changes, error) = match executor.execute(request).await {
        Ok(outcome) => {
            let status = match outcome.status {
                ExecutionStatus::Success => RunStatus::Success,
                ExecutionStatus::Failed => RunStatus::Failed,
            };
            (status, outcome.messages, outcome.changes, outcome.error)
        }
        Err(err) => (
            RunStatus::Failed,
            vec![],
            vec![],
            Some(err.to_string()),
        ),
    };

    // The queue rejects empty completions, so surface executor silence as an
    // explicit message rather than wedging the run in `running`.
    if super::sanitize_messages(&messages).is_empty() {
        let fallback = error
            .clone()
            .unwrap_or_else(|| "Run produced no output.".to_owned());
        messages = vec![serde_json::Value::String(fallback)];
    }

    match queue
        .complete_run(run_id, status, &messages, changes, error)
        .await
    {
        Ok(_) => {
            match status {
                RunStatus::Success => stats.succeeded.fetch_add(1, Ordering::Relaxed),
                _ => stats.failed.fetch_add(1, Ordering::Relaxed),
            };
        }
        Err(err) if err.code() == ErrorCode::RunAlreadyFinalized => {
            // Cancelled (or completed elsewhere) while we were executing;
            // the conflict check is the intended rejection path.
            stats.lost_races.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(run_id = %run_id, "Completion rejected; run finalized elsewhere");
        }
        Err(err) => {
            tracing::error!(run_id = %run_id, error = %err, "Failed to record run completion");
        }
    }
}
