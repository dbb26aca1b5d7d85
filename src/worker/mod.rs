//! Worker Runtime (§4.7): polls the Job Queue and runs `BuildAndDeploy`
//! with a bounded-concurrency pool.
//!
//! Grounded in the teacher's `DeploymentEngine::run` consumer loop,
//! generalized from a single `mpsc::Receiver` listener into a polling loop
//! over the durable queue — a `tokio::Semaphore` gates how many
//! `build_and_deploy` calls run at once (default 5), matching §9's mapping
//! of "bounded concurrency" onto a worker pool each holding one job at a
//! time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::interval;
use tracing::{info, warn};

use crate::orchestrator::DeploymentOrchestrator;
use crate::queue::JobQueue;

/// How often the worker polls for due jobs.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// How often the queue's completed-job pruning sweep runs.
const PRUNE_INTERVAL: Duration = Duration::from_secs(300);

pub struct WorkerRuntime {
    orchestrator: Arc<DeploymentOrchestrator>,
    queue: Arc<JobQueue>,
    concurrency: usize,
}

impl WorkerRuntime {
    pub fn new(orchestrator: Arc<DeploymentOrchestrator>, queue: Arc<JobQueue>, concurrency: usize) -> Self {
        Self {
            orchestrator,
            queue,
            concurrency,
        }
    }

    /// Runs forever, polling the queue and dispatching claimed jobs onto a
    /// semaphore-bounded pool. Each job is awaited independently; a
    /// long-running build never blocks the poll loop from claiming more
    /// work up to `concurrency`.
    pub async fn run(self) {
        info!(concurrency = self.concurrency, "worker runtime started");

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut poll_ticker = interval(POLL_INTERVAL);
        let mut prune_ticker = interval(PRUNE_INTERVAL);

        loop {
            tokio::select! {
                _ = poll_ticker.tick() => {
                    self.poll_and_dispatch(&semaphore).await;
                }
                _ = prune_ticker.tick() => {
                    if let Err(e) = self.queue.prune_completed().await {
                        warn!(error = %e, "failed to prune completed jobs");
                    }
                }
            }
        }
    }

    async fn poll_and_dispatch(&self, semaphore: &Arc<Semaphore>) {
        let available = semaphore.available_permits();
        if available == 0 {
            return;
        }

        let claimed = match self.queue.claim_due(available as i64).await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(error = %e, "failed to claim due jobs");
                return;
            }
        };

        for job in claimed {
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
            let orchestrator = self.orchestrator.clone();
            let queue = self.queue.clone();

            tokio::spawn(async move {
                let _permit = permit;
                match orchestrator.build_and_deploy(&job.deployment_id).await {
                    Ok(()) => {
                        info!(deployment_id = %job.deployment_id, "job completed");
                        if let Err(e) = queue.mark_succeeded(&job.job_id).await {
                            warn!(error = %e, "failed to mark job succeeded");
                        }
                    }
                    Err(e) => {
                        warn!(deployment_id = %job.deployment_id, error = %e, "job failed");
                        if let Err(mark_err) = queue.mark_failed(&job.job_id, &e.to_string()).await {
                            warn!(error = %mark_err, "failed to record job failure");
                        }
                    }
                }
            });
        }
    }
}
