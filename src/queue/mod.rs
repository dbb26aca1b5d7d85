//! Job Queue (§4.5): durable, retry-capable submission and consumption of
//! deployment jobs, backed by the `deployment_jobs` table.
//!
//! The teacher's engine dispatched work over a bare `mpsc::channel` with no
//! retry bookkeeping or durability across a process restart. spec.md
//! requires both, so this generalizes the teacher's migration-table
//! pattern (`db::init`) into a polling SQLite queue: `Submit` inserts a row,
//! `Consume` claims due rows with a conditional `UPDATE ... WHERE status =
//! 'queued'` (a SQLite-level compare-and-swap) so two pollers never claim
//! the same job twice.

use chrono::Utc;
use sqlx::Row;
use tracing::{error, warn};
use uuid::Uuid;

use crate::db::{backoff_seconds, DbPool, DeploymentJob, JobStatus};
use crate::error::CoreError;

/// A unit of work: build-and-deploy a single deployment.
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: String,
    pub deployment_id: String,
}

/// Completed jobs beyond this count are pruned (§4.5).
const RETAINED_COMPLETED_JOBS: i64 = 100;
const MAX_ATTEMPTS: i64 = 3;

pub struct JobQueue {
    db: DbPool,
}

impl JobQueue {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// `Submit(job)` — enqueues `deployment_id` durably, at attempt 0, due
    /// immediately. Returns the job id.
    ///
    /// Per §4.5's graceful-degradation rule, a caller whose own persistence
    /// layer is unreachable should treat this as `CoreError::QueueUnavailable`
    /// and swallow it rather than failing the deployment; anything else
    /// (a constraint violation, a malformed row) is a real defect and must
    /// propagate, so this classifies connectivity-level sqlx failures
    /// separately from the rest.
    pub async fn submit(&self, deployment_id: &str) -> Result<String, CoreError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO deployment_jobs
                (id, deployment_id, status, attempt, max_attempts, next_attempt_at, last_error, created_at, updated_at)
             VALUES (?, ?, 'queued', 0, ?, ?, NULL, ?, ?)",
        )
        .bind(&id)
        .bind(deployment_id)
        .bind(MAX_ATTEMPTS)
        .bind(&now)
        .bind(&now)
        .bind(&now)
        .execute(&self.db)
        .await
        .map_err(classify_submit_error)?;

        Ok(id)
    }

    /// Claims up to `limit` due jobs (`status = 'queued' AND next_attempt_at
    /// <= now`), marking each `running` in the same statement so concurrent
    /// pollers (Worker Runtime instances) never double-claim a row.
    pub async fn claim_due(&self, limit: i64) -> Result<Vec<Job>, CoreError> {
        let now = Utc::now().to_rfc3339();

        let due: Vec<DeploymentJob> = sqlx::query_as(
            "SELECT * FROM deployment_jobs
             WHERE status = 'queued' AND next_attempt_at <= ?
             ORDER BY next_attempt_at ASC
             LIMIT ?",
        )
        .bind(&now)
        .bind(limit)
        .fetch_all(&self.db)
        .await
        .map_err(CoreError::from)?;

        let mut claimed = Vec::with_capacity(due.len());
        for job in due {
            let result = sqlx::query(
                "UPDATE deployment_jobs SET status = 'running', updated_at = ?
                 WHERE id = ? AND status = 'queued'",
            )
            .bind(&now)
            .bind(&job.id)
            .execute(&self.db)
            .await
            .map_err(CoreError::from)?;

            if result.rows_affected() == 1 {
                claimed.push(Job {
                    job_id: job.id,
                    deployment_id: job.deployment_id,
                });
            }
        }

        Ok(claimed)
    }

    /// Marks a claimed job succeeded.
    pub async fn mark_succeeded(&self, job_id: &str) -> Result<(), CoreError> {
        sqlx::query("UPDATE deployment_jobs SET status = 'succeeded', updated_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(job_id)
            .execute(&self.db)
            .await
            .map_err(CoreError::from)?;
        Ok(())
    }

    /// Records a failed attempt. If attempts remain, reschedules the job
    /// `queued` at `now + backoff(attempt)` (2s, 4s, 8s); otherwise marks it
    /// `failed` permanently (§4.5: "At most 3 attempts per job").
    pub async fn mark_failed(&self, job_id: &str, error: &str) -> Result<(), CoreError> {
        let job: DeploymentJob = sqlx::query_as("SELECT * FROM deployment_jobs WHERE id = ?")
            .bind(job_id)
            .fetch_one(&self.db)
            .await
            .map_err(CoreError::from)?;

        let attempt = job.attempt + 1;
        let now = Utc::now();

        if attempt >= MAX_ATTEMPTS {
            sqlx::query(
                "UPDATE deployment_jobs
                 SET status = 'failed', attempt = ?, last_error = ?, updated_at = ?
                 WHERE id = ?",
            )
            .bind(attempt)
            .bind(error)
            .bind(now.to_rfc3339())
            .bind(job_id)
            .execute(&self.db)
            .await
            .map_err(CoreError::from)?;
            warn!(job_id, attempt, "job exhausted retries");
        } else {
            let delay = backoff_seconds(attempt);
            let next_attempt_at = now + chrono::Duration::seconds(delay);
            sqlx::query(
                "UPDATE deployment_jobs
                 SET status = 'queued', attempt = ?, last_error = ?, next_attempt_at = ?, updated_at = ?
                 WHERE id = ?",
            )
            .bind(attempt)
            .bind(error)
            .bind(next_attempt_at.to_rfc3339())
            .bind(now.to_rfc3339())
            .bind(job_id)
            .execute(&self.db)
            .await
            .map_err(CoreError::from)?;
            warn!(job_id, attempt, delay, "job scheduled for retry");
        }

        Ok(())
    }

    /// Prunes completed (`succeeded` or `failed`) rows beyond the most
    /// recent 100, kept for introspection (§4.5).
    pub async fn prune_completed(&self) -> Result<u64, CoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) as n FROM deployment_jobs WHERE status IN ('succeeded', 'failed')",
        )
        .fetch_one(&self.db)
        .await
        .map_err(CoreError::from)?;
        let total: i64 = row.try_get("n").unwrap_or(0);

        if total <= RETAINED_COMPLETED_JOBS {
            return Ok(0);
        }

        let excess = total - RETAINED_COMPLETED_JOBS;
        let result = sqlx::query(
            "DELETE FROM deployment_jobs WHERE id IN (
                SELECT id FROM deployment_jobs
                WHERE status IN ('succeeded', 'failed')
                ORDER BY updated_at ASC
                LIMIT ?
             )",
        )
        .bind(excess)
        .execute(&self.db)
        .await
        .map_err(CoreError::from)?;

        Ok(result.rows_affected())
    }

    #[cfg(test)]
    pub async fn status_of(&self, job_id: &str) -> JobStatus {
        let job: DeploymentJob = sqlx::query_as("SELECT * FROM deployment_jobs WHERE id = ?")
            .bind(job_id)
            .fetch_one(&self.db)
            .await
            .unwrap();
        job.status_enum()
    }
}

/// Connectivity-level sqlx failures at submit time (the pool can't reach
/// the database, or is exhausted/closed/crashed) are the only ones that
/// should degrade to `QueueUnavailable`; anything else — a constraint
/// violation, a missing table — surfaces as the underlying bug it is.
fn classify_submit_error(err: sqlx::Error) -> CoreError {
    match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => CoreError::QueueUnavailable(err.to_string()),
        _ => CoreError::from(err),
    }
}

/// Logs a swallowed `QueueUnavailable` at warn. The caller is expected to
/// have already decided this is the one submit error worth swallowing;
/// anything else should be propagated instead of routed through here.
pub fn log_submit_failure(err: &CoreError) {
    match err {
        CoreError::QueueUnavailable(msg) => warn!(error = %msg, "queue unavailable at submit time"),
        other => error!(error = %other, "unexpected error submitting job"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> DbPool {
        let dir = std::env::temp_dir().join(format!("dropdeploy-queue-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        crate::db::init(&dir).await.unwrap()
    }

    async fn seed_project_and_deployment(db: &DbPool) -> String {
        let now = Utc::now().to_rfc3339();
        let project_id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO projects (id, user_id, name, slug, repo_url, framework, branch, created_at, updated_at)
             VALUES (?, 'u1', 'n', ?, 'https://example.test/r.git', 'STATIC', 'main', ?, ?)",
        )
        .bind(&project_id)
        .bind(format!("slug-{project_id}"))
        .bind(&now)
        .bind(&now)
        .execute(db)
        .await
        .unwrap();

        let deployment_id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO deployments (id, project_id, status, logs, created_at, updated_at)
             VALUES (?, ?, 'QUEUED', '', ?, ?)",
        )
        .bind(&deployment_id)
        .bind(&project_id)
        .bind(&now)
        .bind(&now)
        .execute(db)
        .await
        .unwrap();

        deployment_id
    }

    #[tokio::test]
    async fn submit_then_claim_returns_the_job() {
        let db = test_db().await;
        let deployment_id = seed_project_and_deployment(&db).await;
        let queue = JobQueue::new(db);

        let job_id = queue.submit(&deployment_id).await.unwrap();
        let claimed = queue.claim_due(10).await.unwrap();

        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].job_id, job_id);
        assert_eq!(claimed[0].deployment_id, deployment_id);
    }

    #[tokio::test]
    async fn a_claimed_job_is_not_claimed_again() {
        let db = test_db().await;
        let deployment_id = seed_project_and_deployment(&db).await;
        let queue = JobQueue::new(db);

        queue.submit(&deployment_id).await.unwrap();
        let first = queue.claim_due(10).await.unwrap();
        let second = queue.claim_due(10).await.unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 0);
    }

    #[tokio::test]
    async fn failure_reschedules_until_max_attempts_then_fails_permanently() {
        let db = test_db().await;
        let deployment_id = seed_project_and_deployment(&db).await;
        let queue = JobQueue::new(db);

        let job_id = queue.submit(&deployment_id).await.unwrap();
        queue.claim_due(10).await.unwrap();
        queue.mark_failed(&job_id, "boom").await.unwrap();
        assert_eq!(queue.status_of(&job_id).await, JobStatus::Queued);

        // Force the row due immediately for the next two attempts.
        sqlx::query("UPDATE deployment_jobs SET next_attempt_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(&job_id)
            .execute(&queue.db)
            .await
            .unwrap();
        queue.claim_due(10).await.unwrap();
        queue.mark_failed(&job_id, "boom again").await.unwrap();

        sqlx::query("UPDATE deployment_jobs SET next_attempt_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(&job_id)
            .execute(&queue.db)
            .await
            .unwrap();
        queue.claim_due(10).await.unwrap();
        queue.mark_failed(&job_id, "boom final").await.unwrap();

        assert_eq!(queue.status_of(&job_id).await, JobStatus::Failed);
    }
}
