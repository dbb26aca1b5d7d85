//! Entity Store (§4.1 of the component table in §2): typed access to
//! Project and Deployment rows, enforcing the unique constraints spec.md
//! names (slug, subdomain).

use chrono::Utc;
use uuid::Uuid;

use crate::error::CoreError;

use super::{DbPool, Deployment, DeploymentStatus, Project};

#[derive(Clone)]
pub struct EntityStore {
    db: DbPool,
}

impl EntityStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &DbPool {
        &self.db
    }

    pub async fn create_project(
        &self,
        user_id: &str,
        name: &str,
        slug: &str,
        repo_url: &str,
        framework: &str,
        branch: &str,
    ) -> Result<Project, CoreError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO projects (id, user_id, name, slug, repo_url, framework, branch, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(name)
        .bind(slug)
        .bind(repo_url)
        .bind(framework)
        .bind(branch)
        .bind(&now)
        .bind(&now)
        .execute(&self.db)
        .await
        .map_err(CoreError::from)?;

        self.get_project(&id).await
    }

    pub async fn get_project(&self, id: &str) -> Result<Project, CoreError> {
        sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .map_err(CoreError::from)?
            .ok_or_else(|| CoreError::NotFound(format!("project {id}")))
    }

    /// Loads the project only if `user_id` owns it. Ownership failure is
    /// reported as `NotFound`, never `Unauthorized` (§4.6 op 1: "to avoid
    /// leaking existence").
    pub async fn get_owned_project(&self, id: &str, user_id: &str) -> Result<Project, CoreError> {
        let project = self.get_project(id).await?;
        if project.user_id != user_id {
            return Err(CoreError::NotFound(format!("project {id}")));
        }
        Ok(project)
    }

    pub async fn create_deployment(&self, project_id: &str) -> Result<Deployment, CoreError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO deployments (id, project_id, status, logs, created_at, updated_at)
             VALUES (?, ?, 'QUEUED', '', ?, ?)",
        )
        .bind(&id)
        .bind(project_id)
        .bind(&now)
        .bind(&now)
        .execute(&self.db)
        .await
        .map_err(CoreError::from)?;

        self.get_deployment(&id).await
    }

    pub async fn get_deployment(&self, id: &str) -> Result<Deployment, CoreError> {
        sqlx::query_as::<_, Deployment>("SELECT * FROM deployments WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .map_err(CoreError::from)?
            .ok_or_else(|| CoreError::NotFound(format!("deployment {id}")))
    }

    /// Best-effort lookup used by the worker: a missing deployment is not an
    /// error (§4.6: "stale job" — treated as a no-op success).
    pub async fn find_deployment(&self, id: &str) -> Result<Option<Deployment>, CoreError> {
        sqlx::query_as::<_, Deployment>("SELECT * FROM deployments WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .map_err(CoreError::from)
    }

    pub async fn recent_deployments(
        &self,
        project_id: &str,
        limit: i64,
    ) -> Result<Vec<Deployment>, CoreError> {
        sqlx::query_as::<_, Deployment>(
            "SELECT * FROM deployments WHERE project_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(project_id)
        .bind(limit)
        .fetch_all(&self.db)
        .await
        .map_err(CoreError::from)
    }

    /// Transitions a deployment into BUILDING, including on a queue retry of
    /// a previously-FAILED row: `completed_at`/`logs`/`error_message` are
    /// reset so the row doesn't carry a terminal-looking `completed_at`
    /// while `status = BUILDING` (§8: `completedAt ≠ null ⟺ status ∈
    /// {DEPLOYED, FAILED}`), and `started_at` is reset to now rather than
    /// kept from the first attempt, since `sweep_stuck_building` measures
    /// staleness from it.
    pub async fn mark_building(&self, deployment_id: &str, step: &str) -> Result<(), CoreError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE deployments
             SET status = 'BUILDING', build_step = ?, started_at = ?, completed_at = NULL,
                 logs = '', error_message = NULL, updated_at = ?
             WHERE id = ?",
        )
        .bind(step)
        .bind(&now)
        .bind(&now)
        .bind(deployment_id)
        .execute(&self.db)
        .await
        .map_err(CoreError::from)?;
        Ok(())
    }

    pub async fn advance_build_step(&self, deployment_id: &str, step: &str) -> Result<(), CoreError> {
        sqlx::query("UPDATE deployments SET build_step = ?, updated_at = ? WHERE id = ?")
            .bind(step)
            .bind(Utc::now().to_rfc3339())
            .bind(deployment_id)
            .execute(&self.db)
            .await
            .map_err(CoreError::from)?;
        Ok(())
    }

    pub async fn mark_deployed(
        &self,
        deployment_id: &str,
        container_port: u16,
        subdomain: &str,
    ) -> Result<(), CoreError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE deployments
             SET status = 'DEPLOYED', build_step = NULL, container_port = ?, subdomain = ?,
                 completed_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(container_port as i64)
        .bind(subdomain)
        .bind(&now)
        .bind(&now)
        .bind(deployment_id)
        .execute(&self.db)
        .await
        .map_err(CoreError::from)?;
        Ok(())
    }

    pub async fn mark_failed(&self, deployment_id: &str, log_tail: &str) -> Result<(), CoreError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE deployments
             SET status = 'FAILED', build_step = NULL, logs = ?, error_message = ?, completed_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(log_tail)
        .bind(log_tail)
        .bind(&now)
        .bind(&now)
        .bind(deployment_id)
        .execute(&self.db)
        .await
        .map_err(CoreError::from)?;
        Ok(())
    }

    /// §4.6 subdomain reassignment: clears `subdomain` on every other
    /// deployment of `project_id` so the uniqueness invariant
    /// ("at most one Deployment per Project may hold a given non-null
    /// subdomain") holds while ownership transfers to `exclude_deployment_id`.
    pub async fn clear_subdomain_on_other_deployments(
        &self,
        project_id: &str,
        exclude_deployment_id: &str,
    ) -> Result<(), CoreError> {
        sqlx::query(
            "UPDATE deployments SET subdomain = NULL, updated_at = ?
             WHERE project_id = ? AND id != ? AND subdomain IS NOT NULL",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(project_id)
        .bind(exclude_deployment_id)
        .execute(&self.db)
        .await
        .map_err(CoreError::from)?;
        Ok(())
    }

    /// Reverse-proxy contract (§6): resolves a subdomain to its currently
    /// DEPLOYED deployment's host port.
    pub async fn resolve_subdomain(&self, subdomain: &str) -> Result<Option<u16>, CoreError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT container_port FROM deployments
             WHERE subdomain = ? AND status = 'DEPLOYED' AND container_port IS NOT NULL
             LIMIT 1",
        )
        .bind(subdomain)
        .fetch_optional(&self.db)
        .await
        .map_err(CoreError::from)?;

        Ok(row.map(|(port,)| port as u16))
    }

    /// Startup sweeper (§9 Open Question: "Stuck-BUILDING recovery"):
    /// marks any deployment still `BUILDING` with a `started_at` older than
    /// `stale_after_seconds` as FAILED, since a worker crash leaves no
    /// other signal that the job died mid-pipeline.
    pub async fn sweep_stuck_building(&self, stale_after_seconds: i64) -> Result<u64, CoreError> {
        let cutoff = (Utc::now() - chrono::Duration::seconds(stale_after_seconds)).to_rfc3339();
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            "UPDATE deployments
             SET status = 'FAILED', build_step = NULL,
                 logs = 'worker restarted while deployment was in progress', completed_at = ?, updated_at = ?
             WHERE status = 'BUILDING' AND started_at IS NOT NULL AND started_at < ?",
        )
        .bind(&now)
        .bind(&now)
        .bind(&cutoff)
        .execute(&self.db)
        .await
        .map_err(CoreError::from)?;

        Ok(result.rows_affected())
    }

    pub fn status_enum(deployment: &Deployment) -> DeploymentStatus {
        deployment.status_enum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> EntityStore {
        let dir = std::env::temp_dir().join(format!("dropdeploy-store-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        EntityStore::new(super::super::init(&dir).await.unwrap())
    }

    #[tokio::test]
    async fn ownership_mismatch_is_reported_as_not_found() {
        let store = test_store().await;
        let project = store
            .create_project("user-a", "site", "site-slug", "https://x.test/r.git", "STATIC", "main")
            .await
            .unwrap();

        let err = store.get_owned_project(&project.id, "user-b").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn subdomain_reassignment_clears_prior_holder() {
        let store = test_store().await;
        let project = store
            .create_project("user-a", "site", "site-slug", "https://x.test/r.git", "STATIC", "main")
            .await
            .unwrap();

        let d1 = store.create_deployment(&project.id).await.unwrap();
        store.mark_deployed(&d1.id, 8123, "site-slug").await.unwrap();

        let d2 = store.create_deployment(&project.id).await.unwrap();
        store
            .clear_subdomain_on_other_deployments(&project.id, &d2.id)
            .await
            .unwrap();
        store.mark_deployed(&d2.id, 8456, "site-slug").await.unwrap();

        let reloaded_d1 = store.get_deployment(&d1.id).await.unwrap();
        assert_eq!(reloaded_d1.subdomain, None);
        let reloaded_d2 = store.get_deployment(&d2.id).await.unwrap();
        assert_eq!(reloaded_d2.subdomain.as_deref(), Some("site-slug"));
    }

    #[tokio::test]
    async fn retrying_a_failed_deployment_clears_the_terminal_fields() {
        let store = test_store().await;
        let project = store
            .create_project("user-a", "site", "site-slug", "https://x.test/r.git", "STATIC", "main")
            .await
            .unwrap();
        let deployment = store.create_deployment(&project.id).await.unwrap();

        store.mark_building(&deployment.id, "CLONING").await.unwrap();
        store.mark_failed(&deployment.id, "clone failed: boom").await.unwrap();

        let failed = store.get_deployment(&deployment.id).await.unwrap();
        assert_eq!(failed.status_enum(), DeploymentStatus::Failed);
        assert!(failed.completed_at.is_some());

        // §4.6: the queue retries the same deployment id; mark_building must
        // not leave a BUILDING row that still looks terminal.
        store.mark_building(&deployment.id, "CLONING").await.unwrap();

        let retried = store.get_deployment(&deployment.id).await.unwrap();
        assert_eq!(retried.status_enum(), DeploymentStatus::Building);
        assert!(retried.completed_at.is_none());
        assert!(retried.error_message.is_none());
        assert_eq!(retried.logs, "");
        assert_ne!(retried.started_at, failed.started_at);
    }

    #[tokio::test]
    async fn sweep_marks_old_building_rows_failed() {
        let store = test_store().await;
        let project = store
            .create_project("user-a", "site", "site-slug", "https://x.test/r.git", "STATIC", "main")
            .await
            .unwrap();
        let deployment = store.create_deployment(&project.id).await.unwrap();
        store.mark_building(&deployment.id, "CLONING").await.unwrap();

        sqlx::query("UPDATE deployments SET started_at = ? WHERE id = ?")
            .bind((Utc::now() - chrono::Duration::hours(2)).to_rfc3339())
            .bind(&deployment.id)
            .execute(&store.db)
            .await
            .unwrap();

        let swept = store.sweep_stuck_building(3600).await.unwrap();
        assert_eq!(swept, 1);

        let reloaded = store.get_deployment(&deployment.id).await.unwrap();
        assert_eq!(reloaded.status_enum(), DeploymentStatus::Failed);
        assert!(reloaded.build_step.is_none());
    }
}
