//! Deployment Orchestrator (§4.6): `CreateDeployment` and `BuildAndDeploy`,
//! the pipeline that drives a Deployment from QUEUED to DEPLOYED or FAILED.
//!
//! Grounded in the teacher's `engine::pipeline` control flow (load row,
//! advance status/step, call out to the repo/runtime layers, persist the
//! outcome), generalized from the teacher's app-centric model onto
//! spec.md's Project/Deployment state machine and rewritten around typed
//! `Result` steps per the re-architecture guidance in §9 (a step is
//! `Result<StepOutput, CoreError>`; the orchestrator sequences them and
//! records the first failure's step name).

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use crate::command::CommandGateway;
use crate::db::{EntityStore, Project};
use crate::error::CoreError;
use crate::queue::{log_submit_failure, JobQueue};
use crate::recipes;
use crate::repo::RepositoryManager;
use crate::runtime::{container_name, image_tag, internal_port, ContainerEngine, ResourceLimits};

/// A failure tagged with the pipeline step it occurred in, so the
/// persisted `logs` tail names where things went wrong.
struct StepFailure {
    step: &'static str,
    error: CoreError,
}

impl StepFailure {
    fn new(step: &'static str, error: CoreError) -> Self {
        Self { step, error }
    }

    fn log_tail(&self) -> String {
        format!("[{}] {}", self.step, self.error)
    }
}

pub struct DeploymentOrchestrator {
    store: EntityStore,
    repos: RepositoryManager,
    engine: Arc<dyn ContainerEngine>,
    queue: Arc<JobQueue>,
    container_prefix: String,
    limits: ResourceLimits,
}

impl DeploymentOrchestrator {
    pub fn new(
        store: EntityStore,
        repos: RepositoryManager,
        engine: Arc<dyn ContainerEngine>,
        queue: Arc<JobQueue>,
        container_prefix: impl Into<String>,
        limits: ResourceLimits,
    ) -> Self {
        Self {
            store,
            repos,
            engine,
            queue,
            container_prefix: container_prefix.into(),
            limits,
        }
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn command_gateway(&self) -> CommandGateway {
        CommandGateway::new(self.engine.clone(), self.container_prefix.clone())
    }

    /// Operation 1 (§4.6): persist a QUEUED row and submit its job. Only a
    /// `QueueUnavailable` submission failure is swallowed (not surfaced to
    /// the caller) per §4.5's graceful-degradation rule — the row is
    /// already durable and can be re-processed once the backend recovers.
    /// Any other submit error is a real defect and propagates.
    #[instrument(skip(self), fields(project_id = %project_id, user_id = %user_id))]
    pub async fn create_deployment(
        &self,
        project_id: &str,
        user_id: &str,
    ) -> Result<crate::db::Deployment, CoreError> {
        let project = self.store.get_owned_project(project_id, user_id).await?;
        let deployment = self.store.create_deployment(&project.id).await?;

        match self.queue.submit(&deployment.id).await {
            Ok(_) => {}
            Err(e @ CoreError::QueueUnavailable(_)) => log_submit_failure(&e),
            Err(e) => return Err(e),
        }

        info!(deployment_id = %deployment.id, "deployment queued");
        Ok(deployment)
    }

    /// Operation 2 (§4.6): the pipeline invoked by the Worker Runtime.
    /// Returns `Ok(())` for a successfully-processed (including
    /// successfully-failed) deployment, or `Err` when the queue should
    /// retry. A missing deployment row (stale job, §4.6 idempotency) is a
    /// silent no-op success.
    #[instrument(skip(self), fields(deployment_id = %deployment_id))]
    pub async fn build_and_deploy(&self, deployment_id: &str) -> Result<(), CoreError> {
        let Some(deployment) = self.store.find_deployment(deployment_id).await? else {
            warn!("deployment no longer exists, skipping stale job");
            return Ok(());
        };

        let project = match self.store.get_project(&deployment.project_id).await {
            Ok(p) => p,
            Err(_) => {
                warn!("project for deployment no longer exists, skipping stale job");
                return Ok(());
            }
        };

        if project.repo_url.trim().is_empty() {
            self.store
                .mark_failed(deployment_id, "project has no repository URL configured")
                .await?;
            return Ok(());
        }

        self.store.mark_building(deployment_id, "CLONING").await?;

        match self.run_pipeline(deployment_id, &project).await {
            Ok(()) => Ok(()),
            Err(failure) => {
                error!(step = failure.step, error = %failure.error, "deployment failed");
                self.store.mark_failed(deployment_id, &failure.log_tail()).await?;
                // §4.6: rethrow so the Job Queue applies its retry policy.
                Err(failure.error)
            }
        }
    }

    async fn run_pipeline(&self, deployment_id: &str, project: &Project) -> Result<(), StepFailure> {
        let framework = project
            .framework_enum()
            .map_err(|e| StepFailure::new("CLONING", CoreError::Internal(e)))?;

        let work_dir = self
            .repos
            .sync(&project.slug, &project.repo_url, &project.branch)
            .await
            .map_err(|e| StepFailure::new("CLONING", e))?;

        self.store
            .advance_build_step(deployment_id, "BUILDING_IMAGE")
            .await
            .map_err(|e| StepFailure::new("BUILDING_IMAGE", e))?;

        let tag = image_tag(&self.container_prefix, &project.slug);
        prepare_and_build(&self.engine, framework, &work_dir, &tag)
            .await
            .map_err(|e| StepFailure::new("BUILDING_IMAGE", e))?;

        self.store
            .advance_build_step(deployment_id, "STARTING")
            .await
            .map_err(|e| StepFailure::new("STARTING", e))?;

        let name = container_name(&self.container_prefix, &project.slug);
        let host_port = self
            .engine
            .replace_and_run(&tag, &name, internal_port(framework), self.limits)
            .await
            .map_err(|e| StepFailure::new("STARTING", e))?;

        self.store
            .clear_subdomain_on_other_deployments(&project.id, deployment_id)
            .await
            .map_err(|e| StepFailure::new("STARTING", e))?;

        self.store
            .mark_deployed(deployment_id, host_port, &project.slug)
            .await
            .map_err(|e| StepFailure::new("STARTING", e))?;

        info!(host_port, subdomain = %project.slug, "deployment succeeded");
        Ok(())
    }

    /// Startup sweeper (§9): run once when the worker process starts, so a
    /// prior crash mid-BUILDING doesn't leave a deployment stuck forever.
    pub async fn sweep_stuck_deployments(&self, stale_after_seconds: i64) -> Result<u64, CoreError> {
        let swept = self.store.sweep_stuck_building(stale_after_seconds).await?;
        if swept > 0 {
            warn!(swept, "marked orphaned BUILDING deployments as FAILED on startup");
        }
        Ok(swept)
    }
}

/// Writes the recipe's Dockerfile (and, for NEXTJS, patches the framework
/// config) then builds the image — §4.2 + §4.3 composed as one step.
async fn prepare_and_build(
    engine: &Arc<dyn ContainerEngine>,
    framework: crate::db::Framework,
    work_dir: &PathBuf,
    tag: &str,
) -> Result<(), CoreError> {
    let blocking_dir = work_dir.clone();
    tokio::task::spawn_blocking(move || recipes::prepare(framework, &blocking_dir))
        .await
        .map_err(|e| CoreError::BuildFailed(format!("recipe task panicked: {e}")))?
        .map_err(|e| CoreError::BuildFailed(e.to_string()))?;

    engine.build_image(work_dir, tag, framework).await.map(|_| ())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use uuid::Uuid;

    use super::*;
    use crate::db::DeploymentStatus;
    use crate::runtime::ExecOutput;

    /// A `ContainerEngine` double so pipeline tests never need a live Docker
    /// daemon: records what it was asked to do and can be told to fail at a
    /// chosen step.
    struct FakeEngine {
        fail_build: AtomicBool,
        fail_run: AtomicBool,
        built_tags: Mutex<Vec<String>>,
        run_names: Mutex<Vec<String>>,
    }

    impl FakeEngine {
        fn new() -> Self {
            Self {
                fail_build: AtomicBool::new(false),
                fail_run: AtomicBool::new(false),
                built_tags: Mutex::new(Vec::new()),
                run_names: Mutex::new(Vec::new()),
            }
        }

        fn failing_build() -> Self {
            let e = Self::new();
            e.fail_build.store(true, Ordering::SeqCst);
            e
        }
    }

    #[async_trait]
    impl ContainerEngine for FakeEngine {
        async fn build_image(
            &self,
            _context_dir: &std::path::Path,
            tag: &str,
            framework: crate::db::Framework,
        ) -> Result<String, CoreError> {
            if self.fail_build.load(Ordering::SeqCst) {
                return Err(CoreError::ImageMissingAfterBuild(crate::runtime::image_missing_hint(
                    framework,
                )));
            }
            self.built_tags.lock().unwrap().push(tag.to_string());
            Ok(tag.to_string())
        }

        async fn replace_and_run(
            &self,
            _image: &str,
            name: &str,
            _internal_port: u16,
            _limits: ResourceLimits,
        ) -> Result<u16, CoreError> {
            if self.fail_run.load(Ordering::SeqCst) {
                return Err(CoreError::RunFailed("simulated failure".to_string()));
            }
            self.run_names.lock().unwrap().push(name.to_string());
            Ok(8123)
        }

        async fn inspect_running(&self, _name_or_id: &str) -> Result<bool, CoreError> {
            Ok(true)
        }

        async fn exec(
            &self,
            _container: &str,
            _cmd: Vec<String>,
            _timeout: std::time::Duration,
        ) -> Result<ExecOutput, CoreError> {
            Ok(ExecOutput::default())
        }

        async fn logs(&self, _container: &str, _tail_lines: u32) -> Result<String, CoreError> {
            Ok(String::new())
        }

        async fn remove(&self, _container: &str) -> Result<(), CoreError> {
            Ok(())
        }

        async fn find_container_by_image(&self, _image: &str) -> Result<Option<String>, CoreError> {
            Ok(None)
        }
    }

    /// A local, file-system git repository with one commit on `main`, used
    /// as `repoUrl` so `RepositoryManager::sync` exercises a real clone
    /// without any network access.
    fn local_git_fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();

        let mut opts = git2::RepositoryInitOptions::new();
        opts.initial_head("main");
        let repo = git2::Repository::init_opts(dir.path(), &opts).unwrap();

        std::fs::write(dir.path().join("index.html"), "<h1>hi</h1>").unwrap();

        let mut index = repo.index().unwrap();
        index.add_path(std::path::Path::new("index.html")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("test", "test@example.test").unwrap();
        repo.commit(Some("refs/heads/main"), &sig, &sig, "initial", &tree, &[])
            .unwrap();

        dir
    }

    async fn test_orchestrator(engine: Arc<dyn ContainerEngine>) -> (DeploymentOrchestrator, tempfile::TempDir) {
        let data_dir = std::env::temp_dir().join(format!("dropdeploy-orch-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&data_dir).unwrap();
        let db = crate::db::init(&data_dir).await.unwrap();
        let store = EntityStore::new(db.clone());
        let projects_root = tempfile::tempdir().unwrap();
        let repos = RepositoryManager::new(projects_root.path());
        let queue = Arc::new(JobQueue::new(db));

        let orchestrator = DeploymentOrchestrator::new(
            store,
            repos,
            engine,
            queue,
            "dropdeploy",
            ResourceLimits {
                memory_limit_bytes: 512 * 1024 * 1024,
                cpu_shares: 1024,
            },
        );
        (orchestrator, projects_root)
    }

    #[tokio::test]
    async fn build_and_deploy_happy_path_reaches_deployed() {
        let engine = Arc::new(FakeEngine::new());
        let (orchestrator, _projects_root) = test_orchestrator(engine.clone()).await;

        let fixture = local_git_fixture();
        let repo_url = fixture.path().display().to_string();

        let project = orchestrator
            .store()
            .create_project("u1", "site", "site", &repo_url, "STATIC", "main")
            .await
            .unwrap();
        let deployment = orchestrator.create_deployment(&project.id, "u1").await.unwrap();

        orchestrator.build_and_deploy(&deployment.id).await.unwrap();

        let reloaded = orchestrator.store().get_deployment(&deployment.id).await.unwrap();
        assert_eq!(reloaded.status_enum(), DeploymentStatus::Deployed);
        assert_eq!(reloaded.container_port, Some(8123));
        assert_eq!(reloaded.subdomain.as_deref(), Some("site"));
        assert!(reloaded.build_step.is_none());
        assert!(reloaded.completed_at.is_some());
        assert_eq!(engine.run_names.lock().unwrap().as_slice(), ["dropdeploy-site"]);
    }

    #[tokio::test]
    async fn build_and_deploy_on_missing_deployment_is_a_noop() {
        let engine = Arc::new(FakeEngine::new());
        let (orchestrator, _projects_root) = test_orchestrator(engine).await;

        orchestrator
            .build_and_deploy("does-not-exist")
            .await
            .expect("stale job must be a no-op success, not an error");
    }

    #[tokio::test]
    async fn build_failure_marks_deployment_failed_and_rethrows() {
        let engine = Arc::new(FakeEngine::failing_build());
        let (orchestrator, _projects_root) = test_orchestrator(engine).await;

        let fixture = local_git_fixture();
        let repo_url = fixture.path().display().to_string();

        let project = orchestrator
            .store()
            .create_project("u1", "site", "site", &repo_url, "NODEJS", "main")
            .await
            .unwrap();
        let deployment = orchestrator.create_deployment(&project.id, "u1").await.unwrap();

        let err = orchestrator.build_and_deploy(&deployment.id).await.unwrap_err();
        assert!(matches!(err, CoreError::ImageMissingAfterBuild(_)));

        let reloaded = orchestrator.store().get_deployment(&deployment.id).await.unwrap();
        assert_eq!(reloaded.status_enum(), DeploymentStatus::Failed);
        assert!(reloaded.build_step.is_none());
        assert!(reloaded.completed_at.is_some());
        // Scenario #3: logs must carry the NODEJS-specific `start` script hint.
        assert!(reloaded.logs.contains("start"));
        assert!(reloaded.logs.contains("BUILDING_IMAGE"));
    }

    #[tokio::test]
    async fn subdomain_moves_to_the_newer_deployment_on_redeploy() {
        let engine = Arc::new(FakeEngine::new());
        let (orchestrator, _projects_root) = test_orchestrator(engine).await;

        let fixture = local_git_fixture();
        let repo_url = fixture.path().display().to_string();

        let project = orchestrator
            .store()
            .create_project("u1", "site", "site", &repo_url, "STATIC", "main")
            .await
            .unwrap();

        let first = orchestrator.create_deployment(&project.id, "u1").await.unwrap();
        orchestrator.build_and_deploy(&first.id).await.unwrap();

        let second = orchestrator.create_deployment(&project.id, "u1").await.unwrap();
        orchestrator.build_and_deploy(&second.id).await.unwrap();

        let first_reloaded = orchestrator.store().get_deployment(&first.id).await.unwrap();
        let second_reloaded = orchestrator.store().get_deployment(&second.id).await.unwrap();
        assert_eq!(first_reloaded.subdomain, None);
        assert_eq!(second_reloaded.subdomain.as_deref(), Some("site"));
    }
}
