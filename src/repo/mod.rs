//! Repository Manager: clone-once-then-update working copies on disk (§4.1).
//!
//! Grounded in `git2` rather than shelling out to the `git` binary, so the
//! clone/fetch/checkout/reset sequence is expressed as typed calls instead of
//! parsed CLI output.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    FetchOptions, Repository,
};
use tracing::{info, instrument};

use crate::error::CoreError;

/// Where a project's working copy lives on disk, keyed by slug.
pub struct RepositoryManager {
    projects_root: PathBuf,
}

impl RepositoryManager {
    pub fn new(projects_root: impl Into<PathBuf>) -> Self {
        Self {
            projects_root: projects_root.into(),
        }
    }

    pub fn working_dir(&self, slug: &str) -> PathBuf {
        self.projects_root.join(slug)
    }

    /// Ensure `slug`'s working copy exists at `repo_url`@`branch`, HEAD-clean
    /// and up to date. Clones on first use; otherwise fetches and hard-resets
    /// onto the remote tracking branch so local state can never drift.
    #[instrument(skip(self), fields(slug = %slug, branch = %branch))]
    pub async fn sync(&self, slug: &str, repo_url: &str, branch: &str) -> Result<PathBuf, CoreError> {
        let dir = self.working_dir(slug);
        let repo_url = repo_url.to_string();
        let branch = branch.to_string();

        tokio::task::spawn_blocking(move || sync_blocking(&dir, &repo_url, &branch))
            .await
            .map_err(|e| CoreError::CloneFailed(format!("sync task panicked: {e}")))?
    }
}

fn sync_blocking(dir: &Path, repo_url: &str, branch: &str) -> Result<PathBuf, CoreError> {
    if dir.join(".git").is_dir() {
        update_existing(dir, branch).map_err(|e| CoreError::CloneFailed(e.to_string()))?;
    } else {
        clone_fresh(dir, repo_url, branch).map_err(|e| CoreError::CloneFailed(e.to_string()))?;
    }
    Ok(dir.to_path_buf())
}

fn clone_fresh(dir: &Path, repo_url: &str, branch: &str) -> Result<()> {
    info!(dir = %dir.display(), "cloning repository");
    if let Some(parent) = dir.parent() {
        std::fs::create_dir_all(parent).context("creating projects root")?;
    }

    let mut fetch_opts = FetchOptions::new();
    fetch_opts.download_tags(git2::AutotagOption::None);

    RepoBuilder::new()
        .branch(branch)
        .fetch_options(fetch_opts)
        .clone(repo_url, dir)
        .with_context(|| format!("cloning {repo_url} branch {branch}"))?;

    Ok(())
}

/// Fetch the tracking branch and hard-reset onto it, detecting a shallow
/// clone so a branch switch unshallows rather than failing on a missing
/// commit graph; otherwise a plain pruning fetch is enough.
fn update_existing(dir: &Path, branch: &str) -> Result<()> {
    info!(dir = %dir.display(), "updating existing working copy");
    let repo = Repository::open(dir).context("opening existing working copy")?;
    let is_shallow = repo.is_shallow();

    // §4.1 step 1: overwrite (not append to) origin's fetch refspec so every
    // remote branch is discoverable even when the initial clone was shallow
    // and single-branch — a later switch to a branch never seen before must
    // still resolve.
    repo.config()
        .context("opening repo config")?
        .set_str("remote.origin.fetch", "+refs/heads/*:refs/remotes/origin/*")
        .context("overwriting origin fetch refspec")?;

    let mut remote = repo.find_remote("origin").context("locating origin remote")?;

    let mut fetch_opts = FetchOptions::new();
    if is_shallow {
        fetch_opts.depth(0); // unshallow: fetch full history for the branch switch
    } else {
        fetch_opts.prune(git2::FetchPrune::On);
    }

    remote
        .fetch(&[] as &[&str], Some(&mut fetch_opts), None)
        .with_context(|| format!("fetching branch {branch}"))?;

    let remote_ref = format!("refs/remotes/origin/{branch}");
    let target = repo
        .find_reference(&remote_ref)
        .with_context(|| format!("{branch} not found on origin after fetch"))?
        .peel_to_commit()
        .context("resolving remote branch to a commit")?;

    checkout_or_create_tracking_branch(&repo, branch, &target)?;
    hard_reset(&repo, &target)?;

    Ok(())
}

fn checkout_or_create_tracking_branch(
    repo: &Repository,
    branch: &str,
    target: &git2::Commit,
) -> Result<()> {
    match repo.find_branch(branch, git2::BranchType::Local) {
        Ok(_) => {
            repo.set_head(&format!("refs/heads/{branch}"))
                .with_context(|| format!("switching HEAD to {branch}"))?;
        }
        Err(_) => {
            repo.branch(branch, target, false)
                .with_context(|| format!("creating local tracking branch {branch}"))?;
            repo.set_head(&format!("refs/heads/{branch}"))
                .with_context(|| format!("switching HEAD to {branch}"))?;
        }
    }
    Ok(())
}

fn hard_reset(repo: &Repository, target: &git2::Commit) -> Result<()> {
    let mut checkout = CheckoutBuilder::new();
    checkout.force().remove_untracked(true);
    repo.reset(
        target.as_object(),
        git2::ResetType::Hard,
        Some(&mut checkout),
    )
    .context("hard-resetting working copy onto fetched branch")
}
