//! merge
//!
//! The merge orchestrator: pull-request merging with automatic
//! rebase-and-resolve.
//!
//! # State machine
//!
//! One [`update_and_merge`] call drives a pull request through:
//!
//! ```text
//!   Polled → (Conflicts)  → Rebased → Polled
//!          → (Blocked)    → Waited  → Polled
//!          → (otherwise)  → MergeAttempted → {Done | transient → Rebased → Polled}
//! ```
//!
//! Blocked states are waited out in five-minute steps within the caller's
//! `wait_for_blocked` budget. Transient merge failures (base moved, content
//! conflicts) trigger a local rebase through the caller's conflict resolver
//! followed by a jittered pause before the next poll.
//!
//! # Workspace discipline
//!
//! [`rebase_branch`] clones into a throwaway workspace under the system
//! temp directory and removes it on every exit path: success, error, or
//! cancellation mid-rebase (removal runs from a drop guard).

pub mod resolvers;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info};

use crate::core::coordinate::RepoCoordinate;
use crate::core::duration::time_text_to_duration;
use crate::core::types::PullRequestStatus;
use crate::error::ForgeError;
use crate::forge::{Forge, MergeOpts, RebaseOpts};
use crate::git::{GitDriver, Workspace};
use resolvers::{ConflictResolver, NoopResolver};

/// How long one blocked-state wait lasts.
const BLOCKED_WAIT: Duration = Duration::from_secs(5 * 60);

/// Base and jitter for the pause between a rebase and the next poll.
const MERGE_RETRY_BASE: Duration = Duration::from_millis(1000);
const MERGE_RETRY_JITTER: Duration = Duration::from_millis(5000);

/// Backstop on rebase-continue iterations, far above any real branch.
const MAX_REBASE_STEPS: u32 = 500;

/// Merge a pull request, rebasing and resolving as needed.
///
/// See the module documentation for the state machine. Branch deletion
/// after a successful merge is best effort: failures are logged and
/// swallowed.
pub async fn update_and_merge<F: Forge + ?Sized>(
    forge: &F,
    number: u64,
    opts: &MergeOpts,
) -> Result<String, ForgeError> {
    let budget = opts
        .wait_for_blocked
        .as_deref()
        .map(time_text_to_duration)
        .unwrap_or(Duration::ZERO);
    let mut waited = Duration::ZERO;
    // Two consecutive rebases that change nothing mean the forge's view and
    // ours agree and nothing we do locally will unwedge the merge.
    let mut stalled_rebases: u32 = 0;

    loop {
        let pr = forge.pull_request(number).await?;
        debug!(number, status = %pr.status, merge_status = ?pr.merge_status, "polled pull request");

        match pr.status {
            PullRequestStatus::Conflicts => {
                let pushed = forge
                    .rebase_branch(rebase_opts_for(&pr.source_branch, &pr.target_branch, opts))
                    .await?;
                if pushed {
                    stalled_rebases = 0;
                } else {
                    stalled_rebases += 1;
                    if stalled_rebases >= 2 {
                        return Err(ForgeError::MergeConflict { number });
                    }
                }
                continue;
            }
            PullRequestStatus::Blocked => {
                if waited >= budget {
                    return Err(ForgeError::MergeBlockedForPullRequest { number });
                }
                debug!(
                    number,
                    waited_s = waited.as_secs(),
                    budget_s = budget.as_secs(),
                    "pull request blocked, waiting"
                );
                tokio::time::sleep(BLOCKED_WAIT).await;
                waited += BLOCKED_WAIT;
                continue;
            }
            _ => {}
        }

        match forge.merge_pull_request(number, opts.clone()).await {
            Ok(message) => {
                if opts.delete_source_branch {
                    if let Err(e) = forge.delete_branch(&pr.source_branch).await {
                        debug!(number, branch = %pr.source_branch, error = %e, "source branch deletion failed");
                    }
                }
                info!(number, "merged pull request");
                return Ok(message);
            }
            Err(e) => {
                let caller_wants_retry = opts.retry.as_ref().map_or(false, |handler| handler(&e));
                if !e.is_merge_transient() && !caller_wants_retry {
                    return Err(e);
                }

                debug!(number, error = %e, "merge attempt failed transiently, rebasing");
                let pushed = forge
                    .rebase_branch(rebase_opts_for(&pr.source_branch, &pr.target_branch, opts))
                    .await?;
                if pushed {
                    stalled_rebases = 0;
                } else {
                    stalled_rebases += 1;
                    if stalled_rebases >= 2 {
                        return Err(e);
                    }
                }

                tokio::time::sleep(MERGE_RETRY_BASE + random_fraction(MERGE_RETRY_JITTER)).await;
                continue;
            }
        }
    }
}

fn rebase_opts_for(source: &str, target: &str, opts: &MergeOpts) -> RebaseOpts {
    RebaseOpts {
        source_branch: source.to_string(),
        target_branch: target.to_string(),
        resolver: opts.resolver.clone(),
        user_config: opts.user_config.clone(),
    }
}

/// Rebase `source` onto `target` in a fresh workspace and push with lease.
///
/// Returns `true` when the source branch changed and was pushed, `false`
/// when the rebase left it identical to its upstream.
pub async fn rebase_branch(
    coord: &RepoCoordinate,
    opts: &RebaseOpts,
) -> Result<bool, ForgeError> {
    let url = coord.clone_url_with_credentials()?;
    let mut clone_config = Vec::new();
    if let Some(ca) = &coord.ca_cert {
        clone_config.push(("http.sslCAInfo".into(), ca.to_string_lossy().into_owned()));
    }
    rebase_branch_with_remote(&url, &clone_config, opts).await
}

/// [`rebase_branch`] against an explicit remote instead of a coordinate.
///
/// The remote may be anything `git clone` accepts, including a local path.
pub async fn rebase_branch_with_remote(
    remote_url: &str,
    clone_config: &[(String, String)],
    opts: &RebaseOpts,
) -> Result<bool, ForgeError> {
    let dir = rebase_workspace_dir(&opts.source_branch);
    if let Some(parent) = dir.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ForgeError::other(format!("failed to create workspace: {}", e)))?;
    }
    let _guard = WorkspaceGuard { dir: dir.clone() };

    run_rebase(remote_url, clone_config, opts, &dir).await
}

async fn run_rebase(
    remote_url: &str,
    clone_config: &[(String, String)],
    opts: &RebaseOpts,
    dir: &std::path::Path,
) -> Result<bool, ForgeError> {
    let git = GitDriver::clone_from(remote_url, dir, clone_config).await?;

    for (key, value) in clone_config {
        git.config(key, value).await?;
    }
    if let Some(user) = &opts.user_config {
        git.config("user.name", &user.name).await?;
        git.config("user.email", &user.email).await?;
    }

    git.checkout_new_tracking(&opts.source_branch).await?;
    // The rebase's exit code says less than the status afterwards does.
    let _ = git.rebase(&opts.target_branch).await?;

    let resolver: Arc<dyn ConflictResolver> = opts
        .resolver
        .clone()
        .unwrap_or_else(|| Arc::new(NoopResolver));
    let workspace = Workspace::from(git.clone());

    let mut steps = 0;
    loop {
        steps += 1;
        if steps > MAX_REBASE_STEPS {
            return Err(ForgeError::other(format!(
                "rebase of {} onto {} did not converge",
                opts.source_branch, opts.target_branch
            )));
        }

        let status = git.status().await?;
        if status.is_clean() {
            break;
        }

        if !status.conflicted.is_empty() {
            debug!(files = ?status.conflicted, "resolving conflicts");
            let resolution = resolver.resolve(&workspace, &status.conflicted).await?;

            if !resolution.errors.is_empty() {
                return Err(ForgeError::ConflictResolutionFailed {
                    errors: resolution.errors,
                });
            }
            let unresolved: Vec<String> = status
                .conflicted
                .iter()
                .filter(|f| !resolution.resolved.contains(f))
                .cloned()
                .collect();
            if !unresolved.is_empty() {
                return Err(ForgeError::UnresolvedConflicts { files: unresolved });
            }

            for file in &resolution.resolved {
                git.add(file).await?;
                let out = git.commit(&format!("Resolves conflict with {}", file)).await?;
                if !out.success() && !out.combined_text().contains("nothing to commit") {
                    return Err(ForgeError::other(format!(
                        "failed to commit resolution of {}: {}",
                        file,
                        out.stderr_text()
                    )));
                }
            }
        }

        let out = git.rebase_continue().await?;
        let text = out.combined_text();
        if text.contains("No changes - did you forget to use 'git add'") {
            git.rebase_skip().await?;
        } else if !out.success() && text.contains("no rebase in progress") {
            break;
        }
    }

    let final_status = git.status().await?;
    if final_status.ahead == 0 && final_status.behind == 0 {
        debug!(
            source = %opts.source_branch,
            target = %opts.target_branch,
            "rebase was a no-op"
        );
        return Ok(false);
    }

    git.push_force_with_lease(&opts.source_branch).await?;
    info!(
        source = %opts.source_branch,
        target = %opts.target_branch,
        "pushed rebased branch"
    );
    Ok(true)
}

/// `{tmp}/repo/{source}/rebase-{random5}`
fn rebase_workspace_dir(source_branch: &str) -> PathBuf {
    let suffix: String = rand::thread_rng()
        .sample_iter(rand::distributions::Alphanumeric)
        .take(5)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    std::env::temp_dir()
        .join("repo")
        .join(source_branch)
        .join(format!("rebase-{}", suffix))
}

/// Removes the workspace directory when dropped, whatever the exit path.
struct WorkspaceGuard {
    dir: PathBuf,
}

impl Drop for WorkspaceGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn random_fraction(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max.as_millis() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_dir_shape() {
        let dir = rebase_workspace_dir("feat");
        let rendered = dir.to_string_lossy().into_owned();
        assert!(rendered.contains("repo/feat/rebase-"), "{}", rendered);
        let suffix = rendered.rsplit("rebase-").next().unwrap();
        assert_eq!(suffix.len(), 5);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn workspace_dirs_are_unique() {
        assert_ne!(rebase_workspace_dir("feat"), rebase_workspace_dir("feat"));
    }

    #[test]
    fn guard_removes_directory() {
        let dir = std::env::temp_dir().join(format!("gitu-guard-{}", std::process::id()));
        std::fs::create_dir_all(dir.join("nested")).unwrap();
        std::fs::write(dir.join("nested/file"), b"x").unwrap();
        {
            let _guard = WorkspaceGuard { dir: dir.clone() };
        }
        assert!(!dir.exists());
    }

    #[test]
    fn guard_tolerates_missing_directory() {
        let dir = std::env::temp_dir().join("gitu-guard-never-created");
        let _guard = WorkspaceGuard { dir };
    }
}
