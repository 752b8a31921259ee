//! forge::traits
//!
//! The forge capability trait and its option records.
//!
//! # Design
//!
//! [`Forge`] is the single surface callers use: every operation a hosted
//! forge supports, named in forge-neutral terms. Implementations are built
//! by [`crate::forge::create_forge`], which detects the forge behind a URL
//! and returns a `Box<dyn Forge>` — callers never import an adapter type.
//!
//! The trait is async because every operation involves network or
//! subprocess I/O. A single adapter instance executes its operations in
//! call order and is not meant for concurrent use from multiple tasks;
//! instantiate per task instead.
//!
//! Two operations have provided implementations shared by every adapter:
//! [`Forge::update_and_merge_pull_request`] and [`Forge::rebase_branch`]
//! delegate to the merge orchestrator in [`crate::merge`], which drives the
//! poll → rebase → merge loop through the adapter's own primitive
//! operations.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::coordinate::RepoCoordinate;
use crate::core::types::{
    Branch, ForgeKind, GitEvent, GitUserConfig, MergeMethod, PullRequest, RepoFile, RepoSummary,
    Webhook, WebhookParams,
};
use crate::error::ForgeError;
use crate::git::Workspace;
use crate::merge::resolvers::ConflictResolver;

/// Options for creating a repository.
#[derive(Debug, Clone)]
pub struct CreateRepoOpts {
    /// The new repository's name
    pub name: String,
    /// Create as private
    pub private_repo: bool,
    /// Guarantee an initial commit on the default branch before returning.
    /// Forges without native init (Azure, Bitbucket) get a README written
    /// through a follow-up call.
    pub auto_init: bool,
}

impl CreateRepoOpts {
    /// Options for a public, auto-initialized repository.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            private_repo: false,
            auto_init: true,
        }
    }

    /// Toggle private visibility.
    pub fn private(mut self, private_repo: bool) -> Self {
        self.private_repo = private_repo;
        self
    }

    /// Opt out of the initial commit.
    pub fn without_auto_init(mut self) -> Self {
        self.auto_init = false;
        self
    }
}

/// Options for creating a pull request.
#[derive(Debug, Clone)]
pub struct CreatePullRequestOpts {
    /// PR title
    pub title: String,
    /// Head branch (the branch with changes)
    pub source_branch: String,
    /// Base branch (the branch to merge into)
    pub target_branch: String,
    /// PR description
    pub body: Option<String>,
    /// Create as draft, where the forge supports it
    pub draft: bool,
}

impl CreatePullRequestOpts {
    /// Minimal options: title plus the two branches.
    pub fn new(
        title: impl Into<String>,
        source_branch: impl Into<String>,
        target_branch: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            source_branch: source_branch.into(),
            target_branch: target_branch.into(),
            body: None,
            draft: false,
        }
    }
}

/// Caller-supplied merge retry evaluator, OR-composed with the
/// orchestrator's own transient classification.
pub type MergeRetryHandler = Arc<dyn Fn(&ForgeError) -> bool + Send + Sync>;

/// Options for merging a pull request.
#[derive(Clone, Default)]
pub struct MergeOpts {
    /// The forge-neutral merge strategy
    pub method: MergeMethod,
    /// Commit message for the merge/squash commit, when the forge takes one
    pub commit_message: Option<String>,
    /// Delete the source branch after a successful merge (best effort)
    pub delete_source_branch: bool,
    /// How long `update_and_merge_pull_request` may wait out a blocked PR,
    /// as a time text (`"1h30m"`); unparseable text waits not at all
    pub wait_for_blocked: Option<String>,
    /// Conflict resolver for rebases; `None` resolves nothing, so any
    /// conflict surfaces as `UnresolvedConflicts`
    pub resolver: Option<Arc<dyn ConflictResolver>>,
    /// Additional retry evaluator for failed merge attempts
    pub retry: Option<MergeRetryHandler>,
    /// Author identity for rebase-generated commits
    pub user_config: Option<GitUserConfig>,
}

impl std::fmt::Debug for MergeOpts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeOpts")
            .field("method", &self.method)
            .field("commit_message", &self.commit_message)
            .field("delete_source_branch", &self.delete_source_branch)
            .field("wait_for_blocked", &self.wait_for_blocked)
            .field("resolver", &self.resolver.is_some())
            .field("retry", &self.retry.is_some())
            .finish()
    }
}

impl MergeOpts {
    /// Options for one merge strategy, everything else defaulted.
    pub fn with_method(method: MergeMethod) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }
}

/// Options for rebasing a source branch onto a target.
#[derive(Clone)]
pub struct RebaseOpts {
    /// The branch to rebase
    pub source_branch: String,
    /// The branch to rebase onto
    pub target_branch: String,
    /// Conflict resolver; `None` resolves nothing
    pub resolver: Option<Arc<dyn ConflictResolver>>,
    /// Author identity for resolution commits
    pub user_config: Option<GitUserConfig>,
}

impl std::fmt::Debug for RebaseOpts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RebaseOpts")
            .field("source_branch", &self.source_branch)
            .field("target_branch", &self.target_branch)
            .field("resolver", &self.resolver.is_some())
            .finish()
    }
}

impl RebaseOpts {
    /// Rebase `source` onto `target` with no resolver.
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source_branch: source.into(),
            target_branch: target.into(),
            resolver: None,
            user_config: None,
        }
    }

    /// Attach a conflict resolver.
    pub fn with_resolver(mut self, resolver: Arc<dyn ConflictResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }
}

/// Options for registering a webhook.
#[derive(Debug, Clone)]
pub struct CreateWebhookOpts {
    /// Target URL the forge will deliver payloads to
    pub webhook_url: String,
    /// Events to subscribe; defaults to push only
    pub events: Vec<GitEvent>,
    /// Payload content type
    pub content_type: String,
    /// Ask the forge to skip TLS verification on delivery
    pub insecure_ssl: bool,
}

impl CreateWebhookOpts {
    /// A JSON push-event webhook for `url`.
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            webhook_url: url.into(),
            events: vec![GitEvent::Push],
            content_type: "json".into(),
            insecure_ssl: false,
        }
    }
}

/// Options for cloning the repository locally.
#[derive(Debug, Clone)]
pub struct CloneOpts {
    /// Directory to clone into
    pub local_dir: PathBuf,
    /// Author identity to configure in the clone
    pub user_config: Option<GitUserConfig>,
    /// Extra `key=value` git config applied during the clone
    pub extra_config: Vec<(String, String)>,
}

impl CloneOpts {
    /// Clone into `dir` with no extra configuration.
    pub fn into_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            local_dir: dir.into(),
            user_config: None,
            extra_config: Vec::new(),
        }
    }
}

/// The uniform capability surface of a hosted Git forge.
///
/// # Errors
///
/// All failures use the closed [`ForgeError`] taxonomy; see the crate-level
/// documentation for the mapping rules. Operations a forge does not
/// implement return [`ForgeError::Fatal`] naming the gap.
///
/// # Example
///
/// ```ignore
/// use gitu::forge::{create_forge, CreatePullRequestOpts, MergeOpts};
/// use gitu::core::types::Credentials;
///
/// let forge = create_forge("https://github.com/owner/repo", &creds).await?;
/// let pr = forge
///     .create_pull_request(CreatePullRequestOpts::new("Add feature", "feat", "main"))
///     .await?;
/// let message = forge
///     .update_and_merge_pull_request(pr.number, MergeOpts::default())
///     .await?;
/// println!("merged: {}", message);
/// ```
#[async_trait]
pub trait Forge: Send + Sync {
    /// The forge this adapter speaks to.
    fn kind(&self) -> ForgeKind;

    /// The coordinate this adapter is bound to (defensive copy).
    fn config(&self) -> RepoCoordinate;

    /// Read the repository's summary.
    async fn repo_info(&self) -> Result<RepoSummary, ForgeError>;

    /// List the HTTP URLs of every repository in the coordinate's
    /// organization or user scope.
    async fn list_repos(&self) -> Result<Vec<String>, ForgeError>;

    /// Create a repository in the coordinate's scope.
    ///
    /// Returns a sibling adapter bound to the new repository. With
    /// `auto_init`, an initial commit exists on the default branch before
    /// this returns.
    async fn create_repo(&self, opts: CreateRepoOpts) -> Result<Box<dyn Forge>, ForgeError>;

    /// Delete the repository.
    ///
    /// Returns a sibling adapter bound to the owning organization scope.
    async fn delete_repo(&self) -> Result<Box<dyn Forge>, ForgeError>;

    /// List files on the configured branch (default branch when none is
    /// configured).
    async fn list_files(&self) -> Result<Vec<RepoFile>, ForgeError>;

    /// Fetch one file's raw contents.
    async fn file_contents(&self, file: &RepoFile) -> Result<Vec<u8>, ForgeError>;

    /// The repository's default branch.
    async fn default_branch(&self) -> Result<String, ForgeError>;

    /// List branches.
    async fn branches(&self) -> Result<Vec<Branch>, ForgeError>;

    /// Delete a branch.
    async fn delete_branch(&self, branch: &str) -> Result<(), ForgeError>;

    /// Read one pull request, with its status normalized.
    async fn pull_request(&self, number: u64) -> Result<PullRequest, ForgeError>;

    /// Open a pull request.
    ///
    /// The returned number is immediately usable by
    /// [`Self::pull_request`], though the forge may still be computing
    /// mergeability.
    async fn create_pull_request(
        &self,
        opts: CreatePullRequestOpts,
    ) -> Result<PullRequest, ForgeError>;

    /// Merge a pull request in a single attempt (the kernel retry policy
    /// still applies underneath). Returns the forge's merge message or
    /// commit id.
    async fn merge_pull_request(&self, number: u64, opts: MergeOpts)
        -> Result<String, ForgeError>;

    /// Ask the forge to update the PR's source branch from its target.
    /// Semantics differ per forge (some rebase, some merge); best effort.
    async fn update_pull_request_branch(&self, number: u64) -> Result<(), ForgeError>;

    /// Merge with automatic rebase-and-resolve: poll the PR, rebase through
    /// the resolver on conflicts, wait out blocked states within the
    /// configured budget, and retry transient merge failures.
    async fn update_and_merge_pull_request(
        &self,
        number: u64,
        opts: MergeOpts,
    ) -> Result<String, ForgeError> {
        crate::merge::update_and_merge(self, number, &opts).await
    }

    /// Rebase `source` onto `target` in a throwaway local workspace,
    /// resolving conflicts through the resolver, and push with lease.
    ///
    /// Returns `true` when the source branch changed and was pushed,
    /// `false` when the rebase was a no-op.
    async fn rebase_branch(&self, opts: RebaseOpts) -> Result<bool, ForgeError> {
        crate::merge::rebase_branch(&self.config(), &opts).await
    }

    /// List registered webhooks.
    async fn webhooks(&self) -> Result<Vec<Webhook>, ForgeError>;

    /// Register a webhook. Returns the forge-assigned hook id.
    async fn create_webhook(&self, opts: CreateWebhookOpts) -> Result<String, ForgeError>;

    /// Clone the repository locally, with credentials baked into the
    /// effective remote URL.
    async fn clone_repo(&self, opts: CloneOpts) -> Result<Workspace, ForgeError> {
        crate::git::clone_repository(&self.config(), &opts).await
    }

    /// The webhook payload selectors CI templates need for `event` on this
    /// forge.
    fn webhook_params(&self, event: GitEvent) -> WebhookParams;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_repo_opts_default_to_auto_init() {
        let opts = CreateRepoOpts::named("widget");
        assert_eq!(opts.name, "widget");
        assert!(opts.auto_init);
        assert!(!opts.private_repo);
    }

    #[test]
    fn create_repo_opts_expose_explicit_opt_out() {
        let opts = CreateRepoOpts::named("widget").private(true).without_auto_init();
        assert!(opts.private_repo);
        assert!(!opts.auto_init);
    }

    #[test]
    fn merge_opts_default() {
        let opts = MergeOpts::default();
        assert_eq!(opts.method, MergeMethod::Merge);
        assert!(!opts.delete_source_branch);
        assert!(opts.resolver.is_none());
        assert!(opts.wait_for_blocked.is_none());
    }

    #[test]
    fn webhook_opts_default_to_json_push() {
        let opts = CreateWebhookOpts::for_url("https://ci.example.com/hook");
        assert_eq!(opts.events, vec![GitEvent::Push]);
        assert_eq!(opts.content_type, "json");
        assert!(!opts.insecure_ssl);
    }

    #[test]
    fn rebase_opts_debug_hides_resolver_internals() {
        let opts = RebaseOpts::new("feat", "main");
        let rendered = format!("{:?}", opts);
        assert!(rendered.contains("feat"));
        assert!(rendered.contains("resolver: false"));
    }
}
