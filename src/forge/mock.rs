//! forge::mock
//!
//! In-memory forge for deterministic testing.
//!
//! # Design
//!
//! The mock keeps pull requests, webhooks, and files in memory and records
//! every operation for later assertion. Two scripting hooks drive the merge
//! orchestrator's branches without a network:
//!
//! - [`MockForge::script_pull_request`] queues the states successive polls
//!   of one PR will observe (the last state repeats once the queue drains)
//! - [`MockForge::script_merge_result`] / [`MockForge::script_rebase_result`]
//!   queue outcomes for merge attempts and rebases
//!
//! `rebase_branch` is overridden to record and return a scripted outcome
//! instead of cloning anything, so orchestrator tests run without a git
//! binary.
//!
//! # Example
//!
//! ```
//! use gitu::forge::mock::MockForge;
//! use gitu::forge::Forge;
//! use gitu::core::types::PullRequestStatus;
//!
//! # tokio_test::block_on(async {
//! let forge = MockForge::new();
//! forge.script_pull_request(1, vec![
//!     MockForge::pr(1, PullRequestStatus::Active),
//! ]);
//! let pr = forge.pull_request(1).await.unwrap();
//! assert_eq!(pr.status, PullRequestStatus::Active);
//! # });
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::core::coordinate::RepoCoordinate;
use crate::core::types::{
    Branch, ForgeKind, GitEvent, MergeMethod, PullRequest, PullRequestStatus, RepoFile,
    RepoSummary, Webhook, WebhookConfig, WebhookParams,
};
use crate::error::ForgeError;
use crate::git::Workspace;

use super::traits::{
    CloneOpts, CreatePullRequestOpts, CreateRepoOpts, CreateWebhookOpts, Forge, MergeOpts,
    RebaseOpts,
};

/// Recorded operation for test verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOperation {
    /// `pull_request` was read
    PullRequest {
        /// The polled number
        number: u64,
    },
    /// `create_pull_request` ran
    CreatePullRequest {
        /// Head branch
        source: String,
        /// Base branch
        target: String,
    },
    /// `merge_pull_request` was attempted
    MergePullRequest {
        /// The merged number
        number: u64,
        /// The requested strategy
        method: MergeMethod,
    },
    /// `rebase_branch` ran
    RebaseBranch {
        /// The rebased branch
        source: String,
        /// The branch it was rebased onto
        target: String,
        /// Whether a resolver was supplied
        with_resolver: bool,
    },
    /// `delete_branch` ran
    DeleteBranch {
        /// The deleted branch
        branch: String,
    },
    /// `update_pull_request_branch` ran
    UpdatePullRequestBranch {
        /// The updated number
        number: u64,
    },
    /// `create_webhook` ran
    CreateWebhook {
        /// The target URL
        url: String,
    },
}

#[derive(Debug, Default)]
struct MockForgeInner {
    coordinate: RepoCoordinate,
    prs: HashMap<u64, PullRequest>,
    pr_scripts: HashMap<u64, VecDeque<PullRequest>>,
    merge_results: VecDeque<Result<String, ForgeError>>,
    rebase_results: VecDeque<Result<bool, ForgeError>>,
    next_pr_number: u64,
    webhooks: Vec<Webhook>,
    files: HashMap<String, Vec<u8>>,
    branches: Vec<String>,
    operations: Vec<MockOperation>,
}

/// Mock forge. Thread-safe; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockForge {
    inner: Arc<Mutex<MockForgeInner>>,
}

impl MockForge {
    /// An empty mock bound to `https://mock.example.com/owner/repo`.
    pub fn new() -> Self {
        let coordinate = RepoCoordinate::parse("https://mock.example.com/owner/repo")
            .expect("static mock url parses");
        let inner = MockForgeInner {
            coordinate,
            next_pr_number: 1,
            branches: vec!["main".to_string()],
            ..MockForgeInner::default()
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// A pull request value for scripting: `feat` into `main` with the
    /// given status.
    pub fn pr(number: u64, status: PullRequestStatus) -> PullRequest {
        PullRequest {
            number,
            source_branch: "feat".into(),
            target_branch: "main".into(),
            status,
            merge_status: None,
            has_conflicts: Some(status == PullRequestStatus::Conflicts),
        }
    }

    /// Queue the states successive polls of PR `number` will observe. The
    /// final state repeats once the queue drains.
    pub fn script_pull_request(&self, number: u64, states: Vec<PullRequest>) {
        let mut inner = self.inner.lock().unwrap();
        inner.pr_scripts.insert(number, states.into());
    }

    /// Queue the outcome of the next merge attempt.
    pub fn script_merge_result(&self, result: Result<String, ForgeError>) {
        self.inner.lock().unwrap().merge_results.push_back(result);
    }

    /// Queue the outcome of the next rebase.
    pub fn script_rebase_result(&self, result: Result<bool, ForgeError>) {
        self.inner.lock().unwrap().rebase_results.push_back(result);
    }

    /// Seed a file for `list_files`/`file_contents`.
    pub fn add_file(&self, path: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.inner
            .lock()
            .unwrap()
            .files
            .insert(path.into(), contents.into());
    }

    /// Everything that has been invoked, in order.
    pub fn operations(&self) -> Vec<MockOperation> {
        self.inner.lock().unwrap().operations.clone()
    }

    /// How many rebases ran.
    pub fn rebase_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .operations
            .iter()
            .filter(|op| matches!(op, MockOperation::RebaseBranch { .. }))
            .count()
    }

    fn record(&self, op: MockOperation) {
        self.inner.lock().unwrap().operations.push(op);
    }
}

#[async_trait]
impl Forge for MockForge {
    fn kind(&self) -> ForgeKind {
        ForgeKind::Github
    }

    fn config(&self) -> RepoCoordinate {
        self.inner.lock().unwrap().coordinate.clone()
    }

    async fn repo_info(&self) -> Result<RepoSummary, ForgeError> {
        let inner = self.inner.lock().unwrap();
        Ok(RepoSummary {
            id: "1".into(),
            slug: inner.coordinate.repo.clone().unwrap_or_default(),
            http_url: inner.coordinate.url(),
            name: inner.coordinate.repo.clone().unwrap_or_default(),
            description: String::new(),
            is_private: false,
            default_branch: "main".into(),
        })
    }

    async fn list_repos(&self) -> Result<Vec<String>, ForgeError> {
        let inner = self.inner.lock().unwrap();
        Ok(vec![inner.coordinate.url()])
    }

    async fn create_repo(&self, opts: CreateRepoOpts) -> Result<Box<dyn Forge>, ForgeError> {
        let sibling = self.clone();
        {
            let mut inner = sibling.inner.lock().unwrap();
            inner.coordinate = inner.coordinate.with_repo(&opts.name);
        }
        Ok(Box::new(sibling))
    }

    async fn delete_repo(&self) -> Result<Box<dyn Forge>, ForgeError> {
        let sibling = self.clone();
        {
            let mut inner = sibling.inner.lock().unwrap();
            inner.coordinate = inner.coordinate.org_scope();
        }
        Ok(Box::new(sibling))
    }

    async fn list_files(&self) -> Result<Vec<RepoFile>, ForgeError> {
        let inner = self.inner.lock().unwrap();
        let mut files: Vec<RepoFile> = inner
            .files
            .keys()
            .map(|path| RepoFile {
                path: path.clone(),
                url: None,
            })
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    async fn file_contents(&self, file: &RepoFile) -> Result<Vec<u8>, ForgeError> {
        self.inner
            .lock()
            .unwrap()
            .files
            .get(&file.path)
            .cloned()
            .ok_or_else(|| ForgeError::fatal(404, format!("no such file: {}", file.path)))
    }

    async fn default_branch(&self) -> Result<String, ForgeError> {
        Ok("main".into())
    }

    async fn branches(&self) -> Result<Vec<Branch>, ForgeError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .branches
            .iter()
            .map(|name| Branch { name: name.clone() })
            .collect())
    }

    async fn delete_branch(&self, branch: &str) -> Result<(), ForgeError> {
        self.record(MockOperation::DeleteBranch {
            branch: branch.to_string(),
        });
        let mut inner = self.inner.lock().unwrap();
        inner.branches.retain(|b| b != branch);
        Ok(())
    }

    async fn pull_request(&self, number: u64) -> Result<PullRequest, ForgeError> {
        self.record(MockOperation::PullRequest { number });
        let mut inner = self.inner.lock().unwrap();
        if let Some(queue) = inner.pr_scripts.get_mut(&number) {
            if queue.len() > 1 {
                return Ok(queue.pop_front().expect("non-empty queue"));
            }
            if let Some(state) = queue.front() {
                return Ok(state.clone());
            }
        }
        inner
            .prs
            .get(&number)
            .cloned()
            .ok_or_else(|| ForgeError::fatal(404, format!("pull request not found: {}", number)))
    }

    async fn create_pull_request(
        &self,
        opts: CreatePullRequestOpts,
    ) -> Result<PullRequest, ForgeError> {
        self.record(MockOperation::CreatePullRequest {
            source: opts.source_branch.clone(),
            target: opts.target_branch.clone(),
        });
        let mut inner = self.inner.lock().unwrap();
        if opts.source_branch == opts.target_branch {
            return Err(ForgeError::NoCommitsForPullRequest {
                source_branch: opts.source_branch,
                target: opts.target_branch,
            });
        }
        let number = inner.next_pr_number;
        inner.next_pr_number += 1;
        let pr = PullRequest {
            number,
            source_branch: opts.source_branch,
            target_branch: opts.target_branch,
            status: PullRequestStatus::Active,
            merge_status: None,
            has_conflicts: Some(false),
        };
        inner.prs.insert(number, pr.clone());
        Ok(pr)
    }

    async fn merge_pull_request(
        &self,
        number: u64,
        opts: MergeOpts,
    ) -> Result<String, ForgeError> {
        self.record(MockOperation::MergePullRequest {
            number,
            method: opts.method,
        });
        let mut inner = self.inner.lock().unwrap();
        if let Some(result) = inner.merge_results.pop_front() {
            return result;
        }
        if let Some(pr) = inner.prs.get_mut(&number) {
            pr.status = PullRequestStatus::Completed;
        }
        Ok(format!("merged #{}", number))
    }

    async fn update_pull_request_branch(&self, number: u64) -> Result<(), ForgeError> {
        self.record(MockOperation::UpdatePullRequestBranch { number });
        Ok(())
    }

    async fn rebase_branch(&self, opts: RebaseOpts) -> Result<bool, ForgeError> {
        self.record(MockOperation::RebaseBranch {
            source: opts.source_branch.clone(),
            target: opts.target_branch.clone(),
            with_resolver: opts.resolver.is_some(),
        });
        let mut inner = self.inner.lock().unwrap();
        inner.rebase_results.pop_front().unwrap_or(Ok(true))
    }

    async fn webhooks(&self) -> Result<Vec<Webhook>, ForgeError> {
        Ok(self.inner.lock().unwrap().webhooks.clone())
    }

    async fn create_webhook(&self, opts: CreateWebhookOpts) -> Result<String, ForgeError> {
        self.record(MockOperation::CreateWebhook {
            url: opts.webhook_url.clone(),
        });
        let mut inner = self.inner.lock().unwrap();
        if inner
            .webhooks
            .iter()
            .any(|hook| hook.config.url == opts.webhook_url)
        {
            return Err(ForgeError::WebhookAlreadyExists {
                url: opts.webhook_url,
            });
        }
        let id = (inner.webhooks.len() + 1).to_string();
        inner.webhooks.push(Webhook {
            id: id.clone(),
            name: "mock".into(),
            active: true,
            events: vec!["push".into()],
            config: WebhookConfig {
                content_type: opts.content_type,
                url: opts.webhook_url,
                insecure_ssl: opts.insecure_ssl,
            },
        });
        Ok(id)
    }

    async fn clone_repo(&self, _opts: CloneOpts) -> Result<Workspace, ForgeError> {
        Err(ForgeError::other("clone is not supported by the mock forge"))
    }

    fn webhook_params(&self, event: GitEvent) -> WebhookParams {
        WebhookParams {
            event_header: "X-Mock-Event".into(),
            event_value: match event {
                GitEvent::Push => "push".into(),
                GitEvent::PullRequest => "pull_request".into(),
            },
            ref_path: "body.ref".into(),
            repo_url_path: "body.repository.clone_url".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_read_pull_request() {
        let forge = MockForge::new();
        let pr = forge
            .create_pull_request(CreatePullRequestOpts::new("Add feature", "feat", "main"))
            .await
            .unwrap();
        assert_eq!(pr.number, 1);
        assert_eq!(pr.status, PullRequestStatus::Active);

        let read = forge.pull_request(1).await.unwrap();
        assert_eq!(read.source_branch, "feat");
    }

    #[tokio::test]
    async fn identical_branches_have_no_commits() {
        let forge = MockForge::new();
        let result = forge
            .create_pull_request(CreatePullRequestOpts::new("Oops", "main", "main"))
            .await;
        assert!(matches!(
            result,
            Err(ForgeError::NoCommitsForPullRequest { .. })
        ));
    }

    #[tokio::test]
    async fn scripted_states_replay_in_order_and_last_repeats() {
        let forge = MockForge::new();
        forge.script_pull_request(
            5,
            vec![
                MockForge::pr(5, PullRequestStatus::Blocked),
                MockForge::pr(5, PullRequestStatus::Active),
            ],
        );

        assert_eq!(
            forge.pull_request(5).await.unwrap().status,
            PullRequestStatus::Blocked
        );
        assert_eq!(
            forge.pull_request(5).await.unwrap().status,
            PullRequestStatus::Active
        );
        assert_eq!(
            forge.pull_request(5).await.unwrap().status,
            PullRequestStatus::Active
        );
    }

    #[tokio::test]
    async fn scripted_merge_results_pop_in_order() {
        let forge = MockForge::new();
        forge.script_merge_result(Err(ForgeError::fatal(409, "base moved")));
        forge.script_merge_result(Ok("abc123".into()));

        assert!(forge
            .merge_pull_request(1, MergeOpts::default())
            .await
            .is_err());
        assert_eq!(
            forge
                .merge_pull_request(1, MergeOpts::default())
                .await
                .unwrap(),
            "abc123"
        );
    }

    #[tokio::test]
    async fn operations_are_recorded() {
        let forge = MockForge::new();
        forge.delete_branch("feat").await.unwrap();
        forge
            .rebase_branch(RebaseOpts::new("feat", "main"))
            .await
            .unwrap();

        let ops = forge.operations();
        assert_eq!(
            ops[0],
            MockOperation::DeleteBranch {
                branch: "feat".into()
            }
        );
        assert_eq!(
            ops[1],
            MockOperation::RebaseBranch {
                source: "feat".into(),
                target: "main".into(),
                with_resolver: false,
            }
        );
    }

    #[tokio::test]
    async fn duplicate_webhook_is_rejected() {
        let forge = MockForge::new();
        forge
            .create_webhook(CreateWebhookOpts::for_url("https://ci/hook"))
            .await
            .unwrap();
        let result = forge
            .create_webhook(CreateWebhookOpts::for_url("https://ci/hook"))
            .await;
        assert!(matches!(
            result,
            Err(ForgeError::WebhookAlreadyExists { .. })
        ));
    }
}
