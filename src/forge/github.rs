//! forge::github
//!
//! GitHub and GitHub Enterprise adapter.
//!
//! # Design
//!
//! One adapter serves both kinds: GitHub.com uses the hosted API base,
//! GitHub Enterprise the instance's `/api/v3` root discovered during forge
//! detection. Authentication is PAT bearer.
//!
//! # Status mapping
//!
//! Open PRs map through `mergeable_state`: `dirty` means content conflicts,
//! `blocked` means a policy gate (reviews, checks). Closed PRs are
//! `Completed` only when `merged` is set.
//!
//! Merge rejections arrive as 405s whose body distinguishes policy blocks
//! ("approving review is required") from content conflicts; the 405 status
//! is exempted from kernel retry on the merge endpoint so that signal
//! reaches the orchestrator intact.

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::core::coordinate::RepoCoordinate;
use crate::core::types::{
    Branch, ForgeKind, GitEvent, MergeMethod, PullRequest, PullRequestStatus, RepoFile,
    RepoSummary, Webhook, WebhookConfig, WebhookParams,
};
use crate::error::ForgeError;
use crate::http::{classify_common, AuthScheme, HttpKernel, KernelResponse, RetryPolicy};

use super::traits::{
    CreatePullRequestOpts, CreateRepoOpts, CreateWebhookOpts, Forge, MergeOpts,
};

/// Hosted GitHub's API base.
const GITHUB_API_BASE: &str = "https://api.github.com";

/// GitHub REST media type.
const GITHUB_JSON: &str = "application/vnd.github+json";

/// Media type that returns file contents raw.
const GITHUB_RAW: &str = "application/vnd.github.raw";

/// GitHub / GitHub Enterprise adapter.
#[derive(Debug, Clone)]
pub struct GithubForge {
    kind: ForgeKind,
    coordinate: RepoCoordinate,
    kernel: HttpKernel,
    api_base: String,
}

impl GithubForge {
    /// Adapter for GitHub.com.
    pub fn new(coordinate: RepoCoordinate) -> Result<Self, ForgeError> {
        Self::build(ForgeKind::Github, GITHUB_API_BASE.to_string(), coordinate)
    }

    /// Adapter for a GitHub Enterprise instance, whose REST root lives at
    /// `{protocol}://{host}/api/v3`.
    pub fn enterprise(coordinate: RepoCoordinate) -> Result<Self, ForgeError> {
        let api_base = format!("{}://{}/api/v3", coordinate.protocol, coordinate.host);
        Self::build(ForgeKind::Ghe, api_base, coordinate)
    }

    fn build(
        kind: ForgeKind,
        api_base: String,
        coordinate: RepoCoordinate,
    ) -> Result<Self, ForgeError> {
        let kernel = HttpKernel::new(
            AuthScheme::Bearer {
                token: coordinate.password.clone().unwrap_or_default(),
            },
            coordinate.ca_cert.as_deref(),
            RetryPolicy::new(),
        )?;
        Ok(Self {
            kind,
            coordinate,
            kernel,
            api_base,
        })
    }

    fn sibling(&self, coordinate: RepoCoordinate) -> Box<dyn Forge> {
        Box::new(Self {
            kind: self.kind,
            coordinate,
            kernel: self.kernel.clone(),
            api_base: self.api_base.clone(),
        })
    }

    fn repo_url(&self, path: &str) -> Result<String, ForgeError> {
        let repo = self.coordinate.require_repo()?;
        Ok(format!(
            "{}/repos/{}/{}/{}",
            self.api_base, self.coordinate.owner, repo, path
        ))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        op: &str,
        url: &str,
    ) -> Result<T, ForgeError> {
        let response = self
            .kernel
            .send(op, self.kernel.request(Method::GET, url).header(ACCEPT, GITHUB_JSON))
            .await?;
        if !response.is_success() {
            return Err(self.error_from(&response));
        }
        response.json()
    }

    fn error_from(&self, response: &KernelResponse) -> ForgeError {
        classify_common(response.status.as_u16(), error_message(response))
    }

    /// The branch file operations act on: the configured one, else the
    /// repository's default.
    async fn effective_branch(&self) -> Result<String, ForgeError> {
        match self.coordinate.branch.clone() {
            Some(branch) => Ok(branch),
            None => self.default_branch().await,
        }
    }
}

/// Pull the `message` field out of a GitHub error body.
fn error_message(response: &KernelResponse) -> String {
    response
        .json::<GithubError>()
        .map(|e| e.message)
        .unwrap_or_else(|_| response.text())
}

/// Normalize a GitHub pull request state.
///
/// `mergeable_state` is only meaningful while the PR is open; GitHub
/// reports `dirty` for content conflicts and `blocked` for policy gates.
pub(crate) fn map_pull_status(
    state: &str,
    merged: bool,
    mergeable_state: Option<&str>,
) -> PullRequestStatus {
    if state == "open" {
        match mergeable_state {
            Some("dirty") => PullRequestStatus::Conflicts,
            Some("blocked") => PullRequestStatus::Blocked,
            _ => PullRequestStatus::Active,
        }
    } else if merged {
        PullRequestStatus::Completed
    } else {
        PullRequestStatus::Abandoned
    }
}

/// Map a failed merge response into the taxonomy.
///
/// GitHub's 405 bodies split into policy blocks and content conflicts.
pub(crate) fn map_merge_error(status: u16, message: &str, number: u64) -> ForgeError {
    match status {
        405 if message.contains("approving review is required") => {
            ForgeError::MergeBlockedForPullRequest { number }
        }
        405 => ForgeError::MergeConflict { number },
        _ => classify_common(status, message.to_string()),
    }
}

/// GitHub's name for a forge-neutral merge method.
pub(crate) fn merge_method_name(method: MergeMethod) -> &'static str {
    match method {
        MergeMethod::Merge => "merge",
        MergeMethod::Squash => "squash",
        MergeMethod::Rebase => "rebase",
    }
}

fn event_name(event: GitEvent) -> &'static str {
    match event {
        GitEvent::Push => "push",
        GitEvent::PullRequest => "pull_request",
    }
}

#[async_trait]
impl Forge for GithubForge {
    fn kind(&self) -> ForgeKind {
        self.kind
    }

    fn config(&self) -> RepoCoordinate {
        self.coordinate.clone()
    }

    async fn repo_info(&self) -> Result<RepoSummary, ForgeError> {
        let url = self.repo_url("")?;
        let url = url.trim_end_matches('/');
        let response = self
            .kernel
            .send(
                "repo_info",
                self.kernel.request(Method::GET, url).header(ACCEPT, GITHUB_JSON),
            )
            .await?;
        if response.status.as_u16() == 404 {
            return Err(ForgeError::RepoNotFound {
                repo: self.coordinate.full_repo_name(),
            });
        }
        if !response.is_success() {
            return Err(self.error_from(&response));
        }
        let repo: GithubRepo = response.json()?;
        Ok(repo.into())
    }

    async fn list_repos(&self) -> Result<Vec<String>, ForgeError> {
        // Organizations list under /orgs, personal accounts under /users.
        for scope in ["orgs", "users"] {
            let mut urls = Vec::new();
            let mut page = 1u32;
            let mut not_found = false;
            loop {
                let url = format!(
                    "{}/{}/{}/repos?per_page=100&page={}",
                    self.api_base, scope, self.coordinate.owner, page
                );
                let response = self
                    .kernel
                    .send(
                        "list_repos",
                        self.kernel.request(Method::GET, &url).header(ACCEPT, GITHUB_JSON),
                    )
                    .await?;
                if response.status.as_u16() == 404 {
                    not_found = true;
                    break;
                }
                if !response.is_success() {
                    return Err(self.error_from(&response));
                }
                let repos: Vec<GithubRepo> = response.json()?;
                let count = repos.len();
                urls.extend(repos.into_iter().map(|r| r.html_url));
                if count < 100 {
                    break;
                }
                page += 1;
            }
            if !not_found {
                return Ok(urls);
            }
        }
        Err(ForgeError::UserNotFound {
            username: self.coordinate.owner.clone(),
        })
    }

    async fn create_repo(&self, opts: CreateRepoOpts) -> Result<Box<dyn Forge>, ForgeError> {
        let owner_is_user = self
            .coordinate
            .username
            .as_deref()
            .map_or(false, |u| u == self.coordinate.owner);
        let url = if owner_is_user {
            format!("{}/user/repos", self.api_base)
        } else {
            format!("{}/orgs/{}/repos", self.api_base, self.coordinate.owner)
        };

        let body = CreateRepoBody {
            name: &opts.name,
            private: opts.private_repo,
            auto_init: opts.auto_init,
        };
        let response = self
            .kernel
            .send(
                "create_repo",
                self.kernel
                    .request(Method::POST, &url)
                    .header(ACCEPT, GITHUB_JSON)
                    .json(&body),
            )
            .await?;
        if !response.is_success() {
            return Err(self.error_from(&response));
        }
        Ok(self.sibling(self.coordinate.with_repo(&opts.name)))
    }

    async fn delete_repo(&self) -> Result<Box<dyn Forge>, ForgeError> {
        let url = self.repo_url("")?;
        let url = url.trim_end_matches('/').to_string();
        let response = self
            .kernel
            .send(
                "delete_repo",
                self.kernel.request(Method::DELETE, &url).header(ACCEPT, GITHUB_JSON),
            )
            .await?;
        if !response.is_success() {
            let message = error_message(&response);
            if message.contains("Must have admin rights") {
                return Err(ForgeError::InsufficientPermissions { message });
            }
            return Err(self.error_from(&response));
        }
        Ok(self.sibling(self.coordinate.org_scope()))
    }

    async fn list_files(&self) -> Result<Vec<RepoFile>, ForgeError> {
        let branch = self.effective_branch().await?;
        let url = self.repo_url(&format!("git/trees/{}?recursive=1", branch))?;
        let tree: GithubTree = self.get_json("list_files", &url).await?;
        Ok(tree
            .tree
            .into_iter()
            .filter(|entry| entry.entry_type == "blob")
            .map(|entry| RepoFile {
                path: entry.path,
                url: entry.url,
            })
            .collect())
    }

    async fn file_contents(&self, file: &RepoFile) -> Result<Vec<u8>, ForgeError> {
        let branch = self.effective_branch().await?;
        let url = self.repo_url(&format!("contents/{}?ref={}", file.path, branch))?;
        let response = self
            .kernel
            .send(
                "file_contents",
                self.kernel.request(Method::GET, &url).header(ACCEPT, GITHUB_RAW),
            )
            .await?;
        if !response.is_success() {
            return Err(self.error_from(&response));
        }
        Ok(response.body)
    }

    async fn default_branch(&self) -> Result<String, ForgeError> {
        Ok(self.repo_info().await?.default_branch)
    }

    async fn branches(&self) -> Result<Vec<Branch>, ForgeError> {
        let mut branches = Vec::new();
        let mut page = 1u32;
        loop {
            let url = self.repo_url(&format!("branches?per_page=100&page={}", page))?;
            let page_branches: Vec<GithubBranch> = self.get_json("branches", &url).await?;
            let count = page_branches.len();
            branches.extend(page_branches.into_iter().map(|b| Branch { name: b.name }));
            if count < 100 {
                break;
            }
            page += 1;
        }
        Ok(branches)
    }

    async fn delete_branch(&self, branch: &str) -> Result<(), ForgeError> {
        let url = self.repo_url(&format!("git/refs/heads/{}", branch))?;
        let response = self
            .kernel
            .send(
                "delete_branch",
                self.kernel.request(Method::DELETE, &url).header(ACCEPT, GITHUB_JSON),
            )
            .await?;
        if !response.is_success() {
            return Err(self.error_from(&response));
        }
        Ok(())
    }

    async fn pull_request(&self, number: u64) -> Result<PullRequest, ForgeError> {
        let url = self.repo_url(&format!("pulls/{}", number))?;
        let pull: GithubPull = self.get_json("pull_request", &url).await?;
        Ok(pull.into())
    }

    async fn create_pull_request(
        &self,
        opts: CreatePullRequestOpts,
    ) -> Result<PullRequest, ForgeError> {
        let url = self.repo_url("pulls")?;
        let body = CreatePullBody {
            title: &opts.title,
            head: &opts.source_branch,
            base: &opts.target_branch,
            body: opts.body.as_deref(),
            draft: opts.draft,
        };
        let response = self
            .kernel
            .send(
                "create_pull_request",
                self.kernel
                    .request(Method::POST, &url)
                    .header(ACCEPT, GITHUB_JSON)
                    .json(&body),
            )
            .await?;
        if !response.is_success() {
            let message = error_message(&response);
            if message.contains("No commits between") {
                return Err(ForgeError::NoCommitsForPullRequest {
                    source_branch: opts.source_branch,
                    target: opts.target_branch,
                });
            }
            return Err(self.error_from(&response));
        }
        let pull: GithubPull = response.json()?;
        Ok(pull.into())
    }

    async fn merge_pull_request(
        &self,
        number: u64,
        opts: MergeOpts,
    ) -> Result<String, ForgeError> {
        let url = self.repo_url(&format!("pulls/{}/merge", number))?;
        let body = MergePullBody {
            merge_method: merge_method_name(opts.method),
            commit_message: opts.commit_message.as_deref(),
        };
        let policy = self.kernel.policy().clone().skip_status(405);
        let response = self
            .kernel
            .send_with_policy(
                "merge_pull_request",
                self.kernel
                    .request(Method::PUT, &url)
                    .header(ACCEPT, GITHUB_JSON)
                    .json(&body),
                &policy,
            )
            .await?;
        if !response.is_success() {
            return Err(map_merge_error(
                response.status.as_u16(),
                &error_message(&response),
                number,
            ));
        }
        let result: GithubMergeResult = response.json()?;
        Ok(result.message.or(result.sha).unwrap_or_default())
    }

    async fn update_pull_request_branch(&self, number: u64) -> Result<(), ForgeError> {
        let url = self.repo_url(&format!("pulls/{}/update-branch", number))?;
        let response = self
            .kernel
            .send(
                "update_pull_request_branch",
                self.kernel
                    .request(Method::PUT, &url)
                    .header(ACCEPT, GITHUB_JSON)
                    .json(&serde_json::json!({})),
            )
            .await?;
        if !response.is_success() {
            return Err(self.error_from(&response));
        }
        Ok(())
    }

    async fn webhooks(&self) -> Result<Vec<Webhook>, ForgeError> {
        let url = self.repo_url("hooks")?;
        let hooks: Vec<GithubHook> = self.get_json("webhooks", &url).await?;
        Ok(hooks.into_iter().map(Into::into).collect())
    }

    async fn create_webhook(&self, opts: CreateWebhookOpts) -> Result<String, ForgeError> {
        let url = self.repo_url("hooks")?;
        let body = CreateHookBody {
            name: "web",
            active: true,
            events: opts.events.iter().copied().map(event_name).collect(),
            config: HookConfigBody {
                url: &opts.webhook_url,
                content_type: &opts.content_type,
                insecure_ssl: if opts.insecure_ssl { "1" } else { "0" },
            },
        };
        let response = self
            .kernel
            .send(
                "create_webhook",
                self.kernel
                    .request(Method::POST, &url)
                    .header(ACCEPT, GITHUB_JSON)
                    .json(&body),
            )
            .await?;
        if !response.is_success() {
            let message = error_message(&response);
            if message.contains("Hook already exists") {
                return Err(ForgeError::WebhookAlreadyExists {
                    url: opts.webhook_url,
                });
            }
            if response.status.as_u16() == 422 {
                return Err(ForgeError::UnknownWebhook { message });
            }
            return Err(self.error_from(&response));
        }
        let hook: GithubHook = response.json()?;
        Ok(hook.id.to_string())
    }

    fn webhook_params(&self, event: GitEvent) -> WebhookParams {
        let (event_value, ref_path) = match event {
            GitEvent::Push => ("push", "body.ref"),
            GitEvent::PullRequest => ("pull_request", "body.pull_request.head.ref"),
        };
        WebhookParams {
            event_header: "X-GitHub-Event".into(),
            event_value: event_value.into(),
            ref_path: ref_path.into(),
            repo_url_path: "body.repository.clone_url".into(),
        }
    }
}

// --------------------------------------------------------------------------
// Wire types
// --------------------------------------------------------------------------

#[derive(Deserialize)]
struct GithubError {
    message: String,
}

#[derive(Deserialize)]
struct GithubRepo {
    id: u64,
    name: String,
    html_url: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    private: bool,
    #[serde(default)]
    default_branch: Option<String>,
}

impl From<GithubRepo> for RepoSummary {
    fn from(repo: GithubRepo) -> Self {
        RepoSummary {
            id: repo.id.to_string(),
            slug: repo.name.clone(),
            http_url: repo.html_url,
            name: repo.name,
            description: repo.description.unwrap_or_default(),
            is_private: repo.private,
            default_branch: repo.default_branch.unwrap_or_else(|| "main".into()),
        }
    }
}

#[derive(Deserialize)]
struct GithubBranch {
    name: String,
}

#[derive(Deserialize)]
struct GithubTree {
    tree: Vec<GithubTreeEntry>,
}

#[derive(Deserialize)]
struct GithubTreeEntry {
    path: String,
    #[serde(rename = "type")]
    entry_type: String,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Deserialize)]
struct GithubPull {
    number: u64,
    state: String,
    #[serde(default)]
    merged: Option<bool>,
    #[serde(default)]
    mergeable_state: Option<String>,
    head: GithubRef,
    base: GithubRef,
}

#[derive(Deserialize)]
struct GithubRef {
    #[serde(rename = "ref")]
    ref_name: String,
}

impl From<GithubPull> for PullRequest {
    fn from(pull: GithubPull) -> Self {
        let status = map_pull_status(
            &pull.state,
            pull.merged.unwrap_or(false),
            pull.mergeable_state.as_deref(),
        );
        let has_conflicts = pull
            .mergeable_state
            .as_deref()
            .map(|state| state == "dirty");
        PullRequest {
            number: pull.number,
            source_branch: pull.head.ref_name,
            target_branch: pull.base.ref_name,
            status,
            merge_status: pull.mergeable_state,
            has_conflicts,
        }
    }
}

#[derive(Deserialize)]
struct GithubMergeResult {
    #[serde(default)]
    sha: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct GithubHook {
    id: u64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    events: Vec<String>,
    #[serde(default)]
    config: GithubHookConfig,
}

#[derive(Deserialize, Default)]
struct GithubHookConfig {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    insecure_ssl: Option<serde_json::Value>,
}

impl From<GithubHook> for Webhook {
    fn from(hook: GithubHook) -> Self {
        let insecure_ssl = match &hook.config.insecure_ssl {
            Some(serde_json::Value::String(s)) => s == "1",
            Some(serde_json::Value::Number(n)) => n.as_u64() == Some(1),
            _ => false,
        };
        Webhook {
            id: hook.id.to_string(),
            name: hook.name,
            active: hook.active,
            events: hook.events,
            config: WebhookConfig {
                content_type: hook.config.content_type.unwrap_or_else(|| "json".into()),
                url: hook.config.url.unwrap_or_default(),
                insecure_ssl,
            },
        }
    }
}

#[derive(Serialize)]
struct CreateRepoBody<'a> {
    name: &'a str,
    private: bool,
    auto_init: bool,
}

#[derive(Serialize)]
struct CreatePullBody<'a> {
    title: &'a str,
    head: &'a str,
    base: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<&'a str>,
    draft: bool,
}

#[derive(Serialize)]
struct MergePullBody<'a> {
    merge_method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    commit_message: Option<&'a str>,
}

#[derive(Serialize)]
struct CreateHookBody<'a> {
    name: &'a str,
    active: bool,
    events: Vec<&'a str>,
    config: HookConfigBody<'a>,
}

#[derive(Serialize)]
struct HookConfigBody<'a> {
    url: &'a str,
    content_type: &'a str,
    insecure_ssl: &'a str,
}
