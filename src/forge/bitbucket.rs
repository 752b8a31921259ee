//! forge::bitbucket
//!
//! Bitbucket Cloud adapter.
//!
//! # Design
//!
//! Bitbucket's `/2.0` API paginates with explicit `next` links inside the
//! response envelope, so listings follow those rather than computing page
//! numbers. Pull request states arrive uppercase (`OPEN`, `MERGED`,
//! `DECLINED`, `SUPERSEDED`) and merge strategies use Bitbucket's own
//! vocabulary (`merge_commit`, `squash`, `fast_forward`).
//!
//! Bitbucket does not initialize repositories at creation time; with
//! `auto_init` the adapter writes a README through the `src` endpoint to
//! guarantee an initial commit.

use async_trait::async_trait;
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

/// Bitbucket Cloud's API base.
const BITBUCKET_API_BASE: &str = "https://api.bitbucket.org/2.0";

/// The conflict sentence Bitbucket returns from a doomed merge.
const MERGE_CONFLICT_BODY: &str = "You can't merge until you resolve all merge conflicts.";

/// Bitbucket Cloud adapter.
#[derive(Debug, Clone)]
pub struct BitbucketForge {
    coordinate: RepoCoordinate,
    kernel: HttpKernel,
    api_base: String,
}

impl BitbucketForge {
    /// Adapter for bitbucket.org.
    pub fn new(coordinate: RepoCoordinate) -> Result<Self, ForgeError> {
        Self::with_api_base(coordinate, BITBUCKET_API_BASE)
    }

    /// Adapter with a custom API base. Tests point this at a mock server.
    pub fn with_api_base(
        coordinate: RepoCoordinate,
        api_base: impl Into<String>,
    ) -> Result<Self, ForgeError> {
        let kernel = HttpKernel::new(
            AuthScheme::Basic {
                username: coordinate.username.clone().unwrap_or_default(),
                token: coordinate.password.clone().unwrap_or_default(),
            },
            coordinate.ca_cert.as_deref(),
            RetryPolicy::new(),
        )?;
        Ok(Self {
            coordinate,
            kernel,
            api_base: api_base.into(),
        })
    }

    fn sibling(&self, coordinate: RepoCoordinate) -> Box<dyn Forge> {
        Box::new(Self {
            coordinate,
            kernel: self.kernel.clone(),
            api_base: self.api_base.clone(),
        })
    }

    fn repo_api_url(&self, path: &str) -> Result<String, ForgeError> {
        let repo = self.coordinate.require_repo()?;
        if path.is_empty() {
            Ok(format!(
                "{}/repositories/{}/{}",
                self.api_base, self.coordinate.owner, repo
            ))
        } else {
            Ok(format!(
                "{}/repositories/{}/{}/{}",
                self.api_base, self.coordinate.owner, repo, path
            ))
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        op: &str,
        url: &str,
    ) -> Result<T, ForgeError> {
        let response = self
            .kernel
            .send(op, self.kernel.request(Method::GET, url))
            .await?;
        if !response.is_success() {
            return Err(self.error_from(&response));
        }
        response.json()
    }

    /// Collect every page of a `values`/`next` paginated listing.
    async fn get_paged<T: for<'de> Deserialize<'de>>(
        &self,
        op: &str,
        first_url: String,
    ) -> Result<Vec<T>, ForgeError> {
        let mut items = Vec::new();
        let mut url = Some(first_url);
        while let Some(current) = url {
            let page: Page<T> = self.get_json(op, &current).await?;
            items.extend(page.values);
            url = page.next;
        }
        Ok(items)
    }

    fn error_from(&self, response: &KernelResponse) -> ForgeError {
        classify_common(response.status.as_u16(), error_message(response))
    }

    async fn effective_branch(&self) -> Result<String, ForgeError> {
        match self.coordinate.branch.clone() {
            Some(branch) => Ok(branch),
            None => self.default_branch().await,
        }
    }
}

/// Bitbucket error envelope: `{"error": {"message": …}}`.
fn error_message(response: &KernelResponse) -> String {
    response
        .json::<BitbucketErrorEnvelope>()
        .map(|e| e.error.message)
        .unwrap_or_else(|_| response.text())
}

/// Normalize a Bitbucket pull request state.
pub(crate) fn map_pull_status(state: &str) -> PullRequestStatus {
    match state {
        "OPEN" => PullRequestStatus::Active,
        "MERGED" => PullRequestStatus::Completed,
        "DECLINED" | "SUPERSEDED" => PullRequestStatus::Abandoned,
        _ => PullRequestStatus::NotSet,
    }
}

/// Bitbucket's name for a forge-neutral merge method.
pub(crate) fn merge_strategy_name(method: MergeMethod) -> &'static str {
    match method {
        MergeMethod::Merge => "merge_commit",
        MergeMethod::Squash => "squash",
        MergeMethod::Rebase => "fast_forward",
    }
}

#[async_trait]
impl Forge for BitbucketForge {
    fn kind(&self) -> ForgeKind {
        ForgeKind::Bitbucket
    }

    fn config(&self) -> RepoCoordinate {
        self.coordinate.clone()
    }

    async fn repo_info(&self) -> Result<RepoSummary, ForgeError> {
        let url = self.repo_api_url("")?;
        let response = self
            .kernel
            .send("repo_info", self.kernel.request(Method::GET, &url))
            .await?;
        if response.status.as_u16() == 404 {
            return Err(ForgeError::RepoNotFound {
                repo: self.coordinate.full_repo_name(),
            });
        }
        if !response.is_success() {
            return Err(self.error_from(&response));
        }
        let repo: BitbucketRepo = response.json()?;
        Ok(repo.into())
    }

    async fn list_repos(&self) -> Result<Vec<String>, ForgeError> {
        let first = format!(
            "{}/repositories/{}?pagelen=100",
            self.api_base, self.coordinate.owner
        );
        let repos: Vec<BitbucketRepo> = self.get_paged("list_repos", first).await?;
        Ok(repos
            .into_iter()
            .filter_map(|r| r.links.and_then(|l| l.html).map(|h| h.href))
            .collect())
    }

    async fn create_repo(&self, opts: CreateRepoOpts) -> Result<Box<dyn Forge>, ForgeError> {
        let url = format!(
            "{}/repositories/{}/{}",
            self.api_base,
            self.coordinate.owner,
            opts.name.to_lowercase()
        );
        let body = CreateRepoBody {
            scm: "git",
            is_private: opts.private_repo,
        };
        let response = self
            .kernel
            .send(
                "create_repo",
                self.kernel.request(Method::POST, &url).json(&body),
            )
            .await?;
        if !response.is_success() {
            return Err(self.error_from(&response));
        }

        let sibling_coord = self.coordinate.with_repo(opts.name.to_lowercase());
        let sibling = Self {
            coordinate: sibling_coord.clone(),
            kernel: self.kernel.clone(),
            api_base: self.api_base.clone(),
        };

        // No native auto-init: seed the default branch with a README.
        if opts.auto_init {
            let src_url = sibling.repo_api_url("src")?;
            let response = sibling
                .kernel
                .send(
                    "create_repo",
                    sibling.kernel.request(Method::POST, &src_url).form(&[
                        ("README.md", format!("# {}\n", opts.name).as_str()),
                        ("message", "Initial commit"),
                    ]),
                )
                .await?;
            if !response.is_success() {
                return Err(sibling.error_from(&response));
            }
        }

        Ok(self.sibling(sibling_coord))
    }

    async fn delete_repo(&self) -> Result<Box<dyn Forge>, ForgeError> {
        let url = self.repo_api_url("")?;
        let response = self
            .kernel
            .send("delete_repo", self.kernel.request(Method::DELETE, &url))
            .await?;
        if !response.is_success() {
            return Err(self.error_from(&response));
        }
        Ok(self.sibling(self.coordinate.org_scope()))
    }

    async fn list_files(&self) -> Result<Vec<RepoFile>, ForgeError> {
        let branch = self.effective_branch().await?;
        let first = format!(
            "{}?pagelen=100&max_depth=64",
            self.repo_api_url(&format!("src/{}/", branch))?
        );
        let entries: Vec<BitbucketSrcEntry> = self.get_paged("list_files", first).await?;
        Ok(entries
            .into_iter()
            .filter(|e| e.entry_type == "commit_file")
            .map(|e| RepoFile {
                path: e.path,
                url: None,
            })
            .collect())
    }

    async fn file_contents(&self, file: &RepoFile) -> Result<Vec<u8>, ForgeError> {
        let branch = self.effective_branch().await?;
        let url = self.repo_api_url(&format!("src/{}/{}", branch, file.path))?;
        let response = self
            .kernel
            .send("file_contents", self.kernel.request(Method::GET, &url))
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
        let first = format!("{}?pagelen=100", self.repo_api_url("refs/branches")?);
        let branches: Vec<BitbucketBranch> = self.get_paged("branches", first).await?;
        Ok(branches
            .into_iter()
            .map(|b| Branch { name: b.name })
            .collect())
    }

    async fn delete_branch(&self, branch: &str) -> Result<(), ForgeError> {
        let url = self.repo_api_url(&format!("refs/branches/{}", branch))?;
        let response = self
            .kernel
            .send("delete_branch", self.kernel.request(Method::DELETE, &url))
            .await?;
        if !response.is_success() {
            return Err(self.error_from(&response));
        }
        Ok(())
    }

    async fn pull_request(&self, number: u64) -> Result<PullRequest, ForgeError> {
        let url = self.repo_api_url(&format!("pullrequests/{}", number))?;
        let pr: BitbucketPull = self.get_json("pull_request", &url).await?;
        Ok(pr.into())
    }

    async fn create_pull_request(
        &self,
        opts: CreatePullRequestOpts,
    ) -> Result<PullRequest, ForgeError> {
        let url = self.repo_api_url("pullrequests")?;
        let body = CreatePullBody {
            title: &opts.title,
            description: opts.body.as_deref(),
            source: BranchRef {
                branch: BranchName {
                    name: &opts.source_branch,
                },
            },
            destination: BranchRef {
                branch: BranchName {
                    name: &opts.target_branch,
                },
            },
        };
        let response = self
            .kernel
            .send(
                "create_pull_request",
                self.kernel.request(Method::POST, &url).json(&body),
            )
            .await?;
        if !response.is_success() {
            let message = error_message(&response);
            let lowered = message.to_lowercase();
            if lowered.contains("no commits") || lowered.contains("no changes") {
                return Err(ForgeError::NoCommitsForPullRequest {
                    source_branch: opts.source_branch,
                    target: opts.target_branch,
                });
            }
            return Err(self.error_from(&response));
        }
        let pr: BitbucketPull = response.json()?;
        Ok(pr.into())
    }

    async fn merge_pull_request(
        &self,
        number: u64,
        opts: MergeOpts,
    ) -> Result<String, ForgeError> {
        let url = self.repo_api_url(&format!("pullrequests/{}/merge", number))?;
        let body = MergePullBody {
            merge_strategy: merge_strategy_name(opts.method),
            message: opts.commit_message.as_deref(),
        };
        let policy = self.kernel.policy().clone().skip_status(405);
        let response = self
            .kernel
            .send_with_policy(
                "merge_pull_request",
                self.kernel.request(Method::POST, &url).json(&body),
                &policy,
            )
            .await?;
        if !response.is_success() {
            let message = error_message(&response);
            if message.contains(MERGE_CONFLICT_BODY) {
                return Err(ForgeError::MergeConflict { number });
            }
            return Err(self.error_from(&response));
        }
        Ok(format!("merged #{}", number))
    }

    async fn update_pull_request_branch(&self, _number: u64) -> Result<(), ForgeError> {
        Err(ForgeError::other(
            "updating the pull request branch is not supported by bitbucket",
        ))
    }

    async fn webhooks(&self) -> Result<Vec<Webhook>, ForgeError> {
        let first = format!("{}?pagelen=100", self.repo_api_url("hooks")?);
        let hooks: Vec<BitbucketHook> = self.get_paged("webhooks", first).await?;
        Ok(hooks.into_iter().map(Into::into).collect())
    }

    async fn create_webhook(&self, opts: CreateWebhookOpts) -> Result<String, ForgeError> {
        if self
            .webhooks()
            .await?
            .iter()
            .any(|hook| hook.config.url == opts.webhook_url)
        {
            return Err(ForgeError::WebhookAlreadyExists {
                url: opts.webhook_url,
            });
        }

        let events: Vec<&str> = opts
            .events
            .iter()
            .map(|event| match event {
                GitEvent::Push => "repo:push",
                GitEvent::PullRequest => "pullrequest:created",
            })
            .collect();
        let body = CreateHookBody {
            description: "gitu webhook",
            url: &opts.webhook_url,
            active: true,
            skip_cert_verification: opts.insecure_ssl,
            events,
        };
        let url = self.repo_api_url("hooks")?;
        let response = self
            .kernel
            .send(
                "create_webhook",
                self.kernel.request(Method::POST, &url).json(&body),
            )
            .await?;
        if !response.is_success() {
            if response.status.as_u16() == 400 {
                return Err(ForgeError::UnknownWebhook {
                    message: error_message(&response),
                });
            }
            return Err(self.error_from(&response));
        }
        let hook: BitbucketHook = response.json()?;
        Ok(hook.uuid)
    }

    fn webhook_params(&self, event: GitEvent) -> WebhookParams {
        let (event_value, ref_path) = match event {
            GitEvent::Push => ("repo:push", "body.push.changes[0].new.name"),
            GitEvent::PullRequest => ("pullrequest:created", "body.pullrequest.source.branch.name"),
        };
        WebhookParams {
            event_header: "X-Event-Key".into(),
            event_value: event_value.into(),
            ref_path: ref_path.into(),
            repo_url_path: "body.repository.links.html.href".into(),
        }
    }
}

// --------------------------------------------------------------------------
// Wire types
// --------------------------------------------------------------------------

#[derive(Deserialize)]
struct Page<T> {
    values: Vec<T>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Deserialize)]
struct BitbucketErrorEnvelope {
    error: BitbucketError,
}

#[derive(Deserialize)]
struct BitbucketError {
    message: String,
}

#[derive(Deserialize)]
struct BitbucketRepo {
    #[serde(default)]
    uuid: String,
    #[serde(default)]
    slug: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    is_private: bool,
    #[serde(default)]
    mainbranch: Option<BitbucketBranch>,
    #[serde(default)]
    links: Option<BitbucketLinks>,
}

#[derive(Deserialize)]
struct BitbucketLinks {
    #[serde(default)]
    html: Option<BitbucketHref>,
}

#[derive(Deserialize)]
struct BitbucketHref {
    href: String,
}

impl From<BitbucketRepo> for RepoSummary {
    fn from(repo: BitbucketRepo) -> Self {
        RepoSummary {
            id: repo.uuid,
            slug: repo.slug,
            http_url: repo
                .links
                .and_then(|l| l.html)
                .map(|h| h.href)
                .unwrap_or_default(),
            name: repo.name,
            description: repo.description.unwrap_or_default(),
            is_private: repo.is_private,
            default_branch: repo.mainbranch.map(|b| b.name).unwrap_or_else(|| "main".into()),
        }
    }
}

#[derive(Deserialize)]
struct BitbucketBranch {
    name: String,
}

#[derive(Deserialize)]
struct BitbucketSrcEntry {
    #[serde(rename = "type")]
    entry_type: String,
    #[serde(default)]
    path: String,
}

#[derive(Deserialize)]
struct BitbucketPull {
    id: u64,
    state: String,
    source: BitbucketPullRef,
    destination: BitbucketPullRef,
}

#[derive(Deserialize)]
struct BitbucketPullRef {
    branch: BitbucketBranch,
}

impl From<BitbucketPull> for PullRequest {
    fn from(pr: BitbucketPull) -> Self {
        let status = map_pull_status(&pr.state);
        PullRequest {
            number: pr.id,
            source_branch: pr.source.branch.name,
            target_branch: pr.destination.branch.name,
            status,
            merge_status: Some(pr.state),
            has_conflicts: None,
        }
    }
}

#[derive(Deserialize)]
struct BitbucketHook {
    #[serde(default)]
    uuid: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    events: Vec<String>,
    #[serde(default)]
    skip_cert_verification: bool,
}

impl From<BitbucketHook> for Webhook {
    fn from(hook: BitbucketHook) -> Self {
        Webhook {
            id: hook.uuid,
            name: hook.description,
            active: hook.active,
            events: hook.events,
            config: WebhookConfig {
                content_type: "json".into(),
                url: hook.url,
                insecure_ssl: hook.skip_cert_verification,
            },
        }
    }
}

#[derive(Serialize)]
struct CreateRepoBody<'a> {
    scm: &'a str,
    is_private: bool,
}

#[derive(Serialize)]
struct BranchName<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct BranchRef<'a> {
    branch: BranchName<'a>,
}

#[derive(Serialize)]
struct CreatePullBody<'a> {
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    source: BranchRef<'a>,
    destination: BranchRef<'a>,
}

#[derive(Serialize)]
struct MergePullBody<'a> {
    merge_strategy: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

#[derive(Serialize)]
struct CreateHookBody<'a> {
    description: &'a str,
    url: &'a str,
    active: bool,
    skip_cert_verification: bool,
    events: Vec<&'a str>,
}
