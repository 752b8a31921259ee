//! forge::gitea
//!
//! Gitea and Gogs adapter.
//!
//! # Design
//!
//! Gogs and Gitea expose the same `/api/v1` shape, so one adapter serves
//! both; the tagged kind decides the webhook type names and which
//! operations exist (Gogs predates the branch-update endpoint).
//!
//! # File listing
//!
//! Neither forge offers a recursive tree endpoint worth paginating, so
//! `list_files` downloads `/archive/{branch}.zip` into an anonymous temp
//! file and enumerates the entries, stripping the archive's top-level
//! directory prefix.

use std::io::Write;

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

/// Gitea / Gogs adapter.
#[derive(Debug, Clone)]
pub struct GiteaForge {
    kind: ForgeKind,
    coordinate: RepoCoordinate,
    kernel: HttpKernel,
    api_base: String,
}

impl GiteaForge {
    /// Adapter for a Gitea instance.
    pub fn new(coordinate: RepoCoordinate) -> Result<Self, ForgeError> {
        Self::build(ForgeKind::Gitea, coordinate)
    }

    /// Adapter for a Gogs instance.
    pub fn gogs(coordinate: RepoCoordinate) -> Result<Self, ForgeError> {
        Self::build(ForgeKind::Gogs, coordinate)
    }

    fn build(kind: ForgeKind, coordinate: RepoCoordinate) -> Result<Self, ForgeError> {
        let api_base = format!("{}://{}/api/v1", coordinate.protocol, coordinate.host);
        let kernel = HttpKernel::new(
            AuthScheme::Basic {
                username: coordinate.username.clone().unwrap_or_default(),
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
        if path.is_empty() {
            Ok(format!(
                "{}/repos/{}/{}",
                self.api_base, self.coordinate.owner, repo
            ))
        } else {
            Ok(format!(
                "{}/repos/{}/{}/{}",
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

    fn error_from(&self, response: &KernelResponse) -> ForgeError {
        classify_common(response.status.as_u16(), error_message(response))
    }

    async fn effective_branch(&self) -> Result<String, ForgeError> {
        match self.coordinate.branch.clone() {
            Some(branch) => Ok(branch),
            None => self.default_branch().await,
        }
    }

    fn hook_type(&self) -> &'static str {
        match self.kind {
            ForgeKind::Gogs => "gogs",
            _ => "gitea",
        }
    }
}

fn error_message(response: &KernelResponse) -> String {
    response
        .json::<GiteaError>()
        .map(|e| e.message)
        .unwrap_or_else(|_| response.text())
}

/// Normalize a Gitea/Gogs pull request state.
///
/// Open PRs without a positive `mergeable` are conflicted; closed PRs are
/// completed only when `merged` says so.
pub(crate) fn map_pull_status(state: &str, mergeable: bool, merged: bool) -> PullRequestStatus {
    if state == "open" {
        if mergeable {
            PullRequestStatus::Active
        } else {
            PullRequestStatus::Conflicts
        }
    } else if merged {
        PullRequestStatus::Completed
    } else {
        PullRequestStatus::Abandoned
    }
}

/// Whether a failed merge response is Gitea's conflict report: 405 or 500
/// with the "Automatic merge failed … fix conflicts" body.
pub(crate) fn is_merge_conflict_body(status: u16, message: &str) -> bool {
    (status == 405 || status == 500)
        && message.contains("Automatic merge failed")
        && message.contains("fix conflicts")
}

#[async_trait]
impl Forge for GiteaForge {
    fn kind(&self) -> ForgeKind {
        self.kind
    }

    fn config(&self) -> RepoCoordinate {
        self.coordinate.clone()
    }

    async fn repo_info(&self) -> Result<RepoSummary, ForgeError> {
        let url = self.repo_url("")?;
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
        let repo: GiteaRepo = response.json()?;
        Ok(repo.into())
    }

    async fn list_repos(&self) -> Result<Vec<String>, ForgeError> {
        for scope in ["orgs", "users"] {
            let mut urls = Vec::new();
            let mut page = 1u32;
            let mut not_found = false;
            loop {
                let url = format!(
                    "{}/{}/{}/repos?limit=50&page={}",
                    self.api_base, scope, self.coordinate.owner, page
                );
                let response = self
                    .kernel
                    .send("list_repos", self.kernel.request(Method::GET, &url))
                    .await?;
                if response.status.as_u16() == 404 {
                    not_found = true;
                    break;
                }
                if !response.is_success() {
                    return Err(self.error_from(&response));
                }
                let repos: Vec<GiteaRepo> = response.json()?;
                let count = repos.len();
                urls.extend(repos.into_iter().map(|r| r.html_url));
                if count < 50 {
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
            format!("{}/org/{}/repos", self.api_base, self.coordinate.owner)
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
                self.kernel.request(Method::POST, &url).json(&body),
            )
            .await?;
        if !response.is_success() {
            return Err(self.error_from(&response));
        }
        Ok(self.sibling(self.coordinate.with_repo(&opts.name)))
    }

    async fn delete_repo(&self) -> Result<Box<dyn Forge>, ForgeError> {
        let url = self.repo_url("")?;
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
        let url = self.repo_url(&format!("archive/{}.zip", branch))?;
        let response = self
            .kernel
            .send("list_files", self.kernel.request(Method::GET, &url))
            .await?;
        if !response.is_success() {
            return Err(self.error_from(&response));
        }

        let paths = enumerate_archive(response.body).await?;
        Ok(paths
            .into_iter()
            .map(|path| RepoFile { path, url: None })
            .collect())
    }

    async fn file_contents(&self, file: &RepoFile) -> Result<Vec<u8>, ForgeError> {
        let branch = self.effective_branch().await?;
        let url = self.repo_url(&format!("raw/{}/{}", branch, file.path))?;
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
        let url = self.repo_url("branches")?;
        let branches: Vec<GiteaBranch> = self.get_json("branches", &url).await?;
        Ok(branches
            .into_iter()
            .map(|b| Branch { name: b.name })
            .collect())
    }

    async fn delete_branch(&self, branch: &str) -> Result<(), ForgeError> {
        let url = self.repo_url(&format!("branches/{}", branch))?;
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
        let url = self.repo_url(&format!("pulls/{}", number))?;
        let pull: GiteaPull = self.get_json("pull_request", &url).await?;
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
            if message.to_lowercase().contains("no commits") {
                return Err(ForgeError::NoCommitsForPullRequest {
                    source_branch: opts.source_branch,
                    target: opts.target_branch,
                });
            }
            return Err(self.error_from(&response));
        }
        let pull: GiteaPull = response.json()?;
        Ok(pull.into())
    }

    async fn merge_pull_request(
        &self,
        number: u64,
        opts: MergeOpts,
    ) -> Result<String, ForgeError> {
        let url = self.repo_url(&format!("pulls/{}/merge", number))?;
        let body = MergePullBody {
            do_merge: match opts.method {
                MergeMethod::Merge => "merge",
                MergeMethod::Squash => "squash",
                MergeMethod::Rebase => "rebase",
            },
            merge_message_field: opts.commit_message.as_deref(),
        };
        // Both 405 and 500 can carry the conflict report; retrying them at
        // the kernel would only delay the signal.
        let policy = self
            .kernel
            .policy()
            .clone()
            .skip_status(405)
            .skip_status(500);
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
            if is_merge_conflict_body(response.status.as_u16(), &message) {
                return Err(ForgeError::MergeConflict { number });
            }
            return Err(self.error_from(&response));
        }
        Ok(format!("merged #{}", number))
    }

    async fn update_pull_request_branch(&self, number: u64) -> Result<(), ForgeError> {
        if self.kind == ForgeKind::Gogs {
            return Err(ForgeError::other(
                "updating the pull request branch is not supported by gogs",
            ));
        }
        let url = self.repo_url(&format!("pulls/{}/update", number))?;
        let response = self
            .kernel
            .send(
                "update_pull_request_branch",
                self.kernel.request(Method::POST, &url),
            )
            .await?;
        if !response.is_success() {
            return Err(self.error_from(&response));
        }
        Ok(())
    }

    async fn webhooks(&self) -> Result<Vec<Webhook>, ForgeError> {
        let url = self.repo_url("hooks")?;
        let hooks: Vec<GiteaHook> = self.get_json("webhooks", &url).await?;
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
                GitEvent::Push => "push",
                GitEvent::PullRequest => "pull_request",
            })
            .collect();
        let body = CreateHookBody {
            hook_type: self.hook_type(),
            active: true,
            events,
            config: HookConfigBody {
                url: &opts.webhook_url,
                content_type: &opts.content_type,
            },
        };
        let url = self.repo_url("hooks")?;
        let response = self
            .kernel
            .send(
                "create_webhook",
                self.kernel.request(Method::POST, &url).json(&body),
            )
            .await?;
        if !response.is_success() {
            if response.status.as_u16() == 422 {
                return Err(ForgeError::UnknownWebhook {
                    message: error_message(&response),
                });
            }
            return Err(self.error_from(&response));
        }
        let hook: GiteaHook = response.json()?;
        Ok(hook.id.to_string())
    }

    fn webhook_params(&self, event: GitEvent) -> WebhookParams {
        let header = match self.kind {
            ForgeKind::Gogs => "X-Gogs-Event",
            _ => "X-Gitea-Event",
        };
        let (event_value, ref_path) = match event {
            GitEvent::Push => ("push", "body.ref"),
            GitEvent::PullRequest => ("pull_request", "body.pull_request.head.ref"),
        };
        WebhookParams {
            event_header: header.into(),
            event_value: event_value.into(),
            ref_path: ref_path.into(),
            repo_url_path: "body.repository.clone_url".into(),
        }
    }
}

/// Write the archive to an anonymous temp file and list its file entries,
/// stripping the `{repo}/` prefix every entry carries.
async fn enumerate_archive(bytes: Vec<u8>) -> Result<Vec<String>, ForgeError> {
    tokio::task::spawn_blocking(move || {
        let mut file = tempfile::tempfile()
            .map_err(|e| ForgeError::other(format!("failed to create temp archive: {}", e)))?;
        file.write_all(&bytes)
            .map_err(|e| ForgeError::other(format!("failed to write temp archive: {}", e)))?;

        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| ForgeError::other(format!("invalid repository archive: {}", e)))?;

        let mut paths = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let entry = archive
                .by_index(index)
                .map_err(|e| ForgeError::other(format!("invalid archive entry: {}", e)))?;
            if !entry.is_file() {
                continue;
            }
            let name = entry.name();
            let stripped = name.split_once('/').map(|(_, rest)| rest).unwrap_or(name);
            if !stripped.is_empty() {
                paths.push(stripped.to_string());
            }
        }
        Ok(paths)
    })
    .await
    .map_err(|e| ForgeError::other(format!("archive enumeration failed: {}", e)))?
}

// --------------------------------------------------------------------------
// Wire types
// --------------------------------------------------------------------------

#[derive(Deserialize)]
struct GiteaError {
    message: String,
}

#[derive(Deserialize)]
struct GiteaRepo {
    id: u64,
    name: String,
    html_url: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    private: bool,
    #[serde(default)]
    default_branch: String,
}

impl From<GiteaRepo> for RepoSummary {
    fn from(repo: GiteaRepo) -> Self {
        RepoSummary {
            id: repo.id.to_string(),
            slug: repo.name.clone(),
            http_url: repo.html_url,
            name: repo.name,
            description: repo.description.unwrap_or_default(),
            is_private: repo.private,
            default_branch: if repo.default_branch.is_empty() {
                "main".into()
            } else {
                repo.default_branch
            },
        }
    }
}

#[derive(Deserialize)]
struct GiteaBranch {
    name: String,
}

#[derive(Deserialize)]
struct GiteaPull {
    number: u64,
    state: String,
    #[serde(default)]
    mergeable: Option<bool>,
    #[serde(default)]
    merged: Option<bool>,
    head: GiteaRef,
    base: GiteaRef,
}

#[derive(Deserialize)]
struct GiteaRef {
    #[serde(rename = "ref")]
    ref_name: String,
}

impl From<GiteaPull> for PullRequest {
    fn from(pull: GiteaPull) -> Self {
        let mergeable = pull.mergeable.unwrap_or(false);
        let status = map_pull_status(&pull.state, mergeable, pull.merged.unwrap_or(false));
        PullRequest {
            number: pull.number,
            source_branch: pull.head.ref_name,
            target_branch: pull.base.ref_name,
            status,
            merge_status: pull.mergeable.map(|m| m.to_string()),
            has_conflicts: pull.mergeable.map(|m| !m),
        }
    }
}

#[derive(Deserialize)]
struct GiteaHook {
    id: u64,
    #[serde(rename = "type", default)]
    hook_type: String,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    events: Vec<String>,
    #[serde(default)]
    config: GiteaHookConfig,
}

#[derive(Deserialize, Default)]
struct GiteaHookConfig {
    #[serde(default)]
    url: String,
    #[serde(default)]
    content_type: String,
}

impl From<GiteaHook> for Webhook {
    fn from(hook: GiteaHook) -> Self {
        Webhook {
            id: hook.id.to_string(),
            name: hook.hook_type,
            active: hook.active,
            events: hook.events,
            config: WebhookConfig {
                content_type: if hook.config.content_type.is_empty() {
                    "json".into()
                } else {
                    hook.config.content_type
                },
                url: hook.config.url,
                insecure_ssl: false,
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
}

#[derive(Serialize)]
struct MergePullBody<'a> {
    #[serde(rename = "Do")]
    do_merge: &'a str,
    #[serde(rename = "MergeMessageField", skip_serializing_if = "Option::is_none")]
    merge_message_field: Option<&'a str>,
}

#[derive(Serialize)]
struct CreateHookBody<'a> {
    #[serde(rename = "type")]
    hook_type: &'a str,
    active: bool,
    events: Vec<&'a str>,
    config: HookConfigBody<'a>,
}

#[derive(Serialize)]
struct HookConfigBody<'a> {
    url: &'a str,
    content_type: &'a str,
}
