//! forge::gitlab
//!
//! GitLab adapter (gitlab.com and self-hosted).
//!
//! # Design
//!
//! Project-scoped endpoints address the project as the URL-encoded
//! `owner%2Frepo` path under `/api/v4/projects/`. Merge requests use their
//! project-local `iid`, which is what this crate calls the pull request
//! number.
//!
//! # Mergeability
//!
//! GitLab computes `merge_status` asynchronously and reports `checking`
//! while it works. [`Forge::merge_pull_request`] polls until the status
//! settles and requires `can_be_merged` before attempting the merge, so a
//! `cannot_be_merged` MR surfaces as a conflict without a doomed merge
//! call.

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

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

/// How long one mergeability poll waits before re-reading the MR.
const MERGEABILITY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound on mergeability polls before giving up as retryable.
const MERGEABILITY_POLL_LIMIT: u32 = 60;

/// GitLab adapter.
#[derive(Debug, Clone)]
pub struct GitlabForge {
    coordinate: RepoCoordinate,
    kernel: HttpKernel,
    api_base: String,
}

impl GitlabForge {
    /// Adapter for the GitLab instance at the coordinate's host.
    pub fn new(coordinate: RepoCoordinate) -> Result<Self, ForgeError> {
        let api_base = format!("{}://{}/api/v4", coordinate.protocol, coordinate.host);
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
            api_base,
        })
    }

    fn sibling(&self, coordinate: RepoCoordinate) -> Box<dyn Forge> {
        Box::new(Self {
            coordinate,
            kernel: self.kernel.clone(),
            api_base: self.api_base.clone(),
        })
    }

    /// `owner%2Frepo`, the project's URL-safe path.
    fn project_path(&self) -> Result<String, ForgeError> {
        let repo = self.coordinate.require_repo()?;
        Ok(urlencoding::encode(&format!("{}/{}", self.coordinate.owner, repo)).into_owned())
    }

    fn project_url(&self, path: &str) -> Result<String, ForgeError> {
        let project = self.project_path()?;
        if path.is_empty() {
            Ok(format!("{}/projects/{}", self.api_base, project))
        } else {
            Ok(format!("{}/projects/{}/{}", self.api_base, project, path))
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

    /// Find the group matching the coordinate's owner.
    async fn find_group(&self) -> Result<GitlabGroup, ForgeError> {
        let url = format!(
            "{}/groups?search={}",
            self.api_base,
            urlencoding::encode(&self.coordinate.owner)
        );
        let groups: Vec<GitlabGroup> = self.get_json("find_group", &url).await?;
        groups
            .iter()
            .find(|g| g.path == self.coordinate.owner || g.name == self.coordinate.owner)
            .or_else(|| groups.first())
            .cloned()
            .ok_or_else(|| ForgeError::GroupNotFound {
                group: self.coordinate.owner.clone(),
            })
    }

    /// Wait until GitLab's async mergeability check settles.
    async fn settled_merge_status(&self, number: u64) -> Result<GitlabMergeRequest, ForgeError> {
        for _ in 0..MERGEABILITY_POLL_LIMIT {
            let url = self.project_url(&format!("merge_requests/{}", number))?;
            let mr: GitlabMergeRequest = self.get_json("pull_request", &url).await?;
            match mr.merge_status.as_deref() {
                Some("checking") | Some("unchecked") => {
                    debug!(number, "merge status still checking");
                    tokio::time::sleep(MERGEABILITY_POLL_INTERVAL).await;
                }
                _ => return Ok(mr),
            }
        }
        Err(ForgeError::Retryable {
            message: format!("merge request !{} mergeability check did not settle", number),
        })
    }
}

/// Extract the message from a GitLab error body, which may live under
/// `message` (string, array, or object) or `error`.
fn error_message(response: &KernelResponse) -> String {
    let Ok(value) = response.json::<serde_json::Value>() else {
        return response.text();
    };
    let field = value.get("message").or_else(|| value.get("error"));
    match field {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => response.text(),
    }
}

/// Normalize a GitLab merge request state.
pub(crate) fn map_mr_status(
    state: &str,
    merge_status: Option<&str>,
    merged_at_set: bool,
) -> PullRequestStatus {
    match state {
        "opened" => {
            if merge_status == Some("cannot_be_merged") {
                PullRequestStatus::Conflicts
            } else {
                PullRequestStatus::Active
            }
        }
        "merged" => PullRequestStatus::Completed,
        _ => {
            if merged_at_set {
                PullRequestStatus::Completed
            } else {
                PullRequestStatus::Abandoned
            }
        }
    }
}

#[async_trait]
impl Forge for GitlabForge {
    fn kind(&self) -> ForgeKind {
        ForgeKind::Gitlab
    }

    fn config(&self) -> RepoCoordinate {
        self.coordinate.clone()
    }

    async fn repo_info(&self) -> Result<RepoSummary, ForgeError> {
        let url = self.project_url("")?;
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
        let project: GitlabProject = response.json()?;
        Ok(project.into())
    }

    async fn list_repos(&self) -> Result<Vec<String>, ForgeError> {
        let group = self.find_group().await?;
        let mut urls = Vec::new();
        let mut page = 1u32;
        loop {
            let url = format!(
                "{}/groups/{}/projects?per_page=100&page={}",
                self.api_base, group.id, page
            );
            let projects: Vec<GitlabProject> = self.get_json("list_repos", &url).await?;
            let count = projects.len();
            urls.extend(projects.into_iter().map(|p| p.http_url_to_repo));
            if count < 100 {
                break;
            }
            page += 1;
        }
        Ok(urls)
    }

    async fn create_repo(&self, opts: CreateRepoOpts) -> Result<Box<dyn Forge>, ForgeError> {
        let owner_is_user = self
            .coordinate
            .username
            .as_deref()
            .map_or(false, |u| u == self.coordinate.owner);
        let namespace_id = if owner_is_user {
            None
        } else {
            Some(self.find_group().await?.id)
        };

        let body = CreateProjectBody {
            name: &opts.name,
            visibility: if opts.private_repo { "private" } else { "public" },
            initialize_with_readme: opts.auto_init,
            namespace_id,
        };
        let url = format!("{}/projects", self.api_base);
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
        let url = self.project_url("")?;
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
        let url = self.project_url(&format!(
            "repository/tree?ref={}&per_page=1000&recursive=true",
            urlencoding::encode(&branch)
        ))?;
        let entries: Vec<GitlabTreeEntry> = self.get_json("list_files", &url).await?;
        Ok(entries
            .into_iter()
            .filter(|e| e.entry_type == "blob")
            .map(|e| RepoFile {
                path: e.path,
                url: None,
            })
            .collect())
    }

    async fn file_contents(&self, file: &RepoFile) -> Result<Vec<u8>, ForgeError> {
        let branch = self.effective_branch().await?;
        let url = self.project_url(&format!(
            "repository/files/{}/raw?ref={}",
            urlencoding::encode(&file.path),
            urlencoding::encode(&branch)
        ))?;
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
        let mut branches = Vec::new();
        let mut page = 1u32;
        loop {
            let url =
                self.project_url(&format!("repository/branches?per_page=100&page={}", page))?;
            let page_branches: Vec<GitlabBranch> = self.get_json("branches", &url).await?;
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
        let url = self.project_url(&format!(
            "repository/branches/{}",
            urlencoding::encode(branch)
        ))?;
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
        let url = self.project_url(&format!("merge_requests/{}", number))?;
        let mr: GitlabMergeRequest = self.get_json("pull_request", &url).await?;
        Ok(mr.into())
    }

    async fn create_pull_request(
        &self,
        opts: CreatePullRequestOpts,
    ) -> Result<PullRequest, ForgeError> {
        let url = self.project_url("merge_requests")?;
        let body = CreateMergeRequestBody {
            source_branch: &opts.source_branch,
            target_branch: &opts.target_branch,
            title: &opts.title,
            description: opts.body.as_deref(),
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
            if message.contains("No commits between") {
                return Err(ForgeError::NoCommitsForPullRequest {
                    source_branch: opts.source_branch,
                    target: opts.target_branch,
                });
            }
            return Err(self.error_from(&response));
        }
        let mr: GitlabMergeRequest = response.json()?;
        Ok(mr.into())
    }

    async fn merge_pull_request(
        &self,
        number: u64,
        opts: MergeOpts,
    ) -> Result<String, ForgeError> {
        let mr = self.settled_merge_status(number).await?;
        if mr.merge_status.as_deref() == Some("cannot_be_merged") {
            return Err(ForgeError::MergeConflict { number });
        }

        let body = match opts.method {
            MergeMethod::Squash => AcceptMergeRequestBody {
                squash: Some(true),
                squash_commit_message: opts.commit_message.as_deref(),
                merge_commit_message: None,
            },
            _ => AcceptMergeRequestBody {
                squash: None,
                squash_commit_message: None,
                merge_commit_message: opts.commit_message.as_deref(),
            },
        };

        let url = self.project_url(&format!("merge_requests/{}/merge", number))?;
        let policy = self.kernel.policy().clone().skip_status(405);
        let response = self
            .kernel
            .send_with_policy(
                "merge_pull_request",
                self.kernel.request(Method::PUT, &url).json(&body),
                &policy,
            )
            .await?;
        if !response.is_success() {
            // 405/406 from the accept endpoint mean the MR cannot be merged
            // as it stands.
            let status = response.status.as_u16();
            if status == 405 || status == 406 {
                return Err(ForgeError::MergeConflict { number });
            }
            return Err(self.error_from(&response));
        }
        let merged: GitlabMergeRequest = response.json()?;
        Ok(merged
            .merge_commit_sha
            .unwrap_or_else(|| format!("merged !{}", number)))
    }

    async fn update_pull_request_branch(&self, number: u64) -> Result<(), ForgeError> {
        let url = self.project_url(&format!("merge_requests/{}/rebase", number))?;
        let response = self
            .kernel
            .send(
                "update_pull_request_branch",
                self.kernel.request(Method::PUT, &url),
            )
            .await?;
        if !response.is_success() {
            return Err(self.error_from(&response));
        }
        Ok(())
    }

    async fn webhooks(&self) -> Result<Vec<Webhook>, ForgeError> {
        let url = self.project_url("hooks")?;
        let hooks: Vec<GitlabHook> = self.get_json("webhooks", &url).await?;
        Ok(hooks.into_iter().map(Into::into).collect())
    }

    async fn create_webhook(&self, opts: CreateWebhookOpts) -> Result<String, ForgeError> {
        // GitLab happily registers duplicate hooks; an existing registration
        // for the same URL is the caller's duplicate.
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

        let body = CreateHookBody {
            url: &opts.webhook_url,
            push_events: opts.events.contains(&GitEvent::Push),
            merge_requests_events: opts.events.contains(&GitEvent::PullRequest),
            enable_ssl_verification: !opts.insecure_ssl,
        };
        let url = self.project_url("hooks")?;
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
        let hook: GitlabHook = response.json()?;
        Ok(hook.id.to_string())
    }

    fn webhook_params(&self, event: GitEvent) -> WebhookParams {
        let (event_value, ref_path) = match event {
            GitEvent::Push => ("Push Hook", "body.ref"),
            GitEvent::PullRequest => (
                "Merge Request Hook",
                "body.object_attributes.source_branch",
            ),
        };
        WebhookParams {
            event_header: "X-Gitlab-Event".into(),
            event_value: event_value.into(),
            ref_path: ref_path.into(),
            repo_url_path: "body.project.git_http_url".into(),
        }
    }
}

// --------------------------------------------------------------------------
// Wire types
// --------------------------------------------------------------------------

#[derive(Deserialize, Clone)]
struct GitlabGroup {
    id: u64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    path: String,
}

#[derive(Deserialize)]
struct GitlabProject {
    id: u64,
    name: String,
    #[serde(default)]
    path: String,
    web_url: String,
    #[serde(default)]
    http_url_to_repo: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    visibility: Option<String>,
    #[serde(default)]
    default_branch: Option<String>,
}

impl From<GitlabProject> for RepoSummary {
    fn from(project: GitlabProject) -> Self {
        RepoSummary {
            id: project.id.to_string(),
            slug: if project.path.is_empty() {
                project.name.clone()
            } else {
                project.path.clone()
            },
            http_url: project.web_url,
            name: project.name,
            description: project.description.unwrap_or_default(),
            is_private: project.visibility.as_deref() == Some("private"),
            default_branch: project.default_branch.unwrap_or_else(|| "main".into()),
        }
    }
}

#[derive(Deserialize)]
struct GitlabBranch {
    name: String,
}

#[derive(Deserialize)]
struct GitlabTreeEntry {
    path: String,
    #[serde(rename = "type")]
    entry_type: String,
}

#[derive(Deserialize)]
struct GitlabMergeRequest {
    iid: u64,
    state: String,
    source_branch: String,
    target_branch: String,
    #[serde(default)]
    merge_status: Option<String>,
    #[serde(default)]
    merged_at: Option<String>,
    #[serde(default)]
    merge_commit_sha: Option<String>,
    #[serde(default)]
    has_conflicts: Option<bool>,
}

impl From<GitlabMergeRequest> for PullRequest {
    fn from(mr: GitlabMergeRequest) -> Self {
        let status = map_mr_status(&mr.state, mr.merge_status.as_deref(), mr.merged_at.is_some());
        PullRequest {
            number: mr.iid,
            source_branch: mr.source_branch,
            target_branch: mr.target_branch,
            status,
            merge_status: mr.merge_status,
            has_conflicts: mr.has_conflicts,
        }
    }
}

#[derive(Deserialize)]
struct GitlabHook {
    id: u64,
    #[serde(default)]
    url: String,
    #[serde(default)]
    push_events: bool,
    #[serde(default)]
    merge_requests_events: bool,
    #[serde(default = "default_true")]
    enable_ssl_verification: bool,
}

fn default_true() -> bool {
    true
}

impl From<GitlabHook> for Webhook {
    fn from(hook: GitlabHook) -> Self {
        let mut events = Vec::new();
        if hook.push_events {
            events.push("push".to_string());
        }
        if hook.merge_requests_events {
            events.push("merge_requests".to_string());
        }
        Webhook {
            id: hook.id.to_string(),
            name: "gitlab".into(),
            active: true,
            events,
            config: WebhookConfig {
                content_type: "json".into(),
                url: hook.url,
                insecure_ssl: !hook.enable_ssl_verification,
            },
        }
    }
}

#[derive(Serialize)]
struct CreateProjectBody<'a> {
    name: &'a str,
    visibility: &'a str,
    initialize_with_readme: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace_id: Option<u64>,
}

#[derive(Serialize)]
struct CreateMergeRequestBody<'a> {
    source_branch: &'a str,
    target_branch: &'a str,
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

#[derive(Serialize)]
struct AcceptMergeRequestBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    squash: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    squash_commit_message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    merge_commit_message: Option<&'a str>,
}

#[derive(Serialize)]
struct CreateHookBody<'a> {
    url: &'a str,
    push_events: bool,
    merge_requests_events: bool,
    enable_ssl_verification: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    mod status_mapping {
        use super::*;

        #[test]
        fn opened_states() {
            assert_eq!(
                map_mr_status("opened", Some("cannot_be_merged"), false),
                PullRequestStatus::Conflicts
            );
            assert_eq!(
                map_mr_status("opened", Some("can_be_merged"), false),
                PullRequestStatus::Active
            );
            assert_eq!(
                map_mr_status("opened", Some("checking"), false),
                PullRequestStatus::Active
            );
            assert_eq!(map_mr_status("opened", None, false), PullRequestStatus::Active);
        }

        #[test]
        fn closed_states() {
            assert_eq!(
                map_mr_status("closed", None, true),
                PullRequestStatus::Completed
            );
            assert_eq!(
                map_mr_status("closed", None, false),
                PullRequestStatus::Abandoned
            );
            assert_eq!(
                map_mr_status("merged", None, true),
                PullRequestStatus::Completed
            );
        }
    }

    #[test]
    fn project_path_is_percent_encoded() {
        let coordinate = RepoCoordinate::parse("https://gitlab.example.com/team/widget").unwrap();
        let forge = GitlabForge::new(coordinate).unwrap();
        assert_eq!(forge.project_path().unwrap(), "team%2Fwidget");
        assert_eq!(
            forge.project_url("merge_requests/3").unwrap(),
            "https://gitlab.example.com/api/v4/projects/team%2Fwidget/merge_requests/3"
        );
    }

    #[test]
    fn mr_wire_mapping() {
        let mr = GitlabMergeRequest {
            iid: 11,
            state: "opened".into(),
            source_branch: "feat".into(),
            target_branch: "main".into(),
            merge_status: Some("cannot_be_merged".into()),
            merged_at: None,
            merge_commit_sha: None,
            has_conflicts: Some(true),
        };
        let pr: PullRequest = mr.into();
        assert_eq!(pr.number, 11);
        assert_eq!(pr.status, PullRequestStatus::Conflicts);
        assert_eq!(pr.has_conflicts, Some(true));
    }

    #[test]
    fn webhook_params_per_event() {
        let coordinate = RepoCoordinate::parse("https://gitlab.example.com/o/r").unwrap();
        let forge = GitlabForge::new(coordinate).unwrap();

        let push = forge.webhook_params(GitEvent::Push);
        assert_eq!(push.event_header, "X-Gitlab-Event");
        assert_eq!(push.event_value, "Push Hook");

        let pr = forge.webhook_params(GitEvent::PullRequest);
        assert_eq!(pr.event_value, "Merge Request Hook");
        assert_eq!(pr.ref_path, "body.object_attributes.source_branch");
    }
}
