//! forge::azure
//!
//! Azure DevOps adapter.
//!
//! # Design
//!
//! Azure addresses repositories as `{organization}/{project}/_git/{repo}`;
//! the coordinate's `project` field is mandatory for repository-level
//! operations. REST calls go to `_apis/git` with `api-version=6.0` and
//! authenticate with a PAT bearer token.
//!
//! Branch names travel as full refs (`refs/heads/feat`) and are stripped at
//! the boundary. Merging works by PATCHing the pull request to `completed`;
//! because completion is asynchronous, the adapter polls the conflicts
//! endpoint afterwards and reports a merge conflict when entries appear.
//!
//! `list_files` and `file_contents` are not implemented for Azure; they
//! fail with a stable error until a caller needs them.

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

/// The API version every request pins.
const API_VERSION: &str = "6.0";

/// The all-zero object id Azure uses for ref creation and deletion.
const ZERO_OID: &str = "0000000000000000000000000000000000000000";

/// Azure DevOps adapter.
#[derive(Debug, Clone)]
pub struct AzureForge {
    coordinate: RepoCoordinate,
    kernel: HttpKernel,
    org_base: String,
}

impl AzureForge {
    /// Adapter for dev.azure.com. The coordinate is normalized so that a
    /// `project/_git/repo` remainder lands in the project/repo fields.
    pub fn new(coordinate: RepoCoordinate) -> Result<Self, ForgeError> {
        let coordinate = coordinate.azure_normalized();
        let org_base = format!(
            "{}://{}/{}",
            coordinate.protocol, coordinate.host, coordinate.owner
        );
        let kernel = HttpKernel::new(
            AuthScheme::Bearer {
                token: coordinate.password.clone().unwrap_or_default(),
            },
            coordinate.ca_cert.as_deref(),
            RetryPolicy::new(),
        )?;
        Ok(Self {
            coordinate,
            kernel,
            org_base,
        })
    }

    fn sibling(&self, coordinate: RepoCoordinate) -> Box<dyn Forge> {
        Box::new(Self {
            coordinate,
            kernel: self.kernel.clone(),
            org_base: self.org_base.clone(),
        })
    }

    fn project(&self) -> Result<&str, ForgeError> {
        self.coordinate
            .project
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ForgeError::InvalidGitUrl {
                reason: "azure devops operations require a project".into(),
            })
    }

    /// `{org}/{project}/_apis/git/repositories/{repo}/{path}?api-version=6.0`
    fn repo_api_url(&self, path: &str) -> Result<String, ForgeError> {
        let project = self.project()?;
        let repo = self.coordinate.require_repo()?;
        let trail = if path.is_empty() {
            String::new()
        } else {
            format!("/{}", path)
        };
        let separator = if trail.contains('?') { '&' } else { '?' };
        Ok(format!(
            "{}/{}/_apis/git/repositories/{}{}{}api-version={}",
            self.org_base, project, repo, trail, separator, API_VERSION
        ))
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

    async fn project_id(&self) -> Result<String, ForgeError> {
        let url = format!(
            "{}/_apis/projects/{}?api-version={}",
            self.org_base,
            self.project()?,
            API_VERSION
        );
        let project: AzureProject = self.get_json("project_id", &url).await?;
        Ok(project.id)
    }

    /// Resolve a branch's current object id, or `None` when absent.
    async fn branch_oid(&self, branch: &str) -> Result<Option<String>, ForgeError> {
        let url = self.repo_api_url(&format!("refs?filter=heads/{}", branch))?;
        let refs: AzureList<AzureRef> = self.get_json("branch_oid", &url).await?;
        Ok(refs
            .value
            .into_iter()
            .find(|r| r.name == format!("refs/heads/{}", branch))
            .map(|r| r.object_id))
    }
}

fn error_message(response: &KernelResponse) -> String {
    response
        .json::<AzureError>()
        .map(|e| e.message)
        .unwrap_or_else(|_| response.text())
}

fn strip_ref(name: &str) -> &str {
    name.strip_prefix("refs/heads/").unwrap_or(name)
}

/// Normalize an Azure pull request status/mergeStatus pair.
///
/// Active PRs are refined by `mergeStatus`: `rejectedByPolicy` means a
/// policy gate, `conflicts` means content conflicts.
pub(crate) fn map_pull_status(status: &str, merge_status: Option<&str>) -> PullRequestStatus {
    match status {
        "active" => match merge_status {
            Some("rejectedByPolicy") => PullRequestStatus::Blocked,
            Some("conflicts") => PullRequestStatus::Conflicts,
            _ => PullRequestStatus::Active,
        },
        "abandoned" => PullRequestStatus::Abandoned,
        "completed" => PullRequestStatus::Completed,
        _ => PullRequestStatus::NotSet,
    }
}

/// Azure's name for a forge-neutral merge method.
pub(crate) fn merge_strategy_name(method: MergeMethod) -> &'static str {
    match method {
        MergeMethod::Merge => "RebaseMerge",
        MergeMethod::Rebase => "Rebase",
        MergeMethod::Squash => "Squash",
    }
}

#[async_trait]
impl Forge for AzureForge {
    fn kind(&self) -> ForgeKind {
        ForgeKind::Azure
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
        let repo: AzureRepo = response.json()?;
        Ok(repo.into())
    }

    async fn list_repos(&self) -> Result<Vec<String>, ForgeError> {
        let url = match self.coordinate.project.as_deref().filter(|p| !p.is_empty()) {
            Some(project) => format!(
                "{}/{}/_apis/git/repositories?api-version={}",
                self.org_base, project, API_VERSION
            ),
            None => format!(
                "{}/_apis/git/repositories?api-version={}",
                self.org_base, API_VERSION
            ),
        };
        let repos: AzureList<AzureRepo> = self.get_json("list_repos", &url).await?;
        Ok(repos.value.into_iter().map(|r| r.remote_url).collect())
    }

    async fn create_repo(&self, opts: CreateRepoOpts) -> Result<Box<dyn Forge>, ForgeError> {
        let url = format!(
            "{}/{}/_apis/git/repositories?api-version={}",
            self.org_base,
            self.project()?,
            API_VERSION
        );
        let body = CreateRepoBody { name: &opts.name };
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

        let sibling_coord = self.coordinate.with_repo(&opts.name);
        let sibling = Self {
            coordinate: sibling_coord.clone(),
            kernel: self.kernel.clone(),
            org_base: self.org_base.clone(),
        };

        // No native auto-init: push a README as the first commit.
        if opts.auto_init {
            let push_url = sibling.repo_api_url("pushes")?;
            let push_body = seed_readme_push(&opts.name);
            let response = sibling
                .kernel
                .send(
                    "create_repo",
                    sibling.kernel.request(Method::POST, &push_url).json(&push_body),
                )
                .await?;
            if !response.is_success() {
                return Err(sibling.error_from(&response));
            }
        }

        Ok(self.sibling(sibling_coord))
    }

    async fn delete_repo(&self) -> Result<Box<dyn Forge>, ForgeError> {
        // Deletion addresses the repository by GUID, not by name.
        let info = self.repo_info().await?;
        let url = format!(
            "{}/{}/_apis/git/repositories/{}?api-version={}",
            self.org_base,
            self.project()?,
            info.id,
            API_VERSION
        );
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
        Err(ForgeError::other(
            "listing files is not implemented for azure devops",
        ))
    }

    async fn file_contents(&self, _file: &RepoFile) -> Result<Vec<u8>, ForgeError> {
        Err(ForgeError::other(
            "fetching file contents is not implemented for azure devops",
        ))
    }

    async fn default_branch(&self) -> Result<String, ForgeError> {
        Ok(self.repo_info().await?.default_branch)
    }

    async fn branches(&self) -> Result<Vec<Branch>, ForgeError> {
        let url = self.repo_api_url("refs?filter=heads/")?;
        let refs: AzureList<AzureRef> = self.get_json("branches", &url).await?;
        Ok(refs
            .value
            .into_iter()
            .map(|r| Branch {
                name: strip_ref(&r.name).to_string(),
            })
            .collect())
    }

    async fn delete_branch(&self, branch: &str) -> Result<(), ForgeError> {
        let oid = self
            .branch_oid(branch)
            .await?
            .ok_or_else(|| ForgeError::other(format!("branch not found: {}", branch)))?;
        let url = self.repo_api_url("refs")?;
        let body = vec![RefUpdate {
            name: format!("refs/heads/{}", branch),
            old_object_id: oid,
            new_object_id: ZERO_OID.to_string(),
        }];
        let response = self
            .kernel
            .send(
                "delete_branch",
                self.kernel.request(Method::POST, &url).json(&body),
            )
            .await?;
        if !response.is_success() {
            return Err(self.error_from(&response));
        }
        Ok(())
    }

    async fn pull_request(&self, number: u64) -> Result<PullRequest, ForgeError> {
        let url = self.repo_api_url(&format!("pullrequests/{}", number))?;
        let pr: AzurePull = self.get_json("pull_request", &url).await?;
        Ok(pr.into())
    }

    async fn create_pull_request(
        &self,
        opts: CreatePullRequestOpts,
    ) -> Result<PullRequest, ForgeError> {
        let url = self.repo_api_url("pullrequests")?;
        let body = CreatePullBody {
            source_ref_name: format!("refs/heads/{}", opts.source_branch),
            target_ref_name: format!("refs/heads/{}", opts.target_branch),
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
            if message.to_lowercase().contains("no commits") {
                return Err(ForgeError::NoCommitsForPullRequest {
                    source_branch: opts.source_branch,
                    target: opts.target_branch,
                });
            }
            return Err(self.error_from(&response));
        }
        let pr: AzurePull = response.json()?;
        Ok(pr.into())
    }

    async fn merge_pull_request(
        &self,
        number: u64,
        opts: MergeOpts,
    ) -> Result<String, ForgeError> {
        let read_url = self.repo_api_url(&format!("pullrequests/{}", number))?;
        let current: AzurePull = self.get_json("merge_pull_request", &read_url).await?;
        let commit_id = current
            .last_merge_source_commit
            .map(|c| c.commit_id)
            .ok_or_else(|| ForgeError::other("pull request has no merge source commit"))?;

        let body = CompletePullBody {
            status: "completed",
            last_merge_source_commit: CommitRef {
                commit_id: commit_id.clone(),
            },
            completion_options: CompletionOptions {
                merge_strategy: merge_strategy_name(opts.method),
            },
        };
        let policy = self.kernel.policy().clone().skip_status(405);
        let response = self
            .kernel
            .send_with_policy(
                "merge_pull_request",
                self.kernel.request(Method::PATCH, &read_url).json(&body),
                &policy,
            )
            .await?;
        if !response.is_success() {
            return Err(self.error_from(&response));
        }

        // Completion is asynchronous; surface content conflicts the server
        // discovers while processing the completion.
        let conflicts_url = self.repo_api_url(&format!("pullrequests/{}/conflicts", number))?;
        let conflicts: AzureList<serde_json::Value> =
            self.get_json("merge_pull_request", &conflicts_url).await?;
        if !conflicts.value.is_empty() {
            return Err(ForgeError::MergeConflict { number });
        }

        Ok(commit_id)
    }

    async fn update_pull_request_branch(&self, _number: u64) -> Result<(), ForgeError> {
        Err(ForgeError::other(
            "updating the pull request branch is not supported by azure devops",
        ))
    }

    async fn webhooks(&self) -> Result<Vec<Webhook>, ForgeError> {
        let url = format!(
            "{}/_apis/hooks/subscriptions?api-version={}",
            self.org_base, API_VERSION
        );
        let subscriptions: AzureList<AzureSubscription> = self.get_json("webhooks", &url).await?;
        Ok(subscriptions
            .value
            .into_iter()
            .map(Into::into)
            .collect())
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

        let project_id = self.project_id().await?;
        let repo_id = self.repo_info().await?.id;
        let event = opts.events.first().copied().unwrap_or(GitEvent::Push);

        let body = CreateSubscriptionBody {
            publisher_id: "tfs",
            event_type: azure_event_type(event),
            resource_version: "1.0",
            consumer_id: "webHooks",
            consumer_action_id: "httpRequest",
            publisher_inputs: PublisherInputs {
                project_id,
                repository: repo_id,
            },
            consumer_inputs: ConsumerInputs {
                url: &opts.webhook_url,
            },
        };
        let url = format!(
            "{}/_apis/hooks/subscriptions?api-version={}",
            self.org_base, API_VERSION
        );
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
        let created: AzureSubscription = response.json()?;
        Ok(created.id)
    }

    fn webhook_params(&self, event: GitEvent) -> WebhookParams {
        let (event_value, ref_path) = match event {
            GitEvent::Push => ("git.push", "body.resource.refUpdates[0].name"),
            GitEvent::PullRequest => (
                "git.pullrequest.created",
                "body.resource.sourceRefName",
            ),
        };
        WebhookParams {
            // Azure names the event in the payload, not a header.
            event_header: String::new(),
            event_value: event_value.into(),
            ref_path: ref_path.into(),
            repo_url_path: "body.resource.repository.remoteUrl".into(),
        }
    }
}

fn azure_event_type(event: GitEvent) -> &'static str {
    match event {
        GitEvent::Push => "git.push",
        GitEvent::PullRequest => "git.pullrequest.created",
    }
}

/// The push body that seeds a README as the first commit on `main`.
fn seed_readme_push(repo_name: &str) -> PushBody {
    PushBody {
        ref_updates: vec![RefUpdate {
            name: "refs/heads/main".into(),
            old_object_id: ZERO_OID.into(),
            new_object_id: String::new(),
        }],
        commits: vec![PushCommit {
            comment: "Initial commit".into(),
            changes: vec![PushChange {
                change_type: "add".into(),
                item: PushItem {
                    path: "/README.md".into(),
                },
                new_content: PushContent {
                    content: format!("# {}\n", repo_name),
                    content_type: "rawtext".into(),
                },
            }],
        }],
    }
}

// --------------------------------------------------------------------------
// Wire types
// --------------------------------------------------------------------------

#[derive(Deserialize)]
struct AzureList<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Deserialize)]
struct AzureError {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzureProject {
    id: String,
    #[serde(default)]
    visibility: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzureRepo {
    id: String,
    name: String,
    #[serde(default)]
    web_url: String,
    #[serde(default)]
    remote_url: String,
    #[serde(default)]
    default_branch: Option<String>,
    #[serde(default)]
    project: Option<AzureProject>,
}

impl From<AzureRepo> for RepoSummary {
    fn from(repo: AzureRepo) -> Self {
        let is_private = repo
            .project
            .as_ref()
            .and_then(|p| p.visibility.as_deref())
            .map_or(true, |v| v != "public");
        RepoSummary {
            id: repo.id,
            slug: repo.name.clone(),
            http_url: if repo.web_url.is_empty() {
                repo.remote_url.clone()
            } else {
                repo.web_url
            },
            name: repo.name,
            description: String::new(),
            is_private,
            default_branch: repo
                .default_branch
                .as_deref()
                .map(strip_ref)
                .unwrap_or("main")
                .to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzureRef {
    name: String,
    object_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzurePull {
    pull_request_id: u64,
    status: String,
    #[serde(default)]
    merge_status: Option<String>,
    source_ref_name: String,
    target_ref_name: String,
    #[serde(default)]
    last_merge_source_commit: Option<AzureCommitRef>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzureCommitRef {
    commit_id: String,
}

impl From<AzurePull> for PullRequest {
    fn from(pr: AzurePull) -> Self {
        let status = map_pull_status(&pr.status, pr.merge_status.as_deref());
        let has_conflicts = pr
            .merge_status
            .as_deref()
            .map(|status| status == "conflicts");
        PullRequest {
            number: pr.pull_request_id,
            source_branch: strip_ref(&pr.source_ref_name).to_string(),
            target_branch: strip_ref(&pr.target_ref_name).to_string(),
            status,
            merge_status: pr.merge_status,
            has_conflicts,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzureSubscription {
    id: String,
    #[serde(default)]
    event_type: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    consumer_inputs: Option<AzureConsumerInputs>,
}

#[derive(Deserialize)]
struct AzureConsumerInputs {
    #[serde(default)]
    url: String,
}

impl From<AzureSubscription> for Webhook {
    fn from(sub: AzureSubscription) -> Self {
        Webhook {
            id: sub.id,
            name: sub.event_type.clone(),
            active: sub.status.as_deref() != Some("disabledByUser"),
            events: vec![sub.event_type],
            config: WebhookConfig {
                content_type: "json".into(),
                url: sub.consumer_inputs.map(|c| c.url).unwrap_or_default(),
                insecure_ssl: false,
            },
        }
    }
}

#[derive(Serialize)]
struct CreateRepoBody<'a> {
    name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefUpdate {
    name: String,
    old_object_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    new_object_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PushBody {
    ref_updates: Vec<RefUpdate>,
    commits: Vec<PushCommit>,
}

#[derive(Serialize)]
struct PushCommit {
    comment: String,
    changes: Vec<PushChange>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PushChange {
    change_type: String,
    item: PushItem,
    new_content: PushContent,
}

#[derive(Serialize)]
struct PushItem {
    path: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PushContent {
    content: String,
    content_type: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatePullBody<'a> {
    source_ref_name: String,
    target_ref_name: String,
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommitRef {
    commit_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionOptions {
    merge_strategy: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletePullBody {
    status: &'static str,
    last_merge_source_commit: CommitRef,
    completion_options: CompletionOptions,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PublisherInputs {
    project_id: String,
    repository: String,
}

#[derive(Serialize)]
struct ConsumerInputs<'a> {
    url: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSubscriptionBody<'a> {
    publisher_id: &'static str,
    event_type: &'static str,
    resource_version: &'static str,
    consumer_id: &'static str,
    consumer_action_id: &'static str,
    publisher_inputs: PublisherInputs,
    consumer_inputs: ConsumerInputs<'a>,
}

#[cfg(test)]
mod tests {
    use super::*;

    mod status_mapping {
        use super::*;

        #[test]
        fn active_states() {
            assert_eq!(
                map_pull_status("active", Some("rejectedByPolicy")),
                PullRequestStatus::Blocked
            );
            assert_eq!(
                map_pull_status("active", Some("conflicts")),
                PullRequestStatus::Conflicts
            );
            assert_eq!(
                map_pull_status("active", Some("succeeded")),
                PullRequestStatus::Active
            );
            assert_eq!(map_pull_status("active", None), PullRequestStatus::Active);
        }

        #[test]
        fn terminal_states() {
            assert_eq!(
                map_pull_status("abandoned", None),
                PullRequestStatus::Abandoned
            );
            assert_eq!(
                map_pull_status("completed", None),
                PullRequestStatus::Completed
            );
            assert_eq!(map_pull_status("notSet", None), PullRequestStatus::NotSet);
        }
    }

    #[test]
    fn merge_strategy_mapping() {
        assert_eq!(merge_strategy_name(MergeMethod::Merge), "RebaseMerge");
        assert_eq!(merge_strategy_name(MergeMethod::Rebase), "Rebase");
        assert_eq!(merge_strategy_name(MergeMethod::Squash), "Squash");
    }

    #[test]
    fn ref_names_are_stripped() {
        let pr = AzurePull {
            pull_request_id: 21,
            status: "active".into(),
            merge_status: Some("conflicts".into()),
            source_ref_name: "refs/heads/feat".into(),
            target_ref_name: "refs/heads/main".into(),
            last_merge_source_commit: None,
        };
        let pr: PullRequest = pr.into();
        assert_eq!(pr.source_branch, "feat");
        assert_eq!(pr.target_branch, "main");
        assert_eq!(pr.status, PullRequestStatus::Conflicts);
        assert_eq!(pr.has_conflicts, Some(true));
    }

    #[test]
    fn repo_api_url_shape() {
        let coordinate =
            RepoCoordinate::parse("https://dev.azure.com/org/proj/_git/widget").unwrap();
        let forge = AzureForge::new(coordinate).unwrap();
        assert_eq!(
            forge.repo_api_url("pullrequests/3").unwrap(),
            "https://dev.azure.com/org/proj/_apis/git/repositories/widget/pullrequests/3?api-version=6.0"
        );
    }

    #[test]
    fn coordinate_is_normalized_at_construction() {
        let coordinate = RepoCoordinate {
            host: "dev.azure.com".into(),
            owner: "org".into(),
            repo: Some("proj/_git/widget".into()),
            ..RepoCoordinate::default()
        };
        let forge = AzureForge::new(coordinate).unwrap();
        let config = forge.config();
        assert_eq!(config.project.as_deref(), Some("proj"));
        assert_eq!(config.repo.as_deref(), Some("widget"));
    }

    #[test]
    fn webhook_params_use_payload_event_type() {
        let coordinate =
            RepoCoordinate::parse("https://dev.azure.com/org/proj/_git/widget").unwrap();
        let forge = AzureForge::new(coordinate).unwrap();
        let push = forge.webhook_params(GitEvent::Push);
        assert!(push.event_header.is_empty());
        assert_eq!(push.event_value, "git.push");
        assert_eq!(push.ref_path, "body.resource.refUpdates[0].name");
    }
}
