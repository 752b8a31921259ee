//! core::types
//!
//! Forge-neutral domain types.
//!
//! # Design
//!
//! These types are the vocabulary shared by every adapter. Adapters own the
//! translation between their wire formats and these normalized shapes, so
//! the rest of the crate (and callers) never see forge-specific payloads.
//!
//! # Types
//!
//! - [`ForgeKind`] - closed enumeration of supported forges
//! - [`Credentials`] - username/token pair plus optional CA bundle
//! - [`PullRequest`] / [`PullRequestStatus`] - normalized pull request state
//! - [`RepoSummary`], [`RepoFile`], [`Branch`], [`Webhook`] - read models
//! - [`MergeMethod`] - the forge-neutral merge strategies
//! - [`GitEvent`] / [`WebhookParams`] - webhook payload selectors for CI

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The supported forge implementations.
///
/// Every adapter is tagged with exactly one kind. `Ghe` is GitHub Enterprise
/// (same API shape as GitHub behind `/api/v3`); `Gogs` shares Gitea's API
/// shape but is detected and tagged separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForgeKind {
    /// GitHub.com
    Github,
    /// GitHub Enterprise (self-hosted)
    Ghe,
    /// GitLab (gitlab.com or self-hosted)
    Gitlab,
    /// Gogs (self-hosted)
    Gogs,
    /// Gitea (self-hosted)
    Gitea,
    /// Bitbucket Cloud
    Bitbucket,
    /// Azure DevOps
    Azure,
}

impl ForgeKind {
    /// The kind's name as used in configuration and log output.
    pub fn name(&self) -> &'static str {
        match self {
            ForgeKind::Github => "github",
            ForgeKind::Ghe => "ghe",
            ForgeKind::Gitlab => "gitlab",
            ForgeKind::Gogs => "gogs",
            ForgeKind::Gitea => "gitea",
            ForgeKind::Bitbucket => "bitbucket",
            ForgeKind::Azure => "azure",
        }
    }

    /// Parse a kind from its configuration name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "github" => Some(ForgeKind::Github),
            "ghe" => Some(ForgeKind::Ghe),
            "gitlab" => Some(ForgeKind::Gitlab),
            "gogs" => Some(ForgeKind::Gogs),
            "gitea" => Some(ForgeKind::Gitea),
            "bitbucket" => Some(ForgeKind::Bitbucket),
            "azure" => Some(ForgeKind::Azure),
            _ => None,
        }
    }

    /// All supported kinds.
    pub fn all() -> &'static [ForgeKind] {
        &[
            ForgeKind::Github,
            ForgeKind::Ghe,
            ForgeKind::Gitlab,
            ForgeKind::Gogs,
            ForgeKind::Gitea,
            ForgeKind::Bitbucket,
            ForgeKind::Azure,
        ]
    }
}

impl std::fmt::Display for ForgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Credentials for a forge.
///
/// Carried by reference into every adapter instance and never mutated.
/// `username` may be empty for token-only forges.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// Username for basic auth (may be empty)
    pub username: String,
    /// Password or personal access token
    pub token: String,
    /// Path to a PEM CA bundle for self-hosted forges behind private CAs
    pub ca_cert: Option<PathBuf>,
}

impl Credentials {
    /// Create credentials from a username and token.
    pub fn new(username: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            token: token.into(),
            ca_cert: None,
        }
    }

    /// Attach a CA bundle path.
    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert = Some(path.into());
        self
    }
}

/// Normalized pull request state.
///
/// The per-forge mapping into this enum is the most load-bearing adapter
/// logic; see each adapter's `map_status` function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullRequestStatus {
    /// State could not be determined
    NotSet,
    /// Open and mergeable as far as the forge knows
    Active,
    /// Closed without merging
    Abandoned,
    /// Merged
    Completed,
    /// Open but the forge reports content conflicts
    Conflicts,
    /// Open and content-mergeable, but refused for policy reasons
    /// (missing reviews, failed checks)
    Blocked,
}

impl std::fmt::Display for PullRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PullRequestStatus::NotSet => "not-set",
            PullRequestStatus::Active => "active",
            PullRequestStatus::Abandoned => "abandoned",
            PullRequestStatus::Completed => "completed",
            PullRequestStatus::Conflicts => "conflicts",
            PullRequestStatus::Blocked => "blocked",
        };
        write!(f, "{}", s)
    }
}

/// A pull request as read from a forge.
///
/// Constructed from a forge read and never persisted.
#[derive(Debug, Clone)]
pub struct PullRequest {
    /// The forge-assigned pull request number
    pub number: u64,
    /// Head branch (the branch with changes)
    pub source_branch: String,
    /// Base branch (the branch to merge into)
    pub target_branch: String,
    /// Normalized status
    pub status: PullRequestStatus,
    /// The forge's native mergeability string, kept for diagnostics
    pub merge_status: Option<String>,
    /// Whether the forge reports content conflicts, when it says either way
    pub has_conflicts: Option<bool>,
}

/// Summary of a repository.
#[derive(Debug, Clone)]
pub struct RepoSummary {
    /// Forge-assigned identifier (stringified; Azure uses GUIDs)
    pub id: String,
    /// URL-safe short name
    pub slug: String,
    /// HTTP clone/browse URL
    pub http_url: String,
    /// Display name
    pub name: String,
    /// Description, empty when unset
    pub description: String,
    /// Whether the repository is private
    pub is_private: bool,
    /// The default branch name
    pub default_branch: String,
}

/// A file entry from a repository listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoFile {
    /// Path relative to the repository root
    pub path: String,
    /// Direct content URL, when the forge provides one
    pub url: Option<String>,
}

/// A branch entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    /// The branch name
    pub name: String,
}

/// Webhook configuration as stored on the forge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Payload content type (`json` or `form`)
    pub content_type: String,
    /// Target URL the forge delivers payloads to
    pub url: String,
    /// Whether the forge skips TLS verification when delivering
    pub insecure_ssl: bool,
}

/// A registered webhook.
#[derive(Debug, Clone)]
pub struct Webhook {
    /// Forge-assigned identifier (stringified)
    pub id: String,
    /// Hook name (forges without named hooks use their kind name)
    pub name: String,
    /// Whether the hook is active
    pub active: bool,
    /// Subscribed event names, in the forge's vocabulary
    pub events: Vec<String>,
    /// Delivery configuration
    pub config: WebhookConfig,
}

/// The forge-neutral merge strategies.
///
/// Each adapter maps these onto its native strategy names; see the adapter's
/// `merge_method_name` function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeMethod {
    /// Create a merge commit
    #[default]
    Merge,
    /// Squash all commits and merge
    Squash,
    /// Rebase commits onto the target branch
    Rebase,
}

impl std::fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeMethod::Merge => write!(f, "merge"),
            MergeMethod::Squash => write!(f, "squash"),
            MergeMethod::Rebase => write!(f, "rebase"),
        }
    }
}

/// Git events a webhook can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitEvent {
    /// A branch was pushed
    Push,
    /// A pull request was opened or updated
    PullRequest,
}

/// Payload selectors CI templates use to consume a forge's webhook.
///
/// Forges disagree on the header that names the event and on where in the
/// payload the pushed ref and repository URL live.
/// [`crate::forge::Forge::webhook_params`] returns the selectors for one
/// event on one forge.
///
/// Azure DevOps carries the event name in the payload (`eventType`) rather
/// than a header; its `event_header` is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookParams {
    /// Header naming the event (for example `X-GitHub-Event`)
    pub event_header: String,
    /// The header (or payload) value for the requested event
    pub event_value: String,
    /// Payload path to the pushed ref or source branch
    pub ref_path: String,
    /// Payload path to the repository's HTTP URL
    pub repo_url_path: String,
}

/// Author identity for commits made by the rebase machinery.
#[derive(Debug, Clone)]
pub struct GitUserConfig {
    /// `user.name`
    pub name: String,
    /// `user.email`
    pub email: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    mod forge_kind {
        use super::*;

        #[test]
        fn name_round_trips_through_parse() {
            for kind in ForgeKind::all() {
                assert_eq!(ForgeKind::parse(kind.name()), Some(*kind));
            }
        }

        #[test]
        fn parse_is_case_insensitive() {
            assert_eq!(ForgeKind::parse("GitHub"), Some(ForgeKind::Github));
            assert_eq!(ForgeKind::parse("AZURE"), Some(ForgeKind::Azure));
        }

        #[test]
        fn parse_unknown_is_none() {
            assert_eq!(ForgeKind::parse("sourcehut"), None);
            assert_eq!(ForgeKind::parse(""), None);
        }

        #[test]
        fn display_matches_name() {
            assert_eq!(format!("{}", ForgeKind::Bitbucket), "bitbucket");
        }
    }

    mod merge_method {
        use super::*;

        #[test]
        fn default_is_merge() {
            assert_eq!(MergeMethod::default(), MergeMethod::Merge);
        }

        #[test]
        fn display() {
            assert_eq!(format!("{}", MergeMethod::Merge), "merge");
            assert_eq!(format!("{}", MergeMethod::Squash), "squash");
            assert_eq!(format!("{}", MergeMethod::Rebase), "rebase");
        }
    }

    #[test]
    fn pull_request_status_display() {
        assert_eq!(format!("{}", PullRequestStatus::Active), "active");
        assert_eq!(format!("{}", PullRequestStatus::Conflicts), "conflicts");
        assert_eq!(format!("{}", PullRequestStatus::Blocked), "blocked");
    }

    #[test]
    fn credentials_builder() {
        let creds = Credentials::new("alice", "t0ken").with_ca_cert("/etc/ssl/corp.pem");
        assert_eq!(creds.username, "alice");
        assert_eq!(creds.token, "t0ken");
        assert_eq!(
            creds.ca_cert.as_deref().and_then(|p| p.to_str()),
            Some("/etc/ssl/corp.pem")
        );
    }
}
