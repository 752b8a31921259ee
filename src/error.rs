//! error
//!
//! The forge-independent error taxonomy.
//!
//! # Design
//!
//! Every error surfaced by this crate is one of the variants below. Adapters
//! translate forge-specific wire responses (status codes, error bodies) into
//! this closed set, so callers never need to know which forge produced a
//! failure. Variants carry the context a caller can act on (the pull request
//! number for a merge conflict, the unresolved file list for a failed rebase).
//!
//! # Classification
//!
//! Two variants are classifiers rather than conditions:
//! - [`ForgeError::Retryable`] wraps transport-level failures that survived
//!   the retry policy.
//! - [`ForgeError::Fatal`] wraps anything the taxonomy has no better name
//!   for, keeping the raw HTTP status when one exists.
//!
//! The merge orchestrator uses [`ForgeError::is_merge_transient`] to decide
//! whether a failed merge attempt warrants a rebase-and-retry cycle.

use thiserror::Error;

/// Errors from forge operations.
///
/// This is the complete error surface of the crate. All adapters map their
/// wire-level failures into these variants.
#[derive(Debug, Clone, Error)]
pub enum ForgeError {
    /// The URL matched neither accepted shape, or forge detection exhausted
    /// all probes without identifying a host type.
    #[error("invalid git url: {reason}")]
    InvalidGitUrl {
        /// What was wrong with the input
        reason: String,
    },

    /// The forge rejected the supplied credentials.
    #[error("bad credentials: {message}")]
    BadCredentials {
        /// Error text from the forge
        message: String,
    },

    /// The credentials are valid but lack rights for the operation
    /// (typically repository deletion or admin endpoints).
    #[error("insufficient permissions: {message}")]
    InsufficientPermissions {
        /// Error text from the forge
        message: String,
    },

    /// A user-scoped operation reported a missing principal.
    #[error("user not found: {username}")]
    UserNotFound {
        /// The username that could not be resolved
        username: String,
    },

    /// The repository does not exist (404 on repository lookup).
    #[error("repository not found: {repo}")]
    RepoNotFound {
        /// `owner/repo` of the missing repository
        repo: String,
    },

    /// A GitLab group search returned no results.
    #[error("group not found: {group}")]
    GroupNotFound {
        /// The group that was searched for
        group: String,
    },

    /// A webhook with the same target URL is already registered.
    #[error("webhook already exists: {url}")]
    WebhookAlreadyExists {
        /// The webhook target URL
        url: String,
    },

    /// Webhook provisioning was rejected for a reason other than a
    /// duplicate registration.
    #[error("unknown webhook: {message}")]
    UnknownWebhook {
        /// Error text from the forge
        message: String,
    },

    /// The forge refused the merge because of content conflicts.
    #[error("merge conflict on pull request #{number}")]
    MergeConflict {
        /// The conflicted pull request
        number: u64,
    },

    /// Pull request creation failed because source and target are identical.
    #[error("no commits between {target} and {source_branch}")]
    NoCommitsForPullRequest {
        /// Source branch of the attempted pull request
        source_branch: String,
        /// Target branch of the attempted pull request
        target: String,
    },

    /// The pull request stayed blocked past the caller's wait budget.
    #[error("pull request #{number} is blocked from merging")]
    MergeBlockedForPullRequest {
        /// The blocked pull request
        number: u64,
    },

    /// The conflict resolver left at least one file unresolved.
    #[error("unresolved conflicts: {}", files.join(", "))]
    UnresolvedConflicts {
        /// The files that remain conflicted
        files: Vec<String>,
    },

    /// The conflict resolver reported per-file errors.
    #[error("conflict resolution failed: {}", errors.join("; "))]
    ConflictResolutionFailed {
        /// The resolver's error reports
        errors: Vec<String>,
    },

    /// A transport-level failure that persisted through the retry policy.
    #[error("retryable error: {message}")]
    Retryable {
        /// Description of the failure
        message: String,
    },

    /// Any failure the taxonomy has no more specific name for.
    #[error("{message}")]
    Fatal {
        /// HTTP status, when the failure came from a response
        status: Option<u16>,
        /// Description of the failure
        message: String,
    },
}

impl ForgeError {
    /// Build a [`ForgeError::Fatal`] from a response status and body text.
    pub fn fatal(status: u16, message: impl Into<String>) -> Self {
        ForgeError::Fatal {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Build a [`ForgeError::Fatal`] with no associated HTTP status.
    pub fn other(message: impl Into<String>) -> Self {
        ForgeError::Fatal {
            status: None,
            message: message.into(),
        }
    }

    /// Whether a failed merge attempt should trigger a rebase-and-retry
    /// cycle in the merge orchestrator.
    ///
    /// Covers explicit merge conflicts plus the responses forges return when
    /// the base moved under the pull request:
    /// - HTTP 409
    /// - HTTP 405 with "Base branch was modified" or "Pull Request is not
    ///   mergeable"
    /// - HTTP 422 with "merge conflict between base and head"
    pub fn is_merge_transient(&self) -> bool {
        match self {
            ForgeError::MergeConflict { .. } => true,
            ForgeError::Fatal {
                status: Some(409), ..
            } => true,
            ForgeError::Fatal {
                status: Some(405),
                message,
            } => {
                message.contains("Base branch was modified")
                    || message.contains("Pull Request is not mergeable")
            }
            ForgeError::Fatal {
                status: Some(422),
                message,
            } => message.contains("merge conflict between base and head"),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_context() {
        assert_eq!(
            format!(
                "{}",
                ForgeError::InvalidGitUrl {
                    reason: "no host".into()
                }
            ),
            "invalid git url: no host"
        );
        assert_eq!(
            format!("{}", ForgeError::MergeConflict { number: 7 }),
            "merge conflict on pull request #7"
        );
        assert_eq!(
            format!(
                "{}",
                ForgeError::NoCommitsForPullRequest {
                    source_branch: "feat".into(),
                    target: "main".into()
                }
            ),
            "no commits between main and feat"
        );
        assert_eq!(
            format!(
                "{}",
                ForgeError::UnresolvedConflicts {
                    files: vec!["a.txt".into(), "b.txt".into()]
                }
            ),
            "unresolved conflicts: a.txt, b.txt"
        );
    }

    mod is_merge_transient {
        use super::*;

        #[test]
        fn merge_conflict_is_transient() {
            assert!(ForgeError::MergeConflict { number: 1 }.is_merge_transient());
        }

        #[test]
        fn http_409_is_transient() {
            assert!(ForgeError::fatal(409, "conflict").is_merge_transient());
        }

        #[test]
        fn base_branch_modified_405_is_transient() {
            assert!(ForgeError::fatal(405, "Base branch was modified").is_merge_transient());
            assert!(ForgeError::fatal(405, "Pull Request is not mergeable").is_merge_transient());
        }

        #[test]
        fn other_405_is_not_transient() {
            assert!(!ForgeError::fatal(405, "At least 1 approving review is required")
                .is_merge_transient());
        }

        #[test]
        fn merge_conflict_422_is_transient() {
            assert!(
                ForgeError::fatal(422, "merge conflict between base and head").is_merge_transient()
            );
            assert!(!ForgeError::fatal(422, "Validation failed").is_merge_transient());
        }

        #[test]
        fn unrelated_errors_are_not_transient() {
            assert!(!ForgeError::BadCredentials {
                message: "nope".into()
            }
            .is_merge_transient());
            assert!(!ForgeError::fatal(404, "Not Found").is_merge_transient());
            assert!(!ForgeError::Retryable {
                message: "timeout".into()
            }
            .is_merge_transient());
        }
    }
}
