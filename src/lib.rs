//! gitu - a uniform async client for hosted Git forges
//!
//! gitu exposes one capability surface over GitHub, GitHub Enterprise,
//! GitLab, Gitea, Gogs, Bitbucket Cloud, and Azure DevOps: repository
//! lifecycle, pull-request lifecycle, branch operations, webhook
//! management, file inspection, and local clones with automatic
//! rebase-and-resolve on merge.
//!
//! # Architecture
//!
//! - [`core`] - coordinates, URL parsing, and the shared domain vocabulary
//! - [`forge`] - the `Forge` trait, detection, and the seven adapters
//! - [`http`] - the retry kernel every forge-bound request passes through
//! - [`git`] - the narrow local-git subprocess capability
//! - [`merge`] - the merge orchestrator and pluggable conflict resolvers
//! - [`config`] - the optional `~/.gitu-config` credential file
//! - [`error`] - the closed, forge-independent error taxonomy
//!
//! # Example
//!
//! ```ignore
//! use gitu::core::types::Credentials;
//! use gitu::forge::{create_forge, MergeOpts};
//!
//! let creds = Credentials::new("alice", "token");
//! let forge = create_forge("https://git.corp.example/team/app#feat:main", &creds).await?;
//! let message = forge.update_and_merge_pull_request(42, MergeOpts::default()).await?;
//! println!("{}", message);
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod forge;
pub mod git;
pub mod http;
pub mod merge;

pub use error::ForgeError;
