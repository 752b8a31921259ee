//! core
//!
//! Forge-neutral domain types, coordinates, and small parsers.
//!
//! # Modules
//!
//! - [`coordinate`]: [`RepoCoordinate`](coordinate::RepoCoordinate) and Git
//!   URL parsing/rendering
//! - [`types`]: the shared domain vocabulary (forge kinds, pull requests,
//!   webhooks, merge methods)
//! - [`duration`]: time-text parsing for wait budgets

pub mod coordinate;
pub mod duration;
pub mod types;

pub use coordinate::{parse_git_url, Protocol, RepoCoordinate};
pub use types::*;
