//! git
//!
//! The narrow local-git capability.
//!
//! All local repository work flows through [`GitDriver`], a subprocess
//! wrapper over the `git` binary. [`Workspace`] pairs a driver with the
//! directory it operates on; clones produced by
//! [`crate::forge::Forge::clone_repo`] hand one back to the caller, and the
//! rebase machinery creates short-lived ones of its own.

mod driver;

use std::path::Path;

pub use driver::{GitDriver, GitError, GitOutput, RepoStatus};

use crate::core::coordinate::RepoCoordinate;
use crate::error::ForgeError;
use crate::forge::CloneOpts;

/// Clone a coordinate's repository into `opts.local_dir`.
///
/// Credentials are percent-encoded into the effective remote URL; a
/// configured CA bundle is applied during the clone and persisted as
/// `http.sslCAInfo` so later fetches and pushes reuse it. The coordinate's
/// branch, when set, is checked out after the clone.
pub async fn clone_repository(
    coord: &RepoCoordinate,
    opts: &CloneOpts,
) -> Result<Workspace, ForgeError> {
    let url = coord.clone_url_with_credentials()?;

    let mut clone_config = opts.extra_config.clone();
    if let Some(ca) = &coord.ca_cert {
        clone_config.push(("http.sslCAInfo".into(), ca.to_string_lossy().into_owned()));
    }

    let driver = GitDriver::clone_from(&url, &opts.local_dir, &clone_config).await?;

    if let Some(ca) = &coord.ca_cert {
        driver.config("http.sslCAInfo", &ca.to_string_lossy()).await?;
    }
    if let Some(user) = &opts.user_config {
        driver.config("user.name", &user.name).await?;
        driver.config("user.email", &user.email).await?;
    }
    if let Some(branch) = coord.branch.as_deref() {
        driver.run_ok(&["checkout", branch]).await?;
    }

    Ok(driver.into())
}

/// A local clone of a repository.
#[derive(Debug, Clone)]
pub struct Workspace {
    driver: GitDriver,
}

impl Workspace {
    /// Wrap an existing clone directory.
    pub fn at(dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            driver: GitDriver::at(dir),
        }
    }

    /// The clone's directory.
    pub fn path(&self) -> &Path {
        self.driver.dir()
    }

    /// The git driver bound to this clone.
    pub fn git(&self) -> &GitDriver {
        &self.driver
    }
}

impl From<GitDriver> for Workspace {
    fn from(driver: GitDriver) -> Self {
        Self { driver }
    }
}
