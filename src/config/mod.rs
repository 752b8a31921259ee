//! config
//!
//! The optional `~/.gitu-config` credential file.
//!
//! # Format
//!
//! ```yaml
//! credentials:
//!   - host: github.com
//!     username: alice
//!     token: ghp_xxx
//!   - host: git.internal.example.com
//!     username: bot
//!     token: glpat-yyy
//! ```
//!
//! When a caller supplies a host but no explicit credentials, the first
//! entry matching the host supplies them. A missing file is not an error;
//! a malformed one is.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::core::types::Credentials;
use crate::error::ForgeError;

/// File name under the home directory.
const CONFIG_FILE_NAME: &str = ".gitu-config";

/// One stored credential.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialEntry {
    /// Host the credential applies to
    pub host: String,
    /// Username
    #[serde(default)]
    pub username: String,
    /// Token or password
    pub token: String,
}

/// The parsed credential file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialsFile {
    /// Stored credentials, first match wins
    #[serde(default)]
    pub credentials: Vec<CredentialEntry>,
}

impl CredentialsFile {
    /// Load from the default location (`~/.gitu-config`).
    ///
    /// Returns `None` when the file does not exist.
    pub fn load_default() -> Result<Option<Self>, ForgeError> {
        match default_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    /// Load from an explicit path. Returns `None` when absent.
    pub fn load_from(path: &Path) -> Result<Option<Self>, ForgeError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ForgeError::other(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        let file: CredentialsFile = serde_yaml::from_str(&text).map_err(|e| {
            ForgeError::other(format!("invalid credential file {}: {}", path.display(), e))
        })?;
        Ok(Some(file))
    }

    /// The first entry matching `host`, as [`Credentials`].
    pub fn lookup(&self, host: &str) -> Option<Credentials> {
        self.credentials
            .iter()
            .find(|entry| entry.host == host)
            .map(|entry| Credentials::new(&entry.username, &entry.token))
    }
}

/// `$HOME/.gitu-config`.
fn default_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(CONFIG_FILE_NAME))
}
