//! forge::factory
//!
//! Forge detection and adapter construction.
//!
//! # Design
//!
//! Callers hand [`create_forge`] a URL and credentials and get back a
//! `Box<dyn Forge>`; they never import adapter types. Detection is a fixed
//! decision order:
//!
//! 1. `github.com`, `bitbucket.org`, and `dev.azure.com` resolve without
//!    any network traffic.
//! 2. Unknown hosts are probed: GitHub Enterprise's `/api/v3` (identified
//!    by its version header), then GitLab's `/api/v4/projects`, then
//!    Gitea's `/api/v1/settings/api`, then Gogs's `/api/v1/users/{user}`.
//!    The first identifying probe wins.
//!
//! Probes run single-attempt (a refused connection is an answer, not
//! something to wait out), honor a configured CA bundle, and treat
//! non-identifying responses as "keep going". Exhausting every probe is
//! an [`ForgeError::InvalidGitUrl`].

use tracing::debug;

use crate::core::coordinate::{parse_git_url, RepoCoordinate, AZURE_HOST};
use crate::core::types::{Credentials, ForgeKind};
use crate::error::ForgeError;
use crate::http::{AuthScheme, HttpKernel, KernelResponse, RetryPolicy};

use super::azure::AzureForge;
use super::bitbucket::BitbucketForge;
use super::gitea::GiteaForge;
use super::github::GithubForge;
use super::gitlab::GitlabForge;
use super::traits::Forge;

/// The header a GitHub Enterprise instance stamps on `/api/v3` responses.
const GHE_VERSION_HEADER: &str = "x-github-enterprise-version";

/// Build an adapter for the forge behind `url`.
///
/// # Example
///
/// ```ignore
/// use gitu::core::types::Credentials;
/// use gitu::forge::create_forge;
///
/// let creds = Credentials::new("alice", "token");
/// let forge = create_forge("https://github.com/owner/repo", &creds).await?;
/// assert_eq!(forge.kind().name(), "github");
/// ```
pub async fn create_forge(
    url: &str,
    credentials: &Credentials,
) -> Result<Box<dyn Forge>, ForgeError> {
    let coordinate = parse_git_url(url)?.with_credentials(credentials);
    create_forge_for(coordinate).await
}

/// Build an adapter for an already-assembled coordinate.
pub async fn create_forge_for(
    coordinate: RepoCoordinate,
) -> Result<Box<dyn Forge>, ForgeError> {
    let (kind, coordinate) = detect_forge(&coordinate).await?;
    forge_for_kind(kind, coordinate)
}

/// Identify the forge behind a coordinate.
///
/// Returns the kind plus a possibly transformed coordinate (Azure's
/// project/repository split is applied here).
pub async fn detect_forge(
    coordinate: &RepoCoordinate,
) -> Result<(ForgeKind, RepoCoordinate), ForgeError> {
    match coordinate.host.as_str() {
        "github.com" => return Ok((ForgeKind::Github, coordinate.clone())),
        "bitbucket.org" => return Ok((ForgeKind::Bitbucket, coordinate.clone())),
        AZURE_HOST => return Ok((ForgeKind::Azure, coordinate.azure_normalized())),
        _ => {}
    }

    let kind = probe_host(coordinate).await?;
    Ok((kind, coordinate.clone()))
}

/// Construct the adapter for a known kind.
pub fn forge_for_kind(
    kind: ForgeKind,
    coordinate: RepoCoordinate,
) -> Result<Box<dyn Forge>, ForgeError> {
    Ok(match kind {
        ForgeKind::Github => Box::new(GithubForge::new(coordinate)?),
        ForgeKind::Ghe => Box::new(GithubForge::enterprise(coordinate)?),
        ForgeKind::Gitlab => Box::new(GitlabForge::new(coordinate)?),
        ForgeKind::Gitea => Box::new(GiteaForge::new(coordinate)?),
        ForgeKind::Gogs => Box::new(GiteaForge::gogs(coordinate)?),
        ForgeKind::Bitbucket => Box::new(BitbucketForge::new(coordinate)?),
        ForgeKind::Azure => Box::new(AzureForge::new(coordinate.azure_normalized())?),
    })
}

/// Probe an unknown host's API surfaces in fixed order.
async fn probe_host(coordinate: &RepoCoordinate) -> Result<ForgeKind, ForgeError> {
    let kernel = HttpKernel::new(
        AuthScheme::Basic {
            username: coordinate.username.clone().unwrap_or_default(),
            token: coordinate.password.clone().unwrap_or_default(),
        },
        coordinate.ca_cert.as_deref(),
        RetryPolicy::none(),
    )?;
    let base = format!("{}://{}", coordinate.protocol, coordinate.host);

    // GitHub Enterprise: the version header identifies the instance even
    // when the probe itself is rejected as unauthorized.
    if let Some(response) = probe(&kernel, "detect_ghe", &format!("{}/api/v3", base)).await {
        if response.headers.contains_key(GHE_VERSION_HEADER) {
            debug!(host = %coordinate.host, "identified github enterprise");
            return Ok(ForgeKind::Ghe);
        }
    }

    // GitLab: the projects listing answers with a JSON array or object.
    if let Some(response) =
        probe(&kernel, "detect_gitlab", &format!("{}/api/v4/projects", base)).await
    {
        if response.is_success() && is_nonempty_json(&response) {
            debug!(host = %coordinate.host, "identified gitlab");
            return Ok(ForgeKind::Gitlab);
        }
    }

    // Gitea: the API settings endpoint exists nowhere else.
    if let Some(response) = probe(
        &kernel,
        "detect_gitea",
        &format!("{}/api/v1/settings/api", base),
    )
    .await
    {
        if response.is_success() && !response.body.is_empty() {
            debug!(host = %coordinate.host, "identified gitea");
            return Ok(ForgeKind::Gitea);
        }
    }

    // Gogs: fall back to looking up the authenticating user.
    let username = coordinate.username.clone().unwrap_or_default();
    if let Some(response) = probe(
        &kernel,
        "detect_gogs",
        &format!("{}/api/v1/users/{}", base, username),
    )
    .await
    {
        if response.is_success() && !response.body.is_empty() {
            debug!(host = %coordinate.host, "identified gogs");
            return Ok(ForgeKind::Gogs);
        }
    }

    Err(ForgeError::InvalidGitUrl {
        reason: format!("unable to identify git host type: {}", coordinate.host),
    })
}

/// Run one probe; transport failures are a negative answer.
async fn probe(kernel: &HttpKernel, op: &str, url: &str) -> Option<KernelResponse> {
    match kernel
        .send(op, kernel.request(reqwest::Method::GET, url))
        .await
    {
        Ok(response) => Some(response),
        Err(e) => {
            debug!(op, url, error = %e, "probe failed");
            None
        }
    }
}

/// Whether a body is a non-empty JSON object or array.
fn is_nonempty_json(response: &KernelResponse) -> bool {
    match response.json::<serde_json::Value>() {
        Ok(serde_json::Value::Array(items)) => !items.is_empty(),
        Ok(serde_json::Value::Object(fields)) => !fields.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod fixed_hosts {
        use super::*;

        #[tokio::test]
        async fn github_com_needs_no_probe() {
            let coordinate = parse_git_url("https://github.com/owner/repo").unwrap();
            let (kind, _) = detect_forge(&coordinate).await.unwrap();
            assert_eq!(kind, ForgeKind::Github);
        }

        #[tokio::test]
        async fn bitbucket_org_needs_no_probe() {
            let coordinate = parse_git_url("https://bitbucket.org/owner/repo").unwrap();
            let (kind, _) = detect_forge(&coordinate).await.unwrap();
            assert_eq!(kind, ForgeKind::Bitbucket);
        }

        #[tokio::test]
        async fn azure_splits_the_coordinate() {
            let coordinate =
                parse_git_url("https://dev.azure.com/org/proj/_git/r").unwrap();
            let (kind, transformed) = detect_forge(&coordinate).await.unwrap();
            assert_eq!(kind, ForgeKind::Azure);
            assert_eq!(transformed.owner, "org");
            assert_eq!(transformed.project.as_deref(), Some("proj"));
            assert_eq!(transformed.repo.as_deref(), Some("r"));
        }
    }

    mod construction {
        use super::*;

        #[test]
        fn every_kind_constructs() {
            for kind in ForgeKind::all() {
                let url = if *kind == ForgeKind::Azure {
                    "https://dev.azure.com/org/proj/_git/r"
                } else {
                    "https://host.example.com/owner/repo"
                };
                let coordinate = parse_git_url(url).unwrap();
                let forge = forge_for_kind(*kind, coordinate).unwrap();
                assert_eq!(forge.kind(), *kind);
            }
        }
    }

    #[test]
    fn nonempty_json_detection() {
        let response = |body: &str| KernelResponse {
            status: reqwest::StatusCode::OK,
            headers: reqwest::header::HeaderMap::new(),
            body: body.as_bytes().to_vec(),
        };
        assert!(is_nonempty_json(&response(r#"[{"id": 1}]"#)));
        assert!(is_nonempty_json(&response(r#"{"version": "1.0"}"#)));
        assert!(!is_nonempty_json(&response("[]")));
        assert!(!is_nonempty_json(&response("{}")));
        assert!(!is_nonempty_json(&response("not json")));
        assert!(!is_nonempty_json(&response("")));
    }
}
