//! Integration tests for forge detection.
//!
//! Fixed hosts must resolve without any probe traffic; unknown hosts must
//! probe the candidate APIs in order, first identifying answer winning.

use gitu::core::coordinate::{parse_git_url, RepoCoordinate};
use gitu::core::types::{Credentials, ForgeKind};
use gitu::error::ForgeError;
use gitu::forge::detect_forge;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Coordinate pointing at a mock server, with a username for the Gogs probe.
fn coordinate_for(server: &MockServer) -> RepoCoordinate {
    let url = format!("{}/owner/repo", server.uri());
    parse_git_url(&url)
        .unwrap()
        .with_credentials(&Credentials::new("tester", "token"))
}

mod fixed_hosts {
    use super::*;

    #[tokio::test]
    async fn github_com_is_github_without_probing() {
        let coord = parse_git_url("https://github.com/owner/repo").unwrap();
        let (kind, _) = detect_forge(&coord).await.unwrap();
        assert_eq!(kind, ForgeKind::Github);
    }

    #[tokio::test]
    async fn bitbucket_org_is_bitbucket_without_probing() {
        let coord = parse_git_url("https://bitbucket.org/owner/repo").unwrap();
        let (kind, _) = detect_forge(&coord).await.unwrap();
        assert_eq!(kind, ForgeKind::Bitbucket);
    }

    #[tokio::test]
    async fn dev_azure_com_is_azure_and_splits_the_coordinate() {
        let coord = parse_git_url("https://dev.azure.com/org/proj/_git/r").unwrap();
        let (kind, transformed) = detect_forge(&coord).await.unwrap();
        assert_eq!(kind, ForgeKind::Azure);
        assert_eq!(transformed.owner, "org");
        assert_eq!(transformed.project.as_deref(), Some("proj"));
        assert_eq!(transformed.repo.as_deref(), Some("r"));
    }
}

mod probing {
    use super::*;

    #[tokio::test]
    async fn ghe_wins_on_the_version_header_and_stops_probing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("X-GitHub-Enterprise-Version", "3.11.2")
                    .set_body_string("{}"),
            )
            .expect(1)
            .mount(&server)
            .await;
        // Later probes must never fire once GHE identified itself.
        Mock::given(method("GET"))
            .and(path("/api/v4/projects"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/settings/api"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(0)
            .mount(&server)
            .await;

        let (kind, _) = detect_forge(&coordinate_for(&server)).await.unwrap();
        assert_eq!(kind, ForgeKind::Ghe);
    }

    #[tokio::test]
    async fn ghe_header_is_recognized_even_on_unauthorized_responses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3"))
            .respond_with(
                ResponseTemplate::new(401)
                    .insert_header("X-GitHub-Enterprise-Version", "3.11.2"),
            )
            .mount(&server)
            .await;

        let (kind, _) = detect_forge(&coordinate_for(&server)).await.unwrap();
        assert_eq!(kind, ForgeKind::Ghe);
    }

    #[tokio::test]
    async fn gitlab_wins_on_a_nonempty_projects_listing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"[{"id": 1}]"#))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/settings/api"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(0)
            .mount(&server)
            .await;

        let (kind, _) = detect_forge(&coordinate_for(&server)).await.unwrap();
        assert_eq!(kind, ForgeKind::Gitlab);
    }

    #[tokio::test]
    async fn empty_projects_listing_falls_through_to_gitea() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/settings/api"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"default_git_trees_per_page": 1000}"#),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/users/tester"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"id": 1}"#))
            .expect(0)
            .mount(&server)
            .await;

        let (kind, _) = detect_forge(&coordinate_for(&server)).await.unwrap();
        assert_eq!(kind, ForgeKind::Gitea);
    }

    #[tokio::test]
    async fn gogs_is_the_last_probe() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/settings/api"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/users/tester"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"id": 1, "login": "tester"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let (kind, _) = detect_forge(&coordinate_for(&server)).await.unwrap();
        assert_eq!(kind, ForgeKind::Gogs);
    }

    #[tokio::test]
    async fn exhausted_probes_fail_with_invalid_git_url() {
        let server = MockServer::start().await;
        for probe in [
            "/api/v3",
            "/api/v4/projects",
            "/api/v1/settings/api",
            "/api/v1/users/tester",
        ] {
            Mock::given(method("GET"))
                .and(path(probe))
                .respond_with(ResponseTemplate::new(404))
                .expect(1)
                .mount(&server)
                .await;
        }

        let result = detect_forge(&coordinate_for(&server)).await;
        match result {
            Err(ForgeError::InvalidGitUrl { reason }) => {
                assert!(
                    reason.contains("unable to identify git host type"),
                    "unexpected reason: {}",
                    reason
                );
            }
            other => panic!("expected InvalidGitUrl, got {:?}", other.map(|(k, _)| k)),
        }
    }

    #[tokio::test]
    async fn unreachable_host_fails_without_panicking() {
        // Nothing listens on this port; every probe is a transport failure.
        let coord = parse_git_url("http://127.0.0.1:1/owner/repo")
            .unwrap()
            .with_credentials(&Credentials::new("tester", "token"));
        assert!(matches!(
            detect_forge(&coord).await,
            Err(ForgeError::InvalidGitUrl { .. })
        ));
    }
}
