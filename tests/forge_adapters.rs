//! Wire-level adapter tests against a mock HTTP server.
//!
//! The GitHub adapter runs in its enterprise configuration (the API base
//! derives from the coordinate's host), GitLab/Gitea derive their bases the
//! same way, and Bitbucket takes an explicit base override.

use gitu::core::coordinate::parse_git_url;
use gitu::core::types::{Credentials, PullRequestStatus};
use gitu::error::ForgeError;
use gitu::forge::bitbucket::BitbucketForge;
use gitu::forge::gitea::GiteaForge;
use gitu::forge::github::GithubForge;
use gitu::forge::gitlab::GitlabForge;
use gitu::forge::{CreatePullRequestOpts, CreateWebhookOpts, Forge, MergeOpts};
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn coordinate(server: &MockServer) -> gitu::core::coordinate::RepoCoordinate {
    parse_git_url(&format!("{}/o/r", server.uri()))
        .unwrap()
        .with_credentials(&Credentials::new("tester", "token"))
}

mod github {
    use super::*;

    #[tokio::test]
    async fn merge_405_with_review_text_is_blocked() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/v3/repos/o/r/pulls/7/merge"))
            .respond_with(ResponseTemplate::new(405).set_body_string(
                r#"{"message": "At least 1 approving review is required by reviewers with write access."}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let forge = GithubForge::enterprise(coordinate(&server)).unwrap();
        let result = forge.merge_pull_request(7, MergeOpts::default()).await;
        assert!(matches!(
            result,
            Err(ForgeError::MergeBlockedForPullRequest { number: 7 })
        ));
    }

    #[tokio::test]
    async fn merge_405_base_moved_is_a_conflict_and_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/v3/repos/o/r/pulls/7/merge"))
            .respond_with(
                ResponseTemplate::new(405)
                    .set_body_string(r#"{"message": "Base branch was modified"}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let forge = GithubForge::enterprise(coordinate(&server)).unwrap();
        let result = forge.merge_pull_request(7, MergeOpts::default()).await;
        match result {
            Err(e) => {
                assert!(matches!(e, ForgeError::MergeConflict { number: 7 }));
                assert!(e.is_merge_transient());
            }
            Ok(m) => panic!("expected conflict, got {}", m),
        }
    }

    #[tokio::test]
    async fn merge_success_returns_the_server_message() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/v3/repos/o/r/pulls/8/merge"))
            .and(body_string_contains("merge_method"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"sha": "6dcb09b", "merged": true, "message": "Pull Request successfully merged"}"#,
            ))
            .mount(&server)
            .await;

        let forge = GithubForge::enterprise(coordinate(&server)).unwrap();
        let message = forge
            .merge_pull_request(8, MergeOpts::default())
            .await
            .unwrap();
        assert_eq!(message, "Pull Request successfully merged");
    }

    #[tokio::test]
    async fn pull_request_status_maps_over_the_wire() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/repos/o/r/pulls/3"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{
                    "number": 3,
                    "state": "open",
                    "merged": false,
                    "mergeable_state": "dirty",
                    "head": {"ref": "feat"},
                    "base": {"ref": "main"}
                }"#,
            ))
            .mount(&server)
            .await;

        let forge = GithubForge::enterprise(coordinate(&server)).unwrap();
        let pr = forge.pull_request(3).await.unwrap();
        assert_eq!(pr.status, PullRequestStatus::Conflicts);
        assert_eq!(pr.source_branch, "feat");
        assert_eq!(pr.has_conflicts, Some(true));
    }

    #[tokio::test]
    async fn create_pull_request_maps_no_commits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v3/repos/o/r/pulls"))
            .respond_with(ResponseTemplate::new(422).set_body_string(
                r#"{"message": "Validation Failed: No commits between main and feat"}"#,
            ))
            .mount(&server)
            .await;

        let forge = GithubForge::enterprise(coordinate(&server)).unwrap();
        let result = forge
            .create_pull_request(CreatePullRequestOpts::new("t", "feat", "main"))
            .await;
        assert!(matches!(
            result,
            Err(ForgeError::NoCommitsForPullRequest { .. })
        ));
    }

    #[tokio::test]
    async fn missing_repo_maps_to_repo_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/repos/o/r"))
            .respond_with(ResponseTemplate::new(404).set_body_string(r#"{"message": "Not Found"}"#))
            .mount(&server)
            .await;

        let forge = GithubForge::enterprise(coordinate(&server)).unwrap();
        assert!(matches!(
            forge.repo_info().await,
            Err(ForgeError::RepoNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn duplicate_webhook_maps_to_already_exists() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v3/repos/o/r/hooks"))
            .respond_with(ResponseTemplate::new(422).set_body_string(
                r#"{"message": "Validation Failed: Hook already exists on this repository"}"#,
            ))
            .mount(&server)
            .await;

        let forge = GithubForge::enterprise(coordinate(&server)).unwrap();
        let result = forge
            .create_webhook(CreateWebhookOpts::for_url("https://ci/hook"))
            .await;
        assert!(matches!(
            result,
            Err(ForgeError::WebhookAlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn bad_credentials_map_from_401() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/repos/o/r/pulls/1"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_string(r#"{"message": "Bad credentials"}"#),
            )
            .mount(&server)
            .await;

        let forge = GithubForge::enterprise(coordinate(&server)).unwrap();
        assert!(matches!(
            forge.pull_request(1).await,
            Err(ForgeError::BadCredentials { .. })
        ));
    }
}

mod gitlab {
    use super::*;

    #[tokio::test]
    async fn merge_waits_for_the_mergeability_check_to_settle() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/o%2Fr/merge_requests/5"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"iid": 5, "state": "opened", "source_branch": "feat",
                    "target_branch": "main", "merge_status": "checking"}"#,
            ))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/o%2Fr/merge_requests/5"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"iid": 5, "state": "opened", "source_branch": "feat",
                    "target_branch": "main", "merge_status": "can_be_merged"}"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/v4/projects/o%2Fr/merge_requests/5/merge"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"iid": 5, "state": "merged", "source_branch": "feat",
                    "target_branch": "main", "merged_at": "2024-01-01T00:00:00Z",
                    "merge_commit_sha": "abc123"}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let forge = GitlabForge::new(coordinate(&server)).unwrap();
        let message = forge
            .merge_pull_request(5, MergeOpts::default())
            .await
            .unwrap();
        assert_eq!(message, "abc123");
    }

    #[tokio::test]
    async fn cannot_be_merged_fails_before_the_merge_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/o%2Fr/merge_requests/6"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"iid": 6, "state": "opened", "source_branch": "feat",
                    "target_branch": "main", "merge_status": "cannot_be_merged"}"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/v4/projects/o%2Fr/merge_requests/6/merge"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let forge = GitlabForge::new(coordinate(&server)).unwrap();
        assert!(matches!(
            forge.merge_pull_request(6, MergeOpts::default()).await,
            Err(ForgeError::MergeConflict { number: 6 })
        ));
    }

    #[tokio::test]
    async fn empty_group_search_maps_to_group_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/groups"))
            .and(query_param("search", "o"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .mount(&server)
            .await;

        let forge = GitlabForge::new(coordinate(&server)).unwrap();
        assert!(matches!(
            forge.list_repos().await,
            Err(ForgeError::GroupNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn squash_merge_sets_the_squash_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/o%2Fr/merge_requests/7"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"iid": 7, "state": "opened", "source_branch": "feat",
                    "target_branch": "main", "merge_status": "can_be_merged"}"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/v4/projects/o%2Fr/merge_requests/7/merge"))
            .and(body_string_contains("\"squash\":true"))
            .and(body_string_contains("squash_commit_message"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"iid": 7, "state": "merged", "source_branch": "feat",
                    "target_branch": "main", "merged_at": "2024-01-01T00:00:00Z"}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let forge = GitlabForge::new(coordinate(&server)).unwrap();
        let mut opts = MergeOpts::with_method(gitu::core::types::MergeMethod::Squash);
        opts.commit_message = Some("squashed".into());
        forge.merge_pull_request(7, opts).await.unwrap();
    }
}

mod gitea {
    use super::*;

    #[tokio::test]
    async fn merge_500_with_conflict_body_is_a_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/repos/o/r/pulls/2/merge"))
            .respond_with(ResponseTemplate::new(500).set_body_string(
                r#"{"message": "Automatic merge failed: please fix conflicts and then try again"}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let forge = GiteaForge::new(coordinate(&server)).unwrap();
        assert!(matches!(
            forge.merge_pull_request(2, MergeOpts::default()).await,
            Err(ForgeError::MergeConflict { number: 2 })
        ));
    }

    #[tokio::test]
    async fn open_unmergeable_pull_is_conflicted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/repos/o/r/pulls/4"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"number": 4, "state": "open", "mergeable": false, "merged": false,
                    "head": {"ref": "feat"}, "base": {"ref": "main"}}"#,
            ))
            .mount(&server)
            .await;

        let forge = GiteaForge::new(coordinate(&server)).unwrap();
        let pr = forge.pull_request(4).await.unwrap();
        assert_eq!(pr.status, PullRequestStatus::Conflicts);
    }
}

mod bitbucket {
    use super::*;

    #[tokio::test]
    async fn merge_conflict_body_is_detected_literally() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repositories/o/r/pullrequests/9/merge"))
            .respond_with(ResponseTemplate::new(400).set_body_string(
                r#"{"error": {"message": "You can't merge until you resolve all merge conflicts."}}"#,
            ))
            .mount(&server)
            .await;

        let forge =
            BitbucketForge::with_api_base(coordinate(&server), server.uri()).unwrap();
        assert!(matches!(
            forge.merge_pull_request(9, MergeOpts::default()).await,
            Err(ForgeError::MergeConflict { number: 9 })
        ));
    }

    #[tokio::test]
    async fn merge_sends_the_mapped_strategy() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repositories/o/r/pullrequests/10/merge"))
            .and(body_string_contains("fast_forward"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"id": 10, "state": "MERGED",
                    "source": {"branch": {"name": "feat"}},
                    "destination": {"branch": {"name": "main"}}}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let forge =
            BitbucketForge::with_api_base(coordinate(&server), server.uri()).unwrap();
        forge
            .merge_pull_request(
                10,
                MergeOpts::with_method(gitu::core::types::MergeMethod::Rebase),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn pull_request_states_map_over_the_wire() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repositories/o/r/pullrequests/11"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"id": 11, "state": "SUPERSEDED",
                    "source": {"branch": {"name": "feat"}},
                    "destination": {"branch": {"name": "main"}}}"#,
            ))
            .mount(&server)
            .await;

        let forge =
            BitbucketForge::with_api_base(coordinate(&server), server.uri()).unwrap();
        let pr = forge.pull_request(11).await.unwrap();
        assert_eq!(pr.status, PullRequestStatus::Abandoned);
    }
}
