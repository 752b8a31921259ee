//! Integration tests for the HTTP retry kernel's classification.

use std::sync::Arc;
use std::time::Duration;

use gitu::error::ForgeError;
use gitu::http::{AuthScheme, HttpKernel, RetryDecision, RetryPolicy};
use reqwest::Method;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A kernel whose backoff is effectively instant so tests stay fast.
fn fast_kernel(policy: RetryPolicy) -> HttpKernel {
    HttpKernel::new(
        AuthScheme::Basic {
            username: "tester".into(),
            token: "token".into(),
        },
        None,
        policy.with_delays(Duration::from_millis(1), Duration::ZERO),
    )
    .unwrap()
}

#[tokio::test]
async fn transient_status_is_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let kernel = fast_kernel(RetryPolicy::new().with_max_attempts(5));
    let url = format!("{}/flaky", server.uri());
    let response = kernel
        .send("flaky", kernel.request(Method::GET, &url))
        .await
        .unwrap();
    assert!(response.is_success());
    assert_eq!(response.text(), "ok");
}

#[tokio::test]
async fn every_status_in_the_retryable_set_triggers_a_retry() {
    for status in [405u16, 408, 413, 429, 500, 502, 503, 504, 521, 522, 524] {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/s"))
            .respond_with(ResponseTemplate::new(status))
            .expect(2)
            .mount(&server)
            .await;

        let kernel = fast_kernel(RetryPolicy::new().with_max_attempts(2));
        let url = format!("{}/s", server.uri());
        let response = kernel
            .send("status", kernel.request(Method::GET, &url))
            .await
            .unwrap();
        assert_eq!(response.status.as_u16(), status);
    }
}

#[tokio::test]
async fn not_found_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let kernel = fast_kernel(RetryPolicy::new().with_max_attempts(5));
    let url = format!("{}/missing", server.uri());
    let response = kernel
        .send("missing", kernel.request(Method::GET, &url))
        .await
        .unwrap();
    assert_eq!(response.status.as_u16(), 404);
}

#[tokio::test]
async fn plain_403_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/forbidden"))
        .respond_with(ResponseTemplate::new(403).set_body_string("Forbidden"))
        .expect(1)
        .mount(&server)
        .await;

    let kernel = fast_kernel(RetryPolicy::new().with_max_attempts(5));
    let url = format!("{}/forbidden", server.uri());
    let response = kernel
        .send("forbidden", kernel.request(Method::GET, &url))
        .await
        .unwrap();
    assert_eq!(response.status.as_u16(), 403);
}

#[tokio::test]
async fn secondary_rate_limit_waits_and_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/limited"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("Retry-After", "0")
                .set_body_string("You have exceeded a secondary rate limit. Please wait."),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/limited"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let kernel = fast_kernel(RetryPolicy::new().with_max_attempts(3));
    let url = format!("{}/limited", server.uri());
    let response = kernel
        .send("limited", kernel.request(Method::GET, &url))
        .await
        .unwrap();
    assert!(response.is_success());
}

#[tokio::test]
async fn transport_errors_surface_as_retryable_after_exhaustion() {
    // Nothing listens on port 1.
    let kernel = fast_kernel(RetryPolicy::new().with_max_attempts(2));
    let result = kernel
        .send(
            "unreachable",
            kernel.request(Method::GET, "http://127.0.0.1:1/"),
        )
        .await;
    assert!(matches!(result, Err(ForgeError::Retryable { .. })));
}

#[tokio::test]
async fn skipped_status_is_returned_immediately() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/merge"))
        .respond_with(ResponseTemplate::new(405).set_body_string("Base branch was modified"))
        .expect(1)
        .mount(&server)
        .await;

    let kernel = fast_kernel(RetryPolicy::new().with_max_attempts(5));
    let policy = kernel.policy().clone().skip_status(405);
    let url = format!("{}/merge", server.uri());
    let response = kernel
        .send_with_policy("merge", kernel.request(Method::GET, &url), &policy)
        .await
        .unwrap();
    assert_eq!(response.status.as_u16(), 405);
    assert!(response.text().contains("Base branch was modified"));
}

mod ca_bundles {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_bundle_fails_construction() {
        let result = HttpKernel::new(
            AuthScheme::None,
            Some(std::path::Path::new("/nonexistent/ca.pem")),
            RetryPolicy::new(),
        );
        assert!(matches!(result, Err(ForgeError::Fatal { .. })));
    }

    #[test]
    fn malformed_bundle_fails_construction() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"this is not a pem bundle").unwrap();

        let result = HttpKernel::new(AuthScheme::None, Some(file.path()), RetryPolicy::new());
        assert!(matches!(result, Err(ForgeError::Fatal { .. })));
    }

    #[test]
    fn no_bundle_builds_fine() {
        assert!(HttpKernel::new(AuthScheme::None, None, RetryPolicy::new()).is_ok());
    }
}

#[tokio::test]
async fn caller_handler_is_composed_with_the_defaults() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/teapot"))
        .respond_with(ResponseTemplate::new(418))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/teapot"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let policy = RetryPolicy::new()
        .with_max_attempts(3)
        .with_handler(Arc::new(|observation| RetryDecision {
            retry: observation.status == Some(418),
            delay: Some(Duration::from_millis(1)),
        }));
    let kernel = fast_kernel(policy);
    let url = format!("{}/teapot", server.uri());
    let response = kernel
        .send("teapot", kernel.request(Method::GET, &url))
        .await
        .unwrap();
    assert!(response.is_success());
}
