//! http
//!
//! The HTTP/retry kernel every forge-bound request passes through.
//!
//! # Responsibilities
//!
//! - Build the per-adapter [`reqwest::Client`]: basic auth or PAT bearer, a
//!   stable `User-Agent`, and optionally a caller-supplied CA bundle that
//!   replaces the built-in system roots.
//! - Apply the retry policy: transport-level failures and a fixed set of
//!   HTTP statuses retry with jittered backoff; GitHub-style secondary
//!   rate limits wait out `Retry-After` (or a randomized fallback) before
//!   retrying.
//! - Compose caller-supplied retry handlers with the defaults; the first
//!   retry-true decision wins.
//!
//! Every retry logs the operation name and remaining attempts at debug
//! level.
//!
//! # Response handling
//!
//! [`HttpKernel::execute`] buffers the response body so the retry loop can
//! classify rate-limit texts; adapters receive a [`KernelResponse`] and map
//! status plus body into the error taxonomy themselves. Responses that are
//! still failing when attempts run out are returned, not turned into
//! errors, so adapters keep full control of the mapping.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Certificate, Client, Method, Request, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::ForgeError;

/// User-Agent header value for all requests.
pub const USER_AGENT_VALUE: &str = "gitu-client";

/// HTTP statuses the kernel treats as transient.
pub const RETRYABLE_STATUSES: &[u16] = &[405, 408, 413, 429, 500, 502, 503, 504, 521, 522, 524];

/// How requests authenticate.
#[derive(Clone)]
pub enum AuthScheme {
    /// No authentication (unauthenticated probes)
    None,
    /// Basic auth with username and token
    Basic {
        /// Username (may be empty for token-only forges)
        username: String,
        /// Password or personal access token
        token: String,
    },
    /// PAT bearer auth (Azure DevOps, GitHub)
    Bearer {
        /// The personal access token
        token: String,
    },
}

impl std::fmt::Debug for AuthScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthScheme::None => write!(f, "None"),
            AuthScheme::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("token", &"***")
                .finish(),
            AuthScheme::Bearer { .. } => {
                f.debug_struct("Bearer").field("token", &"***").finish()
            }
        }
    }
}

/// What a retry handler observes about a failed response.
#[derive(Debug, Clone)]
pub struct RetryObservation {
    /// HTTP status, absent for transport-level failures
    pub status: Option<u16>,
    /// Response body (lossy UTF-8), or the transport error text
    pub body: String,
}

/// A retry handler's decision.
#[derive(Debug, Clone, Default)]
pub struct RetryDecision {
    /// Whether to retry
    pub retry: bool,
    /// Override for the backoff delay
    pub delay: Option<Duration>,
}

/// Caller-supplied retry handler, composed with the kernel defaults.
pub type RetryHandler = Arc<dyn Fn(&RetryObservation) -> RetryDecision + Send + Sync>;

/// The kernel's retry policy.
///
/// Defaults: 10 attempts, `5000 + uniform(0,5000)` ms between attempts, and
/// rate-limit waits of `Retry-After` seconds when the forge names one, else
/// `30 + uniform(0,20)` seconds.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    delay_jitter: Duration,
    rate_limit_delay: Duration,
    rate_limit_jitter: Duration,
    skip_statuses: Vec<u16>,
    custom: Option<RetryHandler>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("skip_statuses", &self.skip_statuses)
            .field("custom", &self.custom.is_some())
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_millis(5000),
            delay_jitter: Duration::from_millis(5000),
            rate_limit_delay: Duration::from_secs(30),
            rate_limit_jitter: Duration::from_secs(20),
            skip_statuses: Vec::new(),
            custom: None,
        }
    }
}

impl RetryPolicy {
    /// The default policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// A single-attempt policy. Used by forge-detection probes, which treat
    /// failure as a negative answer rather than something to wait out.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Override the attempt count.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Override the backoff delays. Tests use this to keep retries fast.
    pub fn with_delays(mut self, base: Duration, jitter: Duration) -> Self {
        self.base_delay = base;
        self.delay_jitter = jitter;
        self.rate_limit_delay = base;
        self.rate_limit_jitter = jitter;
        self
    }

    /// Exempt a status from transport retry.
    ///
    /// Merge endpoints exempt 405: its body carries the mergeability signal
    /// the orchestrator consumes, and retrying it at this layer would mask
    /// that signal.
    pub fn skip_status(mut self, status: u16) -> Self {
        self.skip_statuses.push(status);
        self
    }

    /// Compose a caller-supplied retry handler with the defaults.
    pub fn with_handler(mut self, handler: RetryHandler) -> Self {
        self.custom = Some(handler);
        self
    }

    fn backoff(&self) -> Duration {
        self.base_delay + random_fraction(self.delay_jitter)
    }

    fn rate_limit_backoff(&self) -> Duration {
        self.rate_limit_delay + random_fraction(self.rate_limit_jitter)
    }

    fn retries_status(&self, status: u16) -> bool {
        RETRYABLE_STATUSES.contains(&status) && !self.skip_statuses.contains(&status)
    }
}

fn random_fraction(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max.as_millis() as u64))
}

/// A buffered HTTP response.
#[derive(Debug, Clone)]
pub struct KernelResponse {
    /// Response status
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Buffered response body
    pub body: Vec<u8>,
}

impl KernelResponse {
    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The body as lossy UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ForgeError> {
        serde_json::from_slice(&self.body).map_err(|e| {
            ForgeError::fatal(
                self.status.as_u16(),
                format!("failed to parse response body: {}", e),
            )
        })
    }
}

/// The HTTP kernel: a configured client plus the retry policy.
#[derive(Debug, Clone)]
pub struct HttpKernel {
    client: Client,
    auth: AuthScheme,
    policy: RetryPolicy,
}

impl HttpKernel {
    /// Build a kernel.
    ///
    /// When `ca_cert` is given, the PEM bundle is read once, attached to
    /// the TLS stack, and the built-in system roots are disabled in favor
    /// of the supplied bundle.
    pub fn new(
        auth: AuthScheme,
        ca_cert: Option<&Path>,
        policy: RetryPolicy,
    ) -> Result<Self, ForgeError> {
        let mut builder = Client::builder();

        if let Some(path) = ca_cert {
            let pem = std::fs::read(path).map_err(|e| {
                ForgeError::other(format!("failed to read ca bundle {}: {}", path.display(), e))
            })?;
            let cert = Certificate::from_pem(&pem).map_err(|e| {
                ForgeError::other(format!("invalid ca bundle {}: {}", path.display(), e))
            })?;
            builder = builder
                .add_root_certificate(cert)
                .tls_built_in_root_certs(false);
        }

        let client = builder
            .build()
            .map_err(|e| ForgeError::other(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            client,
            auth,
            policy,
        })
    }

    /// The kernel's retry policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Start a request with auth and User-Agent applied.
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        match &self.auth {
            AuthScheme::None => builder,
            AuthScheme::Basic { username, token } => builder.basic_auth(username, Some(token)),
            AuthScheme::Bearer { token } => builder.bearer_auth(token),
        }
    }

    /// Build and execute a request under the kernel's policy.
    pub async fn send(&self, op: &str, builder: RequestBuilder) -> Result<KernelResponse, ForgeError> {
        let request = builder
            .build()
            .map_err(|e| ForgeError::other(format!("{}: failed to build request: {}", op, e)))?;
        self.execute(op, request).await
    }

    /// Build and execute a request under an overriding policy.
    pub async fn send_with_policy(
        &self,
        op: &str,
        builder: RequestBuilder,
        policy: &RetryPolicy,
    ) -> Result<KernelResponse, ForgeError> {
        let request = builder
            .build()
            .map_err(|e| ForgeError::other(format!("{}: failed to build request: {}", op, e)))?;
        self.execute_with_policy(op, request, policy).await
    }

    /// Execute a request under the kernel's policy.
    pub async fn execute(&self, op: &str, request: Request) -> Result<KernelResponse, ForgeError> {
        let policy = self.policy.clone();
        self.execute_with_policy(op, request, &policy).await
    }

    /// Execute a request, retrying per the supplied policy.
    pub async fn execute_with_policy(
        &self,
        op: &str,
        request: Request,
        policy: &RetryPolicy,
    ) -> Result<KernelResponse, ForgeError> {
        let mut remaining = policy.max_attempts;

        loop {
            remaining -= 1;
            let attempt = request.try_clone().ok_or_else(|| {
                ForgeError::other(format!("{}: request body cannot be replayed", op))
            })?;

            let response = match self.client.execute(attempt).await {
                Ok(response) => response,
                Err(e) => {
                    if remaining == 0 {
                        return Err(ForgeError::Retryable {
                            message: format!("{}: {}", op, e),
                        });
                    }
                    let delay = policy.backoff();
                    debug!(op, remaining, error = %e, delay_ms = delay.as_millis() as u64, "transport error, retrying");
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            let status = response.status();
            let headers = response.headers().clone();
            let body = match response.bytes().await {
                Ok(bytes) => bytes.to_vec(),
                Err(e) => {
                    if remaining == 0 {
                        return Err(ForgeError::Retryable {
                            message: format!("{}: failed to read response body: {}", op, e),
                        });
                    }
                    let delay = policy.backoff();
                    debug!(op, remaining, error = %e, "body read error, retrying");
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            let kernel_response = KernelResponse {
                status,
                headers,
                body,
            };
            if status.is_success() || remaining == 0 {
                return Ok(kernel_response);
            }

            let text = kernel_response.text();

            if status.as_u16() == 403 && is_secondary_rate_limit(&text) {
                let delay = retry_after_seconds(&kernel_response.headers)
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| policy.rate_limit_backoff());
                debug!(op, remaining, delay_s = delay.as_secs(), "secondary rate limit, waiting");
                tokio::time::sleep(delay).await;
                continue;
            }

            if policy.retries_status(status.as_u16()) {
                let delay = policy.backoff();
                debug!(op, remaining, status = status.as_u16(), delay_ms = delay.as_millis() as u64, "retryable status");
                tokio::time::sleep(delay).await;
                continue;
            }

            if let Some(custom) = &policy.custom {
                let decision = custom(&RetryObservation {
                    status: Some(status.as_u16()),
                    body: text,
                });
                if decision.retry {
                    let delay = decision.delay.unwrap_or_else(|| policy.backoff());
                    debug!(op, remaining, status = status.as_u16(), "caller handler requested retry");
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }

            return Ok(kernel_response);
        }
    }
}

/// Whether a 403 body names GitHub's secondary rate limit.
pub fn is_secondary_rate_limit(body: &str) -> bool {
    body.to_lowercase().contains("secondary rate limit")
}

/// Parse a `Retry-After` header, seconds form.
pub fn retry_after_seconds(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Fallback mapping from a failed response into the error taxonomy.
///
/// Adapters call this after their forge-specific patterns have not matched.
pub fn classify_common(status: u16, message: String) -> ForgeError {
    match status {
        401 => ForgeError::BadCredentials { message },
        403 if message.contains("Unauthorized") || message.contains("Bad credentials") => {
            ForgeError::BadCredentials { message }
        }
        403 => ForgeError::InsufficientPermissions { message },
        s if RETRYABLE_STATUSES.contains(&s) => ForgeError::Retryable {
            message: format!("http {}: {}", s, message),
        },
        s => ForgeError::fatal(s, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secondary_rate_limit_match_is_case_insensitive() {
        assert!(is_secondary_rate_limit(
            "You have exceeded a secondary rate limit"
        ));
        assert!(is_secondary_rate_limit("Secondary Rate Limit hit"));
        assert!(!is_secondary_rate_limit("API rate limit exceeded"));
    }

    #[test]
    fn retry_after_parses_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert("Retry-After", HeaderValue::from_static("17"));
        assert_eq!(retry_after_seconds(&headers), Some(17));

        headers.insert("Retry-After", HeaderValue::from_static("bogus"));
        assert_eq!(retry_after_seconds(&headers), None);
    }

    #[test]
    fn policy_status_classification() {
        let policy = RetryPolicy::new();
        for status in RETRYABLE_STATUSES {
            assert!(policy.retries_status(*status), "{} should retry", status);
        }
        assert!(!policy.retries_status(404));
        assert!(!policy.retries_status(403));
        assert!(!policy.retries_status(422));
    }

    #[test]
    fn skip_status_exempts_from_retry() {
        let policy = RetryPolicy::new().skip_status(405);
        assert!(!policy.retries_status(405));
        assert!(policy.retries_status(503));
    }

    #[test]
    fn classify_common_maps_auth_failures() {
        assert!(matches!(
            classify_common(401, "nope".into()),
            ForgeError::BadCredentials { .. }
        ));
        assert!(matches!(
            classify_common(403, "Bad credentials".into()),
            ForgeError::BadCredentials { .. }
        ));
        assert!(matches!(
            classify_common(403, "Must have admin rights to Repository.".into()),
            ForgeError::InsufficientPermissions { .. }
        ));
        assert!(matches!(
            classify_common(503, "overloaded".into()),
            ForgeError::Retryable { .. }
        ));
        assert!(matches!(
            classify_common(404, "Not Found".into()),
            ForgeError::Fatal {
                status: Some(404),
                ..
            }
        ));
    }
}
