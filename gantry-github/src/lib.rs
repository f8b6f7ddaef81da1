//! Gantry GitHub Client
//!
//! A typed client for the slice of the GitHub Actions API the controller
//! needs: self-hosted runner registrations, registration tokens, and
//! workflow-run counts.
//!
//! Every operation retries transient failures (network errors, 5xx, rate
//! limits) up to three attempts with exponential backoff, honoring
//! `Retry-After` when GitHub sends one. Authentication failures are never
//! retried; they surface immediately so the controller can pause scaling.
//!
//! # Example
//!
//! ```no_run
//! use gantry_github::{GithubClient, Scope};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), gantry_github::ClientError> {
//!     let client = GithubClient::new(
//!         "ghp_token",
//!         Scope::Repo("acme/widgets".to_string()),
//!         "orchestrated",
//!     )?;
//!
//!     let workers = client.list_workers().await?;
//!     println!("{} managed runners registered", workers.len());
//!     Ok(())
//! }
//! ```

pub mod error;
mod runners;
mod runs;

pub use error::{ClientError, Result};

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use gantry_core::domain::worker::{PendingWork, RegistrationToken, RegistryWorker};
use gantry_core::ports::{AdapterError, WorkerRegistry};

const API_BASE_URL: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1_000;
const MAX_BACKOFF_MS: u64 = 8_000;

/// The scope a controller manages: one repository or a whole organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Organization name
    Org(String),

    /// Repository in `owner/repo` form
    Repo(String),
}

impl Scope {
    /// API path segment for this scope (`orgs/{org}` or `repos/{owner}/{repo}`).
    pub fn api_path(&self) -> String {
        match self {
            Scope::Org(org) => format!("orgs/{org}"),
            Scope::Repo(repo) => format!("repos/{repo}"),
        }
    }

    /// The URL fresh workers register against.
    pub fn html_url(&self) -> String {
        match self {
            Scope::Org(org) => format!("https://github.com/{org}"),
            Scope::Repo(repo) => format!("https://github.com/{repo}"),
        }
    }

    /// Whether the scope exposes a workflow queue signal. The runs API only
    /// exists at repository scope.
    pub fn has_queue_signal(&self) -> bool {
        matches!(self, Scope::Repo(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Scope::Org(_) => "organization",
            Scope::Repo(_) => "repository",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Org(org) => write!(f, "org {org}"),
            Scope::Repo(repo) => write!(f, "repo {repo}"),
        }
    }
}

/// HTTP client for GitHub's self-hosted runner API
///
/// The client is scoped to one organization or repository and filters
/// runner listings to the configured identity prefix.
#[derive(Debug, Clone)]
pub struct GithubClient {
    base_url: String,
    scope: Scope,
    runner_prefix: String,
    client: Client,
}

impl GithubClient {
    /// Creates a client against api.github.com.
    pub fn new(token: &str, scope: Scope, runner_prefix: impl Into<String>) -> Result<Self> {
        Self::with_base_url(API_BASE_URL, token, scope, runner_prefix)
    }

    /// Creates a client against a custom API base URL (used by tests).
    pub fn with_base_url(
        base_url: impl Into<String>,
        token: &str,
        scope: Scope,
        runner_prefix: impl Into<String>,
    ) -> Result<Self> {
        let base_url = base_url.into();

        let mut auth = HeaderValue::from_str(&format!("token {token}"))
            .map_err(|_| ClientError::Configuration("token contains invalid bytes".into()))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, auth);
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/vnd.github.v3+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static(API_VERSION),
        );

        let client = Client::builder()
            .user_agent(concat!("gantry-controller/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            scope,
            runner_prefix: runner_prefix.into(),
            client,
        })
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn runner_prefix(&self) -> &str {
        &self.runner_prefix
    }

    pub(crate) fn runners_url(&self) -> String {
        format!("{}/{}/actions/runners", self.base_url, self.scope.api_path())
    }

    pub(crate) fn registration_token_url(&self) -> String {
        format!("{}/registration-token", self.runners_url())
    }

    pub(crate) fn runs_url(&self) -> String {
        format!("{}/{}/actions/runs", self.base_url, self.scope.api_path())
    }

    /// Validates the token and its permissions against the configured scope.
    ///
    /// Both flows start with `GET /user` (token validity) and the scope's
    /// root resource (visibility), then mint a registration token, which is
    /// the authoritative check for runner administration. At repository
    /// scope the runner-list read is informative only: some fine-grained
    /// tokens can mint registration tokens yet still 403 on the listing.
    pub async fn validate(&self) -> Result<()> {
        self.probe(Method::GET, &format!("{}/user", self.base_url))
            .await?;

        let scope_url = format!("{}/{}", self.base_url, self.scope.api_path());
        self.probe(Method::GET, &scope_url).await?;

        match &self.scope {
            Scope::Org(_) => {
                self.probe(Method::GET, &self.runners_url()).await?;
                self.probe(Method::POST, &self.registration_token_url())
                    .await?;
            }
            Scope::Repo(_) => {
                self.probe(Method::POST, &self.registration_token_url())
                    .await?;
                if let Err(e) = self.probe(Method::GET, &self.runners_url()).await {
                    warn!(
                        error = %e,
                        "runner list not readable with this token, continuing"
                    );
                }
            }
        }

        debug!(scope = %self.scope, "token validation successful");
        Ok(())
    }

    async fn probe(&self, method: Method, url: &str) -> Result<()> {
        let response = self.client.request(method, url).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        Ok(())
    }

    // =========================================================================
    // Response handling
    // =========================================================================

    /// Checks the status code and deserializes the body, or classifies the
    /// failure.
    pub(crate) async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("invalid JSON response: {e}")))
    }

    pub(crate) async fn error_from_response(response: reqwest::Response) -> ClientError {
        let status = response.status().as_u16();

        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        // GitHub signals primary rate limits as 403 with a drained quota
        let quota_drained = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            == Some("0");

        if status == 429 || (status == 403 && quota_drained) {
            return ClientError::RateLimited { retry_after };
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        ClientError::from_status(status, message)
    }

    // =========================================================================
    // Retry
    // =========================================================================

    /// Runs `call` up to three times, backing off exponentially between
    /// transient failures and honoring a server-requested delay.
    pub(crate) async fn with_retry<T, F, Fut>(&self, what: &'static str, call: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            attempt += 1;

            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < MAX_ATTEMPTS && e.is_transient() => {
                    let delay = e
                        .retry_after()
                        .map(Duration::from_secs)
                        .unwrap_or(Duration::from_millis(backoff_ms));

                    warn!(
                        operation = what,
                        attempt,
                        max_attempts = MAX_ATTEMPTS,
                        error = %e,
                        "transient GitHub failure, retrying in {:?}",
                        delay
                    );

                    tokio::time::sleep(delay).await;
                    backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl WorkerRegistry for GithubClient {
    async fn list_workers(&self) -> std::result::Result<Vec<RegistryWorker>, AdapterError> {
        Ok(GithubClient::list_workers(self).await?)
    }

    async fn list_all_workers(&self) -> std::result::Result<Vec<RegistryWorker>, AdapterError> {
        Ok(GithubClient::list_all_workers(self).await?)
    }

    async fn fetch_registration_token(
        &self,
    ) -> std::result::Result<RegistrationToken, AdapterError> {
        Ok(GithubClient::fetch_registration_token(self).await?)
    }

    async fn delete_worker(&self, id: i64) -> std::result::Result<(), AdapterError> {
        Ok(GithubClient::delete_worker(self, id).await?)
    }

    async fn list_pending_work(&self) -> std::result::Result<PendingWork, AdapterError> {
        Ok(GithubClient::list_pending_work(self).await?)
    }

    fn registration_url(&self) -> String {
        self.scope.html_url()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_trims_trailing_slash() {
        let client = GithubClient::with_base_url(
            "http://localhost:8080/",
            "t0ken",
            Scope::Repo("acme/widgets".to_string()),
            "orchestrated",
        )
        .unwrap();
        assert_eq!(client.runner_prefix(), "orchestrated");
        assert_eq!(
            client.runners_url(),
            "http://localhost:8080/repos/acme/widgets/actions/runners"
        );
    }

    #[test]
    fn scope_urls() {
        let org = Scope::Org("acme".to_string());
        assert_eq!(org.api_path(), "orgs/acme");
        assert_eq!(org.html_url(), "https://github.com/acme");
        assert!(!org.has_queue_signal());

        let repo = Scope::Repo("acme/widgets".to_string());
        assert_eq!(repo.api_path(), "repos/acme/widgets");
        assert_eq!(repo.html_url(), "https://github.com/acme/widgets");
        assert!(repo.has_queue_signal());
    }
}
