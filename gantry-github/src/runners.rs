//! Runner registration endpoints

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use gantry_core::domain::worker::{RegistrationToken, RegistryStatus, RegistryWorker};

use crate::error::Result;
use crate::GithubClient;

#[derive(Debug, Deserialize)]
struct RunnersPage {
    #[serde(default)]
    runners: Vec<ApiRunner>,
}

#[derive(Debug, Deserialize)]
struct ApiRunner {
    id: i64,
    name: String,
    status: String,
    busy: bool,
    #[serde(default)]
    labels: Vec<ApiRunnerLabel>,
}

#[derive(Debug, Deserialize)]
struct ApiRunnerLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiRegistrationToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl From<ApiRunner> for RegistryWorker {
    fn from(runner: ApiRunner) -> Self {
        let status = match runner.status.as_str() {
            "online" => RegistryStatus::Online,
            _ => RegistryStatus::Offline,
        };

        RegistryWorker {
            id: runner.id,
            name: runner.name,
            status,
            busy: runner.busy,
            labels: runner.labels.into_iter().map(|l| l.name).collect(),
        }
    }
}

impl GithubClient {
    /// Lists every registration in the scope, foreign runners included.
    pub async fn list_all_workers(&self) -> Result<Vec<RegistryWorker>> {
        let url = self.runners_url();

        let page: RunnersPage = self
            .with_retry("list runners", || {
                let request = self.client.get(&url).query(&[("per_page", "100")]);
                async move {
                    let response = request.send().await?;
                    GithubClient::handle_response(response).await
                }
            })
            .await?;

        Ok(page.runners.into_iter().map(RegistryWorker::from).collect())
    }

    /// Lists registrations whose name carries the identity prefix. This is
    /// the only view scaling and reconciliation decisions see.
    pub async fn list_workers(&self) -> Result<Vec<RegistryWorker>> {
        let prefix = self.runner_prefix().to_string();
        let mut workers = self.list_all_workers().await?;
        workers.retain(|w| w.name.starts_with(&prefix));
        Ok(workers)
    }

    /// Obtains a short-lived registration token for a fresh worker.
    pub async fn fetch_registration_token(&self) -> Result<RegistrationToken> {
        let url = self.registration_token_url();

        let token: ApiRegistrationToken = self
            .with_retry("fetch registration token", || {
                let request = self.client.post(&url);
                async move {
                    let response = request.send().await?;
                    GithubClient::handle_response(response).await
                }
            })
            .await?;

        Ok(RegistrationToken {
            token: token.token,
            expires_at: token.expires_at,
        })
    }

    /// Deletes a registration. An already-gone registration is success.
    pub async fn delete_worker(&self, id: i64) -> Result<()> {
        let url = format!("{}/{}", self.runners_url(), id);

        let result = self
            .with_retry("delete runner", || {
                let request = self.client.delete(&url);
                async move {
                    let response = request.send().await?;
                    if response.status().is_success() {
                        Ok(())
                    } else {
                        Err(GithubClient::error_from_response(response).await)
                    }
                }
            })
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                warn!(runner_id = id, "runner already gone, treating as deleted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Scope;
    use serde_json::json;

    fn client(server: &mockito::Server, scope: Scope) -> GithubClient {
        GithubClient::with_base_url(server.url(), "t0ken", scope, "orchestrated").unwrap()
    }

    fn runners_body() -> serde_json::Value {
        json!({
            "total_count": 3,
            "runners": [
                {
                    "id": 11,
                    "name": "orchestrated-ab12cd34",
                    "status": "online",
                    "busy": false,
                    "labels": [{"name": "self-hosted"}, {"name": "docker-dind"}]
                },
                {
                    "id": 12,
                    "name": "orchestrated-ef56ab78",
                    "status": "offline",
                    "busy": false,
                    "labels": []
                },
                {
                    "id": 13,
                    "name": "other-foo",
                    "status": "online",
                    "busy": true,
                    "labels": []
                }
            ]
        })
    }

    #[tokio::test]
    async fn list_workers_filters_by_prefix() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/repos/acme/widgets/actions/runners")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(runners_body().to_string())
            .create_async()
            .await;

        let client = client(&server, Scope::Repo("acme/widgets".to_string()));
        let workers = client.list_workers().await.unwrap();

        mock.assert_async().await;
        assert_eq!(workers.len(), 2);
        assert!(workers.iter().all(|w| w.name.starts_with("orchestrated-")));
        assert_eq!(workers[0].status, RegistryStatus::Online);
        assert!(workers[0].labels.contains("docker-dind"));
    }

    #[tokio::test]
    async fn list_all_workers_keeps_foreign_runners() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/orgs/acme/actions/runners")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(runners_body().to_string())
            .create_async()
            .await;

        let client = client(&server, Scope::Org("acme".to_string()));
        let workers = client.list_all_workers().await.unwrap();

        assert_eq!(workers.len(), 3);
        assert!(workers.iter().any(|w| w.name == "other-foo"));
    }

    #[tokio::test]
    async fn registration_token_round_trip() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "POST",
                "/repos/acme/widgets/actions/runners/registration-token",
            )
            .with_status(201)
            .with_body(
                json!({
                    "token": "AABBCC",
                    "expires_at": "2026-08-02T12:13:35.000Z"
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = client(&server, Scope::Repo("acme/widgets".to_string()));
        let token = client.fetch_registration_token().await.unwrap();

        assert_eq!(token.token, "AABBCC");
        assert!(token.expires_at > DateTime::<Utc>::MIN_UTC);
    }

    #[tokio::test]
    async fn delete_is_idempotent_on_missing_runner() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("DELETE", "/repos/acme/widgets/actions/runners/42")
            .with_status(404)
            .create_async()
            .await;

        let client = client(&server, Scope::Repo("acme/widgets".to_string()));
        client.delete_worker(42).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn transient_failures_are_retried_to_exhaustion() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/repos/acme/widgets/actions/runners")
            .match_query(mockito::Matcher::Any)
            .with_status(502)
            .expect(3)
            .create_async()
            .await;

        let client = client(&server, Scope::Repo("acme/widgets".to_string()));
        let err = client.list_all_workers().await.unwrap_err();

        mock.assert_async().await;
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn auth_failures_are_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/repos/acme/widgets/actions/runners")
            .match_query(mockito::Matcher::Any)
            .with_status(401)
            .with_body(json!({"message": "Bad credentials"}).to_string())
            .expect(1)
            .create_async()
            .await;

        let client = client(&server, Scope::Repo("acme/widgets".to_string()));
        let err = client.list_all_workers().await.unwrap_err();

        mock.assert_async().await;
        assert!(err.is_auth());
    }
}
