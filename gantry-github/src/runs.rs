//! Workflow run endpoints
//!
//! The runs API only exists at repository scope. At organization scope the
//! queue signal is reported as absent and the policy falls back to
//! utilization-only scaling.

use serde::Deserialize;
use tracing::debug;

use gantry_core::domain::worker::PendingWork;

use crate::error::Result;
use crate::{GithubClient, Scope};

#[derive(Debug, Deserialize)]
struct WorkflowRunsPage {
    total_count: u32,
}

impl GithubClient {
    /// Counts workflow runs that are waiting or executing.
    pub async fn list_pending_work(&self) -> Result<PendingWork> {
        match &self.scope {
            Scope::Org(org) => {
                debug!(org, "runs API unavailable at organization scope");
                Ok(PendingWork {
                    queued: None,
                    in_progress: 0,
                })
            }
            Scope::Repo(_) => {
                let queued = self.count_runs("queued").await?;
                let in_progress = self.count_runs("in_progress").await?;
                Ok(PendingWork {
                    queued: Some(queued),
                    in_progress,
                })
            }
        }
    }

    async fn count_runs(&self, status: &'static str) -> Result<u32> {
        let url = self.runs_url();

        let page: WorkflowRunsPage = self
            .with_retry("count workflow runs", || {
                let request = self
                    .client
                    .get(&url)
                    .query(&[("status", status), ("per_page", "1")]);
                async move {
                    let response = request.send().await?;
                    GithubClient::handle_response(response).await
                }
            })
            .await?;

        Ok(page.total_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn repo_scope_counts_queued_and_in_progress() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/acme/widgets/actions/runs")
            .match_query(mockito::Matcher::UrlEncoded(
                "status".into(),
                "queued".into(),
            ))
            .with_status(200)
            .with_body(json!({"total_count": 4, "workflow_runs": []}).to_string())
            .create_async()
            .await;
        server
            .mock("GET", "/repos/acme/widgets/actions/runs")
            .match_query(mockito::Matcher::UrlEncoded(
                "status".into(),
                "in_progress".into(),
            ))
            .with_status(200)
            .with_body(json!({"total_count": 1, "workflow_runs": []}).to_string())
            .create_async()
            .await;

        let client = GithubClient::with_base_url(
            server.url(),
            "t0ken",
            Scope::Repo("acme/widgets".to_string()),
            "orchestrated",
        )
        .unwrap();

        let pending = client.list_pending_work().await.unwrap();
        assert_eq!(pending.queued, Some(4));
        assert_eq!(pending.in_progress, 1);
        assert_eq!(pending.total(), Some(5));
    }

    #[tokio::test]
    async fn org_scope_reports_no_queue_signal() {
        let server = mockito::Server::new_async().await;

        let client = GithubClient::with_base_url(
            server.url(),
            "t0ken",
            Scope::Org("acme".to_string()),
            "orchestrated",
        )
        .unwrap();

        let pending = client.list_pending_work().await.unwrap();
        assert_eq!(pending.queued, None);
        assert_eq!(pending.total(), None);
    }
}
