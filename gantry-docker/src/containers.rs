//! Container lifecycle operations

use std::collections::HashMap;
use std::time::Duration;

use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::models::{ContainerSummary, HostConfig, RestartPolicy, RestartPolicyNameEnum};
use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use tracing::{info, warn};

use gantry_core::domain::worker::{ContainerStatus, RuntimeWorker, WorkerSpec};

use crate::error::Result;
use crate::{DockerRuntime, CREATED_AT_LABEL, WORKER_NAME_LABEL};

/// Mount point of the runner's work tree inside the container
const WORK_TREE: &str = "/actions-runner/_work";

/// Work directory relative to the runner's home, as the image expects it
const WORK_DIR: &str = "_work";

const DOCKER_SOCK: &str = "/var/run/docker.sock";

impl DockerRuntime {
    /// Creates and starts one worker container.
    ///
    /// The container runs privileged (the worker image hosts its own Docker
    /// engine), joins the dedicated bridge network, keeps its work tree on
    /// an anonymous volume, and restarts unless stopped. The environment
    /// carries everything the image's startup script needs to register.
    pub async fn create_worker(&self, spec: &WorkerSpec) -> Result<RuntimeWorker> {
        let container_name = self.container_name(&spec.worker_name);
        let created_at = Utc::now();
        let labels = self.owned_labels(&spec.worker_name, &created_at.to_rfc3339());

        let mut env: Vec<String> = vec![
            format!("REPO_URL={}", spec.scope_url),
            format!("RUNNER_TOKEN={}", spec.registration_token),
            format!("RUNNER_NAME={}", spec.worker_name),
            format!("RUNNER_WORKDIR={}", WORK_DIR),
            format!("RUNNER_LABELS={}", spec.labels.join(",")),
        ];
        for (key, value) in &spec.env {
            env.push(format!("{key}={value}"));
        }

        let host_config = HostConfig {
            privileged: Some(true),
            network_mode: Some(spec.network.clone()),
            binds: Some(vec![format!("{DOCKER_SOCK}:{DOCKER_SOCK}")]),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
                maximum_retry_count: None,
            }),
            memory: spec.limits.memory_bytes,
            nano_cpus: spec.limits.nano_cpus,
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(env),
            labels: Some(labels.clone()),
            volumes: Some(HashMap::from([(WORK_TREE.to_string(), HashMap::new())])),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: container_name.clone(),
            platform: None,
        };

        let created = self.docker.create_container(Some(options), config).await?;

        if let Err(e) = self
            .docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
        {
            let _ = self
                .docker
                .remove_container(
                    &created.id,
                    Some(RemoveContainerOptions {
                        force: true,
                        v: true,
                        ..Default::default()
                    }),
                )
                .await;
            return Err(e.into());
        }

        info!(
            container = %container_name,
            worker = %spec.worker_name,
            image = %spec.image,
            "worker container started"
        );

        Ok(RuntimeWorker {
            container_id: created.id,
            container_name,
            status: ContainerStatus::Running,
            worker_name: spec.worker_name.clone(),
            image: spec.image.clone(),
            created_at,
            labels,
        })
    }

    /// Lists this controller's containers in any state.
    pub async fn list_workers(&self) -> Result<Vec<RuntimeWorker>> {
        let options = ListContainersOptions::<String> {
            all: true,
            filters: self.managed_filter(),
            ..Default::default()
        };

        let summaries = self.docker.list_containers(Some(options)).await?;

        Ok(summaries
            .into_iter()
            .filter_map(|s| self.worker_from_summary(s))
            .collect())
    }

    /// SIGTERM with the given grace, then SIGKILL. The worker image's
    /// shutdown hook deregisters from GitHub within the grace window.
    pub async fn stop_worker(&self, container_id: &str, grace: Duration) -> Result<()> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };

        match self.docker.stop_container(container_id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let err = crate::RuntimeError::from(e);
                if err.is_not_found() {
                    warn!(container = container_id, "container already gone on stop");
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Removes a container and its anonymous volumes. Already-removed
    /// containers count as success.
    pub async fn remove_worker(&self, container_id: &str, force: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            v: true,
            ..Default::default()
        };

        match self
            .docker
            .remove_container(container_id, Some(options))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                let err = crate::RuntimeError::from(e);
                if err.is_not_found() {
                    warn!(container = container_id, "container already gone on remove");
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Removes managed containers in terminal states, with their volumes.
    pub async fn reap_dead(&self) -> Result<usize> {
        let mut filters = self.managed_filter();
        filters.insert(
            "status".to_string(),
            vec!["exited".to_string(), "dead".to_string()],
        );

        let summaries = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters,
                ..Default::default()
            }))
            .await?;

        let mut removed = 0;
        for worker in summaries
            .into_iter()
            .filter_map(|s| self.worker_from_summary(s))
        {
            match self.remove_worker(&worker.container_id, true).await {
                Ok(()) => {
                    removed += 1;
                    info!(
                        container = %worker.container_name,
                        state = %worker.status,
                        "removed dead container"
                    );
                }
                Err(e) => warn!(
                    container = %worker.container_name,
                    error = %e,
                    "failed to remove dead container"
                ),
            }
        }

        Ok(removed)
    }

    /// Fetches the last `tail` log lines of a container, both streams,
    /// with timestamps.
    pub async fn get_logs(&self, container_id: &str, tail: usize) -> Result<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            timestamps: true,
            tail: tail.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.logs(container_id, Some(options));
        let mut collected = String::new();

        while let Some(chunk) = stream.next().await {
            match chunk? {
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    collected.push_str(&String::from_utf8_lossy(&message));
                }
                LogOutput::StdErr { message } => {
                    collected.push_str(&String::from_utf8_lossy(&message));
                }
                LogOutput::StdIn { .. } => {}
            }
        }

        Ok(collected)
    }

    /// Maps a Docker listing entry into the controller's runtime view.
    /// Entries without the name prefix are dropped even if they somehow
    /// carry the label.
    fn worker_from_summary(&self, summary: ContainerSummary) -> Option<RuntimeWorker> {
        let container_id = summary.id?;
        let container_name = summary
            .names
            .as_ref()
            .and_then(|names| names.first())
            .map(|name| name.trim_start_matches('/').to_string())?;

        let prefix = format!("{}-", self.name_prefix);
        if !container_name.starts_with(&prefix) {
            return None;
        }

        let labels = summary.labels.unwrap_or_default();

        let worker_name = labels
            .get(WORKER_NAME_LABEL)
            .cloned()
            .or_else(|| container_name.strip_prefix(&prefix).map(String::from))?;

        let created_at = labels
            .get(CREATED_AT_LABEL)
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|| {
                summary
                    .created
                    .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            })
            .unwrap_or_else(Utc::now);

        let status = summary
            .state
            .as_deref()
            .map(ContainerStatus::parse)
            .unwrap_or(ContainerStatus::Unknown);

        Some(RuntimeWorker {
            container_id,
            container_name,
            status,
            worker_name,
            image: summary.image.unwrap_or_else(|| "unknown".to_string()),
            created_at,
            labels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MANAGED_BY_LABEL;

    fn runtime() -> DockerRuntime {
        DockerRuntime::new("/var/run/docker.sock", "gantry", "github-runner").unwrap()
    }

    fn summary(name: &str, state: &str) -> ContainerSummary {
        ContainerSummary {
            id: Some("abc123".to_string()),
            names: Some(vec![format!("/{name}")]),
            image: Some("ghcr.io/acme/runner:latest".to_string()),
            state: Some(state.to_string()),
            created: Some(1_700_000_000),
            labels: Some(HashMap::from([
                (MANAGED_BY_LABEL.to_string(), "gantry".to_string()),
                (
                    WORKER_NAME_LABEL.to_string(),
                    "orchestrated-ab12cd34".to_string(),
                ),
            ])),
            ..Default::default()
        }
    }

    #[test]
    fn summary_maps_into_runtime_worker() {
        let rt = runtime();
        let worker = rt
            .worker_from_summary(summary("github-runner-orchestrated-ab12cd34", "running"))
            .unwrap();

        assert_eq!(worker.container_id, "abc123");
        assert_eq!(worker.worker_name, "orchestrated-ab12cd34");
        assert_eq!(worker.status, ContainerStatus::Running);
        assert!(worker.status.is_active());
        assert_eq!(worker.created_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn summary_without_prefix_is_dropped() {
        let rt = runtime();
        assert!(rt
            .worker_from_summary(summary("someone-elses-container", "running"))
            .is_none());
    }

    #[test]
    fn worker_name_falls_back_to_container_name() {
        let rt = runtime();
        let mut s = summary("github-runner-orchestrated-99fe44aa", "exited");
        s.labels = Some(HashMap::new());

        let worker = rt.worker_from_summary(s).unwrap();
        assert_eq!(worker.worker_name, "orchestrated-99fe44aa");
        assert!(worker.status.is_terminal());
    }

    #[test]
    fn created_at_label_wins_over_docker_timestamp() {
        let rt = runtime();
        let mut s = summary("github-runner-orchestrated-ab12cd34", "running");
        s.labels
            .as_mut()
            .unwrap()
            .insert(CREATED_AT_LABEL.to_string(), "2026-01-15T10:00:00Z".to_string());

        let worker = rt.worker_from_summary(s).unwrap();
        assert_eq!(worker.created_at.to_rfc3339(), "2026-01-15T10:00:00+00:00");
    }
}
