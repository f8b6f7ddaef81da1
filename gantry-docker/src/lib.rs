//! Gantry Docker Runtime
//!
//! Container-runtime adapter: launches, lists and retires runner containers
//! through the Docker Engine API. Every container it creates carries the
//! `managed-by=<controller-id>` label and the configured container-name
//! prefix; nothing lacking both is ever listed, stopped or removed. The
//! Docker socket is shared with the host, so the label filter is the only
//! thing standing between the controller and containers it does not own.

pub mod error;

mod containers;
mod network;

pub use error::{Result, RuntimeError};

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::{Docker, API_DEFAULT_VERSION};
use gantry_core::domain::worker::{RuntimeWorker, WorkerSpec};
use gantry_core::ports::{AdapterError, WorkerRuntime};

/// Label marking a container as owned by a specific controller instance
pub const MANAGED_BY_LABEL: &str = "managed-by";

/// Label marking the container's role inside the fleet
pub const COMPONENT_LABEL: &str = "component";

/// Label carrying the worker identity shared with the registry side
pub const WORKER_NAME_LABEL: &str = "worker-name";

/// Label carrying the creation timestamp in RFC 3339
pub const CREATED_AT_LABEL: &str = "created-at";

const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Adapter over one Docker daemon
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
    controller_id: String,
    name_prefix: String,
}

impl DockerRuntime {
    /// Connects to the daemon at the given socket path. `unix://` prefixes
    /// are accepted and stripped.
    pub fn new(
        socket: &str,
        controller_id: impl Into<String>,
        name_prefix: impl Into<String>,
    ) -> Result<Self> {
        let path = socket.trim_start_matches("unix://");
        let docker = Docker::connect_with_socket(path, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)?;

        Ok(Self {
            docker,
            controller_id: controller_id.into(),
            name_prefix: name_prefix.into(),
        })
    }

    pub fn controller_id(&self) -> &str {
        &self.controller_id
    }

    /// Full container name for a worker identity.
    pub fn container_name(&self, worker_name: &str) -> String {
        format!("{}-{}", self.name_prefix, worker_name)
    }

    /// Docker list filter selecting only this controller's containers.
    pub(crate) fn managed_filter(&self) -> HashMap<String, Vec<String>> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("{}={}", MANAGED_BY_LABEL, self.controller_id)],
        );
        filters
    }

    pub(crate) fn owned_labels(&self, worker_name: &str, created_at: &str) -> HashMap<String, String> {
        HashMap::from([
            (MANAGED_BY_LABEL.to_string(), self.controller_id.clone()),
            (COMPONENT_LABEL.to_string(), "worker".to_string()),
            (WORKER_NAME_LABEL.to_string(), worker_name.to_string()),
            (CREATED_AT_LABEL.to_string(), created_at.to_string()),
        ])
    }
}

#[async_trait]
impl WorkerRuntime for DockerRuntime {
    async fn create_worker(&self, spec: &WorkerSpec) -> std::result::Result<RuntimeWorker, AdapterError> {
        Ok(DockerRuntime::create_worker(self, spec).await?)
    }

    async fn list_workers(&self) -> std::result::Result<Vec<RuntimeWorker>, AdapterError> {
        Ok(DockerRuntime::list_workers(self).await?)
    }

    async fn stop_worker(
        &self,
        container_id: &str,
        grace: Duration,
    ) -> std::result::Result<(), AdapterError> {
        Ok(DockerRuntime::stop_worker(self, container_id, grace).await?)
    }

    async fn remove_worker(
        &self,
        container_id: &str,
        force: bool,
    ) -> std::result::Result<(), AdapterError> {
        Ok(DockerRuntime::remove_worker(self, container_id, force).await?)
    }

    async fn reap_dead(&self) -> std::result::Result<usize, AdapterError> {
        Ok(DockerRuntime::reap_dead(self).await?)
    }

    async fn get_logs(
        &self,
        container_id: &str,
        tail: usize,
    ) -> std::result::Result<String, AdapterError> {
        Ok(DockerRuntime::get_logs(self, container_id, tail).await?)
    }

    async fn ensure_network(&self, name: &str) -> std::result::Result<(), AdapterError> {
        Ok(DockerRuntime::ensure_network(self, name).await?)
    }
}
