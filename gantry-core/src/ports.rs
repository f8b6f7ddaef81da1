//! Adapter ports
//!
//! The controller talks to GitHub and to the container runtime through these
//! traits. Adapters are leaves: they implement a port and know nothing about
//! the controller. Retries live inside the adapters; by the time an error
//! crosses a port it has already been retried and is reduced to the
//! classification below.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::worker::{
    PendingWork, RegistrationToken, RegistryWorker, RuntimeWorker, WorkerSpec,
};

/// Failure classification shared by both adapters.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Retries were exhausted on a failure that may heal on its own
    /// (network, 5xx, rate limit)
    #[error("transient failure: {0}")]
    Transient(String),

    /// Credentials were rejected; retrying cannot help
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// The target entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Anything that indicates a bug or a broken environment
    #[error("{0}")]
    Fatal(String),
}

impl AdapterError {
    pub fn is_auth(&self) -> bool {
        matches!(self, AdapterError::Auth(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AdapterError::NotFound(_))
    }
}

/// The remote workflow service's registry of workers.
#[async_trait]
pub trait WorkerRegistry: Send + Sync {
    /// Registrations in the managed scope whose name carries the identity
    /// prefix.
    async fn list_workers(&self) -> Result<Vec<RegistryWorker>, AdapterError>;

    /// Every registration in the scope, foreign ones included. Used only
    /// for visibility; foreign workers are never acted on.
    async fn list_all_workers(&self) -> Result<Vec<RegistryWorker>, AdapterError>;

    /// Obtains a short-lived token a fresh worker uses to register.
    async fn fetch_registration_token(&self) -> Result<RegistrationToken, AdapterError>;

    /// Removes a registration. Already-gone registrations count as success.
    async fn delete_worker(&self, id: i64) -> Result<(), AdapterError>;

    /// Counts of queued and in-progress workflow units.
    async fn list_pending_work(&self) -> Result<PendingWork, AdapterError>;

    /// The URL fresh workers register against.
    fn registration_url(&self) -> String;
}

/// The local container runtime hosting worker containers.
#[async_trait]
pub trait WorkerRuntime: Send + Sync {
    /// Creates and starts one worker container.
    async fn create_worker(&self, spec: &WorkerSpec) -> Result<RuntimeWorker, AdapterError>;

    /// Containers carrying this controller's `managed-by` label and name
    /// prefix, in any state.
    async fn list_workers(&self) -> Result<Vec<RuntimeWorker>, AdapterError>;

    /// SIGTERM with the given grace, then SIGKILL.
    async fn stop_worker(&self, container_id: &str, grace: Duration) -> Result<(), AdapterError>;

    /// Removes a container and its anonymous volumes.
    async fn remove_worker(&self, container_id: &str, force: bool) -> Result<(), AdapterError>;

    /// Removes managed containers in terminal states, with their volumes.
    /// Returns how many were removed.
    async fn reap_dead(&self) -> Result<usize, AdapterError>;

    /// The last `tail` log lines of a container, both streams.
    async fn get_logs(&self, container_id: &str, tail: usize) -> Result<String, AdapterError>;

    /// Idempotently creates the dedicated bridge network.
    async fn ensure_network(&self, name: &str) -> Result<(), AdapterError>;
}
