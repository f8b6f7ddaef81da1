//! Status surface DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::scaling::ScaleAction;
use crate::domain::worker::{ContainerStatus, RegistryWorker, RuntimeWorker};

/// Liveness payload for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub running: bool,
}

/// Full controller state for `GET /api/v1/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub controller: ControllerInfo,
    pub workers: WorkerCounts,
    pub queue: QueueInfo,
    pub scaling: ScalingInfo,
    pub settings: SettingsInfo,
    pub degraded: DegradedInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerInfo {
    pub id: String,
    pub running: bool,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerCounts {
    /// Workers in the controller's own index
    pub active: usize,

    /// Containers the runtime currently reports as active
    pub runtime_containers: usize,

    /// Active containers whose registration exists
    pub registered_running: usize,

    /// Active containers the registry has not seen
    pub unregistered_running: usize,

    pub total_created: u64,
    pub total_destroyed: u64,

    /// Matching workers adopted rather than created by this controller
    pub ignored_existing: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueInfo {
    /// `null` when the scope exposes no queue signal
    pub current_length: Option<u32>,
    pub last_poll: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingInfo {
    pub min_runners: u32,
    pub max_runners: u32,
    pub scale_up_threshold: u32,
    pub scale_down_threshold: u32,
    pub last_action: Option<ScaleAction>,
    pub failed_scale_attempts: u32,
    pub circuit_breaker_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsInfo {
    pub poll_interval_secs: u64,
    pub idle_timeout_secs: u64,
    pub runner_image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradedInfo {
    pub degraded: bool,

    /// Subsystems that failed recently (`registry`, `runtime`)
    pub subsystems: Vec<String>,

    /// Whether queue-driven scaling is possible in the managed scope
    pub queue_signal: bool,
}

/// Joined view for `GET /api/v1/workers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersResponse {
    pub runtime_workers: Vec<RuntimeWorker>,
    pub registry_workers: Vec<RegistryWorker>,
    pub tracked: Vec<TrackedEntry>,
}

/// One entry of the controller's own worker index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedEntry {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub last_state: ContainerStatus,
}

/// Result of a manual scaling trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleResponse {
    pub message: String,
    pub count: u32,
}

/// Proxied container logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsResponse {
    pub container_id: String,
    pub logs: String,
}
