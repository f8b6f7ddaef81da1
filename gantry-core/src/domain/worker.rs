//! Worker domain model
//!
//! The controller reconciles two independent views of the same fleet: the
//! GitHub registration (registry side) and the local container (runtime
//! side). Both views are filtered by the identity prefix before they reach
//! any decision logic; an entity without the prefix does not belong to this
//! controller and is never touched.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A runner registration as reported by GitHub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryWorker {
    /// GitHub's numeric runner id, used for deletion
    pub id: i64,

    /// Runner name; starts with the identity prefix for managed workers
    pub name: String,

    /// GitHub's view of whether the runner is connected
    pub status: RegistryStatus,

    /// Whether the runner is currently executing a job
    pub busy: bool,

    /// Labels the runner registered with
    pub labels: BTreeSet<String>,
}

impl RegistryWorker {
    /// An online runner without a job assigned; the only kind the
    /// scale-down selector may pick.
    pub fn is_available(&self) -> bool {
        self.status == RegistryStatus::Online && !self.busy
    }
}

/// GitHub's view of a registered runner's connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryStatus {
    Online,
    Offline,
}

impl std::fmt::Display for RegistryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryStatus::Online => write!(f, "online"),
            RegistryStatus::Offline => write!(f, "offline"),
        }
    }
}

/// A runner container as reported by the container runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeWorker {
    /// Container id assigned by the runtime
    pub container_id: String,

    /// Full container name, including the container-name prefix
    pub container_name: String,

    /// Container state at listing time
    pub status: ContainerStatus,

    /// The worker identity shared with the registry side
    pub worker_name: String,

    /// Image the container was created from
    pub image: String,

    /// When the container was created
    pub created_at: DateTime<Utc>,

    /// Labels set on the container, including `managed-by`
    pub labels: HashMap<String, String>,
}

impl RuntimeWorker {
    /// How long the container has existed. Returns zero when the clock
    /// appears to have gone backwards.
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.created_at).to_std().unwrap_or_default()
    }
}

/// Container state, reduced to the states the controller acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Created,
    Running,
    Restarting,
    Paused,
    Exited,
    Dead,
    Removing,
    Unknown,
}

impl ContainerStatus {
    /// Parses the state string reported by the Docker API.
    pub fn parse(state: &str) -> Self {
        match state {
            "created" => ContainerStatus::Created,
            "running" => ContainerStatus::Running,
            "restarting" => ContainerStatus::Restarting,
            "paused" => ContainerStatus::Paused,
            "exited" => ContainerStatus::Exited,
            "dead" => ContainerStatus::Dead,
            "removing" => ContainerStatus::Removing,
            _ => ContainerStatus::Unknown,
        }
    }

    /// States counted against the worker ceiling.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ContainerStatus::Created | ContainerStatus::Running | ContainerStatus::Restarting
        )
    }

    /// States eligible for dead-container cleanup.
    pub fn is_terminal(self) -> bool {
        matches!(self, ContainerStatus::Exited | ContainerStatus::Dead)
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContainerStatus::Created => "created",
            ContainerStatus::Running => "running",
            ContainerStatus::Restarting => "restarting",
            ContainerStatus::Paused => "paused",
            ContainerStatus::Exited => "exited",
            ContainerStatus::Dead => "dead",
            ContainerStatus::Removing => "removing",
            ContainerStatus::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// A short-lived credential a fresh worker uses exactly once to register.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Counts of workflow units waiting or running in the managed scope.
///
/// `queued` is `None` when the scope does not expose a queue signal
/// (organization scope); the policy then falls back to utilization-only
/// scaling.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PendingWork {
    pub queued: Option<u32>,
    pub in_progress: u32,
}

impl PendingWork {
    /// Total demand, when the queue signal is available.
    pub fn total(&self) -> Option<u32> {
        self.queued.map(|q| q + self.in_progress)
    }
}

/// Everything the runtime adapter needs to launch one worker container.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    /// Worker identity; also used as the registry-side runner name
    pub worker_name: String,

    /// GitHub URL the worker image registers against
    pub scope_url: String,

    /// Fresh registration token
    pub registration_token: String,

    /// Labels the worker registers with
    pub labels: Vec<String>,

    /// Container image
    pub image: String,

    /// Name of the dedicated bridge network
    pub network: String,

    /// Extra environment passed through to the container
    pub env: Vec<(String, String)>,

    /// Optional CPU/memory caps
    pub limits: ResourceLimits,
}

/// Optional container resource caps, in Docker's native units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    pub memory_bytes: Option<i64>,
    pub nano_cpus: Option<i64>,
}

impl ResourceLimits {
    /// Parses human-readable limit strings: memory as `"512Mi"` / `"4Gi"`,
    /// CPU as whole cores (`"2"`) or millicores (`"1500m"`).
    pub fn parse(memory: Option<&str>, cpus: Option<&str>) -> Result<Self, String> {
        let memory_bytes = memory.map(parse_memory).transpose()?;
        let nano_cpus = cpus.map(parse_cpus).transpose()?;
        Ok(Self {
            memory_bytes,
            nano_cpus,
        })
    }
}

fn parse_memory(value: &str) -> Result<i64, String> {
    let value = value.trim();
    if let Some(gib) = value.strip_suffix("Gi") {
        let n: i64 = gib
            .parse()
            .map_err(|_| format!("invalid memory limit: {value}"))?;
        Ok(n * 1024 * 1024 * 1024)
    } else if let Some(mib) = value.strip_suffix("Mi") {
        let n: i64 = mib
            .parse()
            .map_err(|_| format!("invalid memory limit: {value}"))?;
        Ok(n * 1024 * 1024)
    } else {
        value
            .parse()
            .map_err(|_| format!("invalid memory limit: {value}"))
    }
}

fn parse_cpus(value: &str) -> Result<i64, String> {
    let value = value.trim();
    if let Some(millis) = value.strip_suffix('m') {
        let n: i64 = millis
            .parse()
            .map_err(|_| format!("invalid cpu limit: {value}"))?;
        Ok(n * 1_000_000)
    } else {
        let n: i64 = value
            .parse()
            .map_err(|_| format!("invalid cpu limit: {value}"))?;
        Ok(n * 1_000_000_000)
    }
}

/// Generates a fresh worker identity: `{prefix}-{8 hex chars}`.
pub fn new_identity(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &suffix[..8])
}
