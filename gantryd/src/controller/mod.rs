//! Controller
//!
//! Owns the shared state and serializes every scaling action. One mutex
//! guards the state, and a tick (or manual trigger) holds it across
//! snapshot → decide → execute → update, so two tasks can never both
//! decide to launch workers and collectively exceed the ceiling.
//!
//! The controller never touches anything the identity filters do not
//! claim, and on shutdown it leaves its workers running: a restarted
//! controller re-adopts them from the runtime listing.

pub mod tasks;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use gantry_core::domain::scaling::{Decision, ScaleAction, ScaleActionKind};
use gantry_core::domain::worker::{
    new_identity, PendingWork, RegistryStatus, RegistryWorker, RuntimeWorker, WorkerSpec,
};
use gantry_core::dto::status::{
    ControllerInfo, DegradedInfo, QueueInfo, ScalingInfo, SettingsInfo, StatusResponse,
    TrackedEntry, WorkerCounts, WorkersResponse,
};
use gantry_core::ports::{AdapterError, WorkerRegistry, WorkerRuntime};

use crate::config::Config;
use crate::policy::{self, Gated, PolicySnapshot};
use crate::state::{ControllerState, TrackedWorker};

/// Consecutive creation failures that abort the rest of a tick's batch.
const MAX_CREATION_FAILURES: u32 = 2;

/// Failures surfaced to the manual control endpoints.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("worker {0} is busy")]
    Busy(String),

    #[error("worker {0} not found")]
    WorkerNotFound(String),

    #[error("circuit breaker is active, provisioning is suspended")]
    BreakerOpen,

    #[error("worker ceiling reached")]
    AtCapacity,

    #[error("worker floor reached, nothing to retire")]
    AtFloor,

    #[error("no idle worker eligible for retirement")]
    NoCandidate,

    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

/// The controller instance shared by the periodic tasks and the HTTP
/// surface.
pub struct Controller {
    config: Config,
    registry: Arc<dyn WorkerRegistry>,
    runtime: Arc<dyn WorkerRuntime>,
    state: Mutex<ControllerState>,
    running: AtomicBool,
}

impl Controller {
    pub fn new(
        config: Config,
        registry: Arc<dyn WorkerRegistry>,
        runtime: Arc<dyn WorkerRuntime>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            runtime,
            state: Mutex::new(ControllerState::new()),
            running: AtomicBool::new(true),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn mark_stopped(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    // =========================================================================
    // Periodic task ticks
    // =========================================================================

    /// Queue monitor: poll demand, apply the queue decision, execute.
    pub(crate) async fn queue_tick(&self) -> Result<(), AdapterError> {
        let mut state = self.state.lock().await;
        let (registry, runtime) = self.observe(&mut state).await?;

        let pending = match self.registry.list_pending_work().await {
            Ok(p) => p,
            Err(e) => {
                state.registry_healthy = false;
                return Err(e);
            }
        };

        let now = Utc::now();
        state.metrics.current_queue_length = pending.queued;
        state.metrics.last_poll_at = Some(now);

        self.maybe_reset_breaker(&mut state, &runtime);

        let snap = PolicySnapshot {
            registry: &registry,
            runtime: &runtime,
            pending: Some(&pending),
            last_scale_up_at: state.last_scale_up_at,
            now,
        };

        let decision = policy::decide_queue(&snap, &self.config);

        self.execute(&mut state, decision, &registry, &runtime, "queue-monitor")
            .await;
        Ok(())
    }

    /// Floor maintainer: keep the online count at the configured minimum.
    pub(crate) async fn min_tick(&self) -> Result<(), AdapterError> {
        let mut state = self.state.lock().await;
        let (registry, runtime) = self.observe(&mut state).await?;

        self.maybe_reset_breaker(&mut state, &runtime);

        let snap = PolicySnapshot {
            registry: &registry,
            runtime: &runtime,
            pending: None,
            last_scale_up_at: state.last_scale_up_at,
            now: Utc::now(),
        };

        let decision = policy::decide_min(&snap, &self.config);

        let covered = snap.online() + snap.pending_registration(self.config.registration_grace);
        if decision.adds() + (covered as u32) < self.config.min_runners {
            warn!(
                covered,
                adding = decision.adds(),
                floor = self.config.min_runners,
                "floor cannot be fully restored under the worker ceiling"
            );
        }

        self.execute(&mut state, decision, &registry, &runtime, "min-maintainer")
            .await;
        Ok(())
    }

    /// Runtime manager: refresh the runtime view into the worker index and
    /// drop entries whose container vanished.
    pub(crate) async fn runtime_refresh_tick(&self) -> Result<(), AdapterError> {
        let mut state = self.state.lock().await;

        let runtime = match self.runtime.list_workers().await {
            Ok(v) => {
                state.runtime_healthy = true;
                v
            }
            Err(e) => {
                state.runtime_healthy = false;
                return Err(e);
            }
        };

        self.refresh_tracking(&mut state, &runtime);
        Ok(())
    }

    /// Reconciler: reap orphans on both sides and adopt strays.
    pub(crate) async fn reconcile_tick(&self) -> Result<(), AdapterError> {
        let mut state = self.state.lock().await;
        let (registry, runtime) = self.observe(&mut state).await?;
        let now = Utc::now();

        self.refresh_tracking(&mut state, &runtime);

        let active: Vec<&RuntimeWorker> =
            runtime.iter().filter(|w| w.status.is_active()).collect();
        let active_names: HashSet<&str> = active.iter().map(|w| w.worker_name.as_str()).collect();
        let registered_names: HashSet<&str> =
            registry.iter().map(|w| w.name.as_str()).collect();

        // registrations whose container is gone
        for reg in &registry {
            if active_names.contains(reg.name.as_str()) {
                continue;
            }
            if reg.status == RegistryStatus::Offline && !reg.busy {
                info!(worker = %reg.name, "deleting orphaned registration");
                if let Err(e) = self.registry.delete_worker(reg.id).await {
                    warn!(worker = %reg.name, error = %e, "failed to delete orphaned registration");
                }
            }
        }

        // containers that never managed to register
        for worker in &active {
            if registered_names.contains(worker.worker_name.as_str()) {
                continue;
            }
            let age = worker.age(now);
            if age > self.config.registration_grace {
                warn!(
                    worker = %worker.worker_name,
                    age_secs = age.as_secs(),
                    "removing container that never registered"
                );
                if let Err(e) = self.teardown(&mut state, worker).await {
                    warn!(
                        worker = %worker.worker_name,
                        error = %e,
                        "failed to remove unregistered container"
                    );
                }
            }
        }

        Ok(())
    }

    /// Dead cleaner: sweep terminal containers and their volumes.
    pub(crate) async fn reap_dead_tick(&self) -> Result<(), AdapterError> {
        let mut state = self.state.lock().await;

        let removed = match self.runtime.reap_dead().await {
            Ok(n) => {
                state.runtime_healthy = true;
                n
            }
            Err(e) => {
                state.runtime_healthy = false;
                return Err(e);
            }
        };

        if removed > 0 {
            state.metrics.total_destroyed += removed as u64;
            info!(removed, "cleaned up dead containers");
        }
        Ok(())
    }

    /// Utilization monitor: scale on the busy ratio. This is the only
    /// scaling signal at organization scope.
    pub(crate) async fn utilization_tick(&self) -> Result<(), AdapterError> {
        let mut state = self.state.lock().await;
        let (registry, runtime) = self.observe(&mut state).await?;

        let pending: Option<PendingWork> = match self.registry.list_pending_work().await {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(error = %e, "queue signal unavailable for utilization check");
                None
            }
        };

        self.maybe_reset_breaker(&mut state, &runtime);

        let snap = PolicySnapshot {
            registry: &registry,
            runtime: &runtime,
            pending: pending.as_ref(),
            last_scale_up_at: state.last_scale_up_at,
            now: Utc::now(),
        };

        let decision = policy::decide_util(&snap, &self.config);

        self.execute(
            &mut state,
            decision,
            &registry,
            &runtime,
            "utilization-monitor",
        )
        .await;
        Ok(())
    }

    // =========================================================================
    // Manual control surface
    // =========================================================================

    /// Launches up to one batch of workers, bypassing the cooldown but not
    /// the ceiling or the breaker.
    pub async fn manual_scale_up(&self) -> Result<u32, ControlError> {
        let mut state = self.state.lock().await;
        let (_registry, runtime) = self.observe(&mut state).await?;

        if state.metrics.circuit_breaker_active {
            return Err(ControlError::BreakerOpen);
        }

        let active = runtime.iter().filter(|w| w.status.is_active()).count();
        if active as u32 >= self.config.max_runners {
            return Err(ControlError::AtCapacity);
        }

        let batch = policy::SCALE_UP_BATCH.min(self.config.max_runners - active as u32);
        let created = self.provision_many(&mut state, batch, active).await;

        if created > 0 {
            let now = Utc::now();
            state.last_scale_up_at = Some(now);
            state.metrics.last_scale_action = Some(ScaleAction {
                kind: ScaleActionKind::ScaleUp,
                count: created,
                at: now,
            });
        }

        Ok(created)
    }

    /// Retires the oldest idle worker, refusing at the floor.
    pub async fn manual_scale_down(&self) -> Result<u32, ControlError> {
        let mut state = self.state.lock().await;
        let (registry, runtime) = self.observe(&mut state).await?;

        let active = runtime.iter().filter(|w| w.status.is_active()).count();
        if active as u32 <= self.config.min_runners {
            return Err(ControlError::AtFloor);
        }

        let snap = PolicySnapshot {
            registry: &registry,
            runtime: &runtime,
            pending: None,
            last_scale_up_at: state.last_scale_up_at,
            now: Utc::now(),
        };

        let victims = policy::select_scale_down(&snap, 1);
        let victim = victims.first().ok_or(ControlError::NoCandidate)?;

        self.teardown(&mut state, victim).await?;

        state.metrics.last_scale_action = Some(ScaleAction {
            kind: ScaleActionKind::ScaleDown,
            count: 1,
            at: Utc::now(),
        });

        Ok(1)
    }

    /// Tears down one worker by container id, container name or worker
    /// name. Busy workers are refused.
    pub async fn delete_worker(&self, id: &str) -> Result<(), ControlError> {
        let mut state = self.state.lock().await;
        let (registry, runtime) = self.observe(&mut state).await?;

        let worker = runtime
            .iter()
            .find(|w| w.container_id == id || w.container_name == id || w.worker_name == id)
            .ok_or_else(|| ControlError::WorkerNotFound(id.to_string()))?;

        if registry
            .iter()
            .any(|r| r.name == worker.worker_name && r.busy)
        {
            return Err(ControlError::Busy(worker.worker_name.clone()));
        }

        self.teardown(&mut state, worker).await?;
        Ok(())
    }

    /// Proxies container logs, resolving worker names to containers.
    pub async fn worker_logs(&self, id: &str, tail: usize) -> Result<String, ControlError> {
        let workers = self.runtime.list_workers().await?;

        let target = workers
            .iter()
            .find(|w| w.container_id == id || w.container_name == id || w.worker_name == id)
            .map(|w| w.container_id.clone())
            .unwrap_or_else(|| id.to_string());

        Ok(self.runtime.get_logs(&target, tail).await?)
    }

    // =========================================================================
    // Read-only surface
    // =========================================================================

    /// Snapshot of everything the status endpoint reports. Always answers,
    /// even with both adapters down.
    pub async fn status(&self) -> StatusResponse {
        let (metrics, tracked, registry_healthy, runtime_healthy) = {
            let state = self.state.lock().await;
            (
                state.metrics.clone(),
                state.workers.len(),
                state.registry_healthy,
                state.runtime_healthy,
            )
        };

        let mut subsystems = Vec::new();

        let runtime = match self.runtime.list_workers().await {
            Ok(v) => v,
            Err(_) => {
                subsystems.push("runtime".to_string());
                Vec::new()
            }
        };
        let registry = match self.registry.list_workers().await {
            Ok(v) => v,
            Err(_) => {
                subsystems.push("registry".to_string());
                Vec::new()
            }
        };

        if !registry_healthy && !subsystems.iter().any(|s| s == "registry") {
            subsystems.push("registry".to_string());
        }
        if !runtime_healthy && !subsystems.iter().any(|s| s == "runtime") {
            subsystems.push("runtime".to_string());
        }

        let registered_names: HashSet<&str> =
            registry.iter().map(|w| w.name.as_str()).collect();
        let active: Vec<&RuntimeWorker> =
            runtime.iter().filter(|w| w.status.is_active()).collect();
        let registered_running = active
            .iter()
            .filter(|w| registered_names.contains(w.worker_name.as_str()))
            .count();

        StatusResponse {
            controller: ControllerInfo {
                id: self.config.controller_id.clone(),
                running: self.is_running(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            workers: WorkerCounts {
                active: tracked,
                runtime_containers: active.len(),
                registered_running,
                unregistered_running: active.len() - registered_running,
                total_created: metrics.total_created,
                total_destroyed: metrics.total_destroyed,
                ignored_existing: metrics.ignored_existing,
            },
            queue: QueueInfo {
                current_length: metrics.current_queue_length,
                last_poll: metrics.last_poll_at,
            },
            scaling: ScalingInfo {
                min_runners: self.config.min_runners,
                max_runners: self.config.max_runners,
                scale_up_threshold: self.config.scale_up_threshold,
                scale_down_threshold: self.config.scale_down_threshold,
                last_action: metrics.last_scale_action,
                failed_scale_attempts: metrics.failed_scale_attempts,
                circuit_breaker_active: metrics.circuit_breaker_active,
            },
            settings: SettingsInfo {
                poll_interval_secs: self.config.poll_interval.as_secs(),
                idle_timeout_secs: self.config.idle_timeout.as_secs(),
                runner_image: self.config.runner_image.clone(),
            },
            degraded: DegradedInfo {
                degraded: !subsystems.is_empty(),
                subsystems,
                queue_signal: self.config.scope.has_queue_signal(),
            },
        }
    }

    /// Both views joined, for `GET /api/v1/workers`.
    pub async fn workers_view(&self) -> Result<WorkersResponse, ControlError> {
        let runtime = self.runtime.list_workers().await?;
        let registry = self.registry.list_workers().await?;

        let mut tracked: Vec<TrackedEntry> = {
            let state = self.state.lock().await;
            state
                .workers
                .iter()
                .map(|(name, t)| TrackedEntry {
                    name: name.clone(),
                    created_at: t.created_at,
                    last_seen: t.last_seen,
                    last_state: t.last_state,
                })
                .collect()
        };
        tracked.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(WorkersResponse {
            runtime_workers: runtime,
            registry_workers: registry,
            tracked,
        })
    }

    /// Counters in Prometheus text exposition format.
    pub async fn metrics_text(&self) -> String {
        use std::fmt::Write;

        let state = self.state.lock().await;
        let m = &state.metrics;

        let mut out = String::new();
        let _ = writeln!(out, "# TYPE gantry_runners_active gauge");
        let _ = writeln!(out, "gantry_runners_active {}", state.workers.len());
        let _ = writeln!(out, "# TYPE gantry_runners_created_total counter");
        let _ = writeln!(out, "gantry_runners_created_total {}", m.total_created);
        let _ = writeln!(out, "# TYPE gantry_runners_destroyed_total counter");
        let _ = writeln!(out, "gantry_runners_destroyed_total {}", m.total_destroyed);
        let _ = writeln!(out, "# TYPE gantry_queue_length gauge");
        let _ = writeln!(
            out,
            "gantry_queue_length {}",
            m.current_queue_length.unwrap_or(0)
        );
        let _ = writeln!(out, "# TYPE gantry_failed_scale_attempts gauge");
        let _ = writeln!(
            out,
            "gantry_failed_scale_attempts {}",
            m.failed_scale_attempts
        );
        let _ = writeln!(out, "# TYPE gantry_circuit_breaker_active gauge");
        let _ = writeln!(
            out,
            "gantry_circuit_breaker_active {}",
            u8::from(m.circuit_breaker_active)
        );
        let _ = writeln!(out, "# TYPE gantry_runners_adopted_total counter");
        let _ = writeln!(out, "gantry_runners_adopted_total {}", m.ignored_existing);
        let _ = writeln!(out, "# TYPE gantry_controller_running gauge");
        let _ = writeln!(
            out,
            "gantry_controller_running {}",
            u8::from(self.is_running())
        );
        out
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Fetches both views, tracking per-subsystem health for the degraded
    /// flag.
    async fn observe(
        &self,
        state: &mut ControllerState,
    ) -> Result<(Vec<RegistryWorker>, Vec<RuntimeWorker>), AdapterError> {
        let registry = match self.registry.list_workers().await {
            Ok(v) => {
                state.registry_healthy = true;
                v
            }
            Err(e) => {
                state.registry_healthy = false;
                return Err(e);
            }
        };

        let runtime = match self.runtime.list_workers().await {
            Ok(v) => {
                state.runtime_healthy = true;
                v
            }
            Err(e) => {
                state.runtime_healthy = false;
                return Err(e);
            }
        };

        Ok((registry, runtime))
    }

    /// Clears the breaker once the fleet is back under the ceiling.
    fn maybe_reset_breaker(&self, state: &mut ControllerState, runtime: &[RuntimeWorker]) {
        if !state.metrics.circuit_breaker_active {
            return;
        }

        let active = runtime.iter().filter(|w| w.status.is_active()).count();
        if (active as u32) < self.config.max_runners {
            info!(
                active,
                max = self.config.max_runners,
                "fleet back under the ceiling, clearing circuit breaker"
            );
            state.clear_circuit_breaker();
        }
    }

    /// Runs one gated decision to completion.
    async fn execute(
        &self,
        state: &mut ControllerState,
        decision: Decision,
        registry: &[RegistryWorker],
        runtime: &[RuntimeWorker],
        task: &str,
    ) {
        if decision.is_noop() {
            return;
        }

        let active = runtime.iter().filter(|w| w.status.is_active()).count();

        match policy::gate(
            decision,
            active,
            self.config.max_runners,
            state.metrics.circuit_breaker_active,
        ) {
            Gated::Allow(Decision::ScaleUp(n)) => {
                let created = self.provision_many(state, n, active).await;
                if created > 0 {
                    let now = Utc::now();
                    state.last_scale_up_at = Some(now);
                    state.metrics.last_scale_action = Some(ScaleAction {
                        kind: ScaleActionKind::ScaleUp,
                        count: created,
                        at: now,
                    });
                    info!(task, added = created, "scaled up");
                }
            }
            Gated::Allow(Decision::Provision(n)) => {
                let created = self.provision_many(state, n, active).await;
                if created > 0 {
                    state.metrics.last_scale_action = Some(ScaleAction {
                        kind: ScaleActionKind::Provision,
                        count: created,
                        at: Utc::now(),
                    });
                    info!(task, added = created, "provisioned toward the floor");
                }
            }
            Gated::Allow(Decision::ScaleDown(n)) => {
                let snap = PolicySnapshot {
                    registry,
                    runtime,
                    pending: None,
                    last_scale_up_at: state.last_scale_up_at,
                    now: Utc::now(),
                };
                let victims = policy::select_scale_down(&snap, n as usize);
                if victims.is_empty() {
                    debug!(task, "no idle worker eligible for retirement");
                    return;
                }

                let mut removed = 0;
                for victim in &victims {
                    match self.teardown(state, victim).await {
                        Ok(()) => removed += 1,
                        Err(e) => warn!(
                            task,
                            worker = %victim.worker_name,
                            error = %e,
                            "teardown failed"
                        ),
                    }
                }

                if removed > 0 {
                    state.metrics.last_scale_action = Some(ScaleAction {
                        kind: ScaleActionKind::ScaleDown,
                        count: removed,
                        at: Utc::now(),
                    });
                    info!(task, removed, "scaled down");
                }
            }
            Gated::Allow(Decision::NoOp) => {}
            Gated::CapacityDenied => {
                state.note_scale_failure();
                warn!(
                    task,
                    active,
                    max = self.config.max_runners,
                    failed_attempts = state.metrics.failed_scale_attempts,
                    breaker = state.metrics.circuit_breaker_active,
                    "scaling blocked at the worker ceiling"
                );
            }
            Gated::BreakerOpen => {
                debug!(task, "circuit breaker active, provisioning suspended");
            }
        }
    }

    /// Launches up to `requested` workers, stopping at the ceiling or
    /// after two consecutive failures.
    async fn provision_many(
        &self,
        state: &mut ControllerState,
        requested: u32,
        active_at_snapshot: usize,
    ) -> u32 {
        let mut created = 0u32;
        let mut consecutive_failures = 0u32;

        for _ in 0..requested {
            if active_at_snapshot as u32 + created >= self.config.max_runners {
                state.note_scale_failure();
                warn!("creation halted at the worker ceiling");
                break;
            }

            match self.provision_one().await {
                Ok(worker) => {
                    state.workers.insert(
                        worker.worker_name.clone(),
                        TrackedWorker {
                            created_at: worker.created_at,
                            last_seen: worker.created_at,
                            last_state: worker.status,
                        },
                    );
                    state.metrics.total_created += 1;
                    state.note_scale_success();
                    created += 1;
                    consecutive_failures = 0;
                }
                Err(e) => {
                    state.note_scale_failure();
                    consecutive_failures += 1;
                    error!(error = %e, "failed to create worker");
                    if consecutive_failures >= MAX_CREATION_FAILURES {
                        error!("aborting creation after consecutive failures");
                        break;
                    }
                }
            }
        }

        created
    }

    /// Token fetch, identity, container launch.
    async fn provision_one(&self) -> Result<RuntimeWorker, AdapterError> {
        let token = self.registry.fetch_registration_token().await?;
        let worker_name = new_identity(&self.config.runner_prefix);

        let spec = WorkerSpec {
            worker_name: worker_name.clone(),
            scope_url: self.registry.registration_url(),
            registration_token: token.token,
            labels: self.config.worker_labels(),
            image: self.config.runner_image.clone(),
            network: self.config.runner_network.clone(),
            env: Vec::new(),
            limits: self.config.limits,
        };

        let worker = self.runtime.create_worker(&spec).await?;
        info!(
            worker = %worker.worker_name,
            container = %worker.container_name,
            "launched worker"
        );
        Ok(worker)
    }

    /// Graceful teardown: stop, let the image's shutdown hook deregister,
    /// delete whatever registration lingers, then remove the container and
    /// its volumes.
    async fn teardown(
        &self,
        state: &mut ControllerState,
        worker: &RuntimeWorker,
    ) -> Result<(), AdapterError> {
        info!(
            worker = %worker.worker_name,
            container = %worker.container_name,
            "retiring worker"
        );

        self.runtime
            .stop_worker(&worker.container_id, self.config.stop_grace)
            .await?;

        tokio::time::sleep(self.config.deregistration_wait).await;

        match self.registry.list_workers().await {
            Ok(current) => {
                if let Some(lingering) = current.iter().find(|r| r.name == worker.worker_name) {
                    debug!(worker = %worker.worker_name, "registration lingered after stop, deleting");
                    if let Err(e) = self.registry.delete_worker(lingering.id).await {
                        warn!(
                            worker = %worker.worker_name,
                            error = %e,
                            "failed to delete lingering registration"
                        );
                    }
                }
            }
            Err(e) => warn!(error = %e, "could not confirm deregistration"),
        }

        self.runtime.remove_worker(&worker.container_id, true).await?;

        state.workers.remove(&worker.worker_name);
        state.metrics.total_destroyed += 1;
        Ok(())
    }

    /// Adopts matching containers the index does not know and drops
    /// entries whose container vanished.
    fn refresh_tracking(&self, state: &mut ControllerState, runtime: &[RuntimeWorker]) {
        let now = Utc::now();
        let mut seen: HashSet<&str> = HashSet::new();

        for worker in runtime {
            seen.insert(worker.worker_name.as_str());
            match state.workers.get_mut(&worker.worker_name) {
                Some(tracked) => {
                    tracked.last_seen = now;
                    tracked.last_state = worker.status;
                }
                None => {
                    info!(
                        worker = %worker.worker_name,
                        container = %worker.container_name,
                        "adopting pre-existing worker"
                    );
                    state.workers.insert(
                        worker.worker_name.clone(),
                        TrackedWorker {
                            created_at: worker.created_at,
                            last_seen: now,
                            last_state: worker.status,
                        },
                    );
                    state.metrics.ignored_existing += 1;
                }
            }
        }

        let vanished: Vec<String> = state
            .workers
            .keys()
            .filter(|name| !seen.contains(name.as_str()))
            .cloned()
            .collect();
        for name in vanished {
            info!(worker = %name, "dropping vanished worker from tracking");
            state.workers.remove(&name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::sync::atomic::AtomicI64;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    use gantry_core::domain::worker::{
        ContainerStatus, PendingWork, RegistrationToken, ResourceLimits,
    };
    use gantry_github::Scope;

    use crate::state::CIRCUIT_BREAKER_THRESHOLD;

    #[derive(Default)]
    struct FakeRegistry {
        runners: StdMutex<Vec<RegistryWorker>>,
        pending: StdMutex<PendingWork>,
        deleted: StdMutex<Vec<i64>>,
        next_id: AtomicI64,
    }

    impl FakeRegistry {
        fn insert(&self, name: &str, status: RegistryStatus, busy: bool) -> i64 {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            self.runners.lock().unwrap().push(RegistryWorker {
                id,
                name: name.to_string(),
                status,
                busy,
                labels: Default::default(),
            });
            id
        }

        fn set_pending(&self, queued: Option<u32>, in_progress: u32) {
            *self.pending.lock().unwrap() = PendingWork {
                queued,
                in_progress,
            };
        }

        fn set_status(&self, name: &str, status: RegistryStatus) {
            for runner in self.runners.lock().unwrap().iter_mut() {
                if runner.name == name {
                    runner.status = status;
                }
            }
        }

        fn deleted_ids(&self) -> Vec<i64> {
            self.deleted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WorkerRegistry for FakeRegistry {
        async fn list_workers(&self) -> Result<Vec<RegistryWorker>, AdapterError> {
            Ok(self
                .runners
                .lock()
                .unwrap()
                .iter()
                .filter(|w| w.name.starts_with("orchestrated"))
                .cloned()
                .collect())
        }

        async fn list_all_workers(&self) -> Result<Vec<RegistryWorker>, AdapterError> {
            Ok(self.runners.lock().unwrap().clone())
        }

        async fn fetch_registration_token(&self) -> Result<RegistrationToken, AdapterError> {
            Ok(RegistrationToken {
                token: "reg-token".to_string(),
                expires_at: Utc::now() + ChronoDuration::hours(1),
            })
        }

        async fn delete_worker(&self, id: i64) -> Result<(), AdapterError> {
            self.runners.lock().unwrap().retain(|w| w.id != id);
            self.deleted.lock().unwrap().push(id);
            Ok(())
        }

        async fn list_pending_work(&self) -> Result<PendingWork, AdapterError> {
            Ok(*self.pending.lock().unwrap())
        }

        fn registration_url(&self) -> String {
            "https://github.com/acme/widgets".to_string()
        }
    }

    #[derive(Default)]
    struct FakeRuntime {
        containers: StdMutex<Vec<RuntimeWorker>>,
        fail_creates: AtomicBool,
    }

    impl FakeRuntime {
        fn insert(&self, name: &str, status: ContainerStatus, age_secs: i64) {
            self.containers.lock().unwrap().push(RuntimeWorker {
                container_id: format!("id-{name}"),
                container_name: format!("github-runner-{name}"),
                status,
                worker_name: name.to_string(),
                image: "runner:latest".to_string(),
                created_at: Utc::now() - ChronoDuration::seconds(age_secs),
                labels: HashMap::new(),
            });
        }

        fn names(&self) -> Vec<String> {
            self.containers
                .lock()
                .unwrap()
                .iter()
                .map(|c| c.worker_name.clone())
                .collect()
        }

        fn active_count(&self) -> usize {
            self.containers
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.status.is_active())
                .count()
        }

        fn kill(&self, name: &str) {
            self.containers
                .lock()
                .unwrap()
                .retain(|c| c.worker_name != name);
        }
    }

    #[async_trait]
    impl WorkerRuntime for FakeRuntime {
        async fn create_worker(&self, spec: &WorkerSpec) -> Result<RuntimeWorker, AdapterError> {
            if self.fail_creates.load(Ordering::SeqCst) {
                return Err(AdapterError::Transient("docker unavailable".to_string()));
            }

            let worker = RuntimeWorker {
                container_id: format!("id-{}", spec.worker_name),
                container_name: format!("github-runner-{}", spec.worker_name),
                status: ContainerStatus::Running,
                worker_name: spec.worker_name.clone(),
                image: spec.image.clone(),
                created_at: Utc::now(),
                labels: HashMap::new(),
            };
            self.containers.lock().unwrap().push(worker.clone());
            Ok(worker)
        }

        async fn list_workers(&self) -> Result<Vec<RuntimeWorker>, AdapterError> {
            Ok(self.containers.lock().unwrap().clone())
        }

        async fn stop_worker(
            &self,
            _container_id: &str,
            _grace: Duration,
        ) -> Result<(), AdapterError> {
            Ok(())
        }

        async fn remove_worker(&self, container_id: &str, _force: bool) -> Result<(), AdapterError> {
            self.containers
                .lock()
                .unwrap()
                .retain(|c| c.container_id != container_id);
            Ok(())
        }

        async fn reap_dead(&self) -> Result<usize, AdapterError> {
            let mut containers = self.containers.lock().unwrap();
            let before = containers.len();
            containers.retain(|c| !c.status.is_terminal());
            Ok(before - containers.len())
        }

        async fn get_logs(&self, _container_id: &str, _tail: usize) -> Result<String, AdapterError> {
            Ok("runner log line\n".to_string())
        }

        async fn ensure_network(&self, _name: &str) -> Result<(), AdapterError> {
            Ok(())
        }
    }

    fn test_config() -> Config {
        let mut config = Config::new("t0ken", Scope::Repo("acme/widgets".to_string()));
        config.min_runners = 2;
        config.max_runners = 5;
        config.deregistration_wait = Duration::ZERO;
        config.scale_up_cooldown = Duration::ZERO;
        config.limits = ResourceLimits::default();
        config
    }

    fn setup(config: Config) -> (Arc<Controller>, Arc<FakeRegistry>, Arc<FakeRuntime>) {
        let registry = Arc::new(FakeRegistry::default());
        let runtime = Arc::new(FakeRuntime::default());
        let controller = Controller::new(config, registry.clone(), runtime.clone());
        (controller, registry, runtime)
    }

    async fn metrics_of(controller: &Controller) -> crate::state::Metrics {
        controller.state.lock().await.metrics.clone()
    }

    #[tokio::test]
    async fn an_empty_fleet_is_provisioned_to_the_floor() {
        let (controller, _registry, runtime) = setup(test_config());

        controller.min_tick().await.unwrap();

        assert_eq!(runtime.active_count(), 2);

        let metrics = metrics_of(&controller).await;
        assert_eq!(metrics.total_created, 2);
        let action = metrics.last_scale_action.unwrap();
        assert_eq!(action.kind, ScaleActionKind::Provision);
        assert_eq!(action.count, 2);
    }

    #[tokio::test]
    async fn workers_still_registering_are_not_provisioned_twice() {
        let (controller, _registry, runtime) = setup(test_config());

        controller.min_tick().await.unwrap();
        controller.min_tick().await.unwrap();
        controller.min_tick().await.unwrap();

        assert_eq!(runtime.active_count(), 2);
        assert_eq!(metrics_of(&controller).await.total_created, 2);
    }

    #[tokio::test]
    async fn a_killed_worker_is_replaced() {
        let (controller, registry, runtime) = setup(test_config());

        controller.min_tick().await.unwrap();
        for name in runtime.names() {
            registry.insert(&name, RegistryStatus::Online, false);
        }
        let victim = runtime.names()[0].clone();

        // the container dies outside the controller's control
        runtime.kill(&victim);
        registry.set_status(&victim, RegistryStatus::Offline);

        controller.runtime_refresh_tick().await.unwrap();
        {
            let state = controller.state.lock().await;
            assert!(!state.workers.contains_key(&victim));
        }

        controller.min_tick().await.unwrap();
        assert_eq!(runtime.active_count(), 2);
        assert_eq!(metrics_of(&controller).await.total_created, 3);
    }

    #[tokio::test]
    async fn containers_that_never_register_are_reaped_and_replaced() {
        let (controller, _registry, runtime) = setup(test_config());

        runtime.insert("orchestrated-stuck1", ContainerStatus::Running, 300);
        runtime.insert("orchestrated-stuck2", ContainerStatus::Running, 300);

        controller.reconcile_tick().await.unwrap();
        assert_eq!(runtime.active_count(), 0);
        assert_eq!(metrics_of(&controller).await.total_destroyed, 2);

        controller.min_tick().await.unwrap();
        assert_eq!(runtime.active_count(), 2);
    }

    #[tokio::test]
    async fn restart_adopts_existing_workers_without_creating() {
        let (controller, registry, runtime) = setup(test_config());

        runtime.insert("orchestrated-pre1", ContainerStatus::Running, 3600);
        runtime.insert("orchestrated-pre2", ContainerStatus::Running, 3600);
        registry.insert("orchestrated-pre1", RegistryStatus::Online, false);
        registry.insert("orchestrated-pre2", RegistryStatus::Online, false);

        controller.runtime_refresh_tick().await.unwrap();
        controller.reconcile_tick().await.unwrap();
        controller.min_tick().await.unwrap();

        assert_eq!(runtime.active_count(), 2);

        let metrics = metrics_of(&controller).await;
        assert_eq!(metrics.total_created, 0);
        assert_eq!(metrics.total_destroyed, 0);
        assert_eq!(metrics.ignored_existing, 2);
    }

    #[tokio::test]
    async fn foreign_registrations_are_never_touched() {
        let mut config = test_config();
        config.min_runners = 0;
        let (controller, registry, _runtime) = setup(config);

        // rogue runner without the identity prefix, offline and orphaned
        registry.insert("other-foo", RegistryStatus::Offline, false);

        controller.reconcile_tick().await.unwrap();
        controller.queue_tick().await.unwrap();

        assert!(registry.deleted_ids().is_empty());
        assert_eq!(registry.list_all_workers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn the_ceiling_holds_and_the_breaker_latches() {
        let mut config = test_config();
        config.min_runners = 0;
        config.max_runners = 2;
        let (controller, registry, runtime) = setup(config);

        registry.set_pending(Some(50), 0);

        controller.queue_tick().await.unwrap();
        assert_eq!(runtime.active_count(), 2);

        for expected_failures in 1..=CIRCUIT_BREAKER_THRESHOLD {
            controller.queue_tick().await.unwrap();
            assert_eq!(runtime.active_count(), 2);

            let metrics = metrics_of(&controller).await;
            assert_eq!(metrics.failed_scale_attempts, expected_failures);
        }
        assert!(metrics_of(&controller).await.circuit_breaker_active);

        // latched breaker stops counting and provisioning
        controller.queue_tick().await.unwrap();
        let metrics = metrics_of(&controller).await;
        assert_eq!(metrics.failed_scale_attempts, CIRCUIT_BREAKER_THRESHOLD);
        assert_eq!(runtime.active_count(), 2);

        // capacity frees up: breaker clears and scaling resumes
        let victim = runtime.names()[0].clone();
        runtime.kill(&victim);

        controller.queue_tick().await.unwrap();
        let metrics = metrics_of(&controller).await;
        assert!(!metrics.circuit_breaker_active);
        assert_eq!(runtime.active_count(), 2);
    }

    #[tokio::test]
    async fn busy_workers_cannot_be_deleted() {
        let (controller, registry, runtime) = setup(test_config());

        runtime.insert("orchestrated-busy", ContainerStatus::Running, 600);
        registry.insert("orchestrated-busy", RegistryStatus::Online, true);

        let err = controller.delete_worker("orchestrated-busy").await.unwrap_err();
        assert!(matches!(err, ControlError::Busy(_)));
        assert_eq!(runtime.active_count(), 1);
    }

    #[tokio::test]
    async fn manual_scale_down_retires_the_oldest_idle_worker() {
        let mut config = test_config();
        config.min_runners = 1;
        let (controller, registry, runtime) = setup(config);

        runtime.insert("orchestrated-oldest-busy", ContainerStatus::Running, 7200);
        runtime.insert("orchestrated-old-idle", ContainerStatus::Running, 3600);
        runtime.insert("orchestrated-young-idle", ContainerStatus::Running, 60);
        registry.insert("orchestrated-oldest-busy", RegistryStatus::Online, true);
        registry.insert("orchestrated-old-idle", RegistryStatus::Online, false);
        registry.insert("orchestrated-young-idle", RegistryStatus::Online, false);

        let removed = controller.manual_scale_down().await.unwrap();
        assert_eq!(removed, 1);

        let names = runtime.names();
        assert!(names.contains(&"orchestrated-oldest-busy".to_string()));
        assert!(names.contains(&"orchestrated-young-idle".to_string()));
        assert!(!names.contains(&"orchestrated-old-idle".to_string()));
    }

    #[tokio::test]
    async fn teardown_deletes_a_lingering_registration() {
        let (controller, registry, runtime) = setup(test_config());

        runtime.insert("orchestrated-stale", ContainerStatus::Running, 600);
        let id = registry.insert("orchestrated-stale", RegistryStatus::Online, false);

        controller.delete_worker("orchestrated-stale").await.unwrap();

        assert_eq!(runtime.active_count(), 0);
        assert_eq!(registry.deleted_ids(), vec![id]);
        assert_eq!(metrics_of(&controller).await.total_destroyed, 1);
    }

    #[tokio::test]
    async fn creation_failures_count_toward_the_breaker() {
        let (controller, _registry, runtime) = setup(test_config());
        runtime.fail_creates.store(true, Ordering::SeqCst);

        controller.min_tick().await.unwrap();

        let metrics = metrics_of(&controller).await;
        assert_eq!(metrics.total_created, 0);
        // two consecutive failures abort the batch
        assert_eq!(metrics.failed_scale_attempts, 2);
        assert_eq!(runtime.active_count(), 0);
    }

    #[tokio::test]
    async fn manual_scale_up_respects_the_ceiling() {
        let mut config = test_config();
        config.max_runners = 1;
        config.min_runners = 0;
        let (controller, _registry, runtime) = setup(config);

        let created = controller.manual_scale_up().await.unwrap();
        assert_eq!(created, 1);
        assert_eq!(runtime.active_count(), 1);

        let err = controller.manual_scale_up().await.unwrap_err();
        assert!(matches!(err, ControlError::AtCapacity));
        assert_eq!(runtime.active_count(), 1);
    }
}
