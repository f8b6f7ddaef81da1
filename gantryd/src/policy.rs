//! Scaling policy
//!
//! Pure decision functions over point-in-time snapshots. Nothing here
//! performs I/O or reads the clock; the controller passes `now` in and
//! executes whatever comes out. Keeping the policy total makes every
//! scaling rule unit-testable without adapters.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};

use gantry_core::domain::scaling::Decision;
use gantry_core::domain::worker::{PendingWork, RegistryStatus, RegistryWorker, RuntimeWorker};

use crate::config::Config;

/// Most workers one queue-driven scale-up may add.
pub const SCALE_UP_BATCH: u32 = 2;

/// Utilization at or above which one extra worker is launched.
pub const HIGH_UTILIZATION: f64 = 0.80;

/// Utilization at or below which one worker is retired.
pub const LOW_UTILIZATION: f64 = 0.20;

/// Point-in-time inputs for one decision.
#[derive(Debug, Clone, Copy)]
pub struct PolicySnapshot<'a> {
    pub registry: &'a [RegistryWorker],
    pub runtime: &'a [RuntimeWorker],
    pub pending: Option<&'a PendingWork>,
    pub last_scale_up_at: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
}

impl PolicySnapshot<'_> {
    pub fn online(&self) -> usize {
        self.registry
            .iter()
            .filter(|w| w.status == RegistryStatus::Online)
            .count()
    }

    pub fn busy(&self) -> usize {
        self.registry.iter().filter(|w| w.busy).count()
    }

    /// Online workers without a job assigned.
    pub fn available(&self) -> usize {
        self.registry.iter().filter(|w| w.is_available()).count()
    }

    /// Containers counted against the ceiling.
    pub fn runtime_active(&self) -> usize {
        self.runtime
            .iter()
            .filter(|w| w.status.is_active())
            .count()
    }

    /// Active containers still inside the registration grace window that
    /// the registry has not seen yet. Counting these as "coming online"
    /// keeps the floor maintainer from double-provisioning while
    /// registrations are in flight.
    pub fn pending_registration(&self, grace: Duration) -> usize {
        let registered: HashSet<&str> = self.registry.iter().map(|w| w.name.as_str()).collect();

        self.runtime
            .iter()
            .filter(|w| w.status.is_active())
            .filter(|w| !registered.contains(w.worker_name.as_str()))
            .filter(|w| w.age(self.now) < grace)
            .count()
    }

    fn cooled_down(&self, cooldown: Duration) -> bool {
        match self.last_scale_up_at {
            Some(t) => (self.now - t)
                .to_std()
                .map(|elapsed| elapsed >= cooldown)
                .unwrap_or(false),
            None => true,
        }
    }
}

/// Queue-driven decision: compare effective pressure (demand minus idle
/// capacity) against the thresholds. Without a queue signal this policy
/// abstains.
pub fn decide_queue(snap: &PolicySnapshot<'_>, config: &Config) -> Decision {
    let Some(pending) = snap.pending else {
        return Decision::NoOp;
    };
    let Some(queued) = pending.queued else {
        return Decision::NoOp;
    };

    let demand = (queued + pending.in_progress) as i64;
    let pressure = demand - snap.available() as i64;
    let runtime = snap.runtime_active() as u32;

    if pressure >= config.scale_up_threshold as i64 {
        if !snap.cooled_down(config.scale_up_cooldown) {
            return Decision::NoOp;
        }
        // at the ceiling the unclamped wish surfaces; the gate records the denial
        let want = (pressure as u32).min(SCALE_UP_BATCH);
        let batch = if runtime < config.max_runners {
            want.min(config.max_runners - runtime)
        } else {
            want
        };
        Decision::ScaleUp(batch)
    } else if pressure <= config.scale_down_threshold as i64 && runtime > config.min_runners {
        Decision::ScaleDown(1)
    } else {
        Decision::NoOp
    }
}

/// Utilization-driven decision. This is the only scaling signal available
/// at organization scope, where "demand present" falls back to the busy
/// count because the queue cannot be observed.
pub fn decide_util(snap: &PolicySnapshot<'_>, config: &Config) -> Decision {
    let online = snap.online();
    let busy = snap.busy();
    let utilization = busy as f64 / online.max(1) as f64;

    let demand_present = match snap.pending.and_then(|p| p.total()) {
        Some(total) => total > 0,
        None => busy > 0,
    };

    if utilization >= HIGH_UTILIZATION && demand_present {
        Decision::ScaleUp(1)
    } else if utilization <= LOW_UTILIZATION && online as u32 > config.min_runners {
        Decision::ScaleDown(1)
    } else {
        Decision::NoOp
    }
}

/// Floor maintenance: provision whatever is missing to reach the minimum,
/// never past the ceiling. Containers still registering count toward the
/// floor so a fresh fleet is not provisioned twice.
pub fn decide_min(snap: &PolicySnapshot<'_>, config: &Config) -> Decision {
    let covered =
        snap.online() as u32 + snap.pending_registration(config.registration_grace) as u32;

    if covered >= config.min_runners {
        return Decision::NoOp;
    }
    let need = config.min_runners - covered;

    let runtime = snap.runtime_active() as u32;
    let room = config.max_runners.saturating_sub(runtime);
    if room == 0 {
        return Decision::NoOp;
    }

    Decision::Provision(need.min(room))
}

/// Outcome of running a decision through the safety gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gated {
    Allow(Decision),

    /// The decision would push the fleet past the ceiling
    CapacityDenied,

    /// The breaker is latched; provisioning is suspended
    BreakerOpen,
}

/// Final safety check before execution. Scale-downs always pass; any
/// decision that adds workers is re-checked against the ceiling and the
/// circuit breaker.
pub fn gate(
    decision: Decision,
    runtime_active: usize,
    max_runners: u32,
    breaker_active: bool,
) -> Gated {
    let adds = decision.adds();
    if adds == 0 {
        return Gated::Allow(decision);
    }

    if breaker_active {
        return Gated::BreakerOpen;
    }

    if runtime_active as u32 + adds > max_runners {
        return Gated::CapacityDenied;
    }

    Gated::Allow(decision)
}

/// Picks scale-down victims: online-and-idle paired workers, oldest
/// container first. Busy workers are never eligible.
pub fn select_scale_down(snap: &PolicySnapshot<'_>, count: usize) -> Vec<RuntimeWorker> {
    let mut candidates: Vec<&RuntimeWorker> = snap
        .runtime
        .iter()
        .filter(|w| w.status.is_active())
        .filter(|w| {
            snap.registry
                .iter()
                .any(|r| r.name == w.worker_name && r.is_available())
        })
        .collect();

    candidates.sort_by_key(|w| w.created_at);
    candidates.into_iter().take(count).cloned().collect()
}
