//! Controller state
//!
//! In-memory, single-writer state. There is no persistence: the remote
//! registry and the container runtime are the source of truth, and a
//! restarted controller rebuilds this index by adoption.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use gantry_core::domain::scaling::ScaleAction;
use gantry_core::domain::worker::ContainerStatus;

/// Consecutive failed scaling attempts that latch the circuit breaker.
pub const CIRCUIT_BREAKER_THRESHOLD: u32 = 5;

/// A worker the controller has launched or adopted.
#[derive(Debug, Clone)]
pub struct TrackedWorker {
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub last_state: ContainerStatus,
}

/// Counters exposed on the status surface.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    pub total_created: u64,
    pub total_destroyed: u64,
    pub current_queue_length: Option<u32>,
    pub last_scale_action: Option<ScaleAction>,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub failed_scale_attempts: u32,
    pub circuit_breaker_active: bool,
    pub ignored_existing: u64,
}

/// The controller's mutable state, guarded by one mutex.
#[derive(Debug, Default)]
pub struct ControllerState {
    /// Index of workers this controller launched or adopted, by worker name
    pub workers: HashMap<String, TrackedWorker>,

    pub metrics: Metrics,

    /// When the last queue-driven scale-up completed; enforces the cooldown
    pub last_scale_up_at: Option<DateTime<Utc>>,

    /// Whether the most recent registry call succeeded
    pub registry_healthy: bool,

    /// Whether the most recent runtime call succeeded
    pub runtime_healthy: bool,
}

impl ControllerState {
    pub fn new() -> Self {
        Self {
            registry_healthy: true,
            runtime_healthy: true,
            ..Default::default()
        }
    }

    /// Records a blocked or failed scaling attempt; latches the breaker
    /// once the streak reaches the threshold.
    pub fn note_scale_failure(&mut self) {
        self.metrics.failed_scale_attempts += 1;
        if self.metrics.failed_scale_attempts >= CIRCUIT_BREAKER_THRESHOLD {
            self.metrics.circuit_breaker_active = true;
        }
    }

    /// Records a successful scaling action, ending any failure streak.
    pub fn note_scale_success(&mut self) {
        self.metrics.failed_scale_attempts = 0;
    }

    /// Clears the breaker once capacity has freed up.
    pub fn clear_circuit_breaker(&mut self) {
        self.metrics.circuit_breaker_active = false;
        self.metrics.failed_scale_attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_latches_after_consecutive_failures() {
        let mut state = ControllerState::new();

        for _ in 0..CIRCUIT_BREAKER_THRESHOLD - 1 {
            state.note_scale_failure();
        }
        assert!(!state.metrics.circuit_breaker_active);

        state.note_scale_failure();
        assert!(state.metrics.circuit_breaker_active);
    }

    #[test]
    fn success_resets_the_streak() {
        let mut state = ControllerState::new();

        state.note_scale_failure();
        state.note_scale_failure();
        state.note_scale_success();
        assert_eq!(state.metrics.failed_scale_attempts, 0);

        for _ in 0..CIRCUIT_BREAKER_THRESHOLD - 1 {
            state.note_scale_failure();
        }
        assert!(!state.metrics.circuit_breaker_active);
    }

    #[test]
    fn clearing_the_breaker_resets_everything() {
        let mut state = ControllerState::new();
        for _ in 0..CIRCUIT_BREAKER_THRESHOLD {
            state.note_scale_failure();
        }
        assert!(state.metrics.circuit_breaker_active);

        state.clear_circuit_breaker();
        assert!(!state.metrics.circuit_breaker_active);
        assert_eq!(state.metrics.failed_scale_attempts, 0);
    }
}
