//! Scaling decision model
//!
//! Decisions are plain values produced by pure policy functions and executed
//! by the controller; nothing here performs I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Launch workers in response to demand
    ScaleUp(u32),

    /// Retire idle workers
    ScaleDown(u32),

    /// Launch workers to restore the configured floor
    Provision(u32),

    NoOp,
}

impl Decision {
    /// Number of workers this decision would add.
    pub fn adds(&self) -> u32 {
        match self {
            Decision::ScaleUp(n) | Decision::Provision(n) => *n,
            _ => 0,
        }
    }

    /// Number of workers this decision would remove.
    pub fn removes(&self) -> u32 {
        match self {
            Decision::ScaleDown(n) => *n,
            _ => 0,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Decision::NoOp)
            || matches!(
                self,
                Decision::ScaleUp(0) | Decision::ScaleDown(0) | Decision::Provision(0)
            )
    }
}

/// A scaling action the controller carried out, kept for the status surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleAction {
    pub kind: ScaleActionKind,
    pub count: u32,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleActionKind {
    Provision,
    ScaleUp,
    ScaleDown,
}

impl std::fmt::Display for ScaleActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScaleActionKind::Provision => write!(f, "provision"),
            ScaleActionKind::ScaleUp => write!(f, "scale_up"),
            ScaleActionKind::ScaleDown => write!(f, "scale_down"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_accounting() {
        assert_eq!(Decision::ScaleUp(2).adds(), 2);
        assert_eq!(Decision::Provision(3).adds(), 3);
        assert_eq!(Decision::ScaleDown(1).adds(), 0);
        assert_eq!(Decision::ScaleDown(1).removes(), 1);
        assert!(Decision::NoOp.is_noop());
        assert!(Decision::ScaleUp(0).is_noop());
        assert!(!Decision::Provision(1).is_noop());
    }
}
