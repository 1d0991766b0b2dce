//! Phase states and label validation.
//!
//! A phase is one labeled, sequential stage of a tracked operation. Exactly
//! one phase per tracker is `Active` while the tracker is unfinished; phases
//! before it are `Completed` or `Skipped`, phases after it are `Pending`.

use crate::error::ProgressError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a single phase.
///
/// Transitions are forward-only: `Pending → Active → {Completed, Skipped}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhaseState {
    /// Phase has not started yet.
    Pending,
    /// Phase is currently executing.
    Active,
    /// Phase finished normally.
    Completed,
    /// Phase was skipped.
    Skipped,
}

impl fmt::Display for PhaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// How a phase ends when the tracker advances past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhaseOutcome {
    /// The phase's work was done.
    Completed,
    /// The phase's work was not needed.
    Skipped,
}

impl PhaseOutcome {
    /// The terminal state this outcome maps to.
    pub fn into_state(self) -> PhaseState {
        match self {
            Self::Completed => PhaseState::Completed,
            Self::Skipped => PhaseState::Skipped,
        }
    }
}

impl fmt::Display for PhaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "complete"),
            Self::Skipped => write!(f, "skip"),
        }
    }
}

/// Validate a phase label list before a tracker is constructed.
///
/// Labels are immutable for the life of a tracker, so validation happens
/// exactly once, at `ProgressStack::begin`.
pub(crate) fn validate_labels(labels: &[String]) -> Result<(), ProgressError> {
    if labels.is_empty() {
        return Err(ProgressError::NoPhases);
    }
    if let Some(index) = labels.iter().position(|l| l.is_empty()) {
        return Err(ProgressError::EmptyPhaseLabel { index });
    }
    Ok(())
}
