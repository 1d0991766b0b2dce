//! Shared error types for progress tracking.
//!
//! There are two distinct failure categories and they deliberately do not
//! share a type:
//!
//! - [`ProgressError`]: protocol violations such as an unpaired `end()`,
//!   advancing a finished tracker, or an empty label list. These indicate a bug in the
//!   calling code and are surfaced immediately, never retried.
//! - [`Cancelled`]: the cooperative-cancellation signal. It unwinds the
//!   tracked operation's call stack via `?` like any error, but consumers
//!   must be able to special-case it (e.g. to avoid logging it as a
//!   failure), so it is its own type rather than a variant callers could
//!   overlook.

use crate::phase::PhaseOutcome;
use thiserror::Error;

/// Cooperative-cancellation signal.
///
/// Raised by a tracker's check points (`set_percent`, `check_cancelled`,
/// `set_allow_cancel(true)`, `sleep`) once a cancel request has been latched
/// and cancellation is allowed. Purely advisory until then: requesting a
/// cancel never interrupts the running thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Protocol violations in the progress-tracking API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgressError {
    /// `begin` was called with no phase labels.
    #[error("cannot begin a tracker with no phases")]
    NoPhases,

    /// A phase label was empty.
    #[error("phase label at index {index} is empty")]
    EmptyPhaseLabel { index: usize },

    /// `advance` was called on a tracker whose phases are all finished.
    #[error("no phase left to {outcome}: tracker already finished")]
    TrackerFinished { outcome: PhaseOutcome },

    /// `end` was called on an empty stack (unpaired with a `begin`).
    #[error("end() called on an empty progress stack")]
    StackEmpty,

    /// The process-wide default phase label was set twice.
    #[error("default phase label is already set")]
    DefaultLabelAlreadySet,

    /// The process-wide default phase label must not be empty.
    #[error("default phase label must not be empty")]
    EmptyDefaultLabel,

    /// Cancellation surfaced through an API that reports protocol errors.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl ProgressError {
    /// Whether this error is the cooperative-cancellation signal.
    ///
    /// Consumers funnelling everything into one error type use this to
    /// avoid treating an intentional abort as a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}
