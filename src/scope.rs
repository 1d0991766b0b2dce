//! Scope-bound takeover of the active tracker's display.
//!
//! A helper routine that wants to report sub-progress should not need to
//! know whether a real operation is in progress. [`PhaseScope`] borrows the
//! active stack's top tracker when there is one, and otherwise creates a
//! throwaway one-phase stack bound to the thread for its own lifetime.
//! Either way, the prior display state comes back on every exit path,
//! including unwind.
//!
//! The two cases are an explicit tagged variant (`Borrowed` vs `Owned`) so
//! the restore logic is a plain match, not a web of nullable fields.

use crate::binding::{self, BindingGuard};
use crate::error::{Cancelled, ProgressError};
use crate::stack::ProgressStack;
use crate::tracker::{ProgressTracker, SavedDisplay};
use log::warn;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Duration;

static DEFAULT_PHASE_LABEL: OnceCell<String> = OnceCell::new();

/// Set the process-wide phase label used for ephemeral one-phase stacks.
///
/// Settable once, before first use. Fails on an empty label or when the
/// label has already been fixed.
pub fn set_default_phase_label(label: impl Into<String>) -> Result<(), ProgressError> {
    let label = label.into();
    if label.is_empty() {
        return Err(ProgressError::EmptyDefaultLabel);
    }
    DEFAULT_PHASE_LABEL
        .set(label)
        .map_err(|_| ProgressError::DefaultLabelAlreadySet)
}

/// The process-wide default phase label (`"in progress"` unless set).
pub fn default_phase_label() -> &'static str {
    DEFAULT_PHASE_LABEL
        .get()
        .map(String::as_str)
        .unwrap_or("in progress")
}

enum Mode {
    /// Borrowing the active stack's top tracker; restore the captured
    /// display tuple on drop.
    Borrowed {
        tracker: Arc<ProgressTracker>,
        saved: SavedDisplay,
    },
    /// No usable tracker was active; this scope owns an ephemeral
    /// one-phase stack and ends it on drop. The binding guard drops last,
    /// restoring the thread's previous stack.
    Owned {
        stack: Arc<ProgressStack>,
        tracker: Arc<ProgressTracker>,
        _binding: BindingGuard,
    },
}

/// Scoped phase override for helper-routine sub-progress.
///
/// Exposes the same percent/text/cancel surface as a tracker, forwarded to
/// the borrowed or owned one. `!Send`: tied to the constructing thread's
/// binding.
///
/// # Example
///
/// ```rust
/// use phaseline::PhaseScope;
///
/// fn compress_chunks(chunks: usize) -> Result<(), phaseline::Cancelled> {
///     let scope = PhaseScope::new("compressing");
///     scope.set_percent_range(chunks as u32);
///     for _ in 0..chunks {
///         scope.increment_percent()?;
///     }
///     Ok(())
/// }
///
/// compress_chunks(8).unwrap();
/// ```
pub struct PhaseScope {
    // Option so Drop can move the mode out.
    mode: Option<Mode>,
}

impl PhaseScope {
    /// Take over the active tracker's display with `label`.
    ///
    /// Falls back to an ephemeral one-phase stack when the thread's active
    /// stack has no top tracker or its top tracker is already finished.
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        let active = binding::active();
        let mode = match active.top() {
            Some(tracker) if !tracker.is_finished() => {
                let saved = tracker.override_display(&label);
                Mode::Borrowed { tracker, saved }
            }
            _ => {
                let stack = Arc::new(ProgressStack::new());
                let guard = binding::bind(Arc::clone(&stack));
                let tracker = stack
                    .begin([default_phase_label()])
                    .expect("default phase label is never empty");
                tracker.set_text(label);
                Mode::Owned {
                    stack,
                    tracker,
                    _binding: guard,
                }
            }
        };
        Self { mode: Some(mode) }
    }

    /// Whether this scope created its own throwaway stack.
    pub fn is_ephemeral(&self) -> bool {
        matches!(self.mode, Some(Mode::Owned { .. }))
    }

    fn tracker(&self) -> &Arc<ProgressTracker> {
        match self.mode.as_ref() {
            Some(Mode::Borrowed { tracker, .. }) | Some(Mode::Owned { tracker, .. }) => tracker,
            // The mode is only vacated inside drop.
            None => unreachable!("phase scope used after drop"),
        }
    }

    /// See [`ProgressTracker::set_percent_range`].
    pub fn set_percent_range(&self, max: u32) {
        self.tracker().set_percent_range(max);
    }

    /// See [`ProgressTracker::set_percent`].
    pub fn set_percent(&self, value: u32) -> Result<(), Cancelled> {
        self.tracker().set_percent(value)
    }

    /// See [`ProgressTracker::increment_percent`].
    pub fn increment_percent(&self) -> Result<(), Cancelled> {
        self.tracker().increment_percent()
    }

    /// See [`ProgressTracker::set_text`].
    pub fn set_text(&self, text: impl Into<String>) {
        self.tracker().set_text(text);
    }

    /// See [`ProgressTracker::set_allow_cancel`].
    pub fn set_allow_cancel(&self, allow: bool) -> Result<(), Cancelled> {
        self.tracker().set_allow_cancel(allow)
    }

    /// See [`ProgressTracker::request_cancel`].
    pub fn request_cancel(&self) {
        self.tracker().request_cancel();
    }

    /// See [`ProgressTracker::check_cancelled`].
    pub fn check_cancelled(&self) -> Result<(), Cancelled> {
        self.tracker().check_cancelled()
    }

    /// See [`ProgressTracker::sleep`].
    pub fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        self.tracker().sleep(duration)
    }
}

impl Drop for PhaseScope {
    fn drop(&mut self) {
        match self.mode.take() {
            Some(Mode::Borrowed { tracker, saved }) => tracker.restore_display(saved),
            Some(Mode::Owned { stack, .. }) => {
                if let Err(err) = stack.end() {
                    warn!("phase scope drop: {err}");
                }
                // _binding drops here, restoring the previous thread stack.
            }
            None => {}
        }
    }
}
