//! The mutable record of one nested operation's progress.
//!
//! A [`ProgressTracker`] owns a fixed, ordered list of phase labels plus the
//! live display state for them: which phase is active, a percent indicator,
//! an optional text override, and the cooperative-cancellation flags. One
//! thread (the one executing the tracked operation) mutates it; any number
//! of other threads may read [`snapshot`](ProgressTracker::snapshot)s and
//! set the cancel flag.
//!
//! # Thread Safety
//!
//! All display fields live behind a single `parking_lot::Mutex`, held only
//! for the duration of one field batch and never across a call into the
//! owning stack or another tracker, so there is no lock ordering to get
//! wrong. Snapshots are taken under one lock acquisition and can never be
//! torn. The cancel-request flag is an `AtomicBool` outside the lock so a
//! remote observer can set it without contending with the worker.
//!
//! # Cancellation
//!
//! Cancellation is cooperative and latched: `request_cancel` only records
//! the request; the next check point made by the owning thread while
//! `allow_cancel` is true raises [`Cancelled`]. A request made while
//! cancellation is disallowed is not lost; it fires the moment
//! `allow_cancel` is re-enabled.
//!
//! # Example
//!
//! ```rust
//! use phaseline::{PhaseOutcome, ProgressStack};
//!
//! let stack = ProgressStack::new();
//! let tracker = stack.begin(["Load", "Process", "Save"]).unwrap();
//!
//! tracker.set_percent_range(10);
//! for _ in 0..10 {
//!     tracker.increment_percent().unwrap();
//! }
//! tracker.advance(PhaseOutcome::Completed).unwrap();
//!
//! assert_eq!(tracker.snapshot().current_phase, 1);
//! stack.end().unwrap();
//! ```

use crate::error::{Cancelled, ProgressError};
use crate::phase::{PhaseOutcome, PhaseState};
use log::trace;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Label shown for a tracker whose phases have all finished.
pub const FINISHED_LABEL: &str = "done";

/// Display state guarded by the tracker's lock.
#[derive(Debug)]
struct TrackerState {
    states: Vec<PhaseState>,
    current_phase: usize,
    percent: u32,
    percent_max: u32,
    text: Option<String>,
    allow_cancel: bool,
}

/// Captured display tuple for scoped takeover and restore.
///
/// Produced by [`ProgressTracker::override_display`] and consumed verbatim
/// by [`ProgressTracker::restore_display`].
#[derive(Debug, Clone)]
pub(crate) struct SavedDisplay {
    pub(crate) text: Option<String>,
    pub(crate) percent: u32,
    pub(crate) percent_max: u32,
    pub(crate) allow_cancel: bool,
}

/// One nested unit of tracked work.
///
/// Created by [`ProgressStack::begin`](crate::stack::ProgressStack::begin),
/// which assigns the `serial` used to distinguish trackers across
/// snapshots. Phase labels are immutable after construction.
#[derive(Debug)]
pub struct ProgressTracker {
    serial: u32,
    labels: Arc<[String]>,
    state: Mutex<TrackerState>,
    cancel_requested: AtomicBool,
}

impl ProgressTracker {
    /// Construct a tracker with phase 0 active.
    ///
    /// Labels must already be validated (non-empty list, no empty label);
    /// `ProgressStack::begin` is the only caller.
    pub(crate) fn new(serial: u32, labels: Vec<String>) -> Self {
        let mut states = vec![PhaseState::Pending; labels.len()];
        states[0] = PhaseState::Active;
        Self {
            serial,
            labels: labels.into(),
            state: Mutex::new(TrackerState {
                states,
                current_phase: 0,
                percent: 0,
                percent_max: 0,
                text: None,
                allow_cancel: false,
            }),
            cancel_requested: AtomicBool::new(false),
        }
    }

    /// Serial id assigned by the owning stack.
    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Number of phases (fixed at construction).
    pub fn phase_count(&self) -> usize {
        self.labels.len()
    }

    /// Whether every phase has been advanced past.
    pub fn is_finished(&self) -> bool {
        self.state.lock().current_phase == self.labels.len()
    }

    /// Set the percent range for the current phase.
    ///
    /// Resets the current percent to 0. A `max` of 0 means "indeterminate
    /// indicator". This is not a cancellation check point.
    pub fn set_percent_range(&self, max: u32) {
        let mut state = self.state.lock();
        state.percent_max = max;
        state.percent = 0;
    }

    /// Set the percent indicator, clamped to the range when one is set.
    ///
    /// This is a cancellation check point: if cancellation is allowed and a
    /// cancel has been requested, returns [`Cancelled`].
    pub fn set_percent(&self, value: u32) -> Result<(), Cancelled> {
        let allow_cancel = {
            let mut state = self.state.lock();
            state.percent = if state.percent_max > 0 {
                value.min(state.percent_max)
            } else {
                value
            };
            state.allow_cancel
        };
        self.check(allow_cancel)
    }

    /// Bump the percent indicator by one. A cancellation check point.
    pub fn increment_percent(&self) -> Result<(), Cancelled> {
        let allow_cancel = {
            let mut state = self.state.lock();
            let next = state.percent.saturating_add(1);
            state.percent = if state.percent_max > 0 {
                next.min(state.percent_max)
            } else {
                next
            };
            state.allow_cancel
        };
        self.check(allow_cancel)
    }

    /// Allow or disallow cooperative cancellation.
    ///
    /// Enabling re-checks the latched cancel flag immediately, so a request
    /// made while cancellation was disallowed is honored on this very call.
    /// Disabling never clears a pending request.
    pub fn set_allow_cancel(&self, allow: bool) -> Result<(), Cancelled> {
        self.state.lock().allow_cancel = allow;
        self.check(allow)
    }

    /// Request cancellation. Callable from any thread.
    ///
    /// Advisory until the owning thread's next check point.
    pub fn request_cancel(&self) {
        trace!("cancel requested on tracker #{}", self.serial);
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    /// Whether a cancel has been requested (latched, regardless of
    /// `allow_cancel`).
    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Explicit cancellation check point.
    pub fn check_cancelled(&self) -> Result<(), Cancelled> {
        let allow_cancel = self.state.lock().allow_cancel;
        self.check(allow_cancel)
    }

    /// Mark the current phase with `outcome` and move to the next one.
    ///
    /// The next phase (if any) becomes `Active` with a clean display:
    /// percent range cleared, text override cleared, cancellation
    /// disallowed. Fails once every phase has been advanced past.
    pub fn advance(&self, outcome: PhaseOutcome) -> Result<(), ProgressError> {
        let mut state = self.state.lock();
        if state.current_phase == self.labels.len() {
            return Err(ProgressError::TrackerFinished { outcome });
        }
        let index = state.current_phase;
        state.states[index] = outcome.into_state();
        state.current_phase += 1;
        if state.current_phase < self.labels.len() {
            let next = state.current_phase;
            state.states[next] = PhaseState::Active;
        }
        state.percent = 0;
        state.percent_max = 0;
        state.text = None;
        state.allow_cancel = false;
        trace!(
            "tracker #{}: phase {} {} ({}/{})",
            self.serial,
            index,
            outcome,
            state.current_phase,
            self.labels.len()
        );
        Ok(())
    }

    /// Override the label shown for the active phase.
    ///
    /// An empty string restores the phase's own label (or the finished
    /// label once all phases are done).
    pub fn set_text(&self, text: impl Into<String>) {
        let text = text.into();
        self.state.lock().text = if text.is_empty() { None } else { Some(text) };
    }

    /// Courtesy cooperative yield for tight loops.
    ///
    /// Checks cancellation, sleeps, then checks again so a cancel arriving
    /// mid-sleep is seen without waiting for the next percent tick.
    pub fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        self.check_cancelled()?;
        std::thread::sleep(duration);
        self.check_cancelled()
    }

    /// Take an immutable, internally consistent copy of the display state.
    ///
    /// Single lock acquisition; a reader can never observe a half-updated
    /// tracker.
    pub fn snapshot(&self) -> TrackerSnapshot {
        let state = self.state.lock();
        let text = resolve_text(&state, &self.labels);
        TrackerSnapshot {
            serial: self.serial,
            labels: self.labels.to_vec(),
            states: state.states.clone(),
            current_phase: state.current_phase,
            percent: state.percent,
            percent_max: state.percent_max,
            text,
            allow_cancel: state.allow_cancel,
            cancel_requested: self.cancel_requested.load(Ordering::SeqCst),
        }
    }

    /// Capture the display tuple and replace it with a scoped takeover, in
    /// one lock acquisition.
    pub(crate) fn override_display(&self, label: &str) -> SavedDisplay {
        let mut state = self.state.lock();
        let saved = SavedDisplay {
            text: state.text.take(),
            percent: state.percent,
            percent_max: state.percent_max,
            allow_cancel: state.allow_cancel,
        };
        state.text = Some(label.to_string());
        state.percent = 0;
        state.percent_max = 0;
        state.allow_cancel = false;
        saved
    }

    /// Restore a display tuple captured by `override_display`, verbatim.
    pub(crate) fn restore_display(&self, saved: SavedDisplay) {
        let mut state = self.state.lock();
        state.text = saved.text;
        state.percent = saved.percent;
        state.percent_max = saved.percent_max;
        state.allow_cancel = saved.allow_cancel;
    }

    fn check(&self, allow_cancel: bool) -> Result<(), Cancelled> {
        if allow_cancel && self.cancel_requested.load(Ordering::SeqCst) {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Immutable copy of a tracker's display state.
///
/// Safe to hand to a UI thread or serialize across a process boundary; the
/// core fixes no wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    /// Serial id assigned by the owning stack.
    pub serial: u32,
    /// Phase labels, in order.
    pub labels: Vec<String>,
    /// Per-phase states, parallel to `labels`.
    pub states: Vec<PhaseState>,
    /// Index of the active phase; equal to `labels.len()` when finished.
    pub current_phase: usize,
    /// Current percent value.
    pub percent: u32,
    /// Percent range; 0 means indeterminate.
    pub percent_max: u32,
    /// Resolved display text (override, phase label, or finished label).
    pub text: String,
    /// Whether cancellation was allowed at snapshot time.
    pub allow_cancel: bool,
    /// Whether a cancel had been requested at snapshot time.
    pub cancel_requested: bool,
}

impl TrackerSnapshot {
    /// Whether every phase had been advanced past at snapshot time.
    pub fn is_finished(&self) -> bool {
        self.current_phase == self.labels.len()
    }
}

fn resolve_text(state: &TrackerState, labels: &[String]) -> String {
    if let Some(text) = &state.text {
        return text.clone();
    }
    labels
        .get(state.current_phase)
        .cloned()
        .unwrap_or_else(|| FINISHED_LABEL.to_string())
}
