//! A LIFO of trackers for one logical call chain, with delta detection.
//!
//! Nested operations push a tracker with [`ProgressStack::begin`] and pop it
//! with [`ProgressStack::end`]; the innermost operation is the top of the
//! stack. A version counter bumps on every structural change (push/pop) so
//! an observer polling [`snapshot_if_changed`](ProgressStack::snapshot_if_changed)
//! usually gets a trivial "unchanged" answer without any tracker state being
//! copied.
//!
//! Versioning is deliberately two-tier: percent/text/phase mutations inside
//! a tracker do *not* bump the counter. An observer that wants live percent
//! reads the tracker snapshots it obtained from the last delta. Bumping a
//! shared counter on every percent tick would invalidate every observer's
//! cache under tight polling and defeat delta detection.
//!
//! # Locking
//!
//! The stack's own `parking_lot::Mutex` guards the tracker list and version
//! counter, independent of any tracker's lock. A stack operation never
//! calls into a tracker's locked methods while holding its own lock, so
//! there is no ordering between the two.

use crate::error::ProgressError;
use crate::phase::validate_labels;
use crate::tracker::{ProgressTracker, TrackerSnapshot};
use log::{debug, warn};
use parking_lot::Mutex;
use std::sync::Arc;

/// Observer-side sentinel for "I have never seen a snapshot".
///
/// The version counter itself starts at this value and never returns to it
/// (wraparound goes `u32::MAX → 1`), so a first poll against an active
/// stack is guaranteed to see a change.
pub const NEVER_OBSERVED: u32 = 0;

struct StackInner {
    trackers: Vec<Arc<ProgressTracker>>,
    version: u32,
}

/// Result of a delta-detection poll.
#[derive(Debug, Clone)]
pub enum StackDelta {
    /// Nothing structural changed since the observed version.
    Unchanged,
    /// The stack changed; here is the full current state.
    Changed {
        /// Tracker references, top (innermost) first.
        trackers: Vec<Arc<ProgressTracker>>,
        /// Version to pass to the next `snapshot_if_changed` call.
        version: u32,
    },
}

impl StackDelta {
    /// Whether this delta carries no payload.
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Self::Unchanged)
    }

    /// Serializable snapshots of the carried trackers, if changed.
    ///
    /// This is what a transport collaborator sends across a process
    /// boundary; the wire format is its own concern.
    pub fn snapshots(&self) -> Option<Vec<TrackerSnapshot>> {
        match self {
            Self::Unchanged => None,
            Self::Changed { trackers, .. } => {
                Some(trackers.iter().map(|t| t.snapshot()).collect())
            }
        }
    }
}

/// Stack of [`ProgressTracker`]s belonging to one logical call chain.
///
/// Thread-safe; share via `Arc`. See the module docs for the locking and
/// versioning discipline.
#[derive(Default)]
pub struct ProgressStack {
    inner: Mutex<StackInner>,
}

impl Default for StackInner {
    fn default() -> Self {
        Self {
            trackers: Vec::new(),
            version: NEVER_OBSERVED,
        }
    }
}

impl ProgressStack {
    /// Create an empty stack. Version starts at the never-changed sentinel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a tracker for a nested operation and return it.
    ///
    /// Phase 0 starts `Active`. The version bump that records the push also
    /// supplies the tracker's serial id, so serials are unique per stack.
    ///
    /// Fails if `labels` is empty or contains an empty label.
    pub fn begin<I, S>(&self, labels: I) -> Result<Arc<ProgressTracker>, ProgressError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        validate_labels(&labels)?;

        let mut inner = self.inner.lock();
        inner.version = next_version(inner.version);
        let tracker = Arc::new(ProgressTracker::new(inner.version, labels));
        debug!(
            "begin tracker #{} ({} phases), depth {}",
            tracker.serial(),
            tracker.phase_count(),
            inner.trackers.len() + 1
        );
        inner.trackers.push(Arc::clone(&tracker));
        Ok(tracker)
    }

    /// Like [`begin`](Self::begin), but returns a guard that pops the
    /// tracker when dropped, so `end` runs on every exit path.
    pub fn begin_scoped<I, S>(self: &Arc<Self>, labels: I) -> Result<TrackerGuard, ProgressError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tracker = self.begin(labels)?;
        Ok(TrackerGuard {
            stack: Arc::clone(self),
            tracker,
        })
    }

    /// Pop the top tracker. Fails on an unpaired call (empty stack).
    ///
    /// The popped tracker's serial becomes invalid for new lookups; an
    /// observer holding its reference only sees the final state.
    pub fn end(&self) -> Result<(), ProgressError> {
        let mut inner = self.inner.lock();
        let tracker = inner.trackers.pop().ok_or(ProgressError::StackEmpty)?;
        inner.version = next_version(inner.version);
        debug!(
            "end tracker #{}, depth {}",
            tracker.serial(),
            inner.trackers.len()
        );
        Ok(())
    }

    /// The top (innermost) tracker, or `None` if the stack is empty.
    pub fn top(&self) -> Option<Arc<ProgressTracker>> {
        self.inner.lock().trackers.last().cloned()
    }

    /// Ordered copy of all tracker references, top-first.
    pub fn snapshot(&self) -> Vec<Arc<ProgressTracker>> {
        self.inner.lock().trackers.iter().rev().cloned().collect()
    }

    /// The delta-detection primitive.
    ///
    /// Returns [`StackDelta::Unchanged`] when `last_seen` equals the current
    /// version, the common case under tight polling, answered without
    /// copying any tracker state. Pass [`NEVER_OBSERVED`] to force the full
    /// snapshot on a first (or post-disconnect) poll.
    pub fn snapshot_if_changed(&self, last_seen: u32) -> StackDelta {
        let inner = self.inner.lock();
        if inner.version == last_seen {
            return StackDelta::Unchanged;
        }
        StackDelta::Changed {
            trackers: inner.trackers.iter().rev().cloned().collect(),
            version: inner.version,
        }
    }

    /// Current structural version.
    pub fn version(&self) -> u32 {
        self.inner.lock().version
    }

    /// Number of trackers currently on the stack.
    pub fn depth(&self) -> usize {
        self.inner.lock().trackers.len()
    }

    /// Whether no operation is currently tracked.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().trackers.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn with_version(version: u32) -> Self {
        Self {
            inner: Mutex::new(StackInner {
                trackers: Vec::new(),
                version,
            }),
        }
    }
}

impl std::fmt::Debug for ProgressStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ProgressStack")
            .field("depth", &inner.trackers.len())
            .field("version", &inner.version)
            .finish()
    }
}

/// RAII pairing of `begin`/`end` (scoped-acquisition discipline).
///
/// Ends the tracked operation when dropped, including during unwind.
#[must_use = "dropping the guard ends the tracked operation"]
pub struct TrackerGuard {
    stack: Arc<ProgressStack>,
    tracker: Arc<ProgressTracker>,
}

impl TrackerGuard {
    /// The tracker this guard will end.
    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }
}

impl std::ops::Deref for TrackerGuard {
    type Target = ProgressTracker;

    fn deref(&self) -> &Self::Target {
        &self.tracker
    }
}

impl Drop for TrackerGuard {
    fn drop(&mut self) {
        // Someone ended the stack out from under the guard; that is their
        // protocol violation, not a reason to panic during unwind.
        if let Err(err) = self.stack.end() {
            warn!("tracker guard drop: {err}");
        }
    }
}

/// Next version after `current`: strictly increasing, wrapping past the
/// maximum back to 1 so the counter never revisits [`NEVER_OBSERVED`].
fn next_version(current: u32) -> u32 {
    if current == u32::MAX {
        1
    } else {
        current + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::{PhaseOutcome, PhaseState};

    #[test]
    fn test_next_version_wraps_past_max_to_one() {
        assert_eq!(next_version(NEVER_OBSERVED), 1);
        assert_eq!(next_version(1), 2);
        assert_eq!(next_version(u32::MAX), 1);
    }

    #[test]
    fn test_fresh_stack_reports_unchanged_for_never_observed() {
        // Scenario B: a stack nothing ever touched has nothing to report.
        let stack = ProgressStack::new();
        assert!(stack.snapshot_if_changed(NEVER_OBSERVED).is_unchanged());
        assert_eq!(stack.version(), NEVER_OBSERVED);
    }

    #[test]
    fn test_begin_validates_labels() {
        let stack = ProgressStack::new();
        assert_eq!(
            stack.begin(Vec::<String>::new()).unwrap_err(),
            ProgressError::NoPhases
        );
        assert_eq!(
            stack.begin(["Load", ""]).unwrap_err(),
            ProgressError::EmptyPhaseLabel { index: 1 }
        );
        // Failed begins are not structural changes.
        assert_eq!(stack.version(), NEVER_OBSERVED);
    }

    #[test]
    fn test_end_on_empty_stack_fails() {
        let stack = ProgressStack::new();
        assert_eq!(stack.end().unwrap_err(), ProgressError::StackEmpty);
    }

    #[test]
    fn test_scenario_a_phase_walk() {
        let stack = ProgressStack::new();
        let tracker = stack.begin(["Load", "Process", "Save"]).unwrap();
        tracker.advance(PhaseOutcome::Completed).unwrap();
        tracker.advance(PhaseOutcome::Completed).unwrap();

        let snap = stack.top().unwrap().snapshot();
        assert_eq!(snap.current_phase, 2);
        assert_eq!(snap.states[0], PhaseState::Completed);
        assert_eq!(snap.states[1], PhaseState::Completed);
        assert_eq!(snap.states[2], PhaseState::Active);
    }

    #[test]
    fn test_nested_begin_orders_top_first() {
        let stack = ProgressStack::new();
        let outer = stack.begin(["Outer"]).unwrap();
        let inner = stack.begin(["Inner"]).unwrap();

        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.top().unwrap().serial(), inner.serial());

        let snapshot = stack.snapshot();
        assert_eq!(snapshot[0].serial(), inner.serial());
        assert_eq!(snapshot[1].serial(), outer.serial());

        stack.end().unwrap();
        assert_eq!(stack.top().unwrap().serial(), outer.serial());
    }

    #[test]
    fn test_serials_are_distinct_across_push_pop() {
        let stack = ProgressStack::new();
        let first = stack.begin(["A"]).unwrap();
        stack.end().unwrap();
        let second = stack.begin(["A"]).unwrap();
        assert_ne!(first.serial(), second.serial());
    }

    #[test]
    fn test_version_bumps_on_push_and_pop_only() {
        // Percent/text mutations never bump the structural version.
        let stack = ProgressStack::new();
        let tracker = stack.begin(["Load"]).unwrap();
        let after_begin = stack.version();
        assert_ne!(after_begin, NEVER_OBSERVED);

        tracker.set_percent_range(100);
        tracker.set_percent(50).unwrap();
        tracker.set_text("halfway");
        assert_eq!(stack.version(), after_begin);
        assert!(stack.snapshot_if_changed(after_begin).is_unchanged());

        stack.end().unwrap();
        assert_ne!(stack.version(), after_begin);
    }

    #[test]
    fn test_snapshot_if_changed_is_idempotent() {
        // Repeated polls with the same last-seen version agree.
        let stack = ProgressStack::new();
        stack.begin(["Load"]).unwrap();

        let v = match stack.snapshot_if_changed(NEVER_OBSERVED) {
            StackDelta::Changed { version, trackers } => {
                assert_eq!(trackers.len(), 1);
                version
            }
            StackDelta::Unchanged => panic!("first poll must see the push"),
        };
        assert!(stack.snapshot_if_changed(v).is_unchanged());
        assert!(stack.snapshot_if_changed(v).is_unchanged());
    }

    #[test]
    fn test_scenario_c_end_yields_new_version_and_empty_snapshot() {
        let stack = ProgressStack::new();
        stack.begin(["X"]).unwrap();

        let v1 = match stack.snapshot_if_changed(NEVER_OBSERVED) {
            StackDelta::Changed { version, trackers } => {
                assert_eq!(trackers.len(), 1);
                version
            }
            StackDelta::Unchanged => panic!("expected a change"),
        };

        stack.end().unwrap();

        match stack.snapshot_if_changed(v1) {
            StackDelta::Changed { version, trackers } => {
                assert_ne!(version, v1);
                assert!(trackers.is_empty());
            }
            StackDelta::Unchanged => panic!("pop must be visible"),
        }
    }

    #[test]
    fn test_version_wraparound_skips_never_observed() {
        let stack = ProgressStack::with_version(u32::MAX);
        stack.begin(["Load"]).unwrap();
        assert_eq!(stack.version(), 1);

        // An observer at MAX still sees the change.
        assert!(!stack.snapshot_if_changed(u32::MAX).is_unchanged());
    }

    #[test]
    fn test_tracker_guard_ends_on_drop() {
        let stack = Arc::new(ProgressStack::new());
        {
            let guard = stack.begin_scoped(["Load"]).unwrap();
            guard.set_percent_range(10);
            assert_eq!(stack.depth(), 1);
        }
        assert!(stack.is_empty());
    }

    #[test]
    fn test_tracker_guard_ends_during_unwind() {
        let stack = Arc::new(ProgressStack::new());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = stack.begin_scoped(["Load"]).unwrap();
            panic!("operation failed");
        }));
        assert!(result.is_err());
        assert!(stack.is_empty());
    }

    #[test]
    fn test_tracker_guard_tolerates_manual_end() {
        // If the stack was already ended out from under the guard, the
        // guard's own end finds an empty stack; that logs a warning and
        // must not panic in drop.
        let stack = Arc::new(ProgressStack::new());
        let guard = stack.begin_scoped(["Load"]).unwrap();
        stack.end().unwrap();
        let version_after_manual_end = stack.version();

        drop(guard);

        assert!(stack.is_empty());
        // The guard's failed end is not a structural change.
        assert_eq!(stack.version(), version_after_manual_end);
    }

    #[test]
    fn test_delta_snapshots_payload() {
        let stack = ProgressStack::new();
        let tracker = stack.begin(["Load", "Save"]).unwrap();
        tracker.set_percent_range(4);

        let delta = stack.snapshot_if_changed(NEVER_OBSERVED);
        let snaps = delta.snapshots().unwrap();
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].labels, vec!["Load", "Save"]);
        assert_eq!(snaps[0].percent_max, 4);

        assert!(StackDelta::Unchanged.snapshots().is_none());
    }
}
