//! Remote observation of an asynchronous operation's progress.
//!
//! An [`ObservationBridge`] couples an operation's completion signal with
//! the progress stack living alongside it, so a polling observer learns
//! "is it done" and "what changed since I last looked" in one call instead
//! of two round trips. The bridge owns no progress state of its own; it is
//! a thin coordinator over the stack, remembering only the last version
//! the observer has seen.
//!
//! Whether the "remote" side is another thread, another process, or
//! another machine is the transport collaborator's business; the bridge is
//! agnostic to serialization (see
//! [`StackDelta::snapshots`](crate::stack::StackDelta::snapshots)).

use crate::stack::{ProgressStack, StackDelta, NEVER_OBSERVED};
use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Completion signal for an outstanding asynchronous operation.
///
/// Object-safe; implementations must be cheap and callable from any
/// thread.
pub trait CompletionHandle: Send + Sync + 'static {
    /// Whether the operation has finished (successfully or not).
    fn is_finished(&self) -> bool;
}

/// Shared `AtomicBool`-backed [`CompletionHandle`].
///
/// The worker keeps a clone and calls [`finish`](CompletionFlag::finish)
/// on exit; the bridge polls the same flag.
#[derive(Clone, Debug, Default)]
pub struct CompletionFlag {
    finished: Arc<AtomicBool>,
}

impl CompletionFlag {
    /// Create an unfinished flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the operation finished. Idempotent.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }
}

impl CompletionHandle for CompletionFlag {
    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

/// Result of one fused poll: completion plus change delta.
#[derive(Debug, Clone)]
pub struct PollStatus {
    /// Whether the observed operation has finished.
    pub finished: bool,
    /// What changed structurally since the previous poll.
    pub delta: StackDelta,
}

/// Couples a completion signal with a stack's change-delta retrieval and
/// cancel forwarding.
pub struct ObservationBridge {
    handle: Arc<dyn CompletionHandle>,
    stack: Arc<ProgressStack>,
    last_seen: u32,
}

impl ObservationBridge {
    /// Observe `stack` until the operation behind `handle` completes.
    ///
    /// The first [`poll`](Self::poll) always returns the full current
    /// snapshot (the bridge starts at the never-observed sentinel).
    pub fn new(handle: impl CompletionHandle, stack: Arc<ProgressStack>) -> Self {
        Self {
            handle: Arc::new(handle),
            stack,
            last_seen: NEVER_OBSERVED,
        }
    }

    /// One fused round trip: completion state plus the stack delta
    /// relative to the previous poll.
    ///
    /// Advances the bridge's last-seen version when the delta carries a
    /// payload, so the next poll is cheap if nothing else changes.
    pub fn poll(&mut self) -> PollStatus {
        let finished = self.handle.is_finished();
        let delta = self.stack.snapshot_if_changed(self.last_seen);
        if let StackDelta::Changed { version, .. } = &delta {
            self.last_seen = *version;
        }
        PollStatus { finished, delta }
    }

    /// Forward a cancel request into the remote stack's top tracker.
    ///
    /// A no-op when the stack is empty; honored cooperatively by the
    /// owning thread at its next check point.
    pub fn request_cancel(&self) {
        if let Some(tracker) = self.stack.top() {
            debug!("forwarding cancel request to tracker #{}", tracker.serial());
            tracker.request_cancel();
        }
    }

    /// Forget the last-seen version (back to the never-observed sentinel).
    ///
    /// The next poll is then guaranteed to return the full snapshot. This
    /// is the recovery path after a transport-level disconnect, when the
    /// observer can no longer trust its cached version.
    pub fn reset(&mut self) {
        debug!("observation bridge reset");
        self.last_seen = NEVER_OBSERVED;
    }

    /// The version this bridge last observed.
    pub fn last_seen(&self) -> u32 {
        self.last_seen
    }
}
