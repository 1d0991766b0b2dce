//! Hierarchical progress tracking with versioned snapshots and cooperative
//! cancellation.
//!
//! A long-running operation pushes a [`ProgressTracker`] onto its thread's
//! active [`ProgressStack`], advances through labeled phases, and pops it
//! when done. Observers (a UI thread, a polling loop, or a remote client
//! behind an [`ObservationBridge`]) read consistent snapshots, detect
//! structural changes cheaply via the stack's version counter, and may
//! request cooperative cancellation that the operation honors at its next
//! check point. Helper routines report sub-progress through a
//! [`PhaseScope`] without knowing whether a real operation is in flight.

// Export modules for library usage
pub mod binding;
pub mod bridge;
pub mod error;
pub mod phase;
pub mod scope;
pub mod stack;
pub mod tracker;

// Re-export commonly used types
pub use crate::binding::{active, bind, bind_quiet, BindingGuard};
pub use crate::bridge::{CompletionFlag, CompletionHandle, ObservationBridge, PollStatus};
pub use crate::error::{Cancelled, ProgressError};
pub use crate::phase::{PhaseOutcome, PhaseState};
pub use crate::scope::{default_phase_label, set_default_phase_label, PhaseScope};
pub use crate::stack::{ProgressStack, StackDelta, TrackerGuard, NEVER_OBSERVED};
pub use crate::tracker::{ProgressTracker, TrackerSnapshot, FINISHED_LABEL};
