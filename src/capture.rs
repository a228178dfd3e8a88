//! Snapshot capture - periodic decoding of in-flight generation state.
//!
//! Snapshots exist purely for visualization of the same evolving state: one
//! trajectory, many observation points. Capturing must never alter what the
//! step function sees, so decoding is a strict side read (enforced by
//! `GenerationBackend::decode` taking the state by reference).

use serde::{Deserialize, Serialize};

/// When to capture intermediate snapshots during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CapturePolicy {
    /// Never capture - the zero-overhead default
    #[default]
    Never,
    /// Capture every N iterations, plus a guaranteed terminal capture
    Every(u32),
}

impl CapturePolicy {
    /// Whether iteration `i` of a `total`-step run should be captured.
    ///
    /// With `Every(n)`, captures land on multiples of `n` and always on the
    /// final iteration, so the last visual state is observable even when
    /// `total` is not a multiple of the interval.
    pub fn should_capture(&self, iteration: u32, total: u32) -> bool {
        match self {
            CapturePolicy::Never => false,
            CapturePolicy::Every(n) => {
                debug_assert!(*n >= 1);
                iteration == total || (*n >= 1 && iteration % n == 0)
            }
        }
    }

    /// Number of snapshots a full run will produce under this policy.
    pub fn expected_count(&self, total: u32) -> usize {
        (1..=total).filter(|i| self.should_capture(*i, total)).count()
    }
}

/// One decoded intermediate render, captured at a specific iteration.
///
/// Position in the snapshot list is capture order, not iteration number.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<I> {
    /// Iteration the state was decoded at (1-based)
    pub iteration: u32,
    /// Decoded image handle
    pub image: I,
}

/// Ordered, append-only collector for a single run's snapshots.
///
/// Memory grows linearly with the number of captures - each snapshot holds
/// one fully decoded image, so dense capture on large outputs is
/// O(total_steps) memory, not O(1).
#[derive(Debug)]
pub struct SnapshotSink<I> {
    policy: CapturePolicy,
    snapshots: Vec<Snapshot<I>>,
}

impl<I> SnapshotSink<I> {
    /// Create a sink for the given policy.
    pub fn new(policy: CapturePolicy) -> Self {
        Self {
            policy,
            snapshots: Vec::new(),
        }
    }

    /// Whether the owning loop should decode at this iteration.
    pub fn wants(&self, iteration: u32, total: u32) -> bool {
        self.policy.should_capture(iteration, total)
    }

    /// Append a captured snapshot. Caller guarantees iteration order.
    pub fn push(&mut self, iteration: u32, image: I) {
        debug_assert!(
            self.snapshots.last().is_none_or(|s| s.iteration < iteration),
            "snapshots must be appended in increasing iteration order"
        );
        self.snapshots.push(Snapshot { iteration, image });
    }

    /// Number of snapshots captured so far.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Whether no snapshots have been captured.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Hand the ordered snapshots to the caller.
    pub fn into_snapshots(self) -> Vec<Snapshot<I>> {
        self.snapshots
    }
}
