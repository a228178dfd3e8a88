//! Progressive capture loop - drives a single generation run.
//!
//! The runner owns the iteration loop: it calls the backend's single-step
//! primitive `total_steps` times, records per-step timing, and optionally
//! decodes the in-flight state at capture boundaries. Because the runner
//! owns the loop (instead of hooking a callback into a loop owned by the
//! backend), ordering and failure handling stay trivial to reason about.

use std::sync::Arc;

use crate::backend::GenerationBackend;
use crate::capture::{CapturePolicy, Snapshot, SnapshotSink};
use crate::error::{GenError, Result};
use crate::telemetry::{StepRecord, now_ms};

/// Configuration for one generation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Number of denoising steps to execute (>= 1)
    pub total_steps: u32,
    /// Intermediate capture policy; `Never` is the zero-overhead default
    pub capture: CapturePolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            total_steps: 30,
            capture: CapturePolicy::Never,
        }
    }
}

impl RunConfig {
    /// Config for a `total_steps` run with no capture.
    pub fn new(total_steps: u32) -> Self {
        Self {
            total_steps,
            capture: CapturePolicy::Never,
        }
    }

    /// Capture a snapshot every `interval` steps.
    pub fn with_capture_every(mut self, interval: u32) -> Self {
        self.capture = CapturePolicy::Every(interval);
        self
    }

    /// Reject malformed parameters before any step executes.
    pub fn validate(&self) -> Result<()> {
        if self.total_steps == 0 {
            return Err(GenError::InvalidConfiguration(
                "total_steps must be >= 1".to_string(),
            ));
        }
        if self.capture == CapturePolicy::Every(0) {
            return Err(GenError::InvalidConfiguration(
                "capture interval must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything produced by one completed run. Immutable once returned;
/// owned by the caller. The runner holds no state after returning.
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult<I> {
    /// Final image, always decoded from the post-loop state. This is the
    /// authoritative last frame; when the terminal iteration was also a
    /// capture boundary the snapshot list holds a separate decode of the
    /// same state (value-equal, distinct instance).
    pub final_image: I,
    /// Intermediate captures in increasing iteration order
    pub snapshots: Vec<Snapshot<I>>,
    /// Per-step timing records, one per iteration
    pub records: Vec<StepRecord>,
}

/// Executes single generation runs against a backend.
pub struct ProgressiveRunner<B: GenerationBackend> {
    backend: Arc<B>,
}

impl<B: GenerationBackend> ProgressiveRunner<B> {
    /// Create a runner over the given backend.
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Shared handle to the underlying backend.
    pub fn backend(&self) -> Arc<B> {
        self.backend.clone()
    }

    /// Execute one run from `initial_state` to a final image.
    ///
    /// All-or-nothing: on failure no partial `RunResult` is returned, but
    /// the error carries the step records collected up to that point so
    /// callers can still report partial timing.
    pub async fn run(&self, initial_state: B::State, config: &RunConfig) -> Result<RunResult<B::Image>> {
        config.validate()?;

        let total = config.total_steps;
        let mut sink = SnapshotSink::new(config.capture);
        let mut records: Vec<StepRecord> = Vec::with_capacity(total as usize);
        let mut state = initial_state;

        for iteration in 1..=total {
            let started_at_ms = now_ms();
            let started = tokio::time::Instant::now();

            state = match self.backend.step(state, iteration).await {
                Ok(next) => next,
                Err(source) => {
                    tracing::warn!(
                        iteration = iteration,
                        "Step failed, abandoning run"
                    );
                    return Err(GenError::GenerationFailed {
                        last_iteration: iteration - 1,
                        records,
                        source: Box::new(source),
                    });
                }
            };

            records.push(StepRecord {
                iteration,
                duration: started.elapsed(),
                started_at_ms,
            });

            if sink.wants(iteration, total) {
                match self.backend.decode(&state).await {
                    Ok(image) => {
                        tracing::debug!(
                            iteration = iteration,
                            total = total,
                            "Captured intermediate snapshot"
                        );
                        sink.push(iteration, image);
                    }
                    Err(source) => {
                        return Err(GenError::DecodeFailed {
                            iteration,
                            records,
                            source: Box::new(source),
                        });
                    }
                }
            }
        }

        // Final frame is always its own decode, never borrowed from the
        // snapshot list.
        let final_image = match self.backend.decode(&state).await {
            Ok(image) => image,
            Err(source) => {
                return Err(GenError::DecodeFailed {
                    iteration: total,
                    records,
                    source: Box::new(source),
                });
            }
        };

        tracing::info!(
            total_steps = total,
            snapshots = sink.len(),
            "Run complete"
        );

        Ok(RunResult {
            final_image,
            snapshots: sink.into_snapshots(),
            records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, MockState};
    use std::time::Duration;

    fn runner(backend: MockBackend) -> ProgressiveRunner<MockBackend> {
        ProgressiveRunner::new(Arc::new(backend))
    }

    #[test]
    fn test_run_config_default() {
        let config = RunConfig::default();
        assert_eq!(config.total_steps, 30);
        assert_eq!(config.capture, CapturePolicy::Never);
    }

    #[test]
    fn test_run_config_validate_rejects_zero_steps() {
        let err = RunConfig::new(0).validate().unwrap_err();
        assert!(matches!(err, GenError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_run_config_validate_rejects_zero_interval() {
        let err = RunConfig::new(10).with_capture_every(0).validate().unwrap_err();
        assert!(matches!(err, GenError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn test_invalid_config_runs_nothing() {
        let r = runner(MockBackend::new());
        let result = r.run(MockState::seeded(1), &RunConfig::new(0)).await;
        assert!(result.is_err());
        assert!(r.backend().step_inputs().is_empty());
    }

    #[tokio::test]
    async fn test_zero_overhead_default_no_snapshots() {
        let r = runner(MockBackend::new());
        let result = r.run(MockState::seeded(1), &RunConfig::new(10)).await.unwrap();

        assert!(result.snapshots.is_empty());
        assert_eq!(result.records.len(), 10);
        assert_eq!(result.final_image.iteration, 10);
        // Exactly one decode: the final frame
        assert_eq!(r.backend().decode_count(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_placement() {
        let r = runner(MockBackend::new());
        let config = RunConfig::new(30).with_capture_every(5);
        let result = r.run(MockState::seeded(42), &config).await.unwrap();

        let iterations: Vec<u32> = result.snapshots.iter().map(|s| s.iteration).collect();
        assert_eq!(iterations, vec![5, 10, 15, 20, 25, 30]);
        assert_eq!(result.records.len(), 30);
    }

    #[tokio::test]
    async fn test_terminal_snapshot_on_uneven_interval() {
        let r = runner(MockBackend::new());
        let config = RunConfig::new(7).with_capture_every(3);
        let result = r.run(MockState::seeded(1), &config).await.unwrap();

        let iterations: Vec<u32> = result.snapshots.iter().map(|s| s.iteration).collect();
        assert_eq!(iterations, vec![3, 6, 7]);
    }

    #[tokio::test]
    async fn test_final_image_is_independent_decode() {
        let r = runner(MockBackend::new());
        let config = RunConfig::new(10).with_capture_every(5);
        let result = r.run(MockState::seeded(3), &config).await.unwrap();

        let last_snapshot = result.snapshots.last().unwrap();
        assert_eq!(last_snapshot.iteration, 10);
        // Value-equal (same terminal state) but a distinct decode call
        assert_eq!(result.final_image, last_snapshot.image);
        assert_ne!(result.final_image.decode_seq, last_snapshot.image.decode_seq);
    }

    #[tokio::test]
    async fn test_capture_does_not_perturb_trajectory() {
        let captured = runner(MockBackend::new());
        let plain = runner(MockBackend::new());

        let dense = RunConfig::new(12).with_capture_every(1);
        let none = RunConfig::new(12);

        let a = captured.run(MockState::seeded(99), &dense).await.unwrap();
        let b = plain.run(MockState::seeded(99), &none).await.unwrap();

        // Identical final image and identical step input sequence
        assert_eq!(a.final_image, b.final_image);
        assert_eq!(captured.backend().step_inputs(), plain.backend().step_inputs());
        assert_eq!(a.snapshots.len(), 12);
        assert!(b.snapshots.is_empty());
    }

    #[tokio::test]
    async fn test_step_failure_carries_partial_records() {
        let r = runner(MockBackend::new().fail_step_at(4));
        let err = r.run(MockState::seeded(1), &RunConfig::new(10)).await.unwrap_err();

        match err {
            GenError::GenerationFailed {
                last_iteration,
                records,
                ..
            } => {
                assert_eq!(last_iteration, 3);
                assert_eq!(records.len(), 3);
                assert_eq!(records.last().unwrap().iteration, 3);
            }
            other => panic!("expected GenerationFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_decode_failure_at_capture_boundary() {
        let r = runner(MockBackend::new().fail_decode_at_iteration(6));
        let config = RunConfig::new(10).with_capture_every(3);
        let err = r.run(MockState::seeded(1), &config).await.unwrap_err();

        match err {
            GenError::DecodeFailed { iteration, records, .. } => {
                assert_eq!(iteration, 6);
                // Steps 1..=6 completed before the decode failed
                assert_eq!(records.len(), 6);
            }
            other => panic!("expected DecodeFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_final_decode_failure() {
        let r = runner(MockBackend::new().fail_decode_at_iteration(5));
        let err = r.run(MockState::seeded(1), &RunConfig::new(5)).await.unwrap_err();

        match err {
            GenError::DecodeFailed { iteration, records, .. } => {
                assert_eq!(iteration, 5);
                assert_eq!(records.len(), 5);
            }
            other => panic!("expected DecodeFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_final_decode_failure_reports_last_completed_step() {
        let r = runner(MockBackend::new().fail_decode_at_iteration(5));
        let err = r.run(MockState::seeded(1), &RunConfig::new(5)).await.unwrap_err();

        // All 5 steps made progress; only the final render was lost
        assert_eq!(err.last_iteration(), Some(5));
        assert_eq!(err.partial_records().last().unwrap().iteration, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_measure_step_duration() {
        let backend = MockBackend::new().with_step_delay(Duration::from_secs(2));
        let r = runner(backend);
        let result = r.run(MockState::seeded(1), &RunConfig::new(3)).await.unwrap();

        for record in &result.records {
            assert_eq!(record.duration, Duration::from_secs(2));
        }
    }

    #[tokio::test]
    async fn test_records_in_iteration_order() {
        let r = runner(MockBackend::new());
        let result = r.run(MockState::seeded(1), &RunConfig::new(20)).await.unwrap();

        let iterations: Vec<u32> = result.records.iter().map(|r| r.iteration).collect();
        assert_eq!(iterations, (1..=20).collect::<Vec<u32>>());
    }
}
