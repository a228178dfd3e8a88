//! Thermal-aware batch scheduler.
//!
//! Wraps a sequence of generation runs with a feedback controller that
//! watches step timing for sustained slowdown and inserts cooling pauses so
//! thermally constrained hardware can recover before the next item.
//!
//! This is a black-box heuristic: throttling is inferred purely from the
//! ratio of observed step duration to an early-run baseline. The scheduler
//! never reads a temperature sensor.
//!
//! Per item boundary the controller is in one of three regimes:
//! - Warming: baseline not yet established, no throttle decisions
//! - Nominal: ratio below the threshold, proceed without delay
//! - Throttled: ratio at or above the threshold after an item completes,
//!   pause for the cooling duration, then resume with the baseline retained
//!
//! Independently, a configured `batch_size` inserts an unconditional
//! (proactive) pause every N items. When both conditions land on the same
//! item only the proactive pause runs - one cooling break already satisfies
//! the requirement.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::GenerationBackend;
use crate::error::{GenError, Result};
use crate::runner::{ProgressiveRunner, RunConfig, RunResult};
use crate::signal::CancelToken;
use crate::telemetry::{DEFAULT_WARMUP_SAMPLES, StepTimings, TimingStats};

/// Interval between cancellation checks during a cooling pause.
pub const COOLING_SLICE: Duration = Duration::from_millis(250);

/// Why a cooling break was inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoolingReason {
    /// Observed slowdown crossed the throttle threshold
    Reactive,
    /// Scheduled batch-boundary pause, independent of observed timing
    Proactive,
}

/// One cooling break, recorded for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoolingEvent {
    /// 0-based position of the batch item after which the pause ran
    pub item_index: usize,
    /// Time actually spent pausing; shorter than the configured duration
    /// when cancellation truncated the pause
    pub duration: Duration,
    /// What triggered it
    pub reason: CoolingReason,
}

/// Configuration for the thermal-aware scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Slowdown ratio that triggers a reactive cooling break
    /// (1.5 = 50% slower than baseline)
    pub throttle_threshold: f64,
    /// Length of a reactive cooling break
    pub cooling_duration: Duration,
    /// Insert an unconditional pause every this many items, when set
    pub batch_size: Option<usize>,
    /// Length of batch-boundary pauses; falls back to `cooling_duration`
    pub batch_cooling_duration: Option<Duration>,
    /// Samples needed before the baseline locks in
    pub warmup_samples: usize,
    /// Caller-known nominal per-step time; skips warm-up when set
    pub baseline_hint: Option<Duration>,
    /// Stop the batch on the first item failure instead of recording it
    /// against that item's slot
    pub fail_fast: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            throttle_threshold: 1.5,
            cooling_duration: Duration::from_secs(30),
            batch_size: None,
            batch_cooling_duration: None,
            warmup_samples: DEFAULT_WARMUP_SAMPLES,
            baseline_hint: None,
            fail_fast: false,
        }
    }
}

impl SchedulerConfig {
    /// Set the reactive throttle threshold.
    pub fn with_throttle_threshold(mut self, threshold: f64) -> Self {
        self.throttle_threshold = threshold;
        self
    }

    /// Set the reactive cooling break length.
    pub fn with_cooling_duration(mut self, duration: Duration) -> Self {
        self.cooling_duration = duration;
        self
    }

    /// Enable proactive pauses every `size` items.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Use a distinct (typically longer) pause at batch boundaries.
    pub fn with_batch_cooling_duration(mut self, duration: Duration) -> Self {
        self.batch_cooling_duration = Some(duration);
        self
    }

    /// Pre-seed the baseline instead of learning it from early items.
    pub fn with_baseline_hint(mut self, hint: Duration) -> Self {
        self.baseline_hint = Some(hint);
        self
    }

    /// Stop on the first failed item.
    pub fn with_fail_fast(mut self) -> Self {
        self.fail_fast = true;
        self
    }

    /// Reject malformed parameters before any item runs.
    pub fn validate(&self) -> Result<()> {
        if !self.throttle_threshold.is_finite() || self.throttle_threshold <= 1.0 {
            return Err(GenError::InvalidConfiguration(
                "throttle_threshold must be finite and > 1.0".to_string(),
            ));
        }
        if self.cooling_duration.is_zero() {
            return Err(GenError::InvalidConfiguration(
                "cooling_duration must be non-zero".to_string(),
            ));
        }
        if self.batch_size == Some(0) {
            return Err(GenError::InvalidConfiguration(
                "batch_size must be >= 1 when set".to_string(),
            ));
        }
        if self.batch_cooling_duration.is_some_and(|d| d.is_zero()) {
            return Err(GenError::InvalidConfiguration(
                "batch_cooling_duration must be non-zero when set".to_string(),
            ));
        }
        if self.warmup_samples == 0 {
            return Err(GenError::InvalidConfiguration(
                "warmup_samples must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    fn boundary_pause(&self) -> Duration {
        self.batch_cooling_duration.unwrap_or(self.cooling_duration)
    }
}

/// Per-slot outcome of a batch item.
#[derive(Debug)]
pub enum ItemOutcome<I> {
    /// The run completed; result owned by this slot
    Completed(RunResult<I>),
    /// The run failed; error recorded against this slot
    Failed(GenError),
}

impl<I> ItemOutcome<I> {
    /// Whether this slot completed successfully.
    pub fn is_completed(&self) -> bool {
        matches!(self, ItemOutcome::Completed(_))
    }

    /// The run result, if this slot completed.
    pub fn as_completed(&self) -> Option<&RunResult<I>> {
        match self {
            ItemOutcome::Completed(result) => Some(result),
            ItemOutcome::Failed(_) => None,
        }
    }

    /// The failure, if this slot failed.
    pub fn error(&self) -> Option<&GenError> {
        match self {
            ItemOutcome::Completed(_) => None,
            ItemOutcome::Failed(err) => Some(err),
        }
    }
}

/// How the batch ended.
#[derive(Debug)]
pub enum BatchCompletion {
    /// Every item was processed
    Finished,
    /// A cancellation signal fired; `remaining` items were never started
    Cancelled { remaining: usize },
    /// Fail-fast stopped the batch at `item_index`
    FailedFast { item_index: usize, error: GenError },
}

/// Aggregate statistics for one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermalStats {
    /// Items that completed successfully
    pub items_completed: usize,
    /// Items that failed
    pub items_failed: usize,
    /// Cooling breaks taken
    pub cooling_breaks: usize,
    /// Total time spent cooling
    pub total_cooling: Duration,
    /// Per-item timing summary (one sample per completed item)
    pub timing: TimingStats,
}

/// Everything a batch produces: per-slot outcomes in input order, the full
/// cooling history, how the batch ended, and aggregate statistics.
#[derive(Debug)]
pub struct BatchReport<I> {
    /// One slot per started item, in input order
    pub outcomes: Vec<ItemOutcome<I>>,
    /// Cooling breaks in the order they were taken
    pub cooling_events: Vec<CoolingEvent>,
    /// Terminal condition
    pub completion: BatchCompletion,
    /// Aggregate statistics
    pub stats: ThermalStats,
}

impl<I> BatchReport<I> {
    /// Number of successfully completed items.
    pub fn completed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_completed()).count()
    }

    /// Collapse the report into plain results, turning cancellation or any
    /// item failure into an error.
    pub fn into_results(self) -> Result<Vec<RunResult<I>>> {
        let completed = self.completed_count();
        match self.completion {
            BatchCompletion::Cancelled { .. } => Err(GenError::BatchCancelled { completed }),
            BatchCompletion::FailedFast { error, .. } => Err(error),
            BatchCompletion::Finished => {
                let mut results = Vec::with_capacity(self.outcomes.len());
                for outcome in self.outcomes {
                    match outcome {
                        ItemOutcome::Completed(result) => results.push(result),
                        ItemOutcome::Failed(err) => return Err(err),
                    }
                }
                Ok(results)
            }
        }
    }
}

/// Runs batches of generation items with throttle detection and cooling
/// breaks between items.
pub struct ThermalScheduler<B: GenerationBackend> {
    runner: ProgressiveRunner<B>,
    config: SchedulerConfig,
}

impl<B: GenerationBackend> ThermalScheduler<B> {
    /// Create a scheduler over the given backend.
    pub fn new(backend: Arc<B>, config: SchedulerConfig) -> Self {
        Self {
            runner: ProgressiveRunner::new(backend),
            config,
        }
    }

    /// Scheduler configuration in effect.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Process `items` in order, one run per item.
    ///
    /// Items run strictly sequentially; the telemetry baseline is learned
    /// from the first items of this batch (or pre-seeded from the config's
    /// baseline hint) and is never shared with other batches. The
    /// cancellation token is checked before each item and in short slices
    /// during every cooling pause.
    pub async fn run_batch(
        &self,
        items: Vec<B::State>,
        run: &RunConfig,
        cancel: &CancelToken,
    ) -> Result<BatchReport<B::Image>> {
        self.config.validate()?;
        run.validate()?;

        let total_items = items.len();
        let mut telemetry = match self.config.baseline_hint {
            Some(hint) => StepTimings::with_baseline_hint(hint),
            None => StepTimings::new(self.config.warmup_samples),
        };
        let mut outcomes: Vec<ItemOutcome<B::Image>> = Vec::with_capacity(total_items);
        let mut cooling_events: Vec<CoolingEvent> = Vec::new();
        let mut items_failed = 0usize;
        let mut completion: Option<BatchCompletion> = None;

        for (index, state) in items.into_iter().enumerate() {
            if cancel.is_cancelled() {
                completion = Some(BatchCompletion::Cancelled {
                    remaining: total_items - index,
                });
                break;
            }

            let item_sampled = match self.runner.run(state, run).await {
                Ok(result) => {
                    telemetry.record(mean_step_duration(&result));
                    outcomes.push(ItemOutcome::Completed(result));
                    true
                }
                Err(err) => {
                    tracing::error!(item = index, error = %err, "Batch item failed");
                    if self.config.fail_fast {
                        completion = Some(BatchCompletion::FailedFast {
                            item_index: index,
                            error: err,
                        });
                        break;
                    }
                    items_failed += 1;
                    outcomes.push(ItemOutcome::Failed(err));
                    false
                }
            };

            let processed = index + 1;
            if processed == total_items {
                // Nothing left to protect
                break;
            }

            let at_boundary = self.config.batch_size.is_some_and(|b| processed % b == 0);
            let throttled = item_sampled
                && telemetry
                    .current_ratio()
                    .is_some_and(|r| r >= self.config.throttle_threshold);

            // Boundary pause takes precedence: it already satisfies the
            // cooling requirement, so a coinciding breach never double-pauses.
            let pause = if at_boundary {
                tracing::info!(
                    item = index,
                    batch_size = self.config.batch_size.unwrap_or(0),
                    "Batch boundary, taking scheduled cooling break"
                );
                Some((CoolingReason::Proactive, self.config.boundary_pause()))
            } else if throttled {
                tracing::warn!(
                    item = index,
                    ratio = telemetry.current_ratio().unwrap_or(0.0),
                    threshold = self.config.throttle_threshold,
                    "Throttling detected, taking cooling break"
                );
                Some((CoolingReason::Reactive, self.config.cooling_duration))
            } else {
                None
            };

            if let Some((reason, duration)) = pause {
                let started = tokio::time::Instant::now();
                let finished = cooling_pause(duration, cancel).await;
                // Record the time actually slept, so cooling statistics stay
                // truthful when cancellation truncates the pause
                cooling_events.push(CoolingEvent {
                    item_index: index,
                    duration: started.elapsed(),
                    reason,
                });
                if !finished {
                    completion = Some(BatchCompletion::Cancelled {
                        remaining: total_items - processed,
                    });
                    break;
                }
            }
        }

        let completion = completion.unwrap_or(BatchCompletion::Finished);
        let total_cooling = cooling_events.iter().map(|e| e.duration).sum();
        let stats = ThermalStats {
            items_completed: outcomes.iter().filter(|o| o.is_completed()).count(),
            items_failed,
            cooling_breaks: cooling_events.len(),
            total_cooling,
            timing: telemetry.stats(),
        };

        tracing::info!(
            items_completed = stats.items_completed,
            items_failed = stats.items_failed,
            cooling_breaks = stats.cooling_breaks,
            "Batch finished"
        );

        Ok(BatchReport {
            outcomes,
            cooling_events,
            completion,
            stats,
        })
    }
}

/// Mean step duration of one completed run - the per-item telemetry sample.
fn mean_step_duration<I>(result: &RunResult<I>) -> Duration {
    if result.records.is_empty() {
        return Duration::ZERO;
    }
    let total: Duration = result.records.iter().map(|r| r.duration).sum();
    total / result.records.len() as u32
}

/// Sleep for `duration` in short slices, re-checking the cancellation token
/// between slices. Returns false if cancellation fired before the pause
/// finished.
async fn cooling_pause(duration: Duration, cancel: &CancelToken) -> bool {
    let deadline = tokio::time::Instant::now() + duration;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return true;
        }
        let slice = COOLING_SLICE.min(deadline - now);
        tokio::time::sleep(slice).await;
    }
}
