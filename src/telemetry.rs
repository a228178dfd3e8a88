//! Timing telemetry - per-step duration recording and baseline estimation.
//!
//! `StepTimings` accumulates duration samples during one run (or across the
//! items of one batch) and derives an online estimate of "expected time per
//! step". The baseline is the arithmetic mean of the first few samples,
//! established before any throttling can have occurred; the throttle signal
//! the scheduler acts on is the ratio of the latest sample to that baseline.
//!
//! Thermal state is inferred purely from wall-clock timing - there is no
//! sensor access. The telemetry only ever reasons about relative ratios,
//! never actual temperature.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of samples used to establish the baseline.
pub const DEFAULT_WARMUP_SAMPLES: usize = 3;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Timing record for one completed step.
///
/// Appended once per step, in iteration order; immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// 1-based iteration index within the run
    pub iteration: u32,
    /// Wall-clock duration of the step
    pub duration: Duration,
    /// When the step started, milliseconds since Unix epoch
    pub started_at_ms: u64,
}

/// Summary statistics over a telemetry instance, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingStats {
    /// Number of samples recorded
    pub samples: usize,
    /// Baseline seconds per step, if warmed up
    pub baseline_secs: Option<f64>,
    /// Mean seconds per sample
    pub mean_secs: f64,
    /// Fastest sample
    pub min_secs: f64,
    /// Slowest sample
    pub max_secs: f64,
}

/// Online step-duration telemetry for one run or one batch.
///
/// Append-only within a run; a new run/batch starts a fresh instance so
/// baselines never contaminate each other.
#[derive(Debug, Clone)]
pub struct StepTimings {
    samples: Vec<Duration>,
    warmup_samples: usize,
    baseline: Option<Duration>,
}

impl Default for StepTimings {
    fn default() -> Self {
        Self::new(DEFAULT_WARMUP_SAMPLES)
    }
}

impl StepTimings {
    /// Create telemetry that learns its baseline from the first
    /// `warmup_samples` recordings.
    pub fn new(warmup_samples: usize) -> Self {
        Self {
            samples: Vec::new(),
            warmup_samples: warmup_samples.max(1),
            baseline: None,
        }
    }

    /// Create telemetry with a caller-supplied baseline, skipping warm-up.
    pub fn with_baseline_hint(hint: Duration) -> Self {
        Self {
            samples: Vec::new(),
            warmup_samples: DEFAULT_WARMUP_SAMPLES,
            baseline: Some(hint),
        }
    }

    /// Append one duration sample.
    ///
    /// The baseline locks in as the arithmetic mean of the first
    /// `warmup_samples` samples (unless a hint pre-seeded it).
    pub fn record(&mut self, duration: Duration) {
        self.samples.push(duration);

        if self.baseline.is_none() && self.samples.len() >= self.warmup_samples {
            let total: Duration = self.samples[..self.warmup_samples].iter().sum();
            self.baseline = Some(total / self.warmup_samples as u32);
        }
    }

    /// Expected time per step, or `None` while still warming up.
    pub fn baseline(&self) -> Option<Duration> {
        self.baseline
    }

    /// Whether enough samples exist to make throttle decisions.
    pub fn is_warmed_up(&self) -> bool {
        self.baseline.is_some()
    }

    /// Number of samples recorded so far.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether any samples have been recorded.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Latest sample divided by baseline - the signal the scheduler acts on.
    ///
    /// `None` until both a sample and a baseline exist. A ratio of 1.0 is
    /// nominal; sustained values above the throttle threshold indicate the
    /// hardware has slowed down.
    pub fn current_ratio(&self) -> Option<f64> {
        let baseline = self.baseline?;
        let latest = self.samples.last()?;
        if baseline.is_zero() {
            return None;
        }
        Some(latest.as_secs_f64() / baseline.as_secs_f64())
    }

    /// Summary statistics over all samples.
    pub fn stats(&self) -> TimingStats {
        let secs: Vec<f64> = self.samples.iter().map(Duration::as_secs_f64).collect();
        let (mean, min, max) = if secs.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            let sum: f64 = secs.iter().sum();
            let min = secs.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = secs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            (sum / secs.len() as f64, min, max)
        };

        TimingStats {
            samples: self.samples.len(),
            baseline_secs: self.baseline.map(|b| b.as_secs_f64()),
            mean_secs: mean,
            min_secs: min,
            max_secs: max,
        }
    }
}
