//! Generation backend seam - the external collaborator that performs one
//! denoising step and decodes internal state into a displayable image.
//!
//! The controller owns the iteration loop and calls the backend's single-step
//! primitive itself, rather than registering a callback into a loop owned by
//! the backend. Ownership of the state moves through `step`: each call
//! consumes the prior state and produces the next, so only one state value is
//! live at a time and the controller can never retain a stale alias.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{GenError, Result};

/// Backend capable of advancing a generation run one step at a time and
/// rendering its internal state on demand.
///
/// `decode` takes the state by shared reference: it must be a strict side
/// read, leaving the state bit-for-bit unaffected so subsequent steps see
/// the same trajectory whether or not a snapshot was captured.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Opaque internal state ("latent") evolved by the loop
    type State: Send;
    /// Decoded, displayable image handle
    type Image: Send;

    /// Advance the state by one denoising step. `iteration` is 1-based.
    async fn step(&self, state: Self::State, iteration: u32) -> Result<Self::State>;

    /// Decode the current state into an image without mutating it.
    async fn decode(&self, state: &Self::State) -> Result<Self::Image>;
}

/// Synthetic state used by [`MockBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockState {
    /// Number of steps applied so far (0 for a fresh seed state)
    pub iteration: u32,
    /// Seed the state was created from
    pub seed: u64,
}

impl MockState {
    /// Fresh state for the given seed, before any steps have run.
    pub fn seeded(seed: u64) -> Self {
        Self { iteration: 0, seed }
    }
}

/// Synthetic image produced by [`MockBackend::decode`].
///
/// Value equality compares the state the image was decoded from
/// (iteration + seed); `decode_seq` identifies the individual decode call
/// so tests can tell two value-equal decodes apart.
#[derive(Debug, Clone)]
pub struct MockImage {
    /// Iteration of the state this image was decoded from
    pub iteration: u32,
    /// Seed of the originating state
    pub seed: u64,
    /// 1-based sequence number of the decode call that produced this image
    pub decode_seq: u32,
}

impl PartialEq for MockImage {
    fn eq(&self, other: &Self) -> bool {
        self.iteration == other.iteration && self.seed == other.seed
    }
}

/// Deterministic in-memory backend for tests.
///
/// Step and decode durations are simulated with `tokio::time::sleep`, so
/// tests running under `start_paused` get exact, instant timings. Failures
/// can be injected at a chosen step or decode call, and every `step`
/// invocation is logged so tests can assert the exact input sequence.
pub struct MockBackend {
    step_delay: Duration,
    step_delays: Vec<Duration>,
    decode_delay: Duration,
    fail_step_at: Option<u32>,
    fail_decode_at_iteration: Option<u32>,
    step_log: Mutex<Vec<u32>>,
    step_calls: AtomicU32,
    decode_calls: AtomicU32,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Backend with instant steps and no injected failures.
    pub fn new() -> Self {
        Self {
            step_delay: Duration::ZERO,
            step_delays: Vec::new(),
            decode_delay: Duration::ZERO,
            fail_step_at: None,
            fail_decode_at_iteration: None,
            step_log: Mutex::new(Vec::new()),
            step_calls: AtomicU32::new(0),
            decode_calls: AtomicU32::new(0),
        }
    }

    /// Simulate every step taking `delay`.
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Simulate per-call step durations: the n-th `step` call (across all
    /// runs) takes `delays[n]`, falling back to the default delay after the
    /// schedule is exhausted.
    pub fn with_step_delays(mut self, delays: Vec<Duration>) -> Self {
        self.step_delays = delays;
        self
    }

    /// Simulate every decode taking `delay`.
    pub fn with_decode_delay(mut self, delay: Duration) -> Self {
        self.decode_delay = delay;
        self
    }

    /// Inject a step failure on the n-th `step` call (1-based, counted
    /// across all runs). For a single run this is the iteration number.
    pub fn fail_step_at(mut self, call: u32) -> Self {
        self.fail_step_at = Some(call);
        self
    }

    /// Inject a decode failure whenever the decoded state has the given
    /// iteration.
    pub fn fail_decode_at_iteration(mut self, iteration: u32) -> Self {
        self.fail_decode_at_iteration = Some(iteration);
        self
    }

    /// Iterations passed to `step`, in call order.
    pub fn step_inputs(&self) -> Vec<u32> {
        self.step_log.lock().unwrap().clone()
    }

    /// Total number of `decode` calls made.
    pub fn decode_count(&self) -> u32 {
        self.decode_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationBackend for MockBackend {
    type State = MockState;
    type Image = MockImage;

    async fn step(&self, state: MockState, iteration: u32) -> Result<MockState> {
        let call = self.step_calls.fetch_add(1, Ordering::SeqCst);
        self.step_log.lock().unwrap().push(iteration);

        let delay = self
            .step_delays
            .get(call as usize)
            .copied()
            .unwrap_or(self.step_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.fail_step_at == Some(call + 1) {
            return Err(GenError::Backend(format!(
                "injected step failure on call {}",
                call + 1
            )));
        }

        Ok(MockState {
            iteration,
            seed: state.seed,
        })
    }

    async fn decode(&self, state: &MockState) -> Result<MockImage> {
        if !self.decode_delay.is_zero() {
            tokio::time::sleep(self.decode_delay).await;
        }

        if self.fail_decode_at_iteration == Some(state.iteration) {
            return Err(GenError::Backend(format!(
                "injected decode failure at iteration {}",
                state.iteration
            )));
        }

        let seq = self.decode_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MockImage {
            iteration: state.iteration,
            seed: state.seed,
            decode_seq: seq,
        })
    }
}
