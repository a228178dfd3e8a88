//! genloop - adaptive controller for iterative image generation
//!
//! Drives fixed-length denoising runs against a pluggable backend, optionally
//! capturing intermediate renders of the evolving state for progressive
//! visualization, and wraps batches of runs with a thermal-aware scheduler
//! that detects sustained slowdown from step timing and inserts cooling
//! breaks so constrained hardware can recover.
//!
//! The crate is a library-level control component: it has no CLI, HTTP, or
//! persistence surface of its own. Callers supply a [`backend::GenerationBackend`]
//! (one denoising step + one decode primitive) and consume [`runner::RunResult`]
//! and [`scheduler::BatchReport`] values.

pub mod backend;
pub mod capture;
pub mod error;
pub mod runner;
pub mod scheduler;
pub mod signal;
pub mod telemetry;

pub use error::{GenError, Result};
