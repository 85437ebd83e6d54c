//! Regime detection: observation vectors, switching models, snapshots.
//!
//! Phases:
//! 1. Build per-period observation rows (market return, volatility, macros).
//! 2. Fit a snapshot at each scheduled estimation period, using rows up to
//!    that period only.
//! 3. Filter the latest valid snapshot forward to read the state at t.

pub mod detector;
pub mod hmm;
pub mod observations;
pub mod snapshot;
pub mod state;
pub mod threshold;

pub use detector::{EstimationWindow, RegimeConfig, RegimeDetector, RegimeModelKind};
pub use hmm::{GaussianHmm, HmmFit, HmmFitConfig};
pub use observations::RegimeObservations;
pub use snapshot::{
    transition_frequencies, EstimationFailure, RegimeModel, RegimeSnapshot, SmoothedRegimes,
};
pub use state::{RegimeLabel, RegimeSource, RegimeState};
pub use threshold::{ThresholdFit, ThresholdRule};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegimeError {
    #[error("insufficient observations: {available} available, {required} required")]
    InsufficientObservations { available: usize, required: usize },

    #[error("estimation did not converge after {iterations} iterations (last change {last_change:e})")]
    NotConverged { iterations: usize, last_change: f64 },

    #[error("log-likelihood became non-finite at iteration {iteration}")]
    NonFiniteLikelihood { iteration: usize },

    #[error("invalid regime configuration: {0}")]
    InvalidConfig(String),
}
