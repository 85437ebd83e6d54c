//! Regime Detector: scheduled re-estimation and per-period filtering.
//!
//! Estimation periods are fixed up front from the observation availability
//! (first period with `min_observations` rows, then every
//! `reestimate_every` periods). Each estimation only sees observations up to
//! its own period, so the snapshots are independent and are fitted in
//! parallel. Readers take the latest valid snapshot at or before t and filter
//! forward to t; each snapshot's forward pass over the periods it serves is
//! run once, at estimation time.

use super::hmm::{GaussianHmm, HmmFitConfig};
use super::observations::RegimeObservations;
use super::snapshot::{EstimationFailure, RegimeModel, RegimeSnapshot, SmoothedRegimes};
use super::state::{assign_labels, RegimeLabel, RegimeSource, RegimeState};
use super::threshold::ThresholdRule;
use super::RegimeError;
use crate::data::{Panel, UniverseRules};
use crate::stats::argmax;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

fn default_max_iterations() -> usize {
    200
}

fn default_tolerance() -> f64 {
    1e-6
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegimeModelKind {
    /// One state, always `Normal`.
    Static,
    Hmm {
        n_states: usize,
        #[serde(default = "default_max_iterations")]
        max_iterations: usize,
        #[serde(default = "default_tolerance")]
        tolerance: f64,
    },
    Threshold {
        n_states: usize,
        vol_threshold: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EstimationWindow {
    Expanding,
    Rolling { periods: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    pub model: RegimeModelKind,
    pub reestimate_every: usize,
    pub window: EstimationWindow,
    pub min_observations: usize,
    pub vol_window: usize,
    pub macro_fields: Vec<String>,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            model: RegimeModelKind::Static,
            reestimate_every: 21,
            window: EstimationWindow::Expanding,
            min_observations: 60,
            vol_window: 20,
            macro_fields: Vec::new(),
        }
    }
}

impl RegimeConfig {
    pub fn validate(&self) -> Result<(), RegimeError> {
        let invalid = |msg: String| Err(RegimeError::InvalidConfig(msg));
        if self.reestimate_every == 0 {
            return invalid("reestimate_every must be >= 1".into());
        }
        if self.vol_window < 2 {
            return invalid("vol_window must be >= 2".into());
        }
        if let EstimationWindow::Rolling { periods } = self.window {
            if periods < self.min_observations.max(2) {
                return invalid(format!(
                    "rolling window ({periods}) is shorter than min_observations ({})",
                    self.min_observations
                ));
            }
        }
        match &self.model {
            RegimeModelKind::Static => {}
            RegimeModelKind::Hmm {
                n_states,
                max_iterations,
                tolerance,
            } => {
                if !(1..=4).contains(n_states) {
                    return invalid(format!("n_states must be in 1..=4, got {n_states}"));
                }
                if *max_iterations == 0 {
                    return invalid("max_iterations must be >= 1".into());
                }
                if !(tolerance.is_finite() && *tolerance > 0.0) {
                    return invalid(format!("tolerance must be > 0, got {tolerance}"));
                }
            }
            RegimeModelKind::Threshold {
                n_states,
                vol_threshold,
            } => {
                ThresholdRule::new(*n_states, *vol_threshold)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RegimeDetector {
    config: RegimeConfig,
    observations: RegimeObservations,
    dates: Vec<chrono::NaiveDate>,
    /// Valid snapshots ordered by `estimated_at`.
    snapshots: Vec<RegimeSnapshot>,
    /// Failed attempts ordered by period.
    failures: Vec<EstimationFailure>,
    /// Filtered distributions per snapshot (keyed by `estimated_at`) for the
    /// periods that snapshot serves.
    filtered: BTreeMap<usize, FilteredPath>,
}

/// One snapshot's forward pass: entry `i` is period `start + i`.
#[derive(Debug, Clone, Default)]
struct FilteredPath {
    start: usize,
    distributions: Vec<Option<Vec<f64>>>,
}

impl FilteredPath {
    fn at(&self, t: usize) -> Option<&Option<Vec<f64>>> {
        t.checked_sub(self.start)
            .and_then(|i| self.distributions.get(i))
    }
}

impl RegimeDetector {
    /// Build observations and fit every scheduled snapshot.
    pub fn estimate(
        panel: &Panel,
        universe: &UniverseRules,
        config: &RegimeConfig,
    ) -> Result<Self, RegimeError> {
        config.validate()?;
        let observations =
            RegimeObservations::build(panel, universe, config.vol_window, &config.macro_fields);
        let mut detector = Self {
            config: config.clone(),
            observations,
            dates: panel.dates().to_vec(),
            snapshots: Vec::new(),
            failures: Vec::new(),
            filtered: BTreeMap::new(),
        };

        let schedule = detector.schedule();
        let results: Vec<(usize, Result<RegimeSnapshot, RegimeError>)> = schedule
            .par_iter()
            .map(|&e| (e, detector.estimate_at(e)))
            .collect();

        for (period, result) in results {
            match result {
                Ok(snapshot) => {
                    debug!(
                        period,
                        states = snapshot.n_states(),
                        iterations = snapshot.iterations,
                        "regime snapshot estimated"
                    );
                    detector.snapshots.push(snapshot);
                }
                Err(e) => {
                    let date = detector.dates[period];
                    warn!(period, %date, error = %e, "regime estimation failed, falling back to last valid snapshot");
                    detector.failures.push(EstimationFailure {
                        period,
                        date,
                        reason: e.to_string(),
                    });
                }
            }
        }
        detector.filtered = detector.filter_served_periods();
        info!(
            snapshots = detector.snapshots.len(),
            failures = detector.failures.len(),
            "regime detection complete"
        );
        Ok(detector)
    }

    /// Run each snapshot's forward pass through the last period it serves
    /// (up to the next valid snapshot, or the end of the panel).
    fn filter_served_periods(&self) -> BTreeMap<usize, FilteredPath> {
        let len = self.dates.len();
        self.snapshots
            .par_iter()
            .enumerate()
            .filter_map(|(i, snapshot)| {
                let served_end = self
                    .snapshots
                    .get(i + 1)
                    .map_or(len, |next| next.estimated_at);
                let through = served_end.checked_sub(1)?;
                let path = FilteredPath {
                    start: snapshot.window_start,
                    distributions: snapshot.filter_path(&self.observations, through),
                };
                Some((snapshot.estimated_at, path))
            })
            .collect()
    }

    pub fn config(&self) -> &RegimeConfig {
        &self.config
    }

    pub fn observations(&self) -> &RegimeObservations {
        &self.observations
    }

    pub fn snapshots(&self) -> &[RegimeSnapshot] {
        &self.snapshots
    }

    pub fn failures(&self) -> &[EstimationFailure] {
        &self.failures
    }

    /// Estimation periods. Depends only on observation availability up to
    /// each period.
    pub fn schedule(&self) -> Vec<usize> {
        let len = self.dates.len();
        if len == 0 {
            return Vec::new();
        }
        if self.config.model == RegimeModelKind::Static {
            return vec![0];
        }
        let required = self.config.min_observations.max(2);
        let mut present = 0;
        let mut first = None;
        for (t, row) in self.observations.rows.iter().enumerate() {
            if row.is_some() {
                present += 1;
            }
            if present >= required {
                first = Some(t);
                break;
            }
        }
        match first {
            Some(start) => (start..len).step_by(self.config.reestimate_every).collect(),
            None => Vec::new(),
        }
    }

    fn window_start(&self, e: usize) -> usize {
        match self.config.window {
            EstimationWindow::Expanding => 0,
            EstimationWindow::Rolling { periods } => (e + 1).saturating_sub(periods),
        }
    }

    /// Fit one snapshot from observations in `window_start(e)..=e`.
    pub fn estimate_at(&self, e: usize) -> Result<RegimeSnapshot, RegimeError> {
        let window_start = self.window_start(e);
        let estimation_date = *self
            .dates
            .get(e)
            .ok_or_else(|| RegimeError::InvalidConfig(format!("period {e} is out of range")))?;

        let (periods, matrix) = self.observations.matrix(window_start, e);
        let base = RegimeSnapshot {
            estimated_at: e,
            estimation_date,
            window_start,
            observations_used: periods.len(),
            labels: vec![RegimeLabel::Normal],
            model: RegimeModel::Static,
            log_likelihood: None,
            iterations: 0,
        };

        match &self.config.model {
            RegimeModelKind::Static => Ok(base),
            RegimeModelKind::Hmm {
                n_states,
                max_iterations,
                tolerance,
            } => {
                let fit = GaussianHmm::fit(
                    &matrix,
                    &HmmFitConfig {
                        n_states: *n_states,
                        max_iterations: *max_iterations,
                        tolerance: *tolerance,
                        min_observations: self.config.min_observations,
                    },
                )?;
                let means: Vec<Vec<f64>> = fit
                    .model
                    .means
                    .rows()
                    .into_iter()
                    .map(|r| r.to_vec())
                    .collect();
                Ok(RegimeSnapshot {
                    labels: assign_labels(&means),
                    log_likelihood: Some(fit.log_likelihood),
                    iterations: fit.iterations,
                    model: RegimeModel::Hmm { model: fit.model },
                    ..base
                })
            }
            RegimeModelKind::Threshold {
                n_states,
                vol_threshold,
            } => {
                let rule = ThresholdRule::new(*n_states, *vol_threshold)?;
                let rows: Vec<&[f64]> = periods
                    .iter()
                    .filter_map(|&p| self.observations.row(p))
                    .collect();
                let fit = rule.fit(&rows, self.config.min_observations)?;
                Ok(RegimeSnapshot {
                    labels: rule.labels(),
                    model: RegimeModel::Threshold { fit },
                    ..base
                })
            }
        }
    }

    /// Latest valid snapshot with `estimated_at <= t`.
    pub fn snapshot_at(&self, t: usize) -> Option<&RegimeSnapshot> {
        let idx = self.snapshots.partition_point(|s| s.estimated_at <= t);
        idx.checked_sub(1).map(|i| &self.snapshots[i])
    }

    /// Regime state at t, using observations <= t only.
    pub fn state_at(&self, t: usize) -> RegimeState {
        let Some(snapshot) = self.snapshot_at(t) else {
            return RegimeState::warmup(t);
        };
        let cached = self
            .filtered
            .get(&snapshot.estimated_at)
            .and_then(|path| path.at(t))
            .cloned();
        let filtered = match cached {
            Some(distribution) => distribution,
            None => snapshot.filter(&self.observations, t),
        };
        let Some(probabilities) = filtered else {
            return RegimeState::warmup(t);
        };
        let state_index = argmax(&probabilities).unwrap_or(0);
        let label = snapshot
            .labels
            .get(state_index)
            .copied()
            .unwrap_or(RegimeLabel::Normal);

        let failed_since = self
            .failures
            .iter()
            .any(|f| f.period <= t && f.period > snapshot.estimated_at);
        let source = if failed_since {
            RegimeSource::Fallback
        } else {
            RegimeSource::Filtered
        };

        RegimeState {
            period: t,
            label,
            state_index: Some(state_index),
            probabilities,
            source,
            estimated_at: Some(snapshot.estimated_at),
        }
    }

    pub fn states(&self) -> Vec<RegimeState> {
        (0..self.dates.len()).map(|t| self.state_at(t)).collect()
    }

    /// Smoothed posteriors over the latest snapshot's window. Analysis only;
    /// the research pipeline never reads this.
    pub fn smooth_latest(&self) -> Option<SmoothedRegimes> {
        self.snapshots
            .last()
            .map(|s| s.smooth(&self.observations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{SyntheticConfig, SyntheticPanel};

    fn synthetic(periods: usize) -> Panel {
        SyntheticPanel::generate(&SyntheticConfig {
            instruments: 8,
            periods,
            seed: 5,
            ..Default::default()
        })
        .unwrap()
        .panel
    }

    fn threshold_config() -> RegimeConfig {
        RegimeConfig {
            model: RegimeModelKind::Threshold {
                n_states: 3,
                vol_threshold: 0.02,
            },
            reestimate_every: 10,
            window: EstimationWindow::Expanding,
            min_observations: 20,
            vol_window: 10,
            macro_fields: Vec::new(),
        }
    }

    #[test]
    fn static_model_is_always_normal() {
        let panel = synthetic(30);
        let det =
            RegimeDetector::estimate(&panel, &UniverseRules::default(), &RegimeConfig::default())
                .unwrap();
        assert_eq!(det.snapshots().len(), 1);
        for state in det.states() {
            assert_eq!(state.label, RegimeLabel::Normal);
            assert_eq!(state.source, RegimeSource::Filtered);
            assert_eq!(state.probabilities, vec![1.0]);
        }
    }

    #[test]
    fn warmup_before_first_snapshot() {
        let panel = synthetic(80);
        let det =
            RegimeDetector::estimate(&panel, &UniverseRules::default(), &threshold_config())
                .unwrap();
        let schedule = det.schedule();
        let first = schedule[0];
        // 10-period vol window: rows start at t = 10; 20 rows by t = 29
        assert_eq!(first, 29);
        assert_eq!(det.state_at(first - 1).source, RegimeSource::Warmup);
        assert_eq!(det.state_at(first).source, RegimeSource::Filtered);
        assert_eq!(det.snapshot_at(45).map(|s| s.estimated_at), Some(39));
    }

    #[test]
    fn state_at_ignores_future_observations() {
        let panel = synthetic(120);
        let cfg = RegimeConfig {
            model: RegimeModelKind::Hmm {
                n_states: 2,
                max_iterations: 300,
                tolerance: 1e-6,
            },
            ..threshold_config()
        };
        let full = RegimeDetector::estimate(&panel, &UniverseRules::default(), &cfg).unwrap();
        let cut = 70;
        let partial =
            RegimeDetector::estimate(&panel.truncated(cut), &UniverseRules::default(), &cfg)
                .unwrap();
        for t in 0..=cut {
            assert_eq!(full.state_at(t), partial.state_at(t), "period {t}");
        }
    }

    #[test]
    fn served_paths_match_a_fresh_forward_pass() {
        let panel = synthetic(120);
        for model in [
            RegimeModelKind::Hmm {
                n_states: 2,
                max_iterations: 300,
                tolerance: 1e-6,
            },
            threshold_config().model,
        ] {
            let cfg = RegimeConfig {
                model,
                window: EstimationWindow::Rolling { periods: 40 },
                ..threshold_config()
            };
            let det = RegimeDetector::estimate(&panel, &UniverseRules::default(), &cfg).unwrap();
            assert_eq!(det.filtered.len(), det.snapshots().len());
            for t in 0..panel.len() {
                let Some(snapshot) = det.snapshot_at(t) else {
                    continue;
                };
                let path = &det.filtered[&snapshot.estimated_at];
                assert!(path.at(t).is_some(), "period {t} not served from the cache");
                let fresh = snapshot.filter(det.observations(), t);
                assert_eq!(det.state_at(t).probabilities, fresh.unwrap_or_default());
            }
        }
    }

    #[test]
    fn failed_estimation_flags_fallback() {
        let panel = synthetic(80);
        let cfg = RegimeConfig {
            window: EstimationWindow::Rolling { periods: 20 },
            ..threshold_config()
        };
        let mut det = RegimeDetector::estimate(&panel, &UniverseRules::default(), &cfg).unwrap();
        assert!(det.failures().is_empty());
        // Inject a failed attempt after the first snapshot.
        let first = det.snapshots()[0].estimated_at;
        det.snapshots.retain(|s| s.estimated_at == first);
        det.failures.push(EstimationFailure {
            period: first + 10,
            date: det.dates[first + 10],
            reason: "did not converge".into(),
        });
        assert_eq!(det.state_at(first + 5).source, RegimeSource::Filtered);
        let degraded = det.state_at(first + 12);
        assert_eq!(degraded.source, RegimeSource::Fallback);
        assert!(degraded.is_degraded());
        assert_eq!(degraded.estimated_at, Some(first));
    }

    #[test]
    fn non_convergence_is_recorded_not_fatal() {
        let panel = synthetic(80);
        let cfg = RegimeConfig {
            model: RegimeModelKind::Hmm {
                n_states: 2,
                max_iterations: 1,
                tolerance: 1e-12,
            },
            ..threshold_config()
        };
        let det = RegimeDetector::estimate(&panel, &UniverseRules::default(), &cfg).unwrap();
        assert!(det.snapshots().is_empty());
        assert_eq!(det.failures().len(), det.schedule().len());
        assert_eq!(det.state_at(79).source, RegimeSource::Warmup);
    }

    #[test]
    fn invalid_config_rejected() {
        let cfg = RegimeConfig {
            model: RegimeModelKind::Hmm {
                n_states: 5,
                max_iterations: 10,
                tolerance: 1e-6,
            },
            ..RegimeConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
