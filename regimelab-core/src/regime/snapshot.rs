//! Immutable regime-model snapshots keyed by estimation period.

use super::hmm::GaussianHmm;
use super::observations::RegimeObservations;
use super::state::RegimeLabel;
use super::threshold::ThresholdFit;
use crate::rng::RngHierarchy;
use chrono::NaiveDate;
use ndarray::{Array1, Array2};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// The fitted switching model inside a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegimeModel {
    Static,
    Hmm { model: GaussianHmm },
    Threshold { fit: ThresholdFit },
}

/// One estimation, fitted on observations in `window_start..=estimated_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeSnapshot {
    pub estimated_at: usize,
    pub estimation_date: NaiveDate,
    pub window_start: usize,
    pub observations_used: usize,
    /// Label per state index.
    pub labels: Vec<RegimeLabel>,
    pub model: RegimeModel,
    pub log_likelihood: Option<f64>,
    pub iterations: usize,
}

/// A failed estimation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationFailure {
    pub period: usize,
    pub date: NaiveDate,
    pub reason: String,
}

/// Full-window posteriors for historical analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmoothedRegimes {
    pub periods: Vec<usize>,
    pub probabilities: Vec<Vec<f64>>,
    /// Most likely state path.
    pub path: Vec<usize>,
    pub labels: Vec<RegimeLabel>,
}

impl RegimeSnapshot {
    pub fn n_states(&self) -> usize {
        self.labels.len()
    }

    pub fn transition(&self) -> Array2<f64> {
        match &self.model {
            RegimeModel::Static => Array2::ones((1, 1)),
            RegimeModel::Hmm { model } => model.transition.clone(),
            RegimeModel::Threshold { fit } => fit.transition.clone(),
        }
    }

    fn initial(&self) -> Array1<f64> {
        match &self.model {
            RegimeModel::Hmm { model } => model.initial.clone(),
            _ => {
                let n = self.n_states().max(1);
                Array1::from_elem(n, 1.0 / n as f64)
            }
        }
    }

    /// Filtered state distribution at t from observations in
    /// `window_start..=t`. Periods without an observation advance the
    /// distribution by one transition step.
    pub fn filter(&self, obs: &RegimeObservations, t: usize) -> Option<Vec<f64>> {
        if t < self.window_start {
            return None;
        }
        self.filter_path(obs, t).pop().flatten()
    }

    /// Filtered distributions for every period in `window_start..=through`,
    /// from one forward pass. Entry `i` is period `window_start + i`; `None`
    /// until the first observation.
    pub fn filter_path(&self, obs: &RegimeObservations, through: usize) -> Vec<Option<Vec<f64>>> {
        if through < self.window_start {
            return Vec::new();
        }
        let periods = self.window_start..=through;
        match &self.model {
            RegimeModel::Static => periods.map(|_| Some(vec![1.0])).collect(),
            RegimeModel::Hmm { model } => {
                let mut alpha: Option<Array1<f64>> = None;
                periods
                    .map(|p| {
                        alpha = match (obs.rows.get(p).and_then(|r| r.as_ref()), alpha.take()) {
                            (Some(row), prev) => {
                                let x = ndarray::ArrayView1::from(row.as_slice());
                                Some(model.filter_step(prev.as_ref(), x).0)
                            }
                            (None, Some(prev)) => Some(model.predict(&prev)),
                            (None, None) => None,
                        };
                        alpha.as_ref().map(|a| a.to_vec())
                    })
                    .collect()
            }
            RegimeModel::Threshold { fit } => {
                let n = fit.rule.n_states;
                let mut dist: Option<Array1<f64>> = None;
                periods
                    .map(|p| {
                        dist = match (obs.row(p), dist.take()) {
                            (Some(row), _) => {
                                let mut one_hot = Array1::<f64>::zeros(n);
                                one_hot[fit.rule.classify(row)] = 1.0;
                                Some(one_hot)
                            }
                            (None, Some(prev)) => Some(prev.dot(&fit.transition)),
                            (None, None) => None,
                        };
                        dist.as_ref().map(|d| d.to_vec())
                    })
                    .collect()
            }
        }
    }

    /// Forward-backward posteriors and the most likely path over the
    /// snapshot's own window. Analysis only.
    pub fn smooth(&self, obs: &RegimeObservations) -> SmoothedRegimes {
        let (periods, matrix) = obs.matrix(self.window_start, self.estimated_at);
        let (probabilities, path) = match &self.model {
            RegimeModel::Static => (vec![vec![1.0]; periods.len()], vec![0; periods.len()]),
            RegimeModel::Hmm { model } => {
                let post = model.posteriors(&matrix);
                let probs = post.smoothed.rows().into_iter().map(|r| r.to_vec()).collect();
                (probs, model.viterbi(&matrix))
            }
            RegimeModel::Threshold { fit } => {
                let n = fit.rule.n_states;
                let path: Vec<usize> = matrix
                    .rows()
                    .into_iter()
                    .map(|r| fit.rule.classify(&r.to_vec()))
                    .collect();
                let probs = path
                    .iter()
                    .map(|&s| {
                        let mut p = vec![0.0; n];
                        p[s] = 1.0;
                        p
                    })
                    .collect();
                (probs, path)
            }
        };
        let labels = path
            .iter()
            .map(|&s| self.labels.get(s).copied().unwrap_or(RegimeLabel::Normal))
            .collect();
        SmoothedRegimes {
            periods,
            probabilities,
            path,
            labels,
        }
    }

    /// Sample a state path of length `len` from the snapshot's initial
    /// distribution and transition matrix.
    pub fn simulate(&self, len: usize, seed: u64) -> Vec<usize> {
        let mut rng = RngHierarchy::new(seed).rng_for("regime", "simulate", self.estimated_at as u64);
        let transition = self.transition();
        let mut path = Vec::with_capacity(len);
        if len == 0 {
            return path;
        }
        let mut state = sample_index(&self.initial().to_vec(), rng.gen::<f64>());
        path.push(state);
        for _ in 1..len {
            let row = transition.row(state).to_vec();
            state = sample_index(&row, rng.gen::<f64>());
            path.push(state);
        }
        path
    }
}

fn sample_index(probs: &[f64], u: f64) -> usize {
    let total: f64 = probs.iter().sum();
    let mut acc = 0.0;
    for (i, p) in probs.iter().enumerate() {
        acc += p / total;
        if u < acc {
            return i;
        }
    }
    probs.len().saturating_sub(1)
}

/// Row-normalized empirical transition frequencies of a state path.
pub fn transition_frequencies(path: &[usize], n_states: usize) -> Array2<f64> {
    let mut counts = Array2::<f64>::zeros((n_states, n_states));
    for pair in path.windows(2) {
        if pair[0] < n_states && pair[1] < n_states {
            counts[[pair[0], pair[1]]] += 1.0;
        }
    }
    for mut row in counts.rows_mut() {
        let total = row.sum();
        if total > 0.0 {
            row /= total;
        }
    }
    counts
}
