//! Diagonal-Gaussian hidden Markov model.
//!
//! Emissions are scaled per observation (log-sum-exp) and the forward and
//! backward passes are normalized per step, so long windows do not underflow.
//! Fitting is Baum-Welch from a deterministic quantile initialization: the
//! same observations always produce the same parameters.

use super::RegimeError;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::f64::consts::PI;
use tracing::debug;

/// Self-transition probability used to seed Baum-Welch.
const INITIAL_PERSISTENCE: f64 = 0.9;
/// Per-feature variance floor as a fraction of the sample variance.
const VARIANCE_FLOOR_RATIO: f64 = 1e-4;
const ABSOLUTE_VARIANCE_FLOOR: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianHmm {
    pub initial: Array1<f64>,
    /// Row-stochastic, `transition[[i, j]] = P(j | i)`.
    pub transition: Array2<f64>,
    /// `n_states × dimension`.
    pub means: Array2<f64>,
    /// `n_states × dimension`, diagonal covariances.
    pub variances: Array2<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HmmFitConfig {
    pub n_states: usize,
    pub max_iterations: usize,
    /// Convergence threshold on the relative change of the log-likelihood.
    pub tolerance: f64,
    pub min_observations: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HmmFit {
    pub model: GaussianHmm,
    pub log_likelihood: f64,
    pub iterations: usize,
}

/// Forward-backward output over a window.
#[derive(Debug, Clone)]
pub struct Posteriors {
    /// Filtered distributions P(s_t | x_0..=t).
    pub filtered: Array2<f64>,
    /// Smoothed distributions P(s_t | x_0..T).
    pub smoothed: Array2<f64>,
    /// Expected transition counts summed over the window.
    pub transitions: Array2<f64>,
    pub log_likelihood: f64,
}

impl GaussianHmm {
    pub fn n_states(&self) -> usize {
        self.initial.len()
    }

    pub fn dimension(&self) -> usize {
        self.means.ncols()
    }

    pub fn log_emission(&self, state: usize, x: ArrayView1<f64>) -> f64 {
        let mut lp = 0.0;
        for k in 0..self.dimension() {
            let var = self.variances[[state, k]];
            let diff = x[k] - self.means[[state, k]];
            lp -= 0.5 * ((2.0 * PI * var).ln() + diff * diff / var);
        }
        lp
    }

    /// Emission likelihoods divided by their maximum, plus the log of that
    /// maximum.
    fn scaled_emissions(&self, x: ArrayView1<f64>) -> (Array1<f64>, f64) {
        let logs: Array1<f64> = (0..self.n_states())
            .map(|j| self.log_emission(j, x))
            .collect();
        let max = logs.fold(f64::NEG_INFINITY, |m, &l| m.max(l));
        (logs.mapv(|l| (l - max).exp()), max)
    }

    /// One filtering step. `prev` is the filtered distribution at t − 1 (or
    /// `None` at the first observation). Returns the filtered distribution at
    /// t and the log-likelihood increment.
    pub fn filter_step(&self, prev: Option<&Array1<f64>>, x: ArrayView1<f64>) -> (Array1<f64>, f64) {
        let predicted = match prev {
            Some(alpha) => alpha.dot(&self.transition),
            None => self.initial.clone(),
        };
        let (b, max) = self.scaled_emissions(x);
        let mut alpha = &predicted * &b;
        let c = alpha.sum();
        if !(c > 0.0 && c.is_finite()) {
            return (predicted, f64::NEG_INFINITY);
        }
        alpha /= c;
        (alpha, c.ln() + max)
    }

    /// One-step prediction without an observation.
    pub fn predict(&self, alpha: &Array1<f64>) -> Array1<f64> {
        alpha.dot(&self.transition)
    }

    /// Scaled forward-backward over the rows of `obs`.
    pub fn posteriors(&self, obs: &Array2<f64>) -> Posteriors {
        let t_len = obs.nrows();
        let n = self.n_states();
        let mut filtered = Array2::<f64>::zeros((t_len, n));
        let mut emissions = Array2::<f64>::zeros((t_len, n));
        let mut scales = vec![0.0; t_len];
        let mut log_likelihood = 0.0;

        for t in 0..t_len {
            let x = obs.row(t);
            let (b, max) = self.scaled_emissions(x);
            let predicted = if t == 0 {
                self.initial.clone()
            } else {
                filtered.row(t - 1).dot(&self.transition)
            };
            let mut alpha = &predicted * &b;
            let c = alpha.sum();
            if c > 0.0 && c.is_finite() {
                alpha /= c;
                log_likelihood += c.ln() + max;
            } else {
                log_likelihood = f64::NEG_INFINITY;
            }
            scales[t] = c;
            filtered.row_mut(t).assign(&alpha);
            emissions.row_mut(t).assign(&b);
        }

        let mut beta = Array2::<f64>::ones((t_len, n));
        for t in (0..t_len.saturating_sub(1)).rev() {
            let weighted = &emissions.row(t + 1) * &beta.row(t + 1);
            let mut next = self.transition.dot(&weighted);
            if scales[t + 1] > 0.0 {
                next /= scales[t + 1];
            }
            beta.row_mut(t).assign(&next);
        }

        let mut smoothed = &filtered * &beta;
        for mut row in smoothed.axis_iter_mut(Axis(0)) {
            let s = row.sum();
            if s > 0.0 {
                row /= s;
            }
        }

        let mut transitions = Array2::<f64>::zeros((n, n));
        for t in 0..t_len.saturating_sub(1) {
            if scales[t + 1] <= 0.0 {
                continue;
            }
            for i in 0..n {
                for j in 0..n {
                    transitions[[i, j]] += filtered[[t, i]]
                        * self.transition[[i, j]]
                        * emissions[[t + 1, j]]
                        * beta[[t + 1, j]]
                        / scales[t + 1];
                }
            }
        }

        Posteriors {
            filtered,
            smoothed,
            transitions,
            log_likelihood,
        }
    }

    /// Most likely state sequence (log-space Viterbi).
    pub fn viterbi(&self, obs: &Array2<f64>) -> Vec<usize> {
        let t_len = obs.nrows();
        let n = self.n_states();
        if t_len == 0 || n == 0 {
            return Vec::new();
        }
        let log_initial = self.initial.mapv(|p| (p + 1e-300).ln());
        let log_trans = self.transition.mapv(|p| (p + 1e-300).ln());

        let mut delta = Array2::<f64>::zeros((t_len, n));
        let mut psi = Array2::<usize>::zeros((t_len, n));
        for j in 0..n {
            delta[[0, j]] = log_initial[j] + self.log_emission(j, obs.row(0));
        }
        for t in 1..t_len {
            for j in 0..n {
                let mut best_val = f64::NEG_INFINITY;
                let mut best_state = 0;
                for i in 0..n {
                    let val = delta[[t - 1, i]] + log_trans[[i, j]];
                    if val > best_val {
                        best_val = val;
                        best_state = i;
                    }
                }
                delta[[t, j]] = best_val + self.log_emission(j, obs.row(t));
                psi[[t, j]] = best_state;
            }
        }

        let mut path = vec![0; t_len];
        let mut best = f64::NEG_INFINITY;
        for j in 0..n {
            if delta[[t_len - 1, j]] > best {
                best = delta[[t_len - 1, j]];
                path[t_len - 1] = j;
            }
        }
        for t in (0..t_len - 1).rev() {
            path[t] = psi[[t + 1, path[t + 1]]];
        }
        path
    }

    /// Deterministic starting point: rows sorted by the first feature and cut
    /// into `n_states` contiguous quantile buckets; bucket means seed the
    /// state means, the pooled variance seeds every state.
    pub fn initialize(obs: &Array2<f64>, n_states: usize) -> Self {
        let t_len = obs.nrows();
        let d = obs.ncols();
        let floors = variance_floors(obs);

        let mut order: Vec<usize> = (0..t_len).collect();
        order.sort_by(|&a, &b| {
            obs[[a, 0]]
                .partial_cmp(&obs[[b, 0]])
                .unwrap_or(Ordering::Equal)
                .then(a.cmp(&b))
        });

        let pooled_mean = obs.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(d));
        let mut means = Array2::<f64>::zeros((n_states, d));
        for s in 0..n_states {
            let lo = s * t_len / n_states;
            let hi = ((s + 1) * t_len / n_states).max(lo + 1).min(t_len);
            if lo >= hi {
                means.row_mut(s).assign(&pooled_mean);
                continue;
            }
            for k in 0..d {
                let sum: f64 = order[lo..hi].iter().map(|&r| obs[[r, k]]).sum();
                means[[s, k]] = sum / (hi - lo) as f64;
            }
        }

        let mut variances = Array2::<f64>::zeros((n_states, d));
        for k in 0..d {
            let col = obs.column(k);
            let m = pooled_mean[k];
            let var = col.iter().map(|x| (x - m).powi(2)).sum::<f64>() / t_len.max(1) as f64;
            for s in 0..n_states {
                variances[[s, k]] = var.max(floors[k]);
            }
        }

        let mut transition = Array2::<f64>::zeros((n_states, n_states));
        for i in 0..n_states {
            for j in 0..n_states {
                transition[[i, j]] = if n_states == 1 {
                    1.0
                } else if i == j {
                    INITIAL_PERSISTENCE
                } else {
                    (1.0 - INITIAL_PERSISTENCE) / (n_states - 1) as f64
                };
            }
        }

        Self {
            initial: Array1::from_elem(n_states, 1.0 / n_states as f64),
            transition,
            means,
            variances,
        }
    }

    /// Baum-Welch fit.
    pub fn fit(obs: &Array2<f64>, config: &HmmFitConfig) -> Result<HmmFit, RegimeError> {
        let required = config.min_observations.max(config.n_states).max(2);
        if obs.nrows() < required {
            return Err(RegimeError::InsufficientObservations {
                available: obs.nrows(),
                required,
            });
        }
        if config.n_states == 0 {
            return Err(RegimeError::InvalidConfig("n_states must be >= 1".into()));
        }

        let floors = variance_floors(obs);
        let mut model = Self::initialize(obs, config.n_states);
        let mut prev_ll = f64::NEG_INFINITY;
        let mut last_change = f64::INFINITY;

        for iteration in 1..=config.max_iterations {
            let post = model.posteriors(obs);
            let ll = post.log_likelihood;
            if !ll.is_finite() {
                return Err(RegimeError::NonFiniteLikelihood { iteration });
            }
            if iteration > 1 {
                last_change = (ll - prev_ll).abs();
                if last_change <= config.tolerance * ll.abs().max(1.0) {
                    debug!(iteration, log_likelihood = ll, "baum-welch converged");
                    return Ok(HmmFit {
                        model,
                        log_likelihood: ll,
                        iterations: iteration,
                    });
                }
            }
            model = model.reestimate(obs, &post, &floors);
            prev_ll = ll;
        }

        Err(RegimeError::NotConverged {
            iterations: config.max_iterations,
            last_change,
        })
    }

    fn reestimate(&self, obs: &Array2<f64>, post: &Posteriors, floors: &[f64]) -> Self {
        let n = self.n_states();
        let d = self.dimension();
        let gamma = &post.smoothed;
        let mut next = self.clone();

        let first = gamma.row(0);
        let total = first.sum();
        if total > 0.0 {
            next.initial = first.mapv(|p| p / total);
        }

        for i in 0..n {
            let row_sum: f64 = post.transitions.row(i).sum();
            if row_sum > 1e-300 {
                for j in 0..n {
                    next.transition[[i, j]] = post.transitions[[i, j]] / row_sum;
                }
            }
        }

        for j in 0..n {
            let weight: f64 = gamma.column(j).sum();
            if weight < 1e-10 {
                continue;
            }
            for k in 0..d {
                let mean = gamma
                    .column(j)
                    .iter()
                    .zip(obs.column(k).iter())
                    .map(|(g, x)| g * x)
                    .sum::<f64>()
                    / weight;
                let var = gamma
                    .column(j)
                    .iter()
                    .zip(obs.column(k).iter())
                    .map(|(g, x)| g * (x - mean).powi(2))
                    .sum::<f64>()
                    / weight;
                next.means[[j, k]] = mean;
                next.variances[[j, k]] = var.max(floors[k]);
            }
        }
        next
    }
}

fn variance_floors(obs: &Array2<f64>) -> Vec<f64> {
    let t_len = obs.nrows().max(1) as f64;
    (0..obs.ncols())
        .map(|k| {
            let col = obs.column(k);
            let m = col.sum() / t_len;
            let var = col.iter().map(|x| (x - m).powi(2)).sum::<f64>() / t_len;
            (var * VARIANCE_FLOOR_RATIO).max(ABSOLUTE_VARIANCE_FLOOR)
        })
        .collect()
}
