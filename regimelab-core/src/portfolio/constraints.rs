//! Exposure constraints, feasibility checks and the constraint projection.
//!
//! Hard constraints: gross limit (Σ|w| ≤ gross), per-name cap (|w| ≤ cap, and
//! w ≥ 0 when long-only) and the net band (net_min ≤ Σw ≤ net_max). The
//! turnover budget is soft.

use super::ConstructionError;
use crate::domain::{gross_exposure, net_exposure, turnover_between, WeightMap};
use serde::{Deserialize, Serialize};

/// Slack allowed when checking a produced weight vector.
pub const CONSTRAINT_TOLERANCE: f64 = 1e-6;

const BISECTION_STEPS: usize = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Constraints {
    pub gross_limit: f64,
    pub net_min: f64,
    pub net_max: f64,
    /// Per-name absolute weight cap.
    pub max_weight: f64,
    pub long_only: bool,
    /// Maximum Σ|Δw| per rebalance (soft).
    pub turnover_budget: Option<f64>,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            gross_limit: 1.0,
            net_min: 0.0,
            net_max: 1.0,
            max_weight: 1.0,
            long_only: true,
            turnover_budget: None,
        }
    }
}

impl Constraints {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.gross_limit > 0.0 && self.gross_limit.is_finite()) {
            return Err(format!("gross_limit must be > 0, got {}", self.gross_limit));
        }
        if !(self.max_weight > 0.0 && self.max_weight.is_finite()) {
            return Err(format!("max_weight must be > 0, got {}", self.max_weight));
        }
        if self.net_min > self.net_max {
            return Err(format!(
                "net band is empty: net_min {} > net_max {}",
                self.net_min, self.net_max
            ));
        }
        if let Some(budget) = self.turnover_budget {
            if !(budget > 0.0) {
                return Err(format!("turnover_budget must be > 0, got {budget}"));
            }
        }
        Ok(())
    }

    /// Lower per-name bound.
    pub fn lower_bound(&self) -> f64 {
        if self.long_only {
            0.0
        } else {
            -self.max_weight
        }
    }

    /// Range of net exposure reachable with `n` names under the cap and gross
    /// limit.
    pub fn achievable_net(&self, n: usize) -> (f64, f64) {
        let reach = (n as f64 * self.max_weight).min(self.gross_limit);
        let low = if self.long_only { 0.0 } else { -reach };
        (low, reach)
    }

    /// Whether any weight vector over `n` names satisfies every hard
    /// constraint.
    pub fn check_feasible(&self, n: usize) -> Result<(), ConstructionError> {
        let (low, high) = self.achievable_net(n);
        if high < self.net_min - CONSTRAINT_TOLERANCE || low > self.net_max + CONSTRAINT_TOLERANCE {
            return Err(ConstructionError::InfeasibleConstraints {
                reason: format!(
                    "net exposure reachable with {n} names is [{low:.4}, {high:.4}] \
                     (cap {:.4}, gross {:.4}), required [{:.4}, {:.4}]",
                    self.max_weight, self.gross_limit, self.net_min, self.net_max
                ),
            });
        }
        Ok(())
    }

    /// Hard-constraint violations of `weights`, empty when feasible.
    pub fn violations(&self, weights: &WeightMap) -> Vec<String> {
        let mut out = Vec::new();
        let gross = gross_exposure(weights);
        if gross > self.gross_limit + CONSTRAINT_TOLERANCE {
            out.push(format!("gross {gross:.6} > limit {:.6}", self.gross_limit));
        }
        let net = net_exposure(weights);
        if net < self.net_min - CONSTRAINT_TOLERANCE || net > self.net_max + CONSTRAINT_TOLERANCE {
            out.push(format!(
                "net {net:.6} outside [{:.6}, {:.6}]",
                self.net_min, self.net_max
            ));
        }
        for (sym, w) in weights {
            if w.abs() > self.max_weight + CONSTRAINT_TOLERANCE {
                out.push(format!("{sym}: |{w:.6}| > cap {:.6}", self.max_weight));
            }
            if self.long_only && *w < -CONSTRAINT_TOLERANCE {
                out.push(format!("{sym}: short {w:.6} in long-only book"));
            }
        }
        out
    }

    /// Net band widened to what the gross limit allows, no turnover budget.
    pub fn relaxed(&self) -> Self {
        Self {
            net_min: if self.long_only { 0.0 } else { -self.gross_limit },
            net_max: self.gross_limit,
            turnover_budget: None,
            ..self.clone()
        }
    }

    /// Scale the move from `current` toward `target` so turnover stays within
    /// the budget. Returns the target unchanged when there is no budget, the
    /// budget is not binding, or the blend breaks a hard constraint.
    pub fn apply_turnover_budget(&self, target: &WeightMap, current: &WeightMap) -> WeightMap {
        let Some(budget) = self.turnover_budget else {
            return target.clone();
        };
        let turnover = turnover_between(current, target);
        if turnover <= budget {
            return target.clone();
        }
        let fraction = budget / turnover;
        let mut blended = WeightMap::new();
        for sym in current.keys().chain(target.keys()) {
            let from = current.get(sym).copied().unwrap_or(0.0);
            let to = target.get(sym).copied().unwrap_or(0.0);
            blended.insert(sym.clone(), from + fraction * (to - from));
        }
        crate::domain::prune(&mut blended);
        if self.violations(&blended).is_empty() {
            blended
        } else {
            target.clone()
        }
    }

    /// Euclidean projection of `v` onto the hard-constraint set.
    ///
    /// Each coordinate of the projection is
    /// `clip(soft(vᵢ - τ, θ), lower, cap)`, where τ prices the net band and
    /// θ ≥ 0 the gross limit. Both multipliers are found by bisection; the
    /// net is monotone in τ and the gross, with τ re-solved, is monotone in θ.
    /// Callers must check feasibility first.
    pub fn project(&self, v: &[f64]) -> Vec<f64> {
        if v.is_empty() {
            return Vec::new();
        }
        let at = |theta: f64| -> Vec<f64> {
            let tau = self.solve_net_multiplier(v, theta);
            self.coordinates(v, tau, theta)
        };
        let gross = |w: &[f64]| w.iter().map(|x| x.abs()).sum::<f64>();

        let w0 = at(0.0);
        if gross(&w0) <= self.gross_limit {
            return w0;
        }
        let mut lo = 0.0;
        let mut hi = v.iter().fold(0.0_f64, |m, x| m.max(x.abs())) + self.max_weight + 1.0;
        for _ in 0..BISECTION_STEPS {
            if gross(&at(hi)) <= self.gross_limit {
                break;
            }
            hi *= 2.0;
        }
        for _ in 0..BISECTION_STEPS {
            let mid = 0.5 * (lo + hi);
            if gross(&at(mid)) > self.gross_limit {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        at(hi)
    }

    fn coordinates(&self, v: &[f64], tau: f64, theta: f64) -> Vec<f64> {
        let lower = self.lower_bound();
        v.iter()
            .map(|x| {
                let shifted = x - tau;
                let soft = shifted.signum() * (shifted.abs() - theta).max(0.0);
                soft.clamp(lower, self.max_weight)
            })
            .collect()
    }

    fn solve_net_multiplier(&self, v: &[f64], theta: f64) -> f64 {
        let net = |tau: f64| self.coordinates(v, tau, theta).iter().sum::<f64>();
        let n0 = net(0.0);
        if n0 >= self.net_min && n0 <= self.net_max {
            return 0.0;
        }
        let span = v.iter().fold(0.0_f64, |m, x| m.max(x.abs())) + theta + 2.0 * self.max_weight + 1.0;
        // net(τ) is non-increasing in τ.
        let (mut lo, mut hi, target) = if n0 > self.net_max {
            (0.0, span, self.net_max)
        } else {
            (-span, 0.0, self.net_min)
        };
        for _ in 0..BISECTION_STEPS {
            let mid = 0.5 * (lo + hi);
            if net(mid) > target {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        // Return the side that lies inside the band.
        if n0 > self.net_max {
            hi
        } else {
            lo
        }
    }
}

/// Distribute `total` over positive `raw` scores in proportion, capping each
/// entry at `cap` and redistributing the excess. If `total` exceeds
/// `raw.len() · cap`, every entry ends at `cap`.
pub fn water_fill(raw: &[f64], total: f64, cap: f64) -> Vec<f64> {
    let mut out = vec![0.0; raw.len()];
    let mut free: Vec<usize> = (0..raw.len()).filter(|&i| raw[i] > 0.0).collect();
    let mut remaining = total.max(0.0);
    while !free.is_empty() && remaining > 0.0 {
        let mass: f64 = free.iter().map(|&i| raw[i]).sum();
        let scale = remaining / mass;
        let (capped, open): (Vec<usize>, Vec<usize>) =
            free.iter().partition(|&&i| raw[i] * scale >= cap);
        if capped.is_empty() {
            for &i in &open {
                out[i] = raw[i] * scale;
            }
            break;
        }
        for &i in &capped {
            out[i] = cap;
            remaining -= cap;
        }
        free = open;
    }
    out
}
