//! Portfolio weight vectors.

use super::ids::Symbol;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Signed weights keyed by instrument, as fractions of NAV.
pub type WeightMap = BTreeMap<Symbol, f64>;

/// Weights below this magnitude are dropped from holdings.
pub const WEIGHT_EPSILON: f64 = 1e-12;

/// Sum of absolute weights.
pub fn gross_exposure(weights: &WeightMap) -> f64 {
    weights.values().map(|w| w.abs()).sum()
}

/// Sum of signed weights.
pub fn net_exposure(weights: &WeightMap) -> f64 {
    weights.values().sum()
}

/// Σ|a_i − b_i| over the union of both key sets.
pub fn turnover_between(a: &WeightMap, b: &WeightMap) -> f64 {
    let mut total = 0.0;
    for (symbol, wa) in a {
        total += (wa - b.get(symbol).copied().unwrap_or(0.0)).abs();
    }
    for (symbol, wb) in b {
        if !a.contains_key(symbol) {
            total += wb.abs();
        }
    }
    total
}

/// Remove near-zero entries.
pub fn prune(weights: &mut WeightMap) {
    weights.retain(|_, w| w.abs() > WEIGHT_EPSILON);
}

/// Target weights produced for one period.
///
/// `as_of` is the date of the latest data used to produce the weights; the
/// engine rejects targets whose `as_of` is after the period being processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetWeights {
    pub as_of: NaiveDate,
    pub weights: WeightMap,
}

impl TargetWeights {
    pub fn new(as_of: NaiveDate, mut weights: WeightMap) -> Self {
        prune(&mut weights);
        Self { as_of, weights }
    }

    pub fn empty(as_of: NaiveDate) -> Self {
        Self {
            as_of,
            weights: WeightMap::new(),
        }
    }

    pub fn weight(&self, symbol: &str) -> f64 {
        self.weights.get(symbol).copied().unwrap_or(0.0)
    }

    pub fn gross(&self) -> f64 {
        gross_exposure(&self.weights)
    }

    pub fn net(&self) -> f64 {
        net_exposure(&self.weights)
    }

    pub fn max_abs_weight(&self) -> f64 {
        self.weights.values().fold(0.0, |m, w| m.max(w.abs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, f64)]) -> WeightMap {
        entries.iter().map(|(s, w)| (s.to_string(), *w)).collect()
    }

    #[test]
    fn exposures() {
        let w = map(&[("A", 0.6), ("B", -0.4)]);
        assert!((gross_exposure(&w) - 1.0).abs() < 1e-12);
        assert!((net_exposure(&w) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn turnover_covers_union_of_keys() {
        let a = map(&[("A", 0.5), ("B", 0.5)]);
        let b = map(&[("B", 0.25), ("C", 0.75)]);
        // |0.5 - 0| + |0.5 - 0.25| + |0 - 0.75|
        assert!((turnover_between(&a, &b) - 1.5).abs() < 1e-12);
        assert!((turnover_between(&b, &a) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn target_weights_prune_zeros() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let tw = TargetWeights::new(date, map(&[("A", 1.0), ("B", 0.0)]));
        assert_eq!(tw.weights.len(), 1);
        assert_eq!(tw.weight("B"), 0.0);
        assert_eq!(tw.max_abs_weight(), 1.0);
    }
}
