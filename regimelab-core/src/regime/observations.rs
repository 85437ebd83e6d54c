//! Regime observation vectors.
//!
//! Row t is `[market return, market volatility, macro series…]`, where the
//! market return is the equal-weighted mean period return of instruments
//! eligible at t and the volatility is the sample standard deviation of the
//! market return over the trailing `vol_window` periods. Every component of
//! row t reads data <= t. A period lacking any component has no row.

use crate::data::{Panel, UniverseRules};
use crate::stats::{mean, std_dev};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

pub const MARKET_RETURN: &str = "market_return";
pub const MARKET_VOLATILITY: &str = "market_volatility";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeObservations {
    pub feature_names: Vec<String>,
    pub rows: Vec<Option<Vec<f64>>>,
}

impl RegimeObservations {
    pub fn build(
        panel: &Panel,
        universe: &UniverseRules,
        vol_window: usize,
        macro_fields: &[String],
    ) -> Self {
        let vol_window = vol_window.max(2);
        let market: Vec<Option<f64>> = (0..panel.len())
            .map(|t| {
                let returns: Vec<f64> = universe
                    .eligible(panel, t)
                    .iter()
                    .filter_map(|s| panel.period_return(s, t))
                    .collect();
                (!returns.is_empty()).then(|| mean(&returns))
            })
            .collect();

        let rows = (0..panel.len())
            .map(|t| {
                let ret = market[t]?;
                if t + 1 < vol_window {
                    return None;
                }
                let window: Option<Vec<f64>> = market[t + 1 - vol_window..=t].iter().copied().collect();
                let vol = std_dev(&window?);
                let mut row = vec![ret, vol];
                for name in macro_fields {
                    row.push(panel.macro_value(name, t)?);
                }
                Some(row)
            })
            .collect();

        let mut feature_names = vec![MARKET_RETURN.to_string(), MARKET_VOLATILITY.to_string()];
        feature_names.extend(macro_fields.iter().cloned());
        Self {
            feature_names,
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.feature_names.len()
    }

    pub fn row(&self, t: usize) -> Option<&[f64]> {
        self.rows.get(t)?.as_deref()
    }

    /// Number of present rows in `start..=end`.
    pub fn count_present(&self, start: usize, end: usize) -> usize {
        if start > end || start >= self.rows.len() {
            return 0;
        }
        let end = end.min(self.rows.len() - 1);
        self.rows[start..=end].iter().filter(|r| r.is_some()).count()
    }

    /// Present rows in `start..=end` as a matrix plus their period indices.
    pub fn matrix(&self, start: usize, end: usize) -> (Vec<usize>, Array2<f64>) {
        let d = self.dimension();
        let mut periods = Vec::new();
        let mut flat = Vec::new();
        if start <= end && start < self.rows.len() {
            let end = end.min(self.rows.len() - 1);
            for t in start..=end {
                if let Some(row) = &self.rows[t] {
                    periods.push(t);
                    flat.extend_from_slice(row);
                }
            }
        }
        let n = periods.len();
        let matrix = Array2::from_shape_vec((n, d), flat).unwrap_or_else(|_| Array2::zeros((0, d)));
        (periods, matrix)
    }
}
