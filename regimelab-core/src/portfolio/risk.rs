//! Sample covariance risk model with diagonal shrinkage.

use crate::data::Panel;
use crate::domain::Symbol;
use crate::stats::mean;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Trailing period returns used for the covariance.
    pub lookback: usize,
    /// Weight on the diagonal target, in [0, 1].
    pub shrinkage: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            lookback: 60,
            shrinkage: 0.1,
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.lookback < 2 {
            return Err(format!("risk lookback must be >= 2, got {}", self.lookback));
        }
        if !(0.0..=1.0).contains(&self.shrinkage) {
            return Err(format!("shrinkage must be in [0, 1], got {}", self.shrinkage));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskModel {
    symbols: Vec<Symbol>,
    covariance: Array2<f64>,
    /// Requested instruments without a complete return window.
    excluded: Vec<Symbol>,
}

impl RiskModel {
    /// Estimate from the `lookback` period returns ending at t.
    pub fn estimate(panel: &Panel, symbols: &[Symbol], t: usize, config: &RiskConfig) -> Self {
        let lookback = config.lookback.max(2);
        let mut included = Vec::new();
        let mut excluded = Vec::new();
        let mut series: Vec<Vec<f64>> = Vec::new();
        for sym in symbols {
            match panel.return_window(sym, t, lookback) {
                Some(r) => {
                    included.push(sym.clone());
                    series.push(r);
                }
                None => excluded.push(sym.clone()),
            }
        }

        let n = included.len();
        let means: Vec<f64> = series.iter().map(|s| mean(s)).collect();
        let mut cov = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            for j in i..n {
                let c = series[i]
                    .iter()
                    .zip(&series[j])
                    .map(|(a, b)| (a - means[i]) * (b - means[j]))
                    .sum::<f64>()
                    / (lookback - 1) as f64;
                let shrunk = if i == j { c } else { (1.0 - config.shrinkage) * c };
                cov[[i, j]] = shrunk;
                cov[[j, i]] = shrunk;
            }
        }

        Self {
            symbols: included,
            covariance: cov,
            excluded,
        }
    }

    /// Diagonal model from given volatilities.
    pub fn diagonal(vols: &[(Symbol, f64)]) -> Self {
        let n = vols.len();
        let mut cov = Array2::<f64>::zeros((n, n));
        for (i, (_, v)) in vols.iter().enumerate() {
            cov[[i, i]] = v * v;
        }
        Self {
            symbols: vols.iter().map(|(s, _)| s.clone()).collect(),
            covariance: cov,
            excluded: Vec::new(),
        }
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn excluded(&self) -> &[Symbol] {
        &self.excluded
    }

    pub fn covariance(&self) -> &Array2<f64> {
        &self.covariance
    }

    pub fn index_of(&self, symbol: &str) -> Option<usize> {
        self.symbols.iter().position(|s| s == symbol)
    }

    pub fn volatility(&self, symbol: &str) -> Option<f64> {
        let i = self.index_of(symbol)?;
        Some(self.covariance[[i, i]].max(0.0).sqrt())
    }

    /// Covariance restricted to `symbols`, in that order.
    pub fn sub_covariance(&self, symbols: &[Symbol]) -> Option<Array2<f64>> {
        let idx: Option<Vec<usize>> = symbols.iter().map(|s| self.index_of(s)).collect();
        let idx = idx?;
        let n = idx.len();
        Some(Array2::from_shape_fn((n, n), |(a, b)| {
            self.covariance[[idx[a], idx[b]]]
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factors::{assert_approx, make_panel};

    #[test]
    fn covariance_of_known_returns() {
        // A returns +10% then -10%; B returns +5% then -5%
        let p = make_panel(&[
            ("A", &[100.0, 110.0, 99.0]),
            ("B", &[100.0, 105.0, 99.75]),
            ("C", &[f64::NAN, 100.0, 101.0]),
        ]);
        let symbols: Vec<Symbol> = vec!["A".into(), "B".into(), "C".into()];
        let cfg = RiskConfig {
            lookback: 2,
            shrinkage: 0.0,
        };
        let risk = RiskModel::estimate(&p, &symbols, 2, &cfg);
        assert_eq!(risk.symbols(), &["A".to_string(), "B".to_string()]);
        assert_eq!(risk.excluded(), &["C".to_string()]);
        // var([0.1, -0.1]) = 0.02; cov with half-scaled = 0.01
        assert_approx(risk.covariance()[[0, 0]], 0.02, 1e-12);
        assert_approx(risk.covariance()[[0, 1]], 0.01, 1e-12);
        assert_approx(risk.volatility("B").unwrap(), 0.005_f64.sqrt(), 1e-12);
    }

    #[test]
    fn shrinkage_scales_off_diagonal_only() {
        let p = make_panel(&[
            ("A", &[100.0, 110.0, 99.0]),
            ("B", &[100.0, 105.0, 99.75]),
        ]);
        let symbols: Vec<Symbol> = vec!["A".into(), "B".into()];
        let cfg = RiskConfig {
            lookback: 2,
            shrinkage: 0.5,
        };
        let risk = RiskModel::estimate(&p, &symbols, 2, &cfg);
        assert_approx(risk.covariance()[[0, 0]], 0.02, 1e-12);
        assert_approx(risk.covariance()[[1, 0]], 0.005, 1e-12);
        let sub = risk.sub_covariance(&["B".to_string()]).unwrap();
        assert_approx(sub[[0, 0]], 0.005, 1e-12);
    }
}
