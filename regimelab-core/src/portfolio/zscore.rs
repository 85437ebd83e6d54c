//! Z-score / inverse-volatility constructor.
//!
//! Cross-sectional z-score of the forecasts, scaled by 1/volatility. Names
//! with |z| at or below the threshold sit out; the active signal is demeaned,
//! normalized to the gross limit and projected onto the constraints.

use super::{ConstructionError, ConstructionInput, PortfolioConstructor};
use crate::domain::{Symbol, WeightMap};
use crate::stats::mean;

#[derive(Debug, Clone)]
pub struct ZScoreInverseVol {
    threshold: f64,
}

impl ZScoreInverseVol {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Demeaned, inverse-vol-scaled signal normalized to unit gross, or
    /// zeros when nothing is active.
    pub fn signal(&self, forecasts: &[f64], vols: &[f64]) -> Vec<f64> {
        let n = forecasts.len();
        if n == 0 {
            return Vec::new();
        }
        let m = mean(forecasts);
        let std = (forecasts.iter().map(|f| (f - m).powi(2)).sum::<f64>() / n as f64).sqrt();
        if std <= 0.0 {
            return vec![0.0; n];
        }
        let z: Vec<f64> = forecasts.iter().map(|f| (f - m) / std).collect();
        let active: Vec<bool> = z.iter().map(|x| x.abs() > self.threshold).collect();
        let raw: Vec<f64> = z.iter().zip(vols).map(|(x, v)| x / v.max(1e-6)).collect();

        let active_raw: Vec<f64> = raw
            .iter()
            .zip(&active)
            .filter(|(_, a)| **a)
            .map(|(r, _)| *r)
            .collect();
        if active_raw.is_empty() {
            return vec![0.0; n];
        }
        let centre = mean(&active_raw);
        let signal: Vec<f64> = raw
            .iter()
            .zip(&active)
            .map(|(r, a)| if *a { r - centre } else { 0.0 })
            .collect();
        let total: f64 = signal.iter().map(|s| s.abs()).sum();
        if total <= 0.0 {
            return vec![0.0; n];
        }
        signal.iter().map(|s| s / total).collect()
    }
}

impl PortfolioConstructor for ZScoreInverseVol {
    fn name(&self) -> &str {
        "zscore_inverse_vol"
    }

    fn construct(&self, input: &ConstructionInput<'_>) -> Result<WeightMap, ConstructionError> {
        let c = input.constraints;
        let (symbols, (forecasts, vols)): (Vec<Symbol>, (Vec<f64>, Vec<f64>)) = input
            .forecasts
            .iter()
            .filter_map(|(s, f)| {
                input
                    .risk
                    .volatility(s)
                    .filter(|v| *v > 0.0)
                    .map(|v| (s.clone(), (*f, v)))
            })
            .unzip();
        c.check_feasible(symbols.len())?;

        let scaled: Vec<f64> = self
            .signal(&forecasts, &vols)
            .iter()
            .map(|s| s * c.gross_limit)
            .collect();
        let projected = c.project(&scaled);
        let mut weights: WeightMap = symbols.into_iter().zip(projected).collect();
        crate::domain::prune(&mut weights);
        Ok(weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factors::assert_approx;
    use crate::portfolio::{Constraints, RiskModel};
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    #[test]
    fn signal_is_demeaned_and_unit_gross() {
        let s = ZScoreInverseVol::new(0.5).signal(&[0.03, 0.01, -0.01, -0.03], &[0.01; 4]);
        let gross: f64 = s.iter().map(|x| x.abs()).sum();
        assert_approx(gross, 1.0, 1e-12);
        assert_approx(s.iter().sum::<f64>(), 0.0, 1e-12);
        assert!(s[0] > 0.0 && s[3] < 0.0);
    }

    #[test]
    fn quiet_names_sit_out() {
        // z-scores: ±1.414 for the tails, 0 for the middle pair
        let s = ZScoreInverseVol::new(0.5).signal(&[0.02, 0.0, 0.0, -0.02], &[0.01; 4]);
        assert_eq!(s[1], 0.0);
        assert_eq!(s[2], 0.0);
        assert_approx(s[0], 0.5, 1e-12);
        assert_approx(s[3], -0.5, 1e-12);
    }

    #[test]
    fn flat_cross_section_gives_no_signal() {
        let s = ZScoreInverseVol::new(0.5).signal(&[0.01, 0.01], &[0.01, 0.02]);
        assert_eq!(s, vec![0.0, 0.0]);
    }

    #[test]
    fn long_only_projection_drops_shorts() {
        let f: BTreeMap<Symbol, f64> = [("A", 0.03), ("B", 0.01), ("C", -0.01), ("D", -0.03)]
            .iter()
            .map(|(s, x)| (s.to_string(), *x))
            .collect();
        let risk = RiskModel::diagonal(
            &["A", "B", "C", "D"]
                .iter()
                .map(|s| (s.to_string(), 0.01))
                .collect::<Vec<_>>(),
        );
        let current = WeightMap::new();
        let c = Constraints::default();
        let input = ConstructionInput {
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            forecasts: &f,
            risk: &risk,
            current: &current,
            constraints: &c,
        };
        let w = ZScoreInverseVol::new(0.5).rebalance(&input).unwrap().weights;
        assert!(w.values().all(|x| *x > 0.0));
        assert!(w["A"] > 0.0);
        assert!(!w.contains_key("D"));
    }
}
