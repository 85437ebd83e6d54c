//! Factor Library: per-instrument, per-period factor scores.
//!
//! Each period is computed in two phases:
//! 1. Raw values per eligible instrument (parallel across instruments, joined
//!    before returning), reading only panel data <= t.
//! 2. Cross-sectional normalization per factor over the instruments that
//!    produced a raw value in that period.
//!
//! An instrument lacking the lookback for a factor is reported as
//! `InsufficientHistory` and left out of that factor's cross-section; it is
//! never given a placeholder value.

pub mod liquidity;
pub mod momentum;
pub mod normalize;
pub mod value;
pub mod volatility;

pub use liquidity::Liquidity;
pub use momentum::{Momentum, Reversal};
pub use normalize::{centered_rank, CrossSectionStats, Normalization};
pub use value::Value;
pub use volatility::LowVolatility;

use crate::data::{Panel, UniverseRules};
use crate::domain::Symbol;
use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FactorError {
    #[error("insufficient history for '{symbol}' factor '{factor}' at period {period}: needs {required} periods")]
    InsufficientHistory {
        factor: String,
        symbol: Symbol,
        period: usize,
        required: usize,
    },

    #[error("'{symbol}' has no '{field}' for factor '{factor}' at period {period}")]
    MissingField {
        factor: String,
        symbol: Symbol,
        field: String,
        period: usize,
    },

    #[error("period {period} is outside the panel ({len} periods)")]
    PeriodOutOfRange { period: usize, len: usize },

    #[error("invalid factor definition: {0}")]
    InvalidDefinition(String),
}

/// A named per-instrument score computed from panel data <= t.
pub trait Factor: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    /// Number of trailing periods the factor reads.
    fn lookback(&self) -> usize;

    fn compute(&self, panel: &Panel, symbol: &str, t: usize) -> Result<f64, FactorError>;

    fn insufficient(&self, symbol: &str, t: usize) -> FactorError {
        FactorError::InsufficientHistory {
            factor: self.name().to_string(),
            symbol: symbol.to_string(),
            period: t,
            required: self.lookback(),
        }
    }
}

// ─── Configuration ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FactorDefinition {
    Momentum {
        lookback: usize,
        #[serde(default)]
        skip: usize,
    },
    Reversal {
        lookback: usize,
    },
    LowVolatility {
        lookback: usize,
    },
    Value {
        field: String,
    },
    Liquidity {
        lookback: usize,
    },
}

impl FactorDefinition {
    pub fn default_name(&self) -> String {
        match self {
            Self::Momentum { .. } => "momentum".into(),
            Self::Reversal { .. } => "reversal".into(),
            Self::LowVolatility { .. } => "low_volatility".into(),
            Self::Value { field } => format!("value_{field}"),
            Self::Liquidity { .. } => "liquidity".into(),
        }
    }
}

fn default_weight() -> f64 {
    1.0e-3
}

/// One configured factor.
///
/// `weight` is the prior coefficient: expected return per unit of normalized
/// score. The composite model uses it directly; the fitted models fall back
/// to it and the Bayesian model shrinks toward it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorSpec {
    #[serde(default)]
    pub name: Option<String>,
    pub definition: FactorDefinition,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl FactorSpec {
    pub fn new(definition: FactorDefinition, weight: f64) -> Self {
        Self {
            name: None,
            definition,
            weight,
        }
    }

    pub fn resolved_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.definition.default_name())
    }

    pub fn validate(&self) -> Result<(), FactorError> {
        let name = self.resolved_name();
        let bad = |msg: String| Err(FactorError::InvalidDefinition(format!("{name}: {msg}")));
        if !self.weight.is_finite() {
            return bad("weight must be finite".into());
        }
        match &self.definition {
            FactorDefinition::Momentum { lookback, skip } => {
                if *lookback == 0 || skip >= lookback {
                    return bad(format!("need lookback > skip >= 0, got {lookback}/{skip}"));
                }
            }
            FactorDefinition::Reversal { lookback } | FactorDefinition::Liquidity { lookback } => {
                if *lookback == 0 {
                    return bad("lookback must be >= 1".into());
                }
            }
            FactorDefinition::LowVolatility { lookback } => {
                if *lookback < 2 {
                    return bad("lookback must be >= 2".into());
                }
            }
            FactorDefinition::Value { field } => {
                if field.is_empty() {
                    return bad("field must be non-empty".into());
                }
            }
        }
        Ok(())
    }

    pub fn build(&self) -> Box<dyn Factor> {
        let name = self.resolved_name();
        match &self.definition {
            FactorDefinition::Momentum { lookback, skip } => {
                Box::new(Momentum::new(name, *lookback, *skip))
            }
            FactorDefinition::Reversal { lookback } => Box::new(Reversal::new(name, *lookback)),
            FactorDefinition::LowVolatility { lookback } => {
                Box::new(LowVolatility::new(name, *lookback))
            }
            FactorDefinition::Value { field } => Box::new(Value::new(name, field.clone())),
            FactorDefinition::Liquidity { lookback } => Box::new(Liquidity::new(name, *lookback)),
        }
    }
}

// ─── Scores ─────────────────────────────────────────────────────────

/// All factor scores for one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorScores {
    pub period: usize,
    pub date: NaiveDate,
    /// Factor names in configuration order; score vectors follow this order.
    pub factor_names: Vec<String>,
    pub eligible: Vec<Symbol>,
    pub raw: BTreeMap<Symbol, BTreeMap<String, f64>>,
    pub normalized: BTreeMap<Symbol, BTreeMap<String, f64>>,
    pub stats: BTreeMap<String, CrossSectionStats>,
    #[serde(skip)]
    pub exclusions: Vec<FactorError>,
}

impl FactorScores {
    pub fn score(&self, symbol: &str, factor: &str) -> Option<f64> {
        self.normalized.get(symbol)?.get(factor).copied()
    }

    /// Normalized scores for every factor, or `None` if any is missing.
    pub fn complete_vector(&self, symbol: &str) -> Option<Vec<f64>> {
        let scores = self.normalized.get(symbol)?;
        self.factor_names
            .iter()
            .map(|f| scores.get(f).copied())
            .collect()
    }

    /// Instruments with a complete score vector, in id order.
    pub fn complete(&self) -> Vec<(Symbol, Vec<f64>)> {
        self.eligible
            .iter()
            .filter_map(|s| self.complete_vector(s).map(|v| (s.clone(), v)))
            .collect()
    }

    /// Eligible instruments missing at least one factor.
    pub fn incomplete(&self) -> Vec<Symbol> {
        self.eligible
            .iter()
            .filter(|s| self.complete_vector(s).is_none())
            .cloned()
            .collect()
    }
}

/// The configured factor set plus universe and normalization rules.
#[derive(Debug)]
pub struct FactorLibrary {
    factors: Vec<Box<dyn Factor>>,
    normalization: Normalization,
    universe: UniverseRules,
}

impl FactorLibrary {
    pub fn new(
        factors: Vec<Box<dyn Factor>>,
        normalization: Normalization,
        universe: UniverseRules,
    ) -> Self {
        Self {
            factors,
            normalization,
            universe,
        }
    }

    pub fn from_specs(
        specs: &[FactorSpec],
        normalization: Normalization,
        universe: UniverseRules,
    ) -> Result<Self, FactorError> {
        if specs.is_empty() {
            return Err(FactorError::InvalidDefinition(
                "at least one factor is required".into(),
            ));
        }
        let mut seen = BTreeSet::new();
        for spec in specs {
            spec.validate()?;
            if !seen.insert(spec.resolved_name()) {
                return Err(FactorError::InvalidDefinition(format!(
                    "duplicate factor name '{}'",
                    spec.resolved_name()
                )));
            }
        }
        let factors = specs.iter().map(FactorSpec::build).collect();
        Ok(Self::new(factors, normalization, universe))
    }

    pub fn factor_names(&self) -> Vec<String> {
        self.factors.iter().map(|f| f.name().to_string()).collect()
    }

    pub fn max_lookback(&self) -> usize {
        self.factors.iter().map(|f| f.lookback()).max().unwrap_or(0)
    }

    pub fn universe(&self) -> &UniverseRules {
        &self.universe
    }

    pub fn compute(&self, panel: &Panel, t: usize) -> Result<FactorScores, FactorError> {
        let date = panel.date(t).ok_or(FactorError::PeriodOutOfRange {
            period: t,
            len: panel.len(),
        })?;
        let eligible = self.universe.eligible(panel, t);

        let per_instrument: Vec<Vec<Result<f64, FactorError>>> = eligible
            .par_iter()
            .map(|symbol| {
                self.factors
                    .iter()
                    .map(|f| f.compute(panel, symbol, t))
                    .collect()
            })
            .collect();

        let mut raw: BTreeMap<Symbol, BTreeMap<String, f64>> = BTreeMap::new();
        let mut exclusions = Vec::new();
        for (symbol, results) in eligible.iter().zip(per_instrument) {
            let entry = raw.entry(symbol.clone()).or_default();
            for (factor, result) in self.factors.iter().zip(results) {
                match result {
                    Ok(v) if v.is_finite() => {
                        entry.insert(factor.name().to_string(), v);
                    }
                    Ok(_) => exclusions.push(factor.insufficient(symbol, t)),
                    Err(e) => exclusions.push(e),
                }
            }
        }

        let mut normalized: BTreeMap<Symbol, BTreeMap<String, f64>> = BTreeMap::new();
        let mut stats = BTreeMap::new();
        for factor in &self.factors {
            let name = factor.name();
            let (symbols, values): (Vec<&Symbol>, Vec<f64>) = raw
                .iter()
                .filter_map(|(s, scores)| scores.get(name).map(|v| (s, *v)))
                .unzip();
            let (z, st) = self.normalization.apply(&values);
            for (symbol, v) in symbols.into_iter().zip(z) {
                normalized
                    .entry(symbol.clone())
                    .or_default()
                    .insert(name.to_string(), v);
            }
            stats.insert(name.to_string(), st);
        }

        Ok(FactorScores {
            period: t,
            date,
            factor_names: self.factor_names(),
            eligible,
            raw,
            normalized,
            stats,
            exclusions,
        })
    }
}

// ─── Test helpers ───────────────────────────────────────────────────

/// Build a close-only panel from per-symbol close series on consecutive days.
/// `f64::NAN` entries become missing values.
#[cfg(test)]
pub fn make_panel(series: &[(&str, &[f64])]) -> Panel {
    use crate::data::{PanelBuilder, PanelRow, CLOSE};
    let len = series.iter().map(|(_, c)| c.len()).max().unwrap_or(0);
    let base = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let mut b = PanelBuilder::new();
    for t in 0..len {
        let rows = series
            .iter()
            .filter_map(|(s, closes)| {
                closes
                    .get(t)
                    .filter(|c| c.is_finite())
                    .map(|c| PanelRow::new(*s).with(CLOSE, *c))
            })
            .collect();
        b.push_period(base + chrono::Duration::days(t as i64), rows, BTreeMap::new())
            .unwrap();
    }
    b.build()
}

/// Assert two f64 values are approximately equal (within epsilon).
#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn momentum_library() -> FactorLibrary {
        let specs = vec![FactorSpec::new(
            FactorDefinition::Momentum {
                lookback: 1,
                skip: 0,
            },
            1.0,
        )];
        FactorLibrary::from_specs(&specs, Normalization::Rank, UniverseRules::default()).unwrap()
    }

    #[test]
    fn scores_are_ordered_and_normalized() {
        let p = make_panel(&[
            ("C", &[100.0, 103.0]),
            ("A", &[100.0, 101.0]),
            ("B", &[100.0, 102.0]),
        ]);
        let scores = momentum_library().compute(&p, 1).unwrap();
        assert_eq!(scores.eligible, vec!["A", "B", "C"]);
        assert_eq!(scores.score("A", "momentum"), Some(-0.5));
        assert_eq!(scores.score("B", "momentum"), Some(0.0));
        assert_eq!(scores.score("C", "momentum"), Some(0.5));
        assert_eq!(scores.stats["momentum"].count, 3);
    }

    #[test]
    fn insufficient_history_excludes_instrument() {
        let p = make_panel(&[("A", &[100.0, 101.0]), ("NEW", &[f64::NAN, 50.0])]);
        let scores = momentum_library().compute(&p, 1).unwrap();
        assert_eq!(scores.eligible, vec!["A", "NEW"]);
        assert_eq!(scores.complete().len(), 1);
        assert_eq!(scores.incomplete(), vec!["NEW"]);
        assert!(matches!(
            scores.exclusions[0],
            FactorError::InsufficientHistory { ref symbol, .. } if symbol == "NEW"
        ));
        // single-name cross-section normalizes to zero
        assert_eq!(scores.score("A", "momentum"), Some(0.0));
    }

    #[test]
    fn first_period_has_no_complete_scores() {
        let p = make_panel(&[("A", &[100.0, 101.0])]);
        let scores = momentum_library().compute(&p, 0).unwrap();
        assert!(scores.complete().is_empty());
        assert!(momentum_library().compute(&p, 5).is_err());
    }

    #[test]
    fn duplicate_and_invalid_specs_rejected() {
        let spec = FactorSpec::new(FactorDefinition::Reversal { lookback: 5 }, 1.0);
        let err = FactorLibrary::from_specs(
            &[spec.clone(), spec],
            Normalization::default(),
            UniverseRules::default(),
        )
        .unwrap_err();
        assert!(matches!(err, FactorError::InvalidDefinition(_)));

        let bad = FactorSpec::new(
            FactorDefinition::Momentum {
                lookback: 3,
                skip: 3,
            },
            1.0,
        );
        assert!(bad.validate().is_err());
    }

    #[test]
    fn spec_parses_from_json() {
        let spec: FactorSpec = from_json(
            r#"{"definition": {"kind": "momentum", "lookback": 20, "skip": 1}, "weight": 0.5}"#,
        );
        assert_eq!(spec.resolved_name(), "momentum");
        assert_eq!(spec.weight, 0.5);
        let value: FactorSpec = from_json(r#"{"definition": {"kind": "value", "field": "book_value"}}"#);
        assert_eq!(value.resolved_name(), "value_book_value");
        assert_eq!(value.weight, default_weight());
    }

    fn from_json(json: &str) -> FactorSpec {
        serde_json::from_str(json).unwrap()
    }
}
