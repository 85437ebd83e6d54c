//! Seeded regime-switching panel generator for demos and tests.
//!
//! A two-state Markov chain (calm / stressed) drives a market return; each
//! instrument adds a persistent drift, a beta to the market and idiosyncratic
//! noise. Every random stream comes from `RngHierarchy`, so the panel depends
//! only on the configuration, never on generation order.

use super::panel::{Panel, PanelBuilder, PanelRow, CLOSE, VOLUME};
use super::provider::{DataError, DataSource, PanelProvider};
use crate::domain::Symbol;
use crate::rng::{standard_normal, RngHierarchy};
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fundamental field emitted by the generator.
pub const BOOK_VALUE: &str = "book_value";
/// Macro series emitted by the generator.
pub const TERM_SPREAD: &str = "term_spread";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub instruments: usize,
    pub periods: usize,
    pub seed: u64,
    pub start: NaiveDate,
    /// Probability of staying in the current regime each period.
    pub stay_probability: f64,
    pub calm_drift: f64,
    pub calm_vol: f64,
    pub stress_drift: f64,
    pub stress_vol: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            instruments: 20,
            periods: 504,
            seed: 42,
            start: NaiveDate::from_ymd_opt(2020, 1, 2).unwrap_or_default(),
            stay_probability: 0.98,
            calm_drift: 0.0006,
            calm_vol: 0.008,
            stress_drift: -0.0015,
            stress_vol: 0.025,
        }
    }
}

impl SyntheticConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.instruments == 0 || self.periods < 2 {
            return Err("synthetic panel needs >= 1 instrument and >= 2 periods".into());
        }
        if !(0.0..=1.0).contains(&self.stay_probability) {
            return Err(format!(
                "stay_probability must be in [0, 1], got {}",
                self.stay_probability
            ));
        }
        if self.calm_vol < 0.0 || self.stress_vol < 0.0 {
            return Err("volatilities must be non-negative".into());
        }
        Ok(())
    }
}

/// A generated panel plus the hidden regime path that produced it.
#[derive(Debug, Clone)]
pub struct SyntheticPanel {
    pub config: SyntheticConfig,
    pub panel: Panel,
    /// 0 = calm, 1 = stressed, one entry per period.
    pub regime_path: Vec<usize>,
}

pub fn symbol_name(i: usize) -> Symbol {
    format!("SYN{i:03}")
}

/// Business days (Mon–Fri) starting at `start`.
pub fn business_days(start: NaiveDate, count: usize) -> Vec<NaiveDate> {
    let mut out = Vec::with_capacity(count);
    let mut d = start;
    while out.len() < count {
        if !matches!(d.weekday(), Weekday::Sat | Weekday::Sun) {
            out.push(d);
        }
        d += Duration::days(1);
    }
    out
}

struct InstrumentPath {
    closes: Vec<f64>,
    volumes: Vec<f64>,
    book: Vec<f64>,
}

impl SyntheticPanel {
    pub fn generate(config: &SyntheticConfig) -> Result<Self, DataError> {
        config.validate().map_err(DataError::ValidationError)?;
        let rngs = RngHierarchy::new(config.seed);
        let n = config.periods;

        let mut market_rng = rngs.rng_for("synthetic", "market", 0);
        let mut regime_path = Vec::with_capacity(n);
        let mut market = Vec::with_capacity(n);
        let mut spread = Vec::with_capacity(n);
        let mut state = 0usize;
        for t in 0..n {
            if t > 0 && market_rng.gen::<f64>() > config.stay_probability {
                state = 1 - state;
            }
            regime_path.push(state);
            let (drift, vol) = if state == 0 {
                (config.calm_drift, config.calm_vol)
            } else {
                (config.stress_drift, config.stress_vol)
            };
            market.push(drift + vol * standard_normal(&mut market_rng));
            let level = if state == 0 { 1.5 } else { 0.2 };
            spread.push(level + 0.05 * standard_normal(&mut market_rng));
        }

        let symbols: Vec<Symbol> = (0..config.instruments).map(symbol_name).collect();
        let paths: Vec<InstrumentPath> = symbols
            .iter()
            .map(|sym| {
                let mut rng = rngs.rng_for("synthetic", sym, 0);
                let alpha = 0.0004 * standard_normal(&mut rng);
                let beta = 0.7 + 0.6 * rng.gen::<f64>();
                let mut close = 20.0 + 180.0 * rng.gen::<f64>();
                let book_ratio = 0.3 + 0.9 * rng.gen::<f64>();
                let base_volume = 2.0e5 + 2.0e6 * rng.gen::<f64>();
                let mut path = InstrumentPath {
                    closes: Vec::with_capacity(n),
                    volumes: Vec::with_capacity(n),
                    book: Vec::with_capacity(n),
                };
                let book = close * book_ratio;
                for (t, m) in market.iter().enumerate() {
                    if t > 0 {
                        let idio_vol = if regime_path[t] == 0 {
                            config.calm_vol
                        } else {
                            config.stress_vol
                        };
                        let r = alpha + beta * m + idio_vol * standard_normal(&mut rng);
                        close *= (1.0 + r).max(0.05);
                    }
                    path.closes.push(close);
                    path.volumes
                        .push(base_volume * (0.3 * standard_normal(&mut rng)).exp());
                    path.book.push(book);
                }
                path
            })
            .collect();

        let mut builder = PanelBuilder::new();
        for (t, date) in business_days(config.start, n).into_iter().enumerate() {
            let rows = symbols
                .iter()
                .zip(&paths)
                .map(|(sym, p)| {
                    PanelRow::new(sym.clone())
                        .with(CLOSE, p.closes[t])
                        .with(VOLUME, p.volumes[t])
                        .with(BOOK_VALUE, p.book[t])
                })
                .collect();
            let macros = BTreeMap::from([(TERM_SPREAD.to_string(), spread[t])]);
            builder.push_period(date, rows, macros)?;
        }

        Ok(Self {
            config: config.clone(),
            panel: builder.build(),
            regime_path,
        })
    }
}

impl PanelProvider for SyntheticPanel {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn source(&self) -> DataSource {
        DataSource::Synthetic
    }

    fn get_panel(
        &self,
        instruments: &[Symbol],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Panel, DataError> {
        self.panel.select(instruments, start, end)
    }
}
