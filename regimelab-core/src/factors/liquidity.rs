//! Liquidity factor.

use super::{Factor, FactorError};
use crate::data::{Panel, CLOSE, VOLUME};
use crate::stats::mean;

/// Log of mean traded value (`close × volume`) over the lookback.
#[derive(Debug, Clone)]
pub struct Liquidity {
    name: String,
    lookback: usize,
}

impl Liquidity {
    pub fn new(name: impl Into<String>, lookback: usize) -> Self {
        Self {
            name: name.into(),
            lookback: lookback.max(1),
        }
    }
}

impl Factor for Liquidity {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.lookback
    }

    fn compute(&self, panel: &Panel, symbol: &str, t: usize) -> Result<f64, FactorError> {
        let closes = panel.window(symbol, CLOSE, t, self.lookback);
        let volumes = panel.window(symbol, VOLUME, t, self.lookback);
        let (Some(closes), Some(volumes)) = (closes, volumes) else {
            return Err(self.insufficient(symbol, t));
        };
        let traded: Vec<f64> = closes.iter().zip(&volumes).map(|(c, v)| c * v).collect();
        let avg = mean(&traded);
        if avg <= 0.0 {
            return Err(self.insufficient(symbol, t));
        }
        Ok(avg.ln())
    }
}
