//! Low-volatility factor.

use super::{Factor, FactorError};
use crate::data::Panel;
use crate::stats::std_dev;

/// Negative sample standard deviation of the last `lookback` period returns.
#[derive(Debug, Clone)]
pub struct LowVolatility {
    name: String,
    lookback: usize,
}

impl LowVolatility {
    pub fn new(name: impl Into<String>, lookback: usize) -> Self {
        Self {
            name: name.into(),
            lookback: lookback.max(2),
        }
    }
}

impl Factor for LowVolatility {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.lookback
    }

    fn compute(&self, panel: &Panel, symbol: &str, t: usize) -> Result<f64, FactorError> {
        let returns = panel
            .return_window(symbol, t, self.lookback)
            .ok_or_else(|| self.insufficient(symbol, t))?;
        Ok(-std_dev(&returns))
    }
}
