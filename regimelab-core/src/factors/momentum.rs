//! Price momentum and short-term reversal.

use super::{Factor, FactorError};
use crate::data::Panel;

/// `close[t - skip] / close[t - lookback] - 1`.
///
/// With `lookback = 1, skip = 0` this is the prior-period return. A positive
/// `skip` drops the most recent periods (the classic 12-1 construction).
#[derive(Debug, Clone)]
pub struct Momentum {
    name: String,
    lookback: usize,
    skip: usize,
}

impl Momentum {
    pub fn new(name: impl Into<String>, lookback: usize, skip: usize) -> Self {
        Self {
            name: name.into(),
            lookback,
            skip,
        }
    }
}

impl Factor for Momentum {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.lookback
    }

    fn compute(&self, panel: &Panel, symbol: &str, t: usize) -> Result<f64, FactorError> {
        if t < self.lookback {
            return Err(self.insufficient(symbol, t));
        }
        panel
            .return_between(symbol, t - self.lookback, t - self.skip)
            .ok_or_else(|| self.insufficient(symbol, t))
    }
}

/// Negative return over the lookback: recent losers score high.
#[derive(Debug, Clone)]
pub struct Reversal {
    name: String,
    lookback: usize,
}

impl Reversal {
    pub fn new(name: impl Into<String>, lookback: usize) -> Self {
        Self {
            name: name.into(),
            lookback,
        }
    }
}

impl Factor for Reversal {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.lookback
    }

    fn compute(&self, panel: &Panel, symbol: &str, t: usize) -> Result<f64, FactorError> {
        if t < self.lookback {
            return Err(self.insufficient(symbol, t));
        }
        panel
            .return_between(symbol, t - self.lookback, t)
            .map(|r| -r)
            .ok_or_else(|| self.insufficient(symbol, t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factors::{assert_approx, make_panel};

    #[test]
    fn prior_period_return() {
        let p = make_panel(&[("A", &[100.0, 110.0, 99.0])]);
        let m = Momentum::new("momentum", 1, 0);
        assert_approx(m.compute(&p, "A", 1).unwrap(), 0.1, 1e-12);
        assert_approx(m.compute(&p, "A", 2).unwrap(), -0.1, 1e-12);
        assert!(matches!(
            m.compute(&p, "A", 0),
            Err(FactorError::InsufficientHistory { .. })
        ));
    }

    #[test]
    fn skip_excludes_recent_periods() {
        let p = make_panel(&[("A", &[100.0, 120.0, 150.0, 10.0])]);
        let m = Momentum::new("mom_3_1", 3, 1);
        // close[2] / close[0] - 1
        assert_approx(m.compute(&p, "A", 3).unwrap(), 0.5, 1e-12);
    }

    #[test]
    fn reversal_is_negated_return() {
        let p = make_panel(&[("A", &[100.0, 105.0, 120.0])]);
        let r = Reversal::new("reversal", 2);
        assert_approx(r.compute(&p, "A", 2).unwrap(), -0.2, 1e-12);
    }
}
