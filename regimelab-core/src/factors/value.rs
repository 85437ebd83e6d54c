//! Fundamental value factor.

use super::{Factor, FactorError};
use crate::data::Panel;

/// `field / close` at t, e.g. book-to-price.
#[derive(Debug, Clone)]
pub struct Value {
    name: String,
    field: String,
}

impl Value {
    pub fn new(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
        }
    }
}

impl Factor for Value {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        0
    }

    fn compute(&self, panel: &Panel, symbol: &str, t: usize) -> Result<f64, FactorError> {
        let close = panel
            .close(symbol, t)
            .filter(|c| *c > 0.0)
            .ok_or_else(|| self.insufficient(symbol, t))?;
        let fundamental = panel
            .value(symbol, &self.field, t)
            .ok_or_else(|| FactorError::MissingField {
                factor: self.name.clone(),
                symbol: symbol.to_string(),
                field: self.field.clone(),
                period: t,
            })?;
        Ok(fundamental / close)
    }
}
