//! Universe eligibility rules.
//!
//! An instrument is eligible at period t if it has a close at t and meets the
//! rules using data <= t only. Delisted instruments stay eligible for every
//! period in which they traded.

use super::panel::Panel;
use crate::domain::Symbol;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UniverseRules {
    /// Explicit membership list. `None` admits every instrument in the panel.
    pub members: Option<Vec<Symbol>>,
    /// Minimum close price at t.
    pub min_price: f64,
    /// Minimum number of observed closes up to and including t.
    pub min_history: usize,
}

impl Default for UniverseRules {
    fn default() -> Self {
        Self {
            members: None,
            min_price: 0.0,
            min_history: 1,
        }
    }
}

impl UniverseRules {
    pub fn is_eligible(&self, panel: &Panel, symbol: &str, t: usize) -> bool {
        if let Some(members) = &self.members {
            if !members.iter().any(|m| m == symbol) {
                return false;
            }
        }
        let Some(close) = panel.close(symbol, t) else {
            return false;
        };
        close > 0.0 && close >= self.min_price && panel.history_len(symbol, t) >= self.min_history
    }

    /// Eligible instruments at t, sorted by id.
    pub fn eligible(&self, panel: &Panel, t: usize) -> Vec<Symbol> {
        panel
            .instruments()
            .iter()
            .filter(|s| self.is_eligible(panel, s, t))
            .cloned()
            .collect()
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.min_price.is_finite() || self.min_price < 0.0 {
            return Err(format!("min_price must be >= 0, got {}", self.min_price));
        }
        if let Some(members) = &self.members {
            if members.is_empty() {
                return Err("members list is empty".into());
            }
        }
        Ok(())
    }
}
