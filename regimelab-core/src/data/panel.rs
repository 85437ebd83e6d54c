//! Panel data model: (instrument, period) → named numeric fields, plus
//! per-period macro series.
//!
//! A `Panel` is immutable once built. Periods are appended through
//! `PanelBuilder` in strictly increasing date order; a missing value is `None`,
//! never zero. Every accessor takes a period index `t` and only ever reads
//! periods `<= t`, which is what keeps the research chain free of look-ahead.

use super::provider::DataError;
use crate::domain::{DatasetHash, Symbol};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Field holding the period close price.
pub const CLOSE: &str = "close";
/// Field holding traded volume.
pub const VOLUME: &str = "volume";

/// One instrument's fields for one period, as handed to the builder.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelRow {
    pub symbol: Symbol,
    pub fields: BTreeMap<String, f64>,
}

impl PanelRow {
    pub fn new(symbol: impl Into<Symbol>) -> Self {
        Self {
            symbol: symbol.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, field: &str, value: f64) -> Self {
        self.fields.insert(field.to_string(), value);
        self
    }
}

type Series = Vec<Option<f64>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Panel {
    dates: Vec<NaiveDate>,
    /// Sorted instrument ids.
    instruments: Vec<Symbol>,
    /// values[symbol][field][t]
    values: BTreeMap<Symbol, BTreeMap<String, Series>>,
    /// macros[name][t]
    macros: BTreeMap<String, Series>,
}

impl Panel {
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn date(&self, t: usize) -> Option<NaiveDate> {
        self.dates.get(t).copied()
    }

    /// Period index of `date`, if the panel has that period.
    pub fn index_of(&self, date: NaiveDate) -> Option<usize> {
        self.dates.binary_search(&date).ok()
    }

    /// Number of periods with date <= `date`.
    pub fn periods_through(&self, date: NaiveDate) -> usize {
        self.dates.partition_point(|d| *d <= date)
    }

    /// Index of the first period with date >= `date`.
    pub fn first_period_from(&self, date: NaiveDate) -> usize {
        self.dates.partition_point(|d| *d < date)
    }

    pub fn instruments(&self) -> &[Symbol] {
        &self.instruments
    }

    pub fn has_instrument(&self, symbol: &str) -> bool {
        self.values.contains_key(symbol)
    }

    /// Sorted list of every field present for any instrument.
    pub fn field_names(&self) -> Vec<String> {
        let names: BTreeSet<&String> = self.values.values().flat_map(|f| f.keys()).collect();
        names.into_iter().cloned().collect()
    }

    pub fn macro_names(&self) -> Vec<String> {
        self.macros.keys().cloned().collect()
    }

    /// Value of `field` for `symbol` at period `t`.
    pub fn value(&self, symbol: &str, field: &str, t: usize) -> Option<f64> {
        self.values
            .get(symbol)?
            .get(field)?
            .get(t)
            .copied()
            .flatten()
    }

    pub fn close(&self, symbol: &str, t: usize) -> Option<f64> {
        self.value(symbol, CLOSE, t)
    }

    pub fn macro_value(&self, name: &str, t: usize) -> Option<f64> {
        self.macros.get(name)?.get(t).copied().flatten()
    }

    /// Simple return from period `t - 1` to `t`.
    pub fn period_return(&self, symbol: &str, t: usize) -> Option<f64> {
        if t == 0 {
            return None;
        }
        let prev = self.close(symbol, t - 1)?;
        let cur = self.close(symbol, t)?;
        if prev <= 0.0 {
            return None;
        }
        Some(cur / prev - 1.0)
    }

    /// Simple return from period `from` to `to` (`from < to`).
    pub fn return_between(&self, symbol: &str, from: usize, to: usize) -> Option<f64> {
        if from >= to {
            return None;
        }
        let start = self.close(symbol, from)?;
        let end = self.close(symbol, to)?;
        if start <= 0.0 {
            return None;
        }
        Some(end / start - 1.0)
    }

    /// The `len` values of `field` ending at `t`, oldest first. `None` if any
    /// value in the window is missing or the window starts before period 0.
    pub fn window(&self, symbol: &str, field: &str, t: usize, len: usize) -> Option<Vec<f64>> {
        if len == 0 || t + 1 < len || t >= self.len() {
            return None;
        }
        let series = self.values.get(symbol)?.get(field)?;
        series[t + 1 - len..=t].iter().copied().collect()
    }

    /// The `len` period returns ending at `t`, oldest first.
    pub fn return_window(&self, symbol: &str, t: usize, len: usize) -> Option<Vec<f64>> {
        if len == 0 || t < len {
            return None;
        }
        (t + 1 - len..=t)
            .map(|s| self.period_return(symbol, s))
            .collect()
    }

    /// Number of periods <= `t` in which `symbol` has a close.
    pub fn history_len(&self, symbol: &str, t: usize) -> usize {
        match self.values.get(symbol).and_then(|f| f.get(CLOSE)) {
            Some(series) => series.iter().take(t + 1).filter(|v| v.is_some()).count(),
            None => 0,
        }
    }

    /// The panel restricted to periods `0..=t`.
    pub fn truncated(&self, t: usize) -> Panel {
        let keep = (t + 1).min(self.len());
        let cut = |series: &Series| series[..keep].to_vec();
        Panel {
            dates: self.dates[..keep].to_vec(),
            instruments: self.instruments.clone(),
            values: self
                .values
                .iter()
                .map(|(sym, fields)| {
                    let fields = fields.iter().map(|(f, s)| (f.clone(), cut(s))).collect();
                    (sym.clone(), fields)
                })
                .collect(),
            macros: self
                .macros
                .iter()
                .map(|(name, s)| (name.clone(), cut(s)))
                .collect(),
        }
    }

    /// Restrict to `instruments` (all when empty) and dates in `start..=end`.
    pub fn select(
        &self,
        instruments: &[Symbol],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Panel, DataError> {
        let lo = self.first_period_from(start);
        let hi = self.periods_through(end);
        if lo >= hi {
            return Err(DataError::DataUnavailable {
                what: "any period".into(),
                start,
                end,
            });
        }

        let wanted: Vec<Symbol> = if instruments.is_empty() {
            self.instruments.clone()
        } else {
            let mut w = instruments.to_vec();
            w.sort();
            w.dedup();
            w
        };

        let mut values = BTreeMap::new();
        for symbol in &wanted {
            let fields = self
                .values
                .get(symbol)
                .ok_or_else(|| DataError::DataUnavailable {
                    what: format!("instrument '{symbol}'"),
                    start,
                    end,
                })?;
            let sliced: BTreeMap<String, Series> = fields
                .iter()
                .map(|(f, s)| (f.clone(), s[lo..hi].to_vec()))
                .collect();
            let traded = sliced
                .get(CLOSE)
                .map(|s| s.iter().any(|v| v.is_some()))
                .unwrap_or(false);
            if !traded {
                return Err(DataError::DataUnavailable {
                    what: format!("instrument '{symbol}'"),
                    start,
                    end,
                });
            }
            values.insert(symbol.clone(), sliced);
        }

        Ok(Panel {
            dates: self.dates[lo..hi].to_vec(),
            instruments: wanted,
            values,
            macros: self
                .macros
                .iter()
                .map(|(name, s)| (name.clone(), s[lo..hi].to_vec()))
                .collect(),
        })
    }

    /// BLAKE3 content hash over dates, instruments, fields and macro series.
    pub fn dataset_hash(&self) -> DatasetHash {
        let mut hasher = blake3::Hasher::new();
        for date in &self.dates {
            hasher.update(date.to_string().as_bytes());
        }
        let hash_series = |hasher: &mut blake3::Hasher, series: &Series| {
            for v in series {
                match v {
                    Some(x) => {
                        hasher.update(&[1]);
                        hasher.update(&x.to_le_bytes());
                    }
                    None => {
                        hasher.update(&[0]);
                    }
                }
            }
        };
        for (symbol, fields) in &self.values {
            hasher.update(symbol.as_bytes());
            for (field, series) in fields {
                hasher.update(field.as_bytes());
                hash_series(&mut hasher, series);
            }
        }
        for (name, series) in &self.macros {
            hasher.update(b"macro:");
            hasher.update(name.as_bytes());
            hash_series(&mut hasher, series);
        }
        DatasetHash(hasher.finalize().to_hex().to_string())
    }
}

/// Append-only panel builder.
#[derive(Debug, Default)]
pub struct PanelBuilder {
    dates: Vec<NaiveDate>,
    rows: Vec<BTreeMap<Symbol, BTreeMap<String, f64>>>,
    macros: Vec<BTreeMap<String, f64>>,
}

impl PanelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Append one period. Dates must be strictly increasing; a symbol may
    /// appear once per period. Non-finite values are stored as missing.
    pub fn push_period(
        &mut self,
        date: NaiveDate,
        rows: Vec<PanelRow>,
        macros: BTreeMap<String, f64>,
    ) -> Result<&mut Self, DataError> {
        if let Some(&previous) = self.dates.last() {
            if date <= previous {
                return Err(DataError::OutOfOrder { date, previous });
            }
        }

        let mut by_symbol = BTreeMap::new();
        for row in rows {
            let fields: BTreeMap<String, f64> = row
                .fields
                .into_iter()
                .filter(|(_, v)| v.is_finite())
                .collect();
            if by_symbol.insert(row.symbol.clone(), fields).is_some() {
                return Err(DataError::DuplicateRow {
                    symbol: row.symbol,
                    date,
                });
            }
        }

        self.dates.push(date);
        self.rows.push(by_symbol);
        self.macros
            .push(macros.into_iter().filter(|(_, v)| v.is_finite()).collect());
        Ok(self)
    }

    pub fn build(self) -> Panel {
        let n = self.dates.len();

        let mut layout: BTreeMap<Symbol, BTreeSet<String>> = BTreeMap::new();
        for period in &self.rows {
            for (symbol, fields) in period {
                layout
                    .entry(symbol.clone())
                    .or_default()
                    .extend(fields.keys().cloned());
            }
        }

        let mut values: BTreeMap<Symbol, BTreeMap<String, Series>> = layout
            .iter()
            .map(|(symbol, fields)| {
                let series = fields.iter().map(|f| (f.clone(), vec![None; n])).collect();
                (symbol.clone(), series)
            })
            .collect();

        for (t, period) in self.rows.into_iter().enumerate() {
            for (symbol, fields) in period {
                if let Some(slot) = values.get_mut(&symbol) {
                    for (field, v) in fields {
                        if let Some(series) = slot.get_mut(&field) {
                            series[t] = Some(v);
                        }
                    }
                }
            }
        }

        let macro_names: BTreeSet<String> =
            self.macros.iter().flat_map(|m| m.keys().cloned()).collect();
        let macros = macro_names
            .into_iter()
            .map(|name| {
                let series = self.macros.iter().map(|m| m.get(&name).copied()).collect();
                (name, series)
            })
            .collect();

        Panel {
            dates: self.dates,
            instruments: layout.into_keys().collect(),
            values,
            macros,
        }
    }
}
