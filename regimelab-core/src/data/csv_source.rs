//! Long-format CSV panel source.
//!
//! Layout: one row per (date, symbol), header `date,symbol,<fields…>`.
//! Columns named `macro_<name>` carry per-period macro series; the first
//! non-empty value seen for a date wins. Empty cells are missing values.

use super::panel::{Panel, PanelBuilder, PanelRow};
use super::provider::{DataError, DataSource, PanelProvider};
use crate::domain::Symbol;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

const MACRO_PREFIX: &str = "macro_";

#[derive(Debug, Clone)]
pub struct CsvPanelSource {
    path: PathBuf,
}

impl CsvPanelSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Panel, DataError> {
        let file = std::fs::File::open(&self.path)?;
        read_panel_csv(file)
    }
}

impl PanelProvider for CsvPanelSource {
    fn name(&self) -> &str {
        "csv"
    }

    fn source(&self) -> DataSource {
        DataSource::CsvImport
    }

    fn get_panel(
        &self,
        instruments: &[Symbol],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Panel, DataError> {
        self.load()?.select(instruments, start, end)
    }
}

enum ColumnRole {
    Field(String),
    Macro(String),
}

#[derive(Default)]
struct PeriodAccumulator {
    rows: Vec<PanelRow>,
    macros: BTreeMap<String, f64>,
}

/// Parse a long-format panel from any reader.
pub fn read_panel_csv<R: Read>(reader: R) -> Result<Panel, DataError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = rdr
        .headers()
        .map_err(|e| DataError::CsvError(format!("header: {e}")))?
        .clone();

    let date_idx = column_index(&headers, "date")?;
    let symbol_idx = column_index(&headers, "symbol")?;
    let roles: Vec<(usize, ColumnRole)> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != date_idx && *i != symbol_idx)
        .map(|(i, name)| match name.strip_prefix(MACRO_PREFIX) {
            Some(m) => (i, ColumnRole::Macro(m.to_string())),
            None => (i, ColumnRole::Field(name.to_string())),
        })
        .collect();

    let mut periods: BTreeMap<NaiveDate, PeriodAccumulator> = BTreeMap::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record.map_err(|e| DataError::CsvError(format!("row {}: {e}", line + 2)))?;
        let date_str = record.get(date_idx).unwrap_or_default();
        let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d").map_err(|e| {
            DataError::CsvError(format!("row {}: bad date '{date_str}': {e}", line + 2))
        })?;
        let symbol = record.get(symbol_idx).unwrap_or_default();
        if symbol.is_empty() {
            return Err(DataError::CsvError(format!("row {}: empty symbol", line + 2)));
        }

        let acc = periods.entry(date).or_default();
        let mut row = PanelRow::new(symbol);
        for (i, role) in &roles {
            let cell = record.get(*i).unwrap_or_default();
            if cell.is_empty() {
                continue;
            }
            let value: f64 = cell.parse().map_err(|e| {
                DataError::CsvError(format!("row {}: bad number '{cell}': {e}", line + 2))
            })?;
            match role {
                ColumnRole::Field(name) => {
                    row.fields.insert(name.clone(), value);
                }
                ColumnRole::Macro(name) => {
                    acc.macros.entry(name.clone()).or_insert(value);
                }
            }
        }
        acc.rows.push(row);
    }

    if periods.is_empty() {
        return Err(DataError::ValidationError("csv panel has no rows".into()));
    }

    let mut builder = PanelBuilder::new();
    for (date, acc) in periods {
        builder.push_period(date, acc.rows, acc.macros)?;
    }
    Ok(builder.build())
}

fn column_index(headers: &csv::StringRecord, name: &str) -> Result<usize, DataError> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| DataError::ValidationError(format!("missing column '{name}'")))
}

/// Render a panel in the same long format `read_panel_csv` accepts.
pub fn write_panel_csv(panel: &Panel) -> Result<String, DataError> {
    let fields = panel.field_names();
    let macros = panel.macro_names();
    let mut wtr = csv::Writer::from_writer(vec![]);

    let mut header = vec!["date".to_string(), "symbol".to_string()];
    header.extend(fields.iter().cloned());
    header.extend(macros.iter().map(|m| format!("{MACRO_PREFIX}{m}")));
    wtr.write_record(&header)
        .map_err(|e| DataError::CsvError(e.to_string()))?;

    let fmt = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
    for (t, date) in panel.dates().iter().enumerate() {
        for symbol in panel.instruments() {
            if panel.close(symbol, t).is_none() {
                continue;
            }
            let mut record = vec![date.to_string(), symbol.clone()];
            record.extend(fields.iter().map(|f| fmt(panel.value(symbol, f, t))));
            record.extend(macros.iter().map(|m| fmt(panel.macro_value(m, t))));
            wtr.write_record(&record)
                .map_err(|e| DataError::CsvError(e.to_string()))?;
        }
    }

    let data = wtr
        .into_inner()
        .map_err(|e| DataError::CsvError(format!("flush: {e}")))?;
    String::from_utf8(data).map_err(|e| DataError::CsvError(format!("utf-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
date,symbol,close,book_value,macro_term_spread
2024-01-03,BBB,50.0,40.0,1.5
2024-01-02,AAA,100.0,,1.2
2024-01-02,BBB,49.0,40.0,
2024-01-03,AAA,101.0,,1.5
";

    #[test]
    fn parses_long_format_with_macros() {
        let panel = read_panel_csv(SAMPLE.as_bytes()).unwrap();
        assert_eq!(panel.len(), 2);
        assert_eq!(panel.instruments(), &["AAA".to_string(), "BBB".to_string()]);
        assert_eq!(panel.close("AAA", 1), Some(101.0));
        assert_eq!(panel.value("AAA", "book_value", 0), None);
        assert_eq!(panel.value("BBB", "book_value", 0), Some(40.0));
        assert_eq!(panel.macro_value("term_spread", 0), Some(1.2));
        assert_eq!(panel.macro_value("term_spread", 1), Some(1.5));
    }

    #[test]
    fn rejects_duplicate_rows() {
        let csv = "date,symbol,close\n2024-01-02,AAA,1\n2024-01-02,AAA,2\n";
        let err = read_panel_csv(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, DataError::DuplicateRow { .. }));
    }

    #[test]
    fn rejects_missing_symbol_column() {
        let csv = "date,close\n2024-01-02,1\n";
        assert!(matches!(
            read_panel_csv(csv.as_bytes()),
            Err(DataError::ValidationError(_))
        ));
    }

    #[test]
    fn written_panel_reads_back() {
        let panel = read_panel_csv(SAMPLE.as_bytes()).unwrap();
        let text = write_panel_csv(&panel).unwrap();
        let again = read_panel_csv(text.as_bytes()).unwrap();
        assert_eq!(again.close("BBB", 0), panel.close("BBB", 0));
        assert_eq!(again.dataset_hash(), panel.dataset_hash());
        assert!(text.starts_with("date,symbol,book_value,close,macro_term_spread"));
    }
}
