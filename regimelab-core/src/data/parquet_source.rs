//! Parquet panel source (same long layout as the CSV source) via polars.
//!
//! Required columns: `date` (Date), `symbol` (String). Every other Float64
//! column is a field; `macro_<name>` columns are macro series.

use super::panel::{Panel, PanelBuilder, PanelRow};
use super::provider::{DataError, DataSource, PanelProvider};
use crate::domain::Symbol;
use chrono::NaiveDate;
use polars::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const MACRO_PREFIX: &str = "macro_";

#[derive(Debug, Clone)]
pub struct ParquetPanelSource {
    path: PathBuf,
}

impl ParquetPanelSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Panel, DataError> {
        let file = fs::File::open(&self.path)
            .map_err(|e| DataError::ParquetError(format!("open: {e}")))?;
        let df = ParquetReader::new(file)
            .finish()
            .map_err(|e| DataError::ParquetError(format!("read: {e}")))?;
        dataframe_to_panel(&df)
    }
}

impl PanelProvider for ParquetPanelSource {
    fn name(&self) -> &str {
        "parquet"
    }

    fn source(&self) -> DataSource {
        DataSource::ParquetImport
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

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

fn dataframe_to_panel(df: &DataFrame) -> Result<Panel, DataError> {
    if df.height() == 0 {
        return Err(DataError::ValidationError("empty parquet file".into()));
    }
    let map_err = |e: PolarsError| DataError::ParquetError(format!("column read: {e}"));

    let date_ca = df
        .column("date")
        .map_err(map_err)?
        .date()
        .map_err(|e| DataError::ParquetError(format!("date column type: {e}")))?
        .clone();
    let symbol_ca = df
        .column("symbol")
        .map_err(map_err)?
        .str()
        .map_err(|e| DataError::ParquetError(format!("symbol column type: {e}")))?
        .clone();

    let mut numeric: Vec<(String, Float64Chunked)> = Vec::new();
    for col in df.get_columns() {
        let name = col.name().to_string();
        if name == "date" || name == "symbol" {
            continue;
        }
        let values = col
            .cast(&DataType::Float64)
            .map_err(|e| DataError::ParquetError(format!("{name} cast: {e}")))?;
        let ca = values
            .f64()
            .map_err(|e| DataError::ParquetError(format!("{name} column type: {e}")))?
            .clone();
        numeric.push((name, ca));
    }

    let mut periods: BTreeMap<NaiveDate, (Vec<PanelRow>, BTreeMap<String, f64>)> =
        BTreeMap::new();
    for i in 0..df.height() {
        let days = date_ca
            .get(i)
            .ok_or_else(|| DataError::ValidationError(format!("null date at row {i}")))?;
        let date = epoch() + chrono::Duration::days(days as i64);
        let symbol = symbol_ca
            .get(i)
            .ok_or_else(|| DataError::ValidationError(format!("null symbol at row {i}")))?;

        let (rows, macros) = periods.entry(date).or_default();
        let mut row = PanelRow::new(symbol);
        for (name, ca) in &numeric {
            let Some(v) = ca.get(i) else { continue };
            match name.strip_prefix(MACRO_PREFIX) {
                Some(m) => {
                    macros.entry(m.to_string()).or_insert(v);
                }
                None => {
                    row.fields.insert(name.clone(), v);
                }
            }
        }
        rows.push(row);
    }

    let mut builder = PanelBuilder::new();
    for (date, (rows, macros)) in periods {
        builder.push_period(date, rows, macros)?;
    }
    Ok(builder.build())
}

/// Write a panel in long layout to a Parquet file.
pub fn write_panel_parquet(panel: &Panel, path: &Path) -> Result<(), DataError> {
    let fields = panel.field_names();
    let macro_names = panel.macro_names();

    let mut dates: Vec<i32> = Vec::new();
    let mut symbols: Vec<String> = Vec::new();
    let mut field_cols: Vec<Vec<Option<f64>>> = vec![Vec::new(); fields.len()];
    let mut macro_cols: Vec<Vec<Option<f64>>> = vec![Vec::new(); macro_names.len()];

    for (t, date) in panel.dates().iter().enumerate() {
        for symbol in panel.instruments() {
            if panel.close(symbol, t).is_none() {
                continue;
            }
            dates.push((*date - epoch()).num_days() as i32);
            symbols.push(symbol.clone());
            for (col, f) in field_cols.iter_mut().zip(&fields) {
                col.push(panel.value(symbol, f, t));
            }
            for (col, m) in macro_cols.iter_mut().zip(&macro_names) {
                col.push(panel.macro_value(m, t));
            }
        }
    }

    let mut columns = vec![
        Column::new("date".into(), dates)
            .cast(&DataType::Date)
            .map_err(|e| DataError::ParquetError(format!("date cast: {e}")))?,
        Column::new("symbol".into(), symbols),
    ];
    for (name, values) in fields.iter().zip(field_cols) {
        columns.push(Column::new(name.as_str().into(), values));
    }
    for (name, values) in macro_names.iter().zip(macro_cols) {
        columns.push(Column::new(format!("{MACRO_PREFIX}{name}").into(), values));
    }

    let mut df = DataFrame::new(columns)
        .map_err(|e| DataError::ParquetError(format!("dataframe creation: {e}")))?;
    let file =
        fs::File::create(path).map_err(|e| DataError::ParquetError(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(&mut df)
        .map_err(|e| DataError::ParquetError(format!("write parquet: {e}")))?;
    Ok(())
}
