//! Panel provider trait and structured error types.
//!
//! The PanelProvider trait abstracts over panel sources (CSV import, Parquet
//! import, synthetic generation) so the research chain can swap them and tests
//! can supply in-memory panels.

use super::panel::Panel;
use crate::domain::Symbol;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured error types for data operations.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("data unavailable for {what} in {start}..={end}")]
    DataUnavailable {
        what: String,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("period {date} is not after the previous period {previous}")]
    OutOfOrder {
        date: NaiveDate,
        previous: NaiveDate,
    },

    #[error("duplicate row for '{symbol}' on {date}")]
    DuplicateRow { symbol: Symbol, date: NaiveDate },

    #[error("csv error: {0}")]
    CsvError(String),

    #[error("parquet I/O error: {0}")]
    ParquetError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where a panel came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    CsvImport,
    ParquetImport,
    Synthetic,
    InMemory,
}

impl DataSource {
    pub fn is_synthetic(self) -> bool {
        matches!(self, Self::Synthetic)
    }
}

/// Trait for panel providers.
///
/// Implementations must be Send + Sync so a loaded provider can be shared by
/// concurrent sweep runs.
pub trait PanelProvider: Send + Sync {
    fn name(&self) -> &str;

    fn source(&self) -> DataSource;

    /// Return the panel for `instruments` over `start..=end`.
    ///
    /// An empty `instruments` slice selects every instrument the source holds.
    /// Gaps that leave an instrument or the range without data surface as
    /// `DataError::DataUnavailable`.
    fn get_panel(
        &self,
        instruments: &[Symbol],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Panel, DataError>;
}

/// Provider over an already-built panel.
#[derive(Debug, Clone)]
pub struct InMemoryProvider {
    panel: Panel,
}

impl InMemoryProvider {
    pub fn new(panel: Panel) -> Self {
        Self { panel }
    }
}

impl PanelProvider for InMemoryProvider {
    fn name(&self) -> &str {
        "in-memory"
    }

    fn source(&self) -> DataSource {
        DataSource::InMemory
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
