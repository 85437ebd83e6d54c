//! Panel loading for the runner.
//!
//! Resolves the configured data source into a `PanelProvider` and asks it for
//! the panel the run needs:
//! 1. CSV or Parquet file → imported panel
//! 2. Synthetic → seeded regime-switching panel (tagged)
//!
//! The loaded panel spans `history_start..=end`, so factor lookbacks and regime
//! estimation see history before the backtest start. Nothing after `end` is
//! ever loaded.

use chrono::NaiveDate;
use regimelab_core::data::{
    CsvPanelSource, DataError, DataSource, Panel, PanelProvider, ParquetPanelSource,
    SyntheticConfig, SyntheticPanel,
};
use regimelab_core::domain::Symbol;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

/// Errors from the data loading layer.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("data error: {0}")]
    Data(#[from] DataError),

    #[error("loaded panel for {start}..={end} has {periods} period(s); at least 2 are required")]
    TooShort {
        start: NaiveDate,
        end: NaiveDate,
        periods: usize,
    },
}

/// Where panel data comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataSpec {
    Csv { path: PathBuf },
    Parquet { path: PathBuf },
    Synthetic(SyntheticConfig),
}

impl Default for DataSpec {
    fn default() -> Self {
        Self::Synthetic(SyntheticConfig::default())
    }
}

impl DataSpec {
    /// Build the provider for this source. Synthetic panels are generated here.
    pub fn provider(&self) -> Result<Box<dyn PanelProvider>, LoadError> {
        Ok(match self {
            Self::Csv { path } => Box::new(CsvPanelSource::new(path.clone())),
            Self::Parquet { path } => Box::new(ParquetPanelSource::new(path.clone())),
            Self::Synthetic(config) => Box::new(SyntheticPanel::generate(config)?),
        })
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Csv { path } => format!("csv:{}", path.display()),
            Self::Parquet { path } => format!("parquet:{}", path.display()),
            Self::Synthetic(c) => format!(
                "synthetic:{}x{} seed={}",
                c.instruments, c.periods, c.seed
            ),
        }
    }
}

/// Data section of the research configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default)]
    pub source: DataSpec,
    /// Instruments to load. Empty loads every instrument the source holds.
    #[serde(default)]
    pub instruments: Vec<Symbol>,
    /// First date loaded. `None` loads from the start of the source.
    #[serde(default)]
    pub history_start: Option<NaiveDate>,
}

/// A loaded panel with provenance.
#[derive(Debug, Clone)]
pub struct LoadedPanel {
    pub panel: Panel,
    pub source: DataSource,
    /// BLAKE3 content hash of the loaded panel.
    pub dataset_hash: String,
    pub has_synthetic: bool,
}

impl LoadedPanel {
    /// Wrap a panel that is already in memory.
    pub fn from_panel(panel: Panel, source: DataSource) -> Self {
        let dataset_hash = panel.dataset_hash().0;
        Self {
            panel,
            source,
            dataset_hash,
            has_synthetic: source.is_synthetic(),
        }
    }
}

/// Load the panel described by `data`, through `end` inclusive.
pub fn load_panel(data: &DataConfig, end: NaiveDate) -> Result<LoadedPanel, LoadError> {
    let provider = data.source.provider()?;
    load_from_provider(provider.as_ref(), &data.instruments, data.history_start, end)
}

/// Load from an explicit provider. Used by tests and by sweeps that share one
/// generated panel.
pub fn load_from_provider(
    provider: &dyn PanelProvider,
    instruments: &[Symbol],
    history_start: Option<NaiveDate>,
    end: NaiveDate,
) -> Result<LoadedPanel, LoadError> {
    let start = history_start.unwrap_or(NaiveDate::MIN);
    let panel = provider.get_panel(instruments, start, end)?;
    if panel.len() < 2 {
        return Err(LoadError::TooShort {
            start,
            end,
            periods: panel.len(),
        });
    }

    let loaded = LoadedPanel::from_panel(panel, provider.source());
    if loaded.has_synthetic {
        warn!(provider = provider.name(), "using synthetic panel data");
    }
    info!(
        provider = provider.name(),
        periods = loaded.panel.len(),
        instruments = loaded.panel.instruments().len(),
        dataset_hash = %&loaded.dataset_hash[..loaded.dataset_hash.len().min(12)],
        "panel loaded"
    );
    Ok(loaded)
}
