//! Panel data: the in-memory model, providers, and universe rules.

pub mod csv_source;
pub mod panel;
pub mod parquet_source;
pub mod provider;
pub mod synthetic;
pub mod universe;

pub use csv_source::{read_panel_csv, write_panel_csv, CsvPanelSource};
pub use panel::{Panel, PanelBuilder, PanelRow, CLOSE, VOLUME};
pub use parquet_source::{write_panel_parquet, ParquetPanelSource};
pub use provider::{DataError, DataSource, InMemoryProvider, PanelProvider};
pub use synthetic::{SyntheticConfig, SyntheticPanel};
pub use universe::UniverseRules;
