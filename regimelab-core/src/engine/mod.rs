//! Backtesting engine: period-by-period loop over an owned state value.
//!
//! The engine consumes ordered period inputs (realized returns) and a weight
//! source, then runs the four-phase period loop:
//!
//! 1. Order check: reject out-of-order periods
//! 2. Roll: holdings drift with realized returns, NAV compounds
//! 3. Rebalance: trade to the requested targets, charge costs
//! 4. Record: append the period to the history

pub mod cost_model;
pub mod history;
pub mod loop_runner;
pub mod state;

pub use cost_model::{CostModel, CostPreset};
pub use history::{PeriodRecord, PeriodStatus};
pub use loop_runner::{
    run_backtest, BacktestEngine, EngineError, PeriodContext, PeriodInput, SourceError,
    WeightSource,
};
pub use state::{BacktestRun, BacktestState, EngineConfig};
