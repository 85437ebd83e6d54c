//! Period-by-period engine loop: the heart of the backtest.
//!
//! Phases per period:
//! 1. Order check: periods must arrive strictly increasing
//! 2. Roll: apply realized returns to the prior holdings and NAV
//! 3. Rebalance: request targets (on schedule), trade, charge costs
//! 4. Record: append the period to the history

use super::history::{PeriodRecord, PeriodStatus};
use super::state::{BacktestRun, BacktestState, EngineConfig};
use crate::domain::{gross_exposure, net_exposure, prune, Symbol, TargetWeights, WeightMap};
use crate::factors::FactorError;
use crate::portfolio::{ConstructionError, Constraints};
use crate::regime::RegimeLabel;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Realized returns for one period (`close[t] / close[t-1] - 1`).
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodInput {
    pub period: usize,
    pub date: NaiveDate,
    pub returns: BTreeMap<Symbol, f64>,
}

/// Annotations recorded alongside a period.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeriodContext {
    pub regime: Option<RegimeLabel>,
    pub regime_degraded: bool,
    pub excluded_instruments: Vec<Symbol>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    #[error(transparent)]
    Construction(#[from] ConstructionError),

    #[error(transparent)]
    Factor(#[from] FactorError),

    #[error("period {period} requested for {requested}, but the panel has {expected:?} there")]
    TemporalOrder {
        period: usize,
        requested: NaiveDate,
        expected: Option<NaiveDate>,
    },
}

impl SourceError {
    /// Recoverable failures hold the rolled book; everything else stops the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Construction(
                ConstructionError::InfeasibleConstraints { .. }
                    | ConstructionError::OptimizationTimeout { .. }
            )
        )
    }
}

/// Supplies target weights to the engine.
///
/// `target_weights` is called only on rebalance periods, after holdings have
/// been rolled to `date`. `context` is called once per period, after any
/// `target_weights` call for that period.
pub trait WeightSource {
    fn target_weights(
        &mut self,
        period: usize,
        date: NaiveDate,
        rolled: &WeightMap,
    ) -> Result<TargetWeights, SourceError>;

    fn context(&mut self, _period: usize, _date: NaiveDate) -> Result<PeriodContext, SourceError> {
        Ok(PeriodContext::default())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("period {period} ({date}) arrived after period {previous_period} ({previous_date})")]
    TemporalOrder {
        period: usize,
        date: NaiveDate,
        previous_period: usize,
        previous_date: NaiveDate,
    },

    #[error("temporal order violated: target weights for {date} were produced as of {as_of}")]
    LookAhead { date: NaiveDate, as_of: NaiveDate },

    #[error("no realized return for held instrument {symbol} on {date}")]
    DataUnavailable { symbol: Symbol, date: NaiveDate },

    #[error("NAV depleted on {date}: {nav}")]
    NavDepleted { date: NaiveDate, nav: f64 },

    #[error("weight source failed at period {period}: {source}")]
    Source {
        period: usize,
        #[source]
        source: SourceError,
    },

    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),
}

/// Sequential backtest engine. Owns the state; `step` is the only mutator.
#[derive(Debug)]
pub struct BacktestEngine {
    config: EngineConfig,
    state: BacktestState,
    history: Vec<PeriodRecord>,
}

impl BacktestEngine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate().map_err(EngineError::InvalidConfig)?;
        Ok(Self {
            state: BacktestState::new(config.initial_nav),
            config,
            history: Vec::new(),
        })
    }

    pub fn state(&self) -> &BacktestState {
        &self.state
    }

    pub fn history(&self) -> &[PeriodRecord] {
        &self.history
    }

    /// Advance one period.
    pub fn step(
        &mut self,
        input: &PeriodInput,
        source: &mut dyn WeightSource,
    ) -> Result<&PeriodRecord, EngineError> {
        // ─── Phase 1: Order check ───
        if let (Some(previous_period), Some(previous_date)) =
            (self.state.last_period, self.state.last_date)
        {
            if input.period <= previous_period || input.date <= previous_date {
                return Err(EngineError::TemporalOrder {
                    period: input.period,
                    date: input.date,
                    previous_period,
                    previous_date,
                });
            }
        }

        // ─── Phase 2: Roll ───
        let nav_start = self.state.nav;
        let (gross_return, rolled) = roll(&self.state.holdings, &input.returns, input.date)?;
        let rolled_nav = nav_start * (1.0 + gross_return);
        if rolled_nav <= 0.0 || !rolled_nav.is_finite() {
            return Err(EngineError::NavDepleted {
                date: input.date,
                nav: rolled_nav,
            });
        }

        // ─── Phase 3: Rebalance ───
        let scheduled = self.state.periods_processed % self.config.rebalance_every == 0;
        let (weights, status) = if scheduled {
            match source.target_weights(input.period, input.date, &rolled) {
                Ok(target) => {
                    if target.as_of > input.date {
                        return Err(EngineError::LookAhead {
                            date: input.date,
                            as_of: target.as_of,
                        });
                    }
                    let limits = self
                        .config
                        .constraints
                        .clone()
                        .unwrap_or_else(|| target_envelope(&target.weights));
                    (
                        apply_trades(
                            &rolled,
                            &target.weights,
                            self.config.min_trade_weight,
                            &limits,
                        ),
                        PeriodStatus::Rebalanced,
                    )
                }
                Err(e) if e.is_recoverable() => {
                    warn!(period = input.period, date = %input.date, error = %e, "rebalance held");
                    (
                        rolled.clone(),
                        PeriodStatus::Held {
                            reason: e.to_string(),
                        },
                    )
                }
                Err(e) => {
                    return Err(EngineError::Source {
                        period: input.period,
                        source: e,
                    })
                }
            }
        } else {
            (rolled.clone(), PeriodStatus::NotScheduled)
        };

        let trades = trade_list(&rolled, &weights);
        let turnover: f64 = trades.values().map(|d| d.abs()).sum();
        let cost = self.config.cost_model.rebalance_cost(rolled_nav, &trades);
        let nav = rolled_nav - cost;
        if nav <= 0.0 || !nav.is_finite() {
            return Err(EngineError::NavDepleted {
                date: input.date,
                nav,
            });
        }

        let context = source
            .context(input.period, input.date)
            .map_err(|source| EngineError::Source {
                period: input.period,
                source,
            })?;

        // ─── Phase 4: Record ───
        debug!(
            period = input.period,
            nav,
            turnover,
            cost,
            status = status.label(),
            "period processed"
        );
        self.state.holdings = weights.clone();
        self.state.nav = nav;
        self.state.cumulative_turnover += turnover;
        self.state.cumulative_cost += cost;
        self.state.last_period = Some(input.period);
        self.state.last_date = Some(input.date);
        self.state.periods_processed += 1;

        self.history.push(PeriodRecord {
            period: input.period,
            date: input.date,
            nav_start,
            nav,
            gross_return,
            net_return: nav / nav_start - 1.0,
            cost,
            turnover,
            gross_exposure: gross_exposure(&weights),
            net_exposure: net_exposure(&weights),
            rolled_weights: rolled,
            weights,
            regime: context.regime,
            regime_degraded: context.regime_degraded,
            status,
            excluded_instruments: context.excluded_instruments,
        });
        let last = self.history.len() - 1;
        Ok(&self.history[last])
    }

    pub fn finish(self) -> BacktestRun {
        BacktestRun {
            config: self.config,
            history: self.history,
            final_state: self.state,
        }
    }
}

/// Roll holdings by realized returns: `R = Σ wᵢ rᵢ`,
/// `w̃ᵢ = wᵢ (1 + rᵢ) / (1 + R)`.
fn roll(
    holdings: &WeightMap,
    returns: &BTreeMap<Symbol, f64>,
    date: NaiveDate,
) -> Result<(f64, WeightMap), EngineError> {
    let mut portfolio_return = 0.0;
    let mut grown = WeightMap::new();
    for (sym, w) in holdings {
        let r = returns
            .get(sym)
            .copied()
            .filter(|r| r.is_finite())
            .ok_or_else(|| EngineError::DataUnavailable {
                symbol: sym.clone(),
                date,
            })?;
        portfolio_return += w * r;
        grown.insert(sym.clone(), w * (1.0 + r));
    }
    let growth = 1.0 + portfolio_return;
    if growth <= 0.0 {
        return Ok((portfolio_return, WeightMap::new()));
    }
    let mut rolled: WeightMap = grown.into_iter().map(|(s, w)| (s, w / growth)).collect();
    prune(&mut rolled);
    Ok((portfolio_return, rolled))
}

/// Move from `rolled` to `target`, leaving per-name trades below `min_trade`
/// at the rolled weight. If the partially traded book breaks `limits`, the
/// full target is traded instead.
fn apply_trades(
    rolled: &WeightMap,
    target: &WeightMap,
    min_trade: f64,
    limits: &Constraints,
) -> WeightMap {
    let mut out = WeightMap::new();
    let mut suppressed = 0usize;
    for sym in rolled.keys().chain(target.keys()) {
        let from = rolled.get(sym).copied().unwrap_or(0.0);
        let to = target.get(sym).copied().unwrap_or(0.0);
        let w = if to != from && (to - from).abs() < min_trade {
            suppressed += 1;
            from
        } else {
            to
        };
        out.insert(sym.clone(), w);
    }
    prune(&mut out);
    if suppressed == 0 {
        return out;
    }
    let violations = limits.violations(&out);
    if violations.is_empty() {
        return out;
    }
    debug!(
        suppressed,
        violation = %violations.join("; "),
        "no-trade band breaks hard limits, trading the full target"
    );
    let mut full = target.clone();
    prune(&mut full);
    full
}

/// Limits implied by the target alone: its gross, its largest position, and
/// long-only when it holds no shorts.
fn target_envelope(target: &WeightMap) -> Constraints {
    let gross = gross_exposure(target);
    Constraints {
        gross_limit: gross,
        net_min: -gross,
        net_max: gross,
        max_weight: target.values().fold(0.0, |m, w| m.max(w.abs())),
        long_only: target.values().all(|w| *w >= 0.0),
        turnover_budget: None,
    }
}

/// Per-name weight changes (non-zero only).
fn trade_list(rolled: &WeightMap, weights: &WeightMap) -> WeightMap {
    let mut trades = WeightMap::new();
    for sym in rolled.keys().chain(weights.keys()) {
        let d = weights.get(sym).copied().unwrap_or(0.0) - rolled.get(sym).copied().unwrap_or(0.0);
        if d != 0.0 {
            trades.insert(sym.clone(), d);
        }
    }
    trades
}

/// Run the engine over ordered period inputs.
pub fn run_backtest(
    config: &EngineConfig,
    inputs: &[PeriodInput],
    source: &mut dyn WeightSource,
) -> Result<BacktestRun, EngineError> {
    info!(
        periods = inputs.len(),
        initial_nav = config.initial_nav,
        rebalance_every = config.rebalance_every,
        "backtest started"
    );
    let mut engine = BacktestEngine::new(config.clone())?;
    for input in inputs {
        engine.step(input, source)?;
    }
    let run = engine.finish();
    info!(
        final_nav = run.final_nav(),
        held = run.held_periods(),
        "backtest finished"
    );
    Ok(run)
}
