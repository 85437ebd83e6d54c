//! Parallel sweeps: every grid point is independent, so the ranked results
//! do not depend on thread scheduling and match sequential single runs.

use regimelab_core::data::SyntheticConfig;
use regimelab_core::engine::CostPreset;
use regimelab_core::PipelineConfig;
use regimelab_runner::{
    load_panel, run_on_panel, run_sweep, BacktestSettings, CostConfig, DataConfig, DataSpec,
    RankMetric, ResearchConfig, SweepAxis, SweepConfig,
};

fn base_config() -> ResearchConfig {
    let synth = SyntheticConfig {
        instruments: 10,
        periods: 160,
        seed: 17,
        ..Default::default()
    };
    let start = synth.start;
    ResearchConfig {
        data: DataConfig {
            source: DataSpec::Synthetic(synth),
            ..Default::default()
        },
        backtest: BacktestSettings {
            start: start + chrono::Duration::days(45),
            end: start + chrono::Duration::days(220),
            initial_nav: 100_000.0,
            rebalance_every: 1,
            min_trade_weight: 0.0,
            costs: CostConfig::default(),
            periods_per_year: 252.0,
        },
        pipeline: PipelineConfig::momentum_top(3, 20),
    }
}

fn sweep() -> SweepConfig {
    SweepConfig {
        base: base_config(),
        axes: vec![
            SweepAxis::LongCount {
                values: vec![2, 3, 5],
            },
            SweepAxis::Costs {
                values: vec![CostPreset::Frictionless, CostPreset::Hostile],
            },
        ],
        rank_by: RankMetric::Sharpe,
    }
}

#[test]
fn repeated_parallel_sweeps_are_identical() {
    let config = sweep();
    let loaded = load_panel(&config.base.data, config.base.backtest.end).unwrap();
    let first = run_sweep(&config, &loaded).unwrap();
    for _ in 0..3 {
        assert_eq!(run_sweep(&config, &loaded).unwrap(), first);
    }
    assert_eq!(first.outcomes.len(), 6);
    assert_eq!(first.failures(), 0);
}

#[test]
fn sweep_outcomes_match_single_runs() {
    let config = sweep();
    let loaded = load_panel(&config.base.data, config.base.backtest.end).unwrap();
    let results = run_sweep(&config, &loaded).unwrap();

    for point in config.expand().unwrap() {
        let single = run_on_panel(&point.config, &loaded).unwrap();
        let outcome = results
            .outcomes
            .iter()
            .find(|o| o.label == point.label)
            .expect("every point has an outcome");
        assert_eq!(outcome.run_id.as_deref(), Some(single.run_id.as_str()));
        assert_eq!(outcome.report.as_ref(), Some(&single.report));
    }
}

#[test]
fn outcomes_are_ranked_by_the_chosen_metric() {
    let config = sweep();
    let loaded = load_panel(&config.base.data, config.base.backtest.end).unwrap();
    let results = run_sweep(&config, &loaded).unwrap();
    let sharpes: Vec<f64> = results
        .outcomes
        .iter()
        .filter_map(|o| o.report.as_ref().map(|r| r.sharpe))
        .collect();
    assert!(sharpes.windows(2).all(|w| w[0] >= w[1]));
    assert_eq!(
        results.best().map(|o| o.label.as_str()),
        results.outcomes.first().map(|o| o.label.as_str())
    );
}

#[test]
fn hostile_costs_never_beat_frictionless_nav() {
    let config = sweep();
    let loaded = load_panel(&config.base.data, config.base.backtest.end).unwrap();
    let results = run_sweep(&config, &loaded).unwrap();
    for n in [2, 3, 5] {
        let nav = |costs: &str| {
            results
                .outcomes
                .iter()
                .find(|o| o.label == format!("long_count={n},costs={costs}"))
                .and_then(|o| o.report.as_ref())
                .map(|r| r.final_nav)
                .unwrap()
        };
        assert!(nav("hostile") <= nav("frictionless"));
    }
}
