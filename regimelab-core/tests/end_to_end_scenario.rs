//! End-to-end scenario: five instruments, three periods, one-period momentum,
//! static regime, no costs, long-only top-2 equal weight.
//!
//! Closes are chosen so the momentum ranking at every period is unambiguous.

use chrono::NaiveDate;
use regimelab_core::data::{Panel, PanelBuilder, PanelRow, CLOSE};
use regimelab_core::domain::turnover_between;
use regimelab_core::engine::{CostModel, EngineConfig, PeriodStatus};
use regimelab_core::regime::RegimeLabel;
use regimelab_core::{PipelineConfig, ResearchPipeline};
use std::collections::BTreeMap;

fn scenario_panel() -> Panel {
    let closes: [(&str, [f64; 3]); 5] = [
        ("A", [100.0, 110.0, 121.0]),
        ("B", [100.0, 105.0, 100.0]),
        ("C", [100.0, 98.0, 99.0]),
        ("D", [100.0, 101.0, 103.0]),
        ("E", [100.0, 90.0, 95.0]),
    ];
    let base = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let mut builder = PanelBuilder::new();
    for t in 0..3 {
        let rows = closes
            .iter()
            .map(|(s, c)| PanelRow::new(*s).with(CLOSE, c[t]))
            .collect();
        builder
            .push_period(base + chrono::Duration::days(t as i64), rows, BTreeMap::new())
            .unwrap();
    }
    builder.build()
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-12
}

#[test]
fn top_two_momentum_scenario() {
    let panel = scenario_panel();
    let mut pipeline = ResearchPipeline::new(&panel, &PipelineConfig::momentum_top(2, 1)).unwrap();
    let run = pipeline
        .backtest(0, 2, &EngineConfig::new(1.0))
        .unwrap();

    assert_eq!(run.history.len(), 3);

    // Period 0 has no prior return: nothing to rank, book stays empty.
    assert!(run.history[0].weights.is_empty());
    assert!(approx(run.history[0].nav, 1.0));

    // Period 1 ranks returns 0→1: A (+10%), B (+5%).
    let w1 = &run.history[1].weights;
    assert_eq!(w1.len(), 2);
    assert!(approx(w1["A"], 0.5));
    assert!(approx(w1["B"], 0.5));
    assert!(approx(run.history[1].nav, 1.0));

    // Period 2 earns A +10%, B −4.7619% on the period-1 book, then ranks
    // returns 1→2: A (+10%), E (+5.56%).
    let expected_nav = 1.0 + 0.5 * 0.10 + 0.5 * (100.0 / 105.0 - 1.0);
    assert!(approx(run.history[2].gross_return, expected_nav - 1.0));
    assert!(approx(run.final_nav(), expected_nav));
    let w2 = &run.history[2].weights;
    assert_eq!(w2.keys().map(String::as_str).collect::<Vec<_>>(), vec!["A", "E"]);
    assert!(approx(w2["A"], 0.5));
    assert!(approx(w2["E"], 0.5));

    // Period 1 buys the book from cash.
    assert!(approx(run.history[1].turnover, 1.0));

    // Period 2 trims the drifted A back to 0.5, sells all of B, buys E.
    let growth = expected_nav;
    let rolled_a = 0.5 * 1.10 / growth;
    let rolled_b = 0.5 * (100.0 / 105.0) / growth;
    let rolled = &run.history[2].rolled_weights;
    assert!(approx(rolled["A"], rolled_a));
    assert!(approx(rolled["B"], rolled_b));
    let analytic = (0.5 - rolled_a).abs() + rolled_b + 0.5;
    assert!(approx(
        run.history[2].turnover,
        (0.5 - rolled["A"]).abs() + rolled["B"] + 0.5
    ));
    assert!(approx(run.history[2].turnover, analytic));

    for record in &run.history {
        assert_eq!(record.status, PeriodStatus::Rebalanced);
        assert_eq!(record.regime, Some(RegimeLabel::Normal));
        assert!(!record.regime_degraded);
        assert_eq!(record.cost, 0.0);
    }
}

#[test]
fn costs_reduce_nav_by_turnover_times_rate() {
    let panel = scenario_panel();
    let config = EngineConfig::with_costs(1.0, CostModel::new(5.0, 5.0));
    let mut pipeline = ResearchPipeline::new(&panel, &PipelineConfig::momentum_top(2, 1)).unwrap();
    let run = pipeline.backtest(0, 2, &config).unwrap();

    // Period 1 buys the whole book from cash: turnover 1 at 10 bps.
    assert!(approx(run.history[1].turnover, 1.0));
    assert!(approx(run.history[1].cost, 0.001));
    assert!(approx(run.history[1].nav, 0.999));
    assert!(run.final_nav() < 1.0 + 0.5 * 0.10 + 0.5 * (100.0 / 105.0 - 1.0));
}

#[test]
fn rebalance_every_other_period_only_rolls_in_between() {
    let panel = scenario_panel();
    let config = EngineConfig {
        rebalance_every: 2,
        ..EngineConfig::new(1.0)
    };
    let mut pipeline = ResearchPipeline::new(&panel, &PipelineConfig::momentum_top(2, 1)).unwrap();
    let run = pipeline.backtest(1, 2, &config).unwrap();

    assert_eq!(run.history[0].status, PeriodStatus::Rebalanced);
    assert_eq!(run.history[1].status, PeriodStatus::NotScheduled);
    // Period 2 holds the drifted period-1 book.
    assert_eq!(run.history[1].weights, run.history[1].rolled_weights);
    assert!(run.history[1].weights.contains_key("B"));
    assert!(approx(run.history[1].turnover, 0.0));
}

#[test]
fn identical_runs_are_bit_identical() {
    let panel = scenario_panel();
    let config = PipelineConfig::momentum_top(2, 1);
    let first = ResearchPipeline::new(&panel, &config)
        .unwrap()
        .backtest(0, 2, &EngineConfig::new(1.0))
        .unwrap();
    let second = ResearchPipeline::new(&panel, &config)
        .unwrap()
        .backtest(0, 2, &EngineConfig::new(1.0))
        .unwrap();
    assert_eq!(first, second);
}

#[test]
fn turnover_is_the_distance_from_the_rolled_book() {
    let panel = scenario_panel();
    let configs = [
        EngineConfig::new(1.0),
        EngineConfig::with_costs(1.0, CostModel::new(5.0, 5.0)),
        EngineConfig {
            rebalance_every: 2,
            ..EngineConfig::new(1.0)
        },
        EngineConfig {
            min_trade_weight: 0.05,
            ..EngineConfig::new(1.0)
        },
    ];
    for config in &configs {
        let mut pipeline =
            ResearchPipeline::new(&panel, &PipelineConfig::momentum_top(2, 1)).unwrap();
        let run = pipeline.backtest(0, 2, config).unwrap();
        for record in &run.history {
            let distance = turnover_between(&record.weights, &record.rolled_weights);
            assert!(
                approx(record.turnover, distance),
                "period {}: turnover {} vs {distance}",
                record.period,
                record.turnover
            );
        }
    }
}
