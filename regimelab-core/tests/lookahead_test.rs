//! Look-ahead contamination tests for the whole research chain.
//!
//! Invariant: nothing computed for period t may depend on panel data dated
//! after t.
//!
//! Method: build the chain on the full panel and on the panel truncated at t.
//! Factor scores, regime state, expected returns, and target weights at t must
//! be identical. Any difference means a stage is reading future data.

use regimelab_core::data::{Panel, SyntheticConfig, SyntheticPanel};
use regimelab_core::domain::WeightMap;
use regimelab_core::factors::{FactorDefinition, FactorSpec};
use regimelab_core::model::{EstimatorKind, ModelConfig, RegimePolicy};
use regimelab_core::portfolio::{BucketWeighting, Constraints, ConstructorKind};
use regimelab_core::regime::{EstimationWindow, RegimeConfig, RegimeModelKind};
use regimelab_core::{InfeasiblePolicy, PipelineConfig, ResearchPipeline};

fn synthetic(periods: usize) -> Panel {
    SyntheticPanel::generate(&SyntheticConfig {
        instruments: 12,
        periods,
        seed: 7,
        ..Default::default()
    })
    .unwrap()
    .panel
}

fn full_chain_config(constructor: ConstructorKind) -> PipelineConfig {
    PipelineConfig {
        factors: vec![
            FactorSpec::new(
                FactorDefinition::Momentum {
                    lookback: 20,
                    skip: 1,
                },
                1.0e-3,
            ),
            FactorSpec::new(FactorDefinition::LowVolatility { lookback: 20 }, 5.0e-4),
        ],
        regime: RegimeConfig {
            model: RegimeModelKind::Hmm {
                n_states: 2,
                max_iterations: 50,
                tolerance: 1e-6,
            },
            reestimate_every: 15,
            window: EstimationWindow::Expanding,
            min_observations: 40,
            vol_window: 10,
            macro_fields: Vec::new(),
        },
        model: ModelConfig {
            estimator: EstimatorKind::Regression {
                policy: RegimePolicy::RegimeRegressor,
            },
            training_window: 60,
            min_training_periods: 10,
            ..Default::default()
        },
        constructor,
        constraints: Constraints {
            max_weight: 0.25,
            ..Default::default()
        },
        infeasible_policy: InfeasiblePolicy::Hold,
        ..PipelineConfig::momentum_top(4, 20)
    }
}

fn assert_chain_matches_truncated(config: &PipelineConfig, checkpoints: &[usize]) {
    let full = synthetic(160);
    let mut on_full = ResearchPipeline::new(&full, config).unwrap();

    for &t in checkpoints {
        let cut = full.truncated(t);
        let mut on_cut = ResearchPipeline::new(&cut, config).unwrap();

        assert_eq!(
            on_full.scores_at(t).unwrap().normalized,
            on_cut.scores_at(t).unwrap().normalized,
            "factor scores differ at t={t}"
        );
        assert_eq!(
            on_full.detector().state_at(t),
            on_cut.detector().state_at(t),
            "regime state differs at t={t}"
        );
        assert_eq!(
            on_full.forecast_at(t).unwrap(),
            on_cut.forecast_at(t).unwrap(),
            "expected returns differ at t={t}"
        );
        // A recoverable construction error must also be reproduced exactly.
        let empty = WeightMap::new();
        assert_eq!(
            on_full.targets_at(t, &empty).map_err(|e| e.to_string()),
            on_cut.targets_at(t, &empty).map_err(|e| e.to_string()),
            "target weights differ at t={t}"
        );
    }
}

#[test]
fn rank_bucket_chain_has_no_lookahead() {
    let constructor = ConstructorKind::RankBucket {
        long_count: 4,
        short_count: 0,
        weighting: BucketWeighting::InverseVolatility,
    };
    assert_chain_matches_truncated(&full_chain_config(constructor), &[45, 80, 121]);
}

#[test]
fn mean_variance_chain_has_no_lookahead() {
    let constructor = ConstructorKind::MeanVariance {
        risk_aversion: 5.0,
        max_iterations: 500,
        time_budget_ms: None,
        tolerance: 1e-8,
    };
    let mut config = full_chain_config(constructor);
    config.infeasible_policy = InfeasiblePolicy::RelaxSoft;
    assert_chain_matches_truncated(&config, &[70, 130]);
}

#[test]
fn future_shock_does_not_move_past_weights() {
    let full = synthetic(120);
    let config = full_chain_config(ConstructorKind::RankBucket {
        long_count: 4,
        short_count: 0,
        weighting: BucketWeighting::Equal,
    });

    let baseline = ResearchPipeline::new(&full, &config)
        .unwrap()
        .backtest(30, 90, &regimelab_core::engine::EngineConfig::new(1.0))
        .unwrap();

    // Replace everything after period 90 with a crash path.
    let shocked = {
        use regimelab_core::data::{PanelBuilder, PanelRow, CLOSE};
        let mut b = PanelBuilder::new();
        for t in 0..full.len() {
            let rows = full
                .instruments()
                .iter()
                .filter_map(|s| {
                    let c = full.close(s, t)?;
                    let c = if t > 90 { c * 0.2 } else { c };
                    Some(PanelRow::new(s.clone()).with(CLOSE, c))
                })
                .collect();
            b.push_period(full.date(t).unwrap(), rows, Default::default())
                .unwrap();
        }
        b.build()
    };
    let after_shock = ResearchPipeline::new(&shocked, &config)
        .unwrap()
        .backtest(30, 90, &regimelab_core::engine::EngineConfig::new(1.0))
        .unwrap();

    assert_eq!(baseline.history, after_shock.history);
}
