//! Criterion benchmarks for RegimeLab hot paths.
//!
//! Benchmarks:
//! 1. Factor library (one cross-section)
//! 2. HMM regime estimation (full schedule)
//! 3. Constraint projection and mean-variance construction
//! 4. Full pipeline backtest (factors → regime → model → weights → engine)

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::BTreeMap;

use regimelab_core::data::{Panel, SyntheticConfig, SyntheticPanel, UniverseRules};
use regimelab_core::domain::WeightMap;
use regimelab_core::engine::{CostModel, CostPreset, EngineConfig};
use regimelab_core::factors::{FactorDefinition, FactorLibrary, FactorSpec, Normalization};
use regimelab_core::portfolio::{
    ConstructionInput, Constraints, ConstructorKind, PortfolioConstructor, RiskConfig, RiskModel,
};
use regimelab_core::regime::{EstimationWindow, RegimeConfig, RegimeDetector, RegimeModelKind};
use regimelab_core::{PipelineConfig, ResearchPipeline};

// ── Helpers ──────────────────────────────────────────────────────────

fn make_panel(instruments: usize, periods: usize) -> Panel {
    SyntheticPanel::generate(&SyntheticConfig {
        instruments,
        periods,
        ..Default::default()
    })
    .unwrap()
    .panel
}

fn factor_specs() -> Vec<FactorSpec> {
    vec![
        FactorSpec::new(
            FactorDefinition::Momentum {
                lookback: 126,
                skip: 21,
            },
            1.0e-3,
        ),
        FactorSpec::new(FactorDefinition::LowVolatility { lookback: 63 }, 5.0e-4),
        FactorSpec::new(FactorDefinition::Liquidity { lookback: 21 }, 2.0e-4),
    ]
}

fn hmm_regime() -> RegimeConfig {
    RegimeConfig {
        model: RegimeModelKind::Hmm {
            n_states: 3,
            max_iterations: 200,
            tolerance: 1e-6,
        },
        reestimate_every: 63,
        window: EstimationWindow::Rolling { periods: 504 },
        min_observations: 126,
        ..Default::default()
    }
}

// ── 1. Factor Library ────────────────────────────────────────────────

fn bench_factors(c: &mut Criterion) {
    let mut group = c.benchmark_group("factor_library");
    for &n in &[50, 200] {
        let panel = make_panel(n, 300);
        let library =
            FactorLibrary::from_specs(&factor_specs(), Normalization::default(), UniverseRules::default())
                .unwrap();
        group.bench_with_input(BenchmarkId::new("cross_section", n), &n, |b, _| {
            b.iter(|| library.compute(black_box(&panel), 250))
        });
    }
    group.finish();
}

// ── 2. Regime Estimation ─────────────────────────────────────────────

fn bench_regime(c: &mut Criterion) {
    let mut group = c.benchmark_group("regime_estimation");
    group.sample_size(10);
    let panel = make_panel(20, 1260);
    let config = hmm_regime();
    group.bench_function("hmm_3_states_1260_periods", |b| {
        b.iter(|| RegimeDetector::estimate(black_box(&panel), &UniverseRules::default(), &config))
    });
    group.finish();
}

// ── 3. Construction ──────────────────────────────────────────────────

fn bench_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("construction");
    let panel = make_panel(100, 300);
    let symbols = panel.instruments().to_vec();
    let risk = RiskModel::estimate(&panel, &symbols, 299, &RiskConfig::default());
    let forecasts: BTreeMap<String, f64> = symbols
        .iter()
        .enumerate()
        .map(|(i, s)| (s.clone(), ((i as f64) * 0.37).sin() * 1e-3))
        .collect();
    let constraints = Constraints {
        long_only: false,
        net_min: -0.05,
        net_max: 0.05,
        max_weight: 0.05,
        ..Default::default()
    };
    let current = WeightMap::new();

    let raw: Vec<f64> = forecasts.values().map(|f| f * 100.0).collect();
    group.bench_function("project_100", |b| {
        b.iter(|| constraints.project(black_box(&raw)))
    });

    let mv = ConstructorKind::MeanVariance {
        risk_aversion: 10.0,
        max_iterations: 500,
        time_budget_ms: None,
        tolerance: 1e-8,
    }
    .build();
    let input = ConstructionInput {
        date: panel.date(299).unwrap(),
        forecasts: &forecasts,
        risk: &risk,
        current: &current,
        constraints: &constraints,
    };
    group.bench_function("mean_variance_100", |b| b.iter(|| mv.construct(black_box(&input))));
    group.finish();
}

// ── 4. Full Pipeline ─────────────────────────────────────────────────

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline_backtest");
    group.sample_size(10);
    let panel = make_panel(30, 756);
    let config = PipelineConfig {
        factors: factor_specs(),
        regime: hmm_regime(),
        ..PipelineConfig::momentum_top(10, 126)
    };
    let engine = EngineConfig {
        rebalance_every: 5,
        ..EngineConfig::with_costs(1_000_000.0, CostModel::from_preset(CostPreset::Realistic))
    };
    group.bench_function("30_instruments_600_periods", |b| {
        b.iter(|| {
            let mut pipeline = ResearchPipeline::new(&panel, &config).unwrap();
            pipeline.backtest(black_box(150), 749, &engine)
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_factors,
    bench_regime,
    bench_construction,
    bench_pipeline,
);
criterion_main!(benches);
