//! Property tests for construction and accounting invariants.
//!
//! Uses proptest to verify:
//! 1. Projection: the constraint projection lands inside every hard
//!    constraint whenever the constraint set is feasible, and is idempotent
//! 2. Rank bucket: long-only buckets invest min(gross, k·cap) under the cap
//! 3. Turnover: symmetric and bounded below by the gross change
//! 4. NAV accounting: nav = nav_start·(1 + gross_return) − cost every period

use chrono::NaiveDate;
use proptest::prelude::*;
use regimelab_core::domain::{gross_exposure, turnover_between, TargetWeights, WeightMap};
use regimelab_core::engine::{
    run_backtest, CostModel, EngineConfig, PeriodInput, SourceError, WeightSource,
};
use regimelab_core::portfolio::{
    BucketWeighting, ConstructionInput, Constraints, PortfolioConstructor, RankBucket, RiskModel,
};
use std::collections::BTreeMap;

// ── Strategies (proptest) ────────────────────────────────────────────

fn symbols(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("S{i:02}")).collect()
}

fn arb_constraints() -> impl Strategy<Value = Constraints> {
    (
        any::<bool>(),
        0.5..2.0_f64,
        0.05..1.0_f64,
        0.0..1.0_f64,
        0.0..1.0_f64,
    )
        .prop_map(|(long_only, gross, cap, a, b)| {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let (net_min, net_max) = if long_only {
                (lo * gross, hi * gross)
            } else {
                ((2.0 * lo - 1.0) * gross, (2.0 * hi - 1.0) * gross)
            };
            Constraints {
                gross_limit: gross,
                net_min,
                net_max,
                max_weight: cap,
                long_only,
                turnover_budget: None,
            }
        })
}

fn arb_weights() -> impl Strategy<Value = WeightMap> {
    prop::collection::btree_map("[A-F]", -0.5..0.5_f64, 0..6)
}

fn date(t: usize) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(t as i64)
}

// ── 1. Projection ────────────────────────────────────────────────────

proptest! {
    #[test]
    fn projection_satisfies_hard_constraints(
        c in arb_constraints(),
        v in prop::collection::vec(-2.0..2.0_f64, 1..12),
    ) {
        prop_assume!(c.check_feasible(v.len()).is_ok());
        let w = c.project(&v);
        let map: WeightMap = symbols(v.len()).into_iter().zip(w.iter().copied()).collect();
        let violations = c.violations(&map);
        prop_assert!(violations.is_empty(), "{:?} for {:?}", violations, c);
    }

    #[test]
    fn projection_is_idempotent(
        c in arb_constraints(),
        v in prop::collection::vec(-2.0..2.0_f64, 1..12),
    ) {
        prop_assume!(c.check_feasible(v.len()).is_ok());
        let once = c.project(&v);
        let twice = c.project(&once);
        for (a, b) in once.iter().zip(&twice) {
            prop_assert!((a - b).abs() < 1e-9, "{} vs {}", a, b);
        }
    }
}

// ── 2. Rank bucket ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn long_only_bucket_invests_up_to_cap(
        forecasts in prop::collection::vec(-0.01..0.01_f64, 1..15),
        long_count in 1usize..10,
        cap in 0.05..1.0_f64,
    ) {
        let names = symbols(forecasts.len());
        let forecasts: BTreeMap<String, f64> = names.iter().cloned().zip(forecasts).collect();
        let constraints = Constraints { max_weight: cap, ..Default::default() };
        let risk = RiskModel::diagonal(&[]);
        let current = WeightMap::new();
        let input = ConstructionInput {
            date: date(0),
            forecasts: &forecasts,
            risk: &risk,
            current: &current,
            constraints: &constraints,
        };
        let bucket = RankBucket::new(long_count, 0, BucketWeighting::Equal);
        let target = bucket.rebalance(&input).unwrap();

        let k = long_count.min(forecasts.len());
        let expected = (k as f64 * cap).min(1.0);
        prop_assert!(target.weights.len() <= k);
        prop_assert!((target.gross() - expected).abs() < 1e-9);
        prop_assert!(target.weights.values().all(|w| *w >= 0.0 && *w <= cap + 1e-12));

        // Every held name ranks at least as high as every excluded name.
        let min_held = target.weights.keys().map(|s| forecasts[s]).fold(f64::INFINITY, f64::min);
        for (s, f) in &forecasts {
            if !target.weights.contains_key(s) {
                prop_assert!(*f <= min_held);
            }
        }
    }
}

// ── 3. Turnover ──────────────────────────────────────────────────────

proptest! {
    #[test]
    fn turnover_is_symmetric_and_bounded(a in arb_weights(), b in arb_weights()) {
        let ab = turnover_between(&a, &b);
        let ba = turnover_between(&b, &a);
        prop_assert!((ab - ba).abs() < 1e-12);
        prop_assert!(ab + 1e-12 >= (gross_exposure(&a) - gross_exposure(&b)).abs());
        prop_assert!(turnover_between(&a, &a).abs() < 1e-15);
    }
}

// ── 4. NAV accounting ────────────────────────────────────────────────

struct Replay {
    targets: Vec<WeightMap>,
}

impl WeightSource for Replay {
    fn target_weights(
        &mut self,
        period: usize,
        date: NaiveDate,
        _rolled: &WeightMap,
    ) -> Result<TargetWeights, SourceError> {
        let w = self.targets.get(period).cloned().unwrap_or_default();
        Ok(TargetWeights::new(date, w))
    }
}

fn arb_long_only_book() -> impl Strategy<Value = WeightMap> {
    prop::collection::vec(0.0..1.0_f64, 3).prop_map(|raw| {
        let total: f64 = raw.iter().sum::<f64>().max(1.0);
        ["A", "B", "C"]
            .iter()
            .zip(raw)
            .map(|(s, w)| (s.to_string(), w / total))
            .collect()
    })
}

proptest! {
    #[test]
    fn nav_identity_holds_every_period(
        targets in prop::collection::vec(arb_long_only_book(), 2..8),
        returns in prop::collection::vec(prop::collection::vec(-0.2..0.2_f64, 3), 8),
        bps in 0.0..30.0_f64,
    ) {
        let inputs: Vec<PeriodInput> = (0..targets.len())
            .map(|t| PeriodInput {
                period: t,
                date: date(t),
                returns: ["A", "B", "C"]
                    .iter()
                    .zip(&returns[t])
                    .map(|(s, r)| (s.to_string(), *r))
                    .collect(),
            })
            .collect();
        let config = EngineConfig::with_costs(1_000.0, CostModel::new(bps, 0.0));
        let mut source = Replay { targets };
        let run = run_backtest(&config, &inputs, &mut source).unwrap();

        for record in &run.history {
            let rolled_nav = record.nav_start * (1.0 + record.gross_return);
            prop_assert!((record.nav - (rolled_nav - record.cost)).abs() < 1e-9);
            let expected_cost = rolled_nav * bps * 1e-4 * record.turnover;
            prop_assert!((record.cost - expected_cost).abs() < 1e-9);
            prop_assert!(record.gross_exposure <= 1.0 + 1e-12);
        }
    }
}
