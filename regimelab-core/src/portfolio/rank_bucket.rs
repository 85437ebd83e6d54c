//! Rank-bucket heuristic: long the top names, short the bottom names.

use super::constraints::water_fill;
use super::{ConstructionError, ConstructionInput, PortfolioConstructor};
use crate::domain::{Symbol, WeightMap};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketWeighting {
    #[default]
    Equal,
    InverseVolatility,
}

#[derive(Debug, Clone)]
pub struct RankBucket {
    long_count: usize,
    short_count: usize,
    weighting: BucketWeighting,
}

impl RankBucket {
    pub fn new(long_count: usize, short_count: usize, weighting: BucketWeighting) -> Self {
        Self {
            long_count,
            short_count,
            weighting,
        }
    }
}

impl PortfolioConstructor for RankBucket {
    fn name(&self) -> &str {
        "rank_bucket"
    }

    fn construct(&self, input: &ConstructionInput<'_>) -> Result<WeightMap, ConstructionError> {
        let c = input.constraints;
        let ranked: Vec<(&Symbol, f64)> = match self.weighting {
            BucketWeighting::Equal => input.ranked().into_iter().map(|(s, _)| (s, 1.0)).collect(),
            BucketWeighting::InverseVolatility => input
                .ranked()
                .into_iter()
                .filter_map(|(s, _)| {
                    input
                        .risk
                        .volatility(s)
                        .filter(|v| *v > 0.0)
                        .map(|v| (s, 1.0 / v))
                })
                .collect(),
        };

        let n_long = self.long_count.min(ranked.len());
        let n_short = if c.long_only {
            0
        } else {
            self.short_count.min(ranked.len() - n_long)
        };
        let longs = &ranked[..n_long];
        let shorts = &ranked[ranked.len() - n_short..];

        let (long_total, short_total) = match (longs.is_empty(), shorts.is_empty()) {
            (_, true) => (c.gross_limit.min(c.net_max).max(0.0), 0.0),
            (true, false) => (0.0, c.gross_limit.min(-c.net_min).max(0.0)),
            (false, false) => {
                let net = 0.0_f64.clamp(c.net_min, c.net_max);
                (
                    (c.gross_limit + net) / 2.0,
                    (c.gross_limit - net) / 2.0,
                )
            }
        };

        let mut weights = WeightMap::new();
        let long_raw: Vec<f64> = longs.iter().map(|(_, r)| *r).collect();
        for ((sym, _), w) in longs.iter().zip(water_fill(&long_raw, long_total, c.max_weight)) {
            weights.insert((*sym).clone(), w);
        }
        let short_raw: Vec<f64> = shorts.iter().map(|(_, r)| *r).collect();
        for ((sym, _), w) in shorts.iter().zip(water_fill(&short_raw, short_total, c.max_weight)) {
            weights.insert((*sym).clone(), -w);
        }
        crate::domain::prune(&mut weights);
        Ok(weights)
    }
}
