//! Cross-sectional normalization of raw factor values.

use crate::stats::{mean, std_dev};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// How raw scores are made comparable across instruments within a period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Normalization {
    /// (x − mean) / std, optionally clipped at ±`winsorize` standard deviations.
    #[serde(rename = "zscore")]
    ZScore {
        #[serde(default)]
        winsorize: Option<f64>,
    },
    /// Centered ranks scaled into [-0.5, 0.5]; ties share the average rank.
    Rank,
}

impl Default for Normalization {
    fn default() -> Self {
        Self::ZScore {
            winsorize: Some(3.0),
        }
    }
}

/// Per-factor, per-period normalization metadata.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrossSectionStats {
    pub mean: f64,
    pub std: f64,
    pub count: usize,
}

impl Normalization {
    pub fn apply(&self, values: &[f64]) -> (Vec<f64>, CrossSectionStats) {
        let stats = CrossSectionStats {
            mean: mean(values),
            std: std_dev(values),
            count: values.len(),
        };
        let normalized = match self {
            Self::ZScore { winsorize } => zscore(values, &stats, *winsorize),
            Self::Rank => centered_rank(values),
        };
        (normalized, stats)
    }
}

fn zscore(values: &[f64], stats: &CrossSectionStats, winsorize: Option<f64>) -> Vec<f64> {
    if values.len() < 2 || stats.std < 1e-15 {
        return vec![0.0; values.len()];
    }
    values
        .iter()
        .map(|v| {
            let z = (v - stats.mean) / stats.std;
            match winsorize {
                Some(k) => z.clamp(-k, k),
                None => z,
            }
        })
        .collect()
}

/// Centered ranks in [-0.5, 0.5]. A single value maps to 0.
pub fn centered_rank(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    if n < 2 {
        return vec![0.0; n];
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| values[a].partial_cmp(&values[b]).unwrap_or(Ordering::Equal));

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        // zero-based average rank of the tie group
        let avg = (i + j) as f64 / 2.0;
        for k in i..=j {
            ranks[order[k]] = avg / (n - 1) as f64 - 0.5;
        }
        i = j + 1;
    }
    ranks
}
