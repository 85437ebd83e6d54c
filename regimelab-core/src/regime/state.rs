//! Regime labels and per-period regime state.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegimeLabel {
    Normal,
    Expansion,
    Contraction,
    HighVolatility,
    Transition,
}

impl RegimeLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Expansion => "expansion",
            Self::Contraction => "contraction",
            Self::HighVolatility => "high_volatility",
            Self::Transition => "transition",
        }
    }
}

impl fmt::Display for RegimeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a period's regime state was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegimeSource {
    /// No valid snapshot exists yet; the label defaults to `Normal`.
    Warmup,
    /// Filtered from the most recent estimation.
    Filtered,
    /// The most recent estimation failed; filtered from an older snapshot.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeState {
    pub period: usize,
    pub label: RegimeLabel,
    pub state_index: Option<usize>,
    /// Filtered distribution over the snapshot's states.
    pub probabilities: Vec<f64>,
    pub source: RegimeSource,
    /// Period of the snapshot used, if any.
    pub estimated_at: Option<usize>,
}

impl RegimeState {
    pub fn warmup(period: usize) -> Self {
        Self {
            period,
            label: RegimeLabel::Normal,
            state_index: None,
            probabilities: Vec::new(),
            source: RegimeSource::Warmup,
            estimated_at: None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.source == RegimeSource::Fallback
    }
}

/// Map fitted states to labels from their emission means.
///
/// `means[state][0]` is the mean market return and `means[state][1]` (when
/// present) the mean volatility. With three or more states the most volatile
/// state is `HighVolatility`; of the rest the highest return is `Expansion`,
/// the lowest `Contraction`, and anything in between `Transition`. A single
/// state is `Normal`. Ties resolve by state index.
pub fn assign_labels(means: &[Vec<f64>]) -> Vec<RegimeLabel> {
    let n = means.len();
    let mut labels = vec![RegimeLabel::Transition; n];
    if n == 0 {
        return labels;
    }
    if n == 1 {
        labels[0] = RegimeLabel::Normal;
        return labels;
    }

    let feature = |s: usize, k: usize| means[s].get(k).copied().unwrap_or(0.0);
    let mut remaining: Vec<usize> = (0..n).collect();

    if n >= 3 && means.iter().all(|m| m.len() >= 2) {
        let mut high_vol = 0;
        for s in 1..n {
            if feature(s, 1) > feature(high_vol, 1) {
                high_vol = s;
            }
        }
        labels[high_vol] = RegimeLabel::HighVolatility;
        remaining.retain(|&s| s != high_vol);
    }

    remaining.sort_by(|&a, &b| {
        feature(b, 0)
            .partial_cmp(&feature(a, 0))
            .unwrap_or(Ordering::Equal)
            .then(a.cmp(&b))
    });
    if let Some(&first) = remaining.first() {
        labels[first] = RegimeLabel::Expansion;
    }
    if remaining.len() >= 2 {
        labels[remaining[remaining.len() - 1]] = RegimeLabel::Contraction;
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_state_is_normal() {
        assert_eq!(assign_labels(&[vec![0.001, 0.01]]), vec![RegimeLabel::Normal]);
    }

    #[test]
    fn two_states_split_by_return() {
        let labels = assign_labels(&[vec![-0.002, 0.03], vec![0.001, 0.01]]);
        assert_eq!(labels, vec![RegimeLabel::Contraction, RegimeLabel::Expansion]);
    }

    #[test]
    fn three_states_pick_high_vol_first() {
        let labels = assign_labels(&[
            vec![0.001, 0.01],
            vec![-0.003, 0.04],
            vec![-0.001, 0.012],
        ]);
        assert_eq!(
            labels,
            vec![
                RegimeLabel::Expansion,
                RegimeLabel::HighVolatility,
                RegimeLabel::Contraction
            ]
        );
    }

    #[test]
    fn four_states_include_transition() {
        let labels = assign_labels(&[
            vec![0.0, 0.011],
            vec![0.002, 0.009],
            vec![-0.002, 0.05],
            vec![-0.001, 0.02],
        ]);
        assert_eq!(
            labels,
            vec![
                RegimeLabel::Transition,
                RegimeLabel::Expansion,
                RegimeLabel::HighVolatility,
                RegimeLabel::Contraction
            ]
        );
    }

    #[test]
    fn warmup_state_is_normal_and_not_degraded() {
        let s = RegimeState::warmup(3);
        assert_eq!(s.label, RegimeLabel::Normal);
        assert!(!s.is_degraded());
    }
}
