//! Domain types shared across the research chain.

pub mod ids;
pub mod weights;

pub use ids::{DatasetHash, RunId, Symbol};
pub use weights::{
    gross_exposure, net_exposure, prune, turnover_between, TargetWeights, WeightMap,
    WEIGHT_EPSILON,
};
