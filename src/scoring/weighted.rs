use serde::Serialize;

use crate::config::MetricWeights;
use crate::model::MetricSet;

/// Maps a non-negative magnitude into `[0, 1]` with `log1p(x) / log1p(ceiling)`.
pub fn saturate(value: f64, ceiling: f64) -> f64 {
    if !value.is_finite() || value <= 0.0 || ceiling <= 0.0 {
        return 0.0;
    }
    (value.ln_1p() / ceiling.ln_1p()).min(1.0)
}

/// Per-metric contributions of one item to its weighted score.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct WeightedBreakdown {
    pub absolute: MetricSet,
    /// Already multiplied by the recency decay.
    pub velocity: MetricSet,
}

impl WeightedBreakdown {
    pub fn total(&self) -> f64 {
        self.absolute.sum() + self.velocity.sum()
    }
}

#[derive(Debug, Clone)]
pub struct WeightedScorer {
    weights: MetricWeights,
}

impl WeightedScorer {
    pub fn new(weights: MetricWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &MetricWeights {
        &self.weights
    }

    /// `Σ w_i · abs_i + Σ w_j · vel_j · decay` over normalized inputs.
    pub fn score(
        &self,
        normalized_absolute: &MetricSet,
        normalized_velocity: &MetricSet,
        decay: f64,
    ) -> WeightedBreakdown {
        let absolute =
            normalized_absolute.map(|metric, value| self.weights.absolute.get(metric) * value);
        let velocity = normalized_velocity
            .map(|metric, value| self.weights.velocity.get(metric) * value * decay);
        WeightedBreakdown { absolute, velocity }
    }
}
