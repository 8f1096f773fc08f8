pub mod boost;
pub mod decay;
pub mod pipeline;
pub mod weighted;

pub use boost::{BatchContext, SoundBoostScorer};
pub use decay::RecencyDecay;
pub use pipeline::{ScoreComposer, ScoredItem, TrendScore};
pub use weighted::{saturate, WeightedBreakdown, WeightedScorer};
