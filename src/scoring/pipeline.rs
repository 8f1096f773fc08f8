use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

use crate::audio::SoundIndex;
use crate::config::{EngineConfig, MetricWeights};
use crate::error::{ConfigError, ValidationError};
use crate::model::{AnomalyFlag, ContentItem, Metric, MetricSet, Platform};
use crate::scoring::{saturate, BatchContext, RecencyDecay, SoundBoostScorer, WeightedScorer};
use crate::velocity::{VelocityCalculator, VelocityVector};

/// Composite trend score of one content item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendScore {
    pub content_id: String,
    pub value: f64,
    pub computed_at: DateTime<Utc>,
    pub contributing_weights: MetricWeights,
    pub absolute_contribution: MetricSet,
    pub velocity_contribution: MetricSet,
    pub decay: f64,
    pub boost: f64,
    /// Some window had fewer than two samples. Its velocity enters the score
    /// as zero, so a true flat history is told apart only by this flag.
    pub insufficient_data: bool,
    pub anomalies: Vec<AnomalyFlag>,
    pub basis_snapshot_count: usize,
    pub basis_captured_at: Option<DateTime<Utc>>,
}

impl TrendScore {
    /// True once the item has received a snapshot this score did not see.
    pub fn is_stale_for(&self, item: &ContentItem) -> bool {
        item.content_id != self.content_id
            || item.snapshots().len() != self.basis_snapshot_count
            || item.latest().map(|snapshot| snapshot.captured_at) != self.basis_captured_at
    }
}

/// An item after scoring, carrying everything the ranker needs.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredItem {
    pub content_id: String,
    pub platform: Platform,
    pub published_at: DateTime<Utc>,
    pub author: Option<String>,
    pub canonical_sound: Option<String>,
    pub latest_counts: MetricSet,
    pub normalized_absolute: MetricSet,
    pub normalized_velocity: MetricSet,
    /// Decayed, weight-independent growth signal used for tie-breaks and
    /// per-sound aggregation.
    pub velocity_signal: f64,
    pub velocities: Vec<VelocityVector>,
    pub score: TrendScore,
}

impl ScoredItem {
    pub fn trend_score(&self) -> f64 {
        self.score.value
    }

    /// `(likes + comments + shares) / views · 100` from the latest counts.
    pub fn engagement_rate(&self) -> f64 {
        crate::analytics::engagement_rate(
            self.latest_counts.likes as u64,
            self.latest_counts.comments as u64,
            self.latest_counts.shares as u64,
            self.latest_counts.views as u64,
        )
    }
}

/// First-pass result: everything except the batch-coupled boost.
#[derive(Debug, Clone)]
struct Partial {
    latest_counts: MetricSet,
    normalized_absolute: MetricSet,
    normalized_velocity: MetricSet,
    velocities: Vec<VelocityVector>,
    decay: f64,
    velocity_signal: f64,
    insufficient_data: bool,
    anomalies: Vec<AnomalyFlag>,
}

#[derive(Debug, Clone)]
pub struct ScoreComposer {
    config: EngineConfig,
    weighted_scorer: WeightedScorer,
    decay: RecencyDecay,
    boost_scorer: SoundBoostScorer,
    velocity: VelocityCalculator,
}

impl ScoreComposer {
    /// Validates the configuration before anything can be scored.
    pub fn new(mut config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            weighted_scorer: WeightedScorer::new(config.weights.clone()),
            decay: RecencyDecay::new(config.decay.clone()),
            boost_scorer: SoundBoostScorer::new(config.boost.clone()),
            velocity: VelocityCalculator::new(),
            config,
        })
    }

    /// Same composer with a different weight set.
    pub fn with_weights(&self, weights: MetricWeights) -> Result<Self, ConfigError> {
        let mut config = self.config.clone();
        config.weights = weights;
        Self::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Scores a single item with no batch coupling (boost is always 1).
    pub fn score(&self, item: &ContentItem, now: DateTime<Utc>) -> TrendScore {
        let partial = self.first_pass(item, now);
        self.finalize(item, partial, &BatchContext::empty(), now).score
    }

    /// Two-pass batch scoring.
    ///
    /// Pass one computes each item's normalized metrics and velocity signal in
    /// parallel. The per-sound velocity totals are then built from the whole
    /// batch, and pass two applies the trending-sound boost. Output order
    /// matches input order. A content id may appear only once per batch.
    pub fn score_batch(
        &self,
        items: &[ContentItem],
        sounds: &SoundIndex,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScoredItem>, ValidationError> {
        let mut seen = HashSet::with_capacity(items.len());
        if let Some(item) = items.iter().find(|item| !seen.insert(item.content_id.as_str())) {
            return Err(ValidationError::DuplicateContent {
                content_id: item.content_id.clone(),
            });
        }

        let partials: Vec<Partial> = items
            .par_iter()
            .map(|item| self.first_pass(item, now))
            .collect();

        let context = BatchContext::build(
            items
                .iter()
                .zip(&partials)
                .map(|(item, partial)| (item.content_id.as_str(), partial.velocity_signal)),
            sounds,
        );

        let scored: Vec<ScoredItem> = items
            .par_iter()
            .zip(partials.into_par_iter())
            .map(|(item, partial)| self.finalize(item, partial, &context, now))
            .collect();

        debug!(
            items = scored.len(),
            boosted = scored.iter().filter(|item| item.score.boost > 1.0).count(),
            "scored batch"
        );
        Ok(scored)
    }

    fn first_pass(&self, item: &ContentItem, now: DateTime<Utc>) -> Partial {
        let ceilings = &self.config.ceilings;
        let latest_counts = MetricSet::default().map(|metric, _| item.latest_count(metric) as f64);
        let normalized_absolute =
            latest_counts.map(|metric, value| saturate(value, ceilings.absolute.get(metric)));

        let mut anomalies: Vec<AnomalyFlag> = item
            .latest()
            .map(|snapshot| snapshot.anomalies.clone())
            .unwrap_or_default();
        if let Some(latest) = item.latest() {
            for metric in Metric::ALL {
                if latest.count(metric).is_none() {
                    push_unique(&mut anomalies, AnomalyFlag::MissingMetric { metric });
                }
            }
        }

        let windows = &self.config.velocity.windows;
        let mut velocities = Vec::with_capacity(windows.len());
        let mut normalized_velocity = MetricSet::default();
        let mut insufficient_data = false;
        for window in windows {
            let vector = self.velocity.over_window(item.snapshots(), window.duration());
            let rate_ceilings = window.rate_ceilings(&ceilings.rate);
            insufficient_data |= vector.insufficient_data;
            for metric in Metric::ALL {
                let normalized = saturate(vector.rate(metric), rate_ceilings.get(metric));
                normalized_velocity.set(metric, normalized_velocity.get(metric) + normalized);
            }
            for anomaly in &vector.anomalies {
                push_unique(&mut anomalies, anomaly.clone());
            }
            velocities.push(vector);
        }
        let window_count = windows.len().max(1) as f64;
        let normalized_velocity = normalized_velocity.map(|_, sum| sum / window_count);

        let decay = self.decay.multiplier(item.age_hours(now));
        let velocity_signal = normalized_velocity.sum() * decay;

        Partial {
            latest_counts,
            normalized_absolute,
            normalized_velocity,
            velocities,
            decay,
            velocity_signal,
            insufficient_data,
            anomalies,
        }
    }

    fn finalize(
        &self,
        item: &ContentItem,
        partial: Partial,
        context: &BatchContext,
        now: DateTime<Utc>,
    ) -> ScoredItem {
        let breakdown = self.weighted_scorer.score(
            &partial.normalized_absolute,
            &partial.normalized_velocity,
            partial.decay,
        );
        let boost = self
            .boost_scorer
            .score(context, &item.content_id, partial.velocity_signal);
        let basis_captured_at = item.latest().map(|snapshot| snapshot.captured_at);
        let computed_at = basis_captured_at.map_or(now, |captured| captured.max(now));

        let score = TrendScore {
            content_id: item.content_id.clone(),
            value: breakdown.total() * boost,
            computed_at,
            contributing_weights: self.weighted_scorer.weights().clone(),
            absolute_contribution: breakdown.absolute,
            velocity_contribution: breakdown.velocity,
            decay: partial.decay,
            boost,
            insufficient_data: partial.insufficient_data,
            anomalies: partial.anomalies,
            basis_snapshot_count: item.snapshots().len(),
            basis_captured_at,
        };

        ScoredItem {
            content_id: item.content_id.clone(),
            platform: item.platform.clone(),
            published_at: item.published_at,
            author: item.author.clone(),
            canonical_sound: context.canonical_sound(&item.content_id).map(str::to_string),
            latest_counts: partial.latest_counts,
            normalized_absolute: partial.normalized_absolute,
            normalized_velocity: partial.normalized_velocity,
            velocity_signal: partial.velocity_signal,
            velocities: partial.velocities,
            score,
        }
    }
}

fn push_unique(anomalies: &mut Vec<AnomalyFlag>, anomaly: AnomalyFlag) {
    if !anomalies.contains(&anomaly) {
        anomalies.push(anomaly);
    }
}
