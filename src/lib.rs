pub mod analytics;
pub mod audio;
pub mod config;
pub mod error;
pub mod model;
pub mod normalize;
pub mod ranking;
pub mod scoring;
pub mod velocity;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::analytics::SoundUsage;
use crate::audio::{
    CanonicalSound, FingerprintExtractor, MatchStats, SoundIndex, SoundMetadata, SoundRegistry,
};
use crate::config::EngineConfig;
use crate::error::{ConfigError, EngineError, ItemError, ValidationError};
use crate::model::ContentItem;
use crate::normalize::{RawContentRecord, SnapshotNormalizer};
use crate::ranking::{RankMetric, RankedEntry, Ranker};
use crate::scoring::{ScoreComposer, ScoredItem};

/// One batch as delivered by the scrape collaborators.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawBatch {
    #[serde(alias = "videos", alias = "posts")]
    pub items: Vec<RawContentRecord>,
    #[serde(alias = "audio")]
    pub sounds: Vec<SoundMetadata>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineReport {
    pub generated_at: DateTime<Utc>,
    pub metric: RankMetric,
    pub ranked: Vec<RankedEntry>,
    pub scores: Vec<ScoredItem>,
    pub sounds: Vec<CanonicalSound>,
    pub sound_usage: Vec<SoundUsage>,
    pub sound_index: SoundIndex,
    pub item_errors: Vec<ItemError>,
    pub sound_errors: Vec<ItemError>,
    /// Scored items left out of `ranked` by the quality gate.
    pub below_quality: Vec<String>,
}

/// Normalization, sound matching, scoring and ranking behind one validated
/// configuration.
///
/// The sound registry lives as long as the engine, so canonical sound ids stay
/// stable across batches.
#[derive(Debug, Clone)]
pub struct TrendEngine {
    normalizer: SnapshotNormalizer,
    extractor: FingerprintExtractor,
    composer: ScoreComposer,
    registry: SoundRegistry,
    ranker: Ranker,
    quality_filter: bool,
}

impl TrendEngine {
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        let composer = ScoreComposer::new(config)?;
        let registry = SoundRegistry::new(&composer.config().matching);
        Ok(Self {
            normalizer: SnapshotNormalizer::new(),
            extractor: FingerprintExtractor::new(),
            composer,
            registry,
            ranker: Ranker::new(),
            quality_filter: false,
        })
    }

    /// Ranks only items that clear `[quality]`. Scoring, including the sound
    /// boost, still sees the whole batch.
    pub fn with_quality_filter(mut self, enabled: bool) -> Self {
        self.quality_filter = enabled;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        self.composer.config()
    }

    pub fn registry(&self) -> &SoundRegistry {
        &self.registry
    }

    /// Fingerprints sound records and merges them into the registry.
    pub fn ingest_sounds(&mut self, records: &[SoundMetadata]) -> (MatchStats, Vec<ItemError>) {
        let (fingerprints, errors) = self.extractor.extract_all(records);
        let stats = self.registry.add(fingerprints);
        (stats, errors)
    }

    pub fn sounds(&self) -> Vec<CanonicalSound> {
        self.registry.clusters()
    }

    /// content_id -> canonical sound for the given items.
    ///
    /// Content ids listed on fingerprints take precedence; otherwise an item's
    /// `(platform, audio_ref)` is looked up in the registry.
    pub fn sound_index(&self, items: &[ContentItem]) -> SoundIndex {
        let mut index = self.registry.content_index();
        for item in items {
            let Some(audio_ref) = item.audio_ref.as_deref() else {
                continue;
            };
            if index.contains_key(&item.content_id) {
                continue;
            }
            if let Some(canonical_id) = self.registry.canonical_for(&item.platform, audio_ref) {
                index.insert(item.content_id.clone(), canonical_id);
            }
        }
        index
    }

    /// Fails on a repeated content id.
    pub fn score_batch(
        &self,
        items: &[ContentItem],
        now: DateTime<Utc>,
    ) -> Result<Vec<ScoredItem>, ValidationError> {
        let index = self.sound_index(items);
        self.composer.score_batch(items, &index, now)
    }

    pub fn rank(&self, scored: &[ScoredItem], metric: RankMetric, limit: i64) -> Vec<RankedEntry> {
        self.ranker.rank(scored, metric, limit)
    }

    /// Runs a whole batch. Bad records are reported per item and never abort
    /// the rest of the batch.
    pub fn run(
        &mut self,
        batch: &RawBatch,
        metric: RankMetric,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<EngineReport, EngineError> {
        let (match_stats, sound_errors) = self.ingest_sounds(&batch.sounds);
        let normalized = self.normalizer.normalize_items(&batch.items);
        let sound_index = self.sound_index(&normalized.items);
        let scores = self
            .composer
            .score_batch(&normalized.items, &sound_index, now)?;

        let quality = &self.config().quality;
        let (eligible, below): (Vec<&ScoredItem>, Vec<&ScoredItem>) =
            scores.iter().partition(|item| {
                !self.quality_filter || analytics::scored_meets_quality(item, quality)
            });
        let below_quality: Vec<String> = below.iter().map(|item| item.content_id.clone()).collect();
        let ranked = self.ranker.rank_iter(eligible, metric, limit);
        let sound_usage =
            analytics::sound_usage(&scores, self.config().boost.velocity_threshold);

        debug!(
            sounds_added = match_stats.added,
            unions = match_stats.unions,
            "batch sounds matched"
        );
        info!(
            items = scores.len(),
            rejected_items = normalized.errors.len(),
            rejected_sounds = sound_errors.len(),
            below_quality = below_quality.len(),
            metric = metric.label(),
            "batch ranked"
        );

        Ok(EngineReport {
            generated_at: now,
            metric,
            ranked,
            scores,
            sounds: self.registry.clusters(),
            sound_usage,
            sound_index,
            item_errors: normalized.errors,
            sound_errors,
            below_quality,
        })
    }
}

/// Validates `config`, then runs `batch` through a fresh engine.
pub fn evaluate(
    config: EngineConfig,
    batch: &RawBatch,
    metric: RankMetric,
    limit: i64,
    now: DateTime<Utc>,
) -> Result<EngineReport, EngineError> {
    let mut engine = TrendEngine::new(config)?;
    engine.run(batch, metric, limit, now)
}

pub fn format_number(value: f64) -> String {
    let rounded = value.round().max(0.0) as i64;
    let mut chars: Vec<char> = rounded.to_string().chars().collect();
    let mut result = String::new();
    let mut count = 0usize;

    while let Some(ch) = chars.pop() {
        if count == 3 {
            result.push(',');
            count = 0;
        }
        result.push(ch);
        count += 1;
    }

    result.chars().rev().collect()
}

pub fn format_float(value: f64, digits: usize) -> String {
    format!("{:.1$}", value, digits)
}
