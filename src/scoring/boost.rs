use std::collections::BTreeMap;

use crate::audio::SoundIndex;
use crate::config::SoundBoostConfig;

/// Batch-wide velocity totals per canonical sound.
///
/// Built once from every item in the batch before any individual score is
/// finalized. Members are summed in content-id order so the totals do not
/// depend on the order the batch arrived in.
#[derive(Debug, Clone, Default)]
pub struct BatchContext {
    sound_of: BTreeMap<String, String>,
    totals: BTreeMap<String, SoundTotal>,
}

#[derive(Debug, Clone, Copy, Default)]
struct SoundTotal {
    velocity: f64,
    members: usize,
}

impl BatchContext {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn build<'a>(
        signals: impl IntoIterator<Item = (&'a str, f64)>,
        sounds: &SoundIndex,
    ) -> Self {
        let mut grouped: BTreeMap<&str, BTreeMap<&str, f64>> = BTreeMap::new();
        let mut sound_of = BTreeMap::new();
        for (content_id, signal) in signals {
            if let Some(canonical_id) = sounds.get(content_id) {
                grouped
                    .entry(canonical_id.as_str())
                    .or_default()
                    .insert(content_id, signal);
                sound_of.insert(content_id.to_string(), canonical_id.clone());
            }
        }

        let totals = grouped
            .into_iter()
            .map(|(canonical_id, members)| {
                let total = SoundTotal {
                    velocity: members.values().sum(),
                    members: members.len(),
                };
                (canonical_id.to_string(), total)
            })
            .collect();

        Self { sound_of, totals }
    }

    pub fn canonical_sound(&self, content_id: &str) -> Option<&str> {
        self.sound_of.get(content_id).map(String::as_str)
    }

    /// Aggregate velocity of a sound across the whole batch.
    pub fn sound_velocity(&self, canonical_id: &str) -> f64 {
        self.totals
            .get(canonical_id)
            .map(|total| total.velocity)
            .unwrap_or(0.0)
    }

    /// Velocity of the other batch members sharing this item's sound.
    pub fn other_velocity(&self, content_id: &str, own_signal: f64) -> f64 {
        let Some(total) = self
            .canonical_sound(content_id)
            .and_then(|canonical_id| self.totals.get(canonical_id))
        else {
            return 0.0;
        };
        if total.members < 2 {
            return 0.0;
        }
        (total.velocity - own_signal).max(0.0)
    }
}

#[derive(Debug, Clone)]
pub struct SoundBoostScorer {
    config: SoundBoostConfig,
}

impl SoundBoostScorer {
    pub fn new(config: SoundBoostConfig) -> Self {
        Self { config }
    }

    pub fn threshold(&self) -> f64 {
        self.config.velocity_threshold
    }

    /// Ramps from 1 at the threshold towards `cap`, never above it.
    pub fn multiplier(&self, other_velocity: f64) -> f64 {
        let threshold = self.config.velocity_threshold;
        if other_velocity.is_nan() || other_velocity <= threshold {
            return 1.0;
        }
        let ramp = if threshold <= 0.0 {
            1.0
        } else {
            1.0 - threshold / other_velocity
        };
        (1.0 + (self.config.cap - 1.0) * ramp).min(self.config.cap)
    }

    pub fn score(&self, context: &BatchContext, content_id: &str, own_signal: f64) -> f64 {
        self.multiplier(context.other_velocity(content_id, own_signal))
    }
}
