use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

use crate::audio::fingerprint::{AudioFingerprint, FingerprintKey, HASH_BITS};
use crate::audio::union_find::UnionFind;
use crate::audio::SoundIndex;
use crate::config::MatchingConfig;
use crate::model::Platform;

/// A cluster of fingerprints judged to be the same underlying track.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalSound {
    pub canonical_id: String,
    pub members: Vec<AudioFingerprint>,
    pub representative_duration_ms: u64,
    pub platforms: BTreeSet<Platform>,
}

impl CanonicalSound {
    pub fn member_keys(&self) -> BTreeSet<String> {
        self.members
            .iter()
            .map(|member| member.key().to_string())
            .collect()
    }

    pub fn source_content_ids(&self) -> BTreeSet<&str> {
        self.members
            .iter()
            .flat_map(|member| member.source_content_ids.iter().map(String::as_str))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MatchStats {
    pub added: usize,
    pub duplicates: usize,
    pub comparisons: usize,
    pub unions: usize,
}

/// Registry of canonical sounds for one matching run.
///
/// Fingerprints live in an arena; clustering is an array-backed union-find
/// over arena indices. Adding fingerprints only ever grows or merges
/// clusters, and a cluster's `canonical_id` is the key of its oldest member,
/// so ids are stable for the registry's lifetime. Mutation requires
/// `&mut self`, which keeps every run single-writer.
#[derive(Debug, Clone)]
pub struct SoundRegistry {
    similarity_threshold: f64,
    tolerance_pct: f64,
    bucket_width: f64,
    fingerprints: Vec<AudioFingerprint>,
    by_key: HashMap<FingerprintKey, usize>,
    buckets: BTreeMap<i64, Vec<usize>>,
    sets: UnionFind,
}

impl SoundRegistry {
    pub fn new(config: &MatchingConfig) -> Self {
        let tolerance = config.duration_tolerance_pct / 100.0;
        Self {
            similarity_threshold: config.similarity_threshold,
            tolerance_pct: config.duration_tolerance_pct,
            bucket_width: -(1.0 - tolerance).ln(),
            fingerprints: Vec::new(),
            by_key: HashMap::new(),
            buckets: BTreeMap::new(),
            sets: UnionFind::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    pub fn fingerprints(&self) -> &[AudioFingerprint] {
        &self.fingerprints
    }

    /// True when two fingerprints should be unioned: same hash space,
    /// Hamming distance below the threshold and durations within tolerance.
    pub fn similar(&self, a: &AudioFingerprint, b: &AudioFingerprint) -> bool {
        a.hash_source == b.hash_source
            && f64::from(a.hamming(b)) < self.similarity_threshold * f64::from(HASH_BITS)
            && a.duration_matches(b, self.tolerance_pct)
    }

    /// Log-scale duration bucket. Any two durations within tolerance land in
    /// the same or adjacent buckets.
    fn bucket_of(&self, duration_ms: u64) -> i64 {
        if self.bucket_width <= 0.0 {
            return duration_ms as i64;
        }
        ((duration_ms as f64).ln() / self.bucket_width).floor() as i64
    }

    /// Adds fingerprints and merges them into existing clusters.
    ///
    /// A fingerprint whose `(platform, sound_ref)` is already registered only
    /// contributes its source content ids.
    pub fn add(&mut self, fingerprints: impl IntoIterator<Item = AudioFingerprint>) -> MatchStats {
        let mut stats = MatchStats::default();
        for fingerprint in fingerprints {
            let key = fingerprint.key();
            if let Some(&existing) = self.by_key.get(&key) {
                debug!(sound = %key, "duplicate sound reference; merging content ids");
                self.fingerprints[existing]
                    .source_content_ids
                    .extend(fingerprint.source_content_ids);
                stats.duplicates += 1;
                continue;
            }

            let bucket = self.bucket_of(fingerprint.duration_ms);
            let index = self.sets.push();
            let mut matches = Vec::new();
            for (_, members) in self.buckets.range(bucket - 1..=bucket + 1) {
                for &candidate in members {
                    stats.comparisons += 1;
                    if self.similar(&fingerprint, &self.fingerprints[candidate]) {
                        matches.push(candidate);
                    }
                }
            }
            for candidate in matches {
                if self.sets.union(index, candidate) {
                    stats.unions += 1;
                }
            }

            self.fingerprints.push(fingerprint);
            self.by_key.insert(key, index);
            self.buckets.entry(bucket).or_default().push(index);
            stats.added += 1;
        }

        info!(
            added = stats.added,
            duplicates = stats.duplicates,
            comparisons = stats.comparisons,
            unions = stats.unions,
            total = self.fingerprints.len(),
            "matched sound fingerprints"
        );
        stats
    }

    fn canonical_id_of(&self, index: usize) -> String {
        self.fingerprints[self.sets.oldest(index)].key().to_string()
    }

    pub fn canonical_for(&self, platform: &Platform, sound_ref: &str) -> Option<String> {
        let key = FingerprintKey {
            platform: platform.clone(),
            sound_ref: sound_ref.to_string(),
        };
        self.by_key
            .get(&key)
            .map(|&index| self.canonical_id_of(index))
    }

    /// Current clusters, ordered by canonical id, members ordered by key.
    pub fn clusters(&self) -> Vec<CanonicalSound> {
        let mut grouped: BTreeMap<String, Vec<&AudioFingerprint>> = BTreeMap::new();
        for (index, fingerprint) in self.fingerprints.iter().enumerate() {
            grouped
                .entry(self.canonical_id_of(index))
                .or_default()
                .push(fingerprint);
        }

        grouped
            .into_iter()
            .map(|(canonical_id, mut members)| {
                members.sort_by_key(|member| member.key());
                let mut durations: Vec<u64> =
                    members.iter().map(|member| member.duration_ms).collect();
                durations.sort_unstable();
                CanonicalSound {
                    canonical_id,
                    representative_duration_ms: durations[(durations.len() - 1) / 2],
                    platforms: members.iter().map(|member| member.platform.clone()).collect(),
                    members: members.into_iter().cloned().collect(),
                }
            })
            .collect()
    }

    /// content_id -> canonical_id for every content id seen on a fingerprint.
    pub fn content_index(&self) -> SoundIndex {
        let mut index = SoundIndex::new();
        for (position, fingerprint) in self.fingerprints.iter().enumerate() {
            let canonical_id = self.canonical_id_of(position);
            for content_id in &fingerprint.source_content_ids {
                index
                    .entry(content_id.clone())
                    .or_insert_with(|| canonical_id.clone());
            }
        }
        index
    }
}

/// Clusters a batch from scratch.
pub fn match_sounds(
    fingerprints: impl IntoIterator<Item = AudioFingerprint>,
    config: &MatchingConfig,
) -> Vec<CanonicalSound> {
    let mut registry = SoundRegistry::new(config);
    registry.add(fingerprints);
    registry.clusters()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::fingerprint::HashSource;

    fn fingerprint(sound_ref: &str, duration_ms: u64, hash: u64) -> AudioFingerprint {
        AudioFingerprint {
            sound_ref: sound_ref.to_string(),
            platform: Platform::TikTok,
            duration_ms,
            similarity_hash: hash,
            hash_source: HashSource::Content,
            source_content_ids: BTreeSet::new(),
        }
    }

    fn config(threshold_bits: f64, tolerance_pct: f64) -> MatchingConfig {
        MatchingConfig {
            similarity_threshold: threshold_bits / 64.0,
            duration_tolerance_pct: tolerance_pct,
        }
    }

    fn partition(sounds: &[CanonicalSound]) -> BTreeSet<BTreeSet<String>> {
        sounds.iter().map(CanonicalSound::member_keys).collect()
    }

    fn exhaustive(fingerprints: &[AudioFingerprint], config: &MatchingConfig) -> BTreeSet<BTreeSet<String>> {
        let registry = SoundRegistry::new(config);
        let mut sets = UnionFind::new();
        for _ in fingerprints {
            sets.push();
        }
        for i in 0..fingerprints.len() {
            for j in (i + 1)..fingerprints.len() {
                if registry.similar(&fingerprints[i], &fingerprints[j]) {
                    sets.union(i, j);
                }
            }
        }
        let mut groups: BTreeMap<usize, BTreeSet<String>> = BTreeMap::new();
        for (i, fingerprint) in fingerprints.iter().enumerate() {
            groups
                .entry(sets.root(i))
                .or_default()
                .insert(fingerprint.key().to_string());
        }
        groups.into_values().collect()
    }

    #[test]
    fn bucketed_matching_equals_exhaustive_matching() {
        let mut fingerprints = Vec::new();
        let mut state = 0x9e37_79b9_7f4a_7c15u64;
        for i in 0..300u64 {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let duration = 5_000 + (state >> 33) % 3_000;
            let base = [0u64, u64::MAX, 0x0f0f_0f0f_0f0f_0f0f][(i % 3) as usize];
            let noise = 1u64 << ((state >> 7) % 64);
            fingerprints.push(fingerprint(&format!("s{}", i), duration, base ^ noise));
        }
        for (bits, tolerance) in [(3.0, 2.0), (1.0, 0.5), (4.0, 0.0), (2.0, 10.0)] {
            let config = config(bits, tolerance);
            let bucketed = partition(&match_sounds(fingerprints.clone(), &config));
            assert_eq!(bucketed, exhaustive(&fingerprints, &config));
        }
    }

    #[test]
    fn canonical_id_is_oldest_member_and_survives_merges() {
        let config = config(3.0, 2.0);
        let mut registry = SoundRegistry::new(&config);
        registry.add([fingerprint("first", 15_000, 0b1000)]);
        registry.add([fingerprint("second", 30_000, 0b0000)]);
        assert_eq!(registry.clusters().len(), 2);

        registry.add([fingerprint("bridge", 15_100, 0b1001)]);
        let clusters = registry.clusters();
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].canonical_id, "tiktok:first");
        assert_eq!(clusters[0].members.len(), 2);
        assert_eq!(
            registry.canonical_for(&Platform::TikTok, "bridge").as_deref(),
            Some("tiktok:first")
        );
    }

    #[test]
    fn incremental_adds_never_split_clusters() {
        let config = config(3.0, 2.0);
        let mut registry = SoundRegistry::new(&config);
        registry.add([fingerprint("a", 10_000, 0), fingerprint("b", 10_050, 1)]);
        let before = partition(&registry.clusters());
        registry.add([fingerprint("c", 20_000, 0), fingerprint("d", 10_020, 3)]);
        let after = partition(&registry.clusters());
        for cluster in before {
            assert!(after.iter().any(|group| cluster.is_subset(group)));
        }
    }

    #[test]
    fn duplicate_keys_merge_content_ids() {
        let config = config(3.0, 2.0);
        let mut first = fingerprint("x", 12_000, 7);
        first.source_content_ids.insert("v1".to_string());
        let mut second = fingerprint("x", 12_000, 7);
        second.source_content_ids.insert("v2".to_string());

        let mut registry = SoundRegistry::new(&config);
        let stats = registry.add([first, second]);
        assert_eq!(stats.added, 1);
        assert_eq!(stats.duplicates, 1);
        let index = registry.content_index();
        assert_eq!(index.get("v1").map(String::as_str), Some("tiktok:x"));
        assert_eq!(index.get("v2").map(String::as_str), Some("tiktok:x"));
    }

    #[test]
    fn different_hash_sources_never_merge() {
        let config = config(3.0, 2.0);
        let content = fingerprint("a", 10_000, 0);
        let mut metadata = fingerprint("b", 10_000, 0);
        metadata.hash_source = HashSource::Metadata;
        assert_eq!(match_sounds([content, metadata], &config).len(), 2);
    }

    #[test]
    fn representative_duration_is_lower_median() {
        let config = config(64.0, 50.0);
        let sounds = match_sounds(
            [
                fingerprint("a", 10_000, 0),
                fingerprint("b", 10_400, 0),
                fingerprint("c", 10_100, 0),
                fingerprint("d", 10_300, 0),
            ],
            &config,
        );
        assert_eq!(sounds.len(), 1);
        assert_eq!(sounds[0].representative_duration_ms, 10_100);
    }
}
