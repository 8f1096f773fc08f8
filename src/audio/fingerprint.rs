use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::warn;

use crate::error::{ItemError, ValidationError};
use crate::model::Platform;

pub const HASH_BITS: u32 = 64;

const NOISE_WORDS: &[&str] = &["original", "sound", "audio", "som", "sonido", "feat", "ft"];

/// Sound metadata as delivered by a scrape collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SoundMetadata {
    #[serde(default, alias = "audio_id", alias = "musicId")]
    pub sound_ref: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default, alias = "duration", alias = "musicDuration")]
    pub duration_ms: Option<i64>,
    #[serde(default, alias = "audio_title", alias = "audio_name", alias = "musicName")]
    pub title: Option<String>,
    #[serde(
        default,
        alias = "audio_author",
        alias = "audio_artist",
        alias = "musicAuthor"
    )]
    pub artist: Option<String>,
    /// Similarity hash computed from raw audio by an external collaborator.
    #[serde(default)]
    pub content_hash: Option<u64>,
    #[serde(default)]
    pub source_content_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashSource {
    /// Derived from the audio content itself.
    Content,
    /// Duration bucket plus coarse metadata; weaker fallback.
    Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FingerprintKey {
    pub platform: Platform,
    pub sound_ref: String,
}

impl fmt::Display for FingerprintKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform, self.sound_ref)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioFingerprint {
    pub sound_ref: String,
    pub platform: Platform,
    pub duration_ms: u64,
    pub similarity_hash: u64,
    pub hash_source: HashSource,
    pub source_content_ids: BTreeSet<String>,
}

impl AudioFingerprint {
    pub fn key(&self) -> FingerprintKey {
        FingerprintKey {
            platform: self.platform.clone(),
            sound_ref: self.sound_ref.clone(),
        }
    }

    pub fn hamming(&self, other: &AudioFingerprint) -> u32 {
        (self.similarity_hash ^ other.similarity_hash).count_ones()
    }

    /// `|a - b| <= tolerance_pct% of the longer duration`.
    pub fn duration_matches(&self, other: &AudioFingerprint, tolerance_pct: f64) -> bool {
        let longer = self.duration_ms.max(other.duration_ms) as f64;
        let diff = self.duration_ms.abs_diff(other.duration_ms) as f64;
        diff <= longer * tolerance_pct / 100.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct FingerprintExtractor;

impl FingerprintExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, metadata: &SoundMetadata) -> Result<AudioFingerprint, ValidationError> {
        let sound_ref = metadata
            .sound_ref
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(ValidationError::MissingField("sound_ref"))?
            .to_string();
        let platform = metadata
            .platform
            .as_deref()
            .and_then(Platform::from_str)
            .ok_or(ValidationError::MissingField("platform"))?;
        let duration_ms = match metadata.duration_ms {
            None => return Err(ValidationError::MissingDuration { sound_ref }),
            Some(value) if value <= 0 => return Err(ValidationError::InvalidDuration { sound_ref }),
            Some(value) => value as u64,
        };

        let (similarity_hash, hash_source) = match metadata.content_hash {
            Some(hash) => (hash, HashSource::Content),
            None => (
                metadata_hash(
                    metadata.title.as_deref(),
                    metadata.artist.as_deref(),
                    duration_ms,
                ),
                HashSource::Metadata,
            ),
        };

        Ok(AudioFingerprint {
            sound_ref,
            platform,
            duration_ms,
            similarity_hash,
            hash_source,
            source_content_ids: metadata
                .source_content_ids
                .iter()
                .map(|id| id.trim())
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect(),
        })
    }

    /// Extracts every record, collecting rejects instead of failing the batch.
    pub fn extract_all(&self, records: &[SoundMetadata]) -> (Vec<AudioFingerprint>, Vec<ItemError>) {
        let mut fingerprints = Vec::with_capacity(records.len());
        let mut errors = Vec::new();
        for (index, record) in records.iter().enumerate() {
            match self.extract(record) {
                Ok(fingerprint) => fingerprints.push(fingerprint),
                Err(error) => {
                    warn!(index, error = %error, "rejected sound record");
                    errors.push(ItemError::new(index, record.sound_ref.clone(), error));
                }
            }
        }
        (fingerprints, errors)
    }
}

/// SimHash over normalized title/artist tokens and a whole-second duration token.
pub fn metadata_hash(title: Option<&str>, artist: Option<&str>, duration_ms: u64) -> u64 {
    let mut tokens: Vec<String> = Vec::new();
    tokens.extend(words(title).map(|word| format!("t:{}", word)));
    tokens.extend(words(artist).map(|word| format!("a:{}", word)));
    tokens.push(format!("d:{}", (duration_ms + 500) / 1000));

    let hashes: Vec<u64> = tokens.iter().map(|token| stable_hash64(token)).collect();
    simhash(&hashes)
}

fn words(value: Option<&str>) -> impl Iterator<Item = String> + '_ {
    value
        .unwrap_or_default()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .filter(|word| !NOISE_WORDS.contains(&word.as_str()))
}

fn simhash(hashes: &[u64]) -> u64 {
    let mut acc = [0i64; HASH_BITS as usize];
    for &hash in hashes {
        for (bit, slot) in acc.iter_mut().enumerate() {
            *slot += if (hash >> bit) & 1 == 1 { 1 } else { -1 };
        }
    }

    let mut out = 0u64;
    for (bit, value) in acc.iter().enumerate() {
        if *value > 0 {
            out |= 1u64 << bit;
        }
    }
    out
}

fn stable_hash64(value: &str) -> u64 {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}
