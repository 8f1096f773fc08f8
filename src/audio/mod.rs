use std::collections::BTreeMap;

pub mod fingerprint;
pub mod matcher;
pub mod union_find;

pub use fingerprint::{
    metadata_hash, AudioFingerprint, FingerprintExtractor, FingerprintKey, HashSource,
    SoundMetadata, HASH_BITS,
};
pub use matcher::{match_sounds, CanonicalSound, MatchStats, SoundRegistry};
pub use union_find::UnionFind;

/// content_id -> canonical sound id.
pub type SoundIndex = BTreeMap<String, String>;
