use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use trend_radar::audio::{
    match_sounds, AudioFingerprint, CanonicalSound, FingerprintExtractor, SoundMetadata,
    SoundRegistry,
};
use trend_radar::config::MatchingConfig;
use trend_radar::model::Platform;

fn matching(threshold_bits: f64) -> MatchingConfig {
    MatchingConfig {
        similarity_threshold: threshold_bits / 64.0,
        duration_tolerance_pct: 2.0,
    }
}

fn sound(platform: &str, sound_ref: &str, duration_ms: i64, hash: u64) -> SoundMetadata {
    SoundMetadata {
        sound_ref: Some(sound_ref.to_string()),
        platform: Some(platform.to_string()),
        duration_ms: Some(duration_ms),
        content_hash: Some(hash),
        source_content_ids: vec![format!("{}-video", sound_ref)],
        ..SoundMetadata::default()
    }
}

fn fingerprints(records: &[SoundMetadata]) -> Vec<AudioFingerprint> {
    let (fingerprints, errors) = FingerprintExtractor::new().extract_all(records);
    assert!(errors.is_empty());
    fingerprints
}

fn partition(sounds: &[CanonicalSound]) -> BTreeSet<BTreeSet<String>> {
    sounds.iter().map(CanonicalSound::member_keys).collect()
}

#[test]
fn near_duplicates_merge_and_long_track_stays_apart() {
    let records = vec![
        sound("tiktok", "t-1", 15_000, 0b0110),
        sound("instagram", "ig-1", 15_200, 0b0111),
        sound("youtube", "yt-1", 30_000, 0b0110),
    ];
    let sounds = match_sounds(fingerprints(&records), &matching(3.0));

    assert_eq!(sounds.len(), 2);
    let merged = sounds
        .iter()
        .find(|sound| sound.members.len() == 2)
        .unwrap();
    assert_eq!(merged.canonical_id, "tiktok:t-1");
    assert_eq!(merged.representative_duration_ms, 15_000);
    assert!(merged.platforms.contains(&Platform::Instagram));
    assert!(merged.platforms.contains(&Platform::TikTok));
    assert!(merged.source_content_ids().contains("ig-1-video"));

    let apart = sounds.iter().find(|sound| sound.members.len() == 1).unwrap();
    assert_eq!(apart.canonical_id, "youtube:yt-1");
}

#[test]
fn distance_at_threshold_does_not_merge() {
    let records = vec![
        sound("tiktok", "a", 15_000, 0b000),
        sound("tiktok", "b", 15_000, 0b111),
    ];
    assert_eq!(match_sounds(fingerprints(&records), &matching(3.0)).len(), 2);
    assert_eq!(match_sounds(fingerprints(&records), &matching(4.0)).len(), 1);
}

#[test]
fn clustering_is_order_independent() {
    let mut rng = StdRng::seed_from_u64(42);
    let bases = [0u64, 0xffff_0000_ffff_0000, 0x1234_5678_9abc_def0];
    let mut records = Vec::new();
    for i in 0..120 {
        let base = bases[i % bases.len()];
        let flip = 1u64 << rng.gen_range(0..64);
        let duration = [12_000, 12_150, 30_000][i % 3] + rng.gen_range(0..100);
        records.push(sound("tiktok", &format!("s{}", i), duration, base ^ flip));
    }

    let config = matching(3.0);
    let baseline = partition(&match_sounds(fingerprints(&records), &config));
    for _ in 0..8 {
        records.shuffle(&mut rng);
        let shuffled = partition(&match_sounds(fingerprints(&records), &config));
        assert_eq!(shuffled, baseline);
    }
}

#[test]
fn registry_only_grows_clusters_and_keeps_ids() {
    let config = matching(3.0);
    let mut registry = SoundRegistry::new(&config);
    registry.add(fingerprints(&[
        sound("tiktok", "first", 20_000, 0),
        sound("instagram", "second", 20_100, 0b1),
    ]));
    let before = registry.clusters();
    assert_eq!(before.len(), 1);
    assert_eq!(before[0].canonical_id, "tiktok:first");

    registry.add(fingerprints(&[
        sound("youtube", "third", 20_050, 0b11),
        sound("tiktok", "unrelated", 45_000, 0),
    ]));
    let after = registry.clusters();
    assert_eq!(after.len(), 2);
    let grown = after
        .iter()
        .find(|sound| sound.canonical_id == "tiktok:first")
        .unwrap();
    assert_eq!(grown.members.len(), 3);
    assert_eq!(
        registry.canonical_for(&Platform::YouTube, "third").as_deref(),
        Some("tiktok:first")
    );
    assert_eq!(registry.len(), 4);
}

#[test]
fn metadata_fallback_links_platforms() {
    let records = vec![
        SoundMetadata {
            sound_ref: Some("7300".to_string()),
            platform: Some("tiktok".to_string()),
            duration_ms: Some(30_000),
            title: Some("Espresso".to_string()),
            artist: Some("Sabrina Carpenter".to_string()),
            ..SoundMetadata::default()
        },
        SoundMetadata {
            sound_ref: Some("ig-55".to_string()),
            platform: Some("instagram".to_string()),
            duration_ms: Some(30_100),
            title: Some("espresso - original audio".to_string()),
            artist: Some("sabrina carpenter".to_string()),
            ..SoundMetadata::default()
        },
        SoundMetadata {
            sound_ref: Some("7301".to_string()),
            platform: Some("tiktok".to_string()),
            duration_ms: None,
            ..SoundMetadata::default()
        },
    ];
    let (fingerprints, errors) = FingerprintExtractor::new().extract_all(&records);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].content_id.as_deref(), Some("7301"));

    let sounds = match_sounds(fingerprints, &MatchingConfig::default());
    assert_eq!(sounds.len(), 1);
    assert_eq!(sounds[0].platforms.len(), 2);
}
