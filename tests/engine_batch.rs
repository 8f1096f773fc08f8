use chrono::{DateTime, TimeZone, Utc};
use trend_radar::config::EngineConfig;
use trend_radar::error::ValidationError;
use trend_radar::model::{AnomalyFlag, Metric};
use trend_radar::ranking::RankMetric;
use trend_radar::{evaluate, RawBatch, TrendEngine};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 8, 3, 0, 0, 0).unwrap()
}

fn batch() -> RawBatch {
    serde_json::from_str(
        r#"{
            "videos": [
                {
                    "video_id": "tt-1",
                    "platform": "tiktok",
                    "created_at": "2024-08-01T00:00:00Z",
                    "audio_id": "snd-1",
                    "author_username": "dancer",
                    "snapshots": [
                        {"snapshot_at": "2024-08-01 00:00:00", "playCount": 1000, "diggCount": 100, "commentCount": 10, "shareCount": 5},
                        {"snapshot_at": "2024-08-02 00:00:00", "playCount": 2401000, "diggCount": 240100, "commentCount": 24010, "shareCount": 48005}
                    ]
                },
                {
                    "shortcode": "ig-1",
                    "platform": "instagram",
                    "created_at": "2024-08-01T00:00:00Z",
                    "audio_id": "ig-snd",
                    "owner_username": "dancer",
                    "snapshots": [
                        {"captured_at": 1722470400, "videoViewCount": 500, "likesCount": 40, "commentsCount": 2},
                        {"captured_at": 1722556800, "videoViewCount": 2400500, "likesCount": 240040, "commentsCount": 24002}
                    ]
                },
                {
                    "content_id": "tt-2",
                    "platform": "tiktok",
                    "published_at": "2024-08-02T12:00:00Z",
                    "snapshots": [
                        {"captured_at": "2024-08-02T18:00:00Z", "views": 800, "likes": 20, "comments": 1, "shares": 0}
                    ]
                },
                {
                    "content_id": "tt-3",
                    "platform": "tiktok",
                    "snapshots": []
                },
                {
                    "content_id": "tt-2",
                    "platform": "tiktok",
                    "published_at": "2024-08-02T12:00:00Z",
                    "snapshots": []
                }
            ],
            "audio": [
                {"audio_id": "snd-1", "platform": "tiktok", "duration": 15000, "content_hash": 6},
                {"audio_id": "ig-snd", "platform": "instagram", "duration": 15200, "content_hash": 7},
                {"audio_id": "broken", "platform": "tiktok"}
            ]
        }"#,
    )
    .unwrap()
}

#[test]
fn bad_records_are_reported_alongside_results() {
    let report = evaluate(
        EngineConfig::default(),
        &batch(),
        RankMetric::TrendScore,
        0,
        now(),
    )
    .unwrap();

    assert_eq!(report.scores.len(), 3);
    assert_eq!(report.ranked.len(), 3);
    assert_eq!(report.item_errors.len(), 2);
    assert_eq!(report.item_errors[0].index, 3);
    assert_eq!(
        report.item_errors[0].error,
        ValidationError::MissingField("published_at")
    );
    assert_eq!(
        report.item_errors[1].error,
        ValidationError::DuplicateContent {
            content_id: "tt-2".to_string()
        }
    );
    assert_eq!(report.sound_errors.len(), 1);
    assert_eq!(report.sound_errors[0].content_id.as_deref(), Some("broken"));
    assert!(report.below_quality.is_empty());
}

#[test]
fn cross_platform_sound_links_items_and_boosts_them() {
    let report = evaluate(
        EngineConfig::default(),
        &batch(),
        RankMetric::TrendScore,
        0,
        now(),
    )
    .unwrap();

    assert_eq!(report.sounds.len(), 1);
    assert_eq!(report.sounds[0].canonical_id, "tiktok:snd-1");
    assert_eq!(
        report.sound_index.get("ig-1").map(String::as_str),
        Some("tiktok:snd-1")
    );
    assert_eq!(
        report.sound_index.get("tt-1").map(String::as_str),
        Some("tiktok:snd-1")
    );

    let boosted: Vec<_> = report
        .scores
        .iter()
        .filter(|item| item.score.boost > 1.0)
        .map(|item| item.content_id.as_str())
        .collect();
    assert_eq!(boosted, vec!["tt-1", "ig-1"]);

    assert_eq!(report.sound_usage.len(), 1);
    assert!(report.sound_usage[0].is_trending);
    assert_eq!(report.sound_usage[0].usage_count, 2);
    assert_eq!(report.ranked[2].content_id, "tt-2");
}

#[test]
fn ranking_is_deterministic_and_limited() {
    let mut engine = TrendEngine::new(EngineConfig::default()).unwrap();
    let first = engine.run(&batch(), RankMetric::Views, 2, now()).unwrap();
    let second = engine.run(&batch(), RankMetric::Views, 2, now()).unwrap();

    let ids: Vec<_> = first.ranked.iter().map(|entry| entry.content_id.clone()).collect();
    assert_eq!(ids, vec!["tt-1", "ig-1"]);
    assert_eq!(first.ranked, second.ranked);
    assert_eq!(first.sounds, second.sounds);
}

#[test]
fn report_serializes_to_json() {
    let report = evaluate(
        EngineConfig::default(),
        &batch(),
        RankMetric::EngagementRate,
        1,
        now(),
    )
    .unwrap();
    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["metric"], "engagement-rate");
    assert_eq!(value["ranked"].as_array().map(Vec::len), Some(1));
    assert!(value["item_errors"][0]["error"].is_string());
}

#[test]
fn quality_gate_drops_low_reach_items_from_the_ranking() {
    let mut engine = TrendEngine::new(EngineConfig::default())
        .unwrap()
        .with_quality_filter(true);
    let report = engine
        .run(&batch(), RankMetric::TrendScore, 0, now())
        .unwrap();

    assert_eq!(report.ranked.len(), 2);
    assert!(report.ranked.iter().all(|entry| entry.content_id != "tt-2"));
    assert_eq!(report.ranked[1].rank, 2);
    assert_eq!(report.below_quality, vec!["tt-2".to_string()]);
    assert_eq!(report.scores.len(), 3);
    assert!(report.scores.iter().any(|item| item.score.boost > 1.0));
}

#[test]
fn malformed_counts_stay_scoped_to_their_item() {
    let batch: RawBatch = serde_json::from_str(
        r#"{
            "items": [
                {
                    "content_id": "odd",
                    "platform": "tiktok",
                    "published_at": "2024-08-02T00:00:00Z",
                    "snapshots": [
                        {"captured_at": "2024-08-02T06:00:00Z", "views": 1.5, "likes": "1200", "comments": 4, "shares": 1}
                    ]
                },
                {
                    "content_id": "fine",
                    "platform": "tiktok",
                    "published_at": "2024-08-02T00:00:00Z",
                    "snapshots": [
                        {"captured_at": "2024-08-02T06:00:00Z", "views": 900, "likes": 30, "comments": 4, "shares": 1}
                    ]
                }
            ]
        }"#,
    )
    .unwrap();

    let report = evaluate(
        EngineConfig::default(),
        &batch,
        RankMetric::Views,
        0,
        now(),
    )
    .unwrap();
    assert!(report.item_errors.is_empty());
    assert_eq!(report.ranked.len(), 2);

    let odd = report
        .scores
        .iter()
        .find(|item| item.content_id == "odd")
        .unwrap();
    assert_eq!(odd.latest_counts.views, 0.0);
    assert_eq!(odd.latest_counts.likes, 1200.0);
    assert!(odd.score.anomalies.contains(&AnomalyFlag::MalformedCount {
        metric: Metric::Views,
        raw: "1.5".to_string()
    }));
}
