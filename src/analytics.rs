use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::QualityConfig;
use crate::model::{ContentItem, Metric};
use crate::scoring::ScoredItem;

const UNKNOWN_AUTHOR: &str = "unknown";
const CAPTION_PREVIEW_CHARS: usize = 50;

/// `(likes + comments + shares) / views · 100`; zero when there are no views.
pub fn engagement_rate(likes: u64, comments: u64, shares: u64, views: u64) -> f64 {
    if views == 0 {
        return 0.0;
    }
    (likes as f64 + comments as f64 + shares as f64) / views as f64 * 100.0
}

pub fn item_engagement_rate(item: &ContentItem) -> f64 {
    engagement_rate(
        item.latest_count(Metric::Likes),
        item.latest_count(Metric::Comments),
        item.latest_count(Metric::Shares),
        item.latest_count(Metric::Views),
    )
}

/// Drops items with a high rate but negligible reach.
pub fn filter_by_quality<'a>(items: &'a [ContentItem], quality: &QualityConfig) -> Vec<&'a ContentItem> {
    items
        .iter()
        .filter(|item| {
            let interactions = item.latest().map(|snapshot| snapshot.interactions()).unwrap_or(0);
            quality.admits(item.latest_count(Metric::Views), interactions)
        })
        .collect()
}

/// Quality gate over a scored item's latest counts.
pub fn scored_meets_quality(item: &ScoredItem, quality: &QualityConfig) -> bool {
    let counts = &item.latest_counts;
    let interactions = counts.likes + counts.comments + counts.shares;
    quality.admits(counts.views as u64, interactions as u64)
}

pub fn filter_published_within<'a>(
    items: &'a [ContentItem],
    days: u32,
    now: DateTime<Utc>,
) -> Vec<&'a ContentItem> {
    let cutoff = now - Duration::days(i64::from(days));
    items
        .iter()
        .filter(|item| item.published_at >= cutoff)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CreatorTier {
    TopPerformer,
    Strong,
    Rising,
    Emerging,
    Standard,
}

impl CreatorTier {
    pub fn classify(avg_views: f64, video_count: usize, avg_engagement: f64) -> Self {
        if avg_views > 1_000_000.0 && avg_engagement > 5.0 {
            CreatorTier::TopPerformer
        } else if avg_views > 500_000.0 || avg_engagement > 8.0 {
            CreatorTier::Strong
        } else if video_count >= 3 && avg_engagement > 6.0 {
            CreatorTier::Rising
        } else if avg_engagement > 7.0 {
            CreatorTier::Emerging
        } else {
            CreatorTier::Standard
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CreatorTier::TopPerformer => "Top Performer",
            CreatorTier::Strong => "Strong",
            CreatorTier::Rising => "Rising",
            CreatorTier::Emerging => "Emerging",
            CreatorTier::Standard => "Standard",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestVideo {
    pub content_id: String,
    pub caption_preview: String,
    pub views: u64,
    pub engagement_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatorStats {
    pub username: String,
    pub video_count: usize,
    pub avg_views: f64,
    pub avg_likes: f64,
    pub avg_comments: f64,
    pub avg_shares: f64,
    /// Mean of per-video engagement rates.
    pub avg_engagement: f64,
    pub total_views: u64,
    pub best_video: BestVideo,
    pub tier: CreatorTier,
}

/// Groups items by author using each item's latest snapshot.
///
/// Sorted by average engagement rate (highest first), username on ties.
pub fn aggregate_creators(items: &[ContentItem]) -> Vec<CreatorStats> {
    let mut grouped: BTreeMap<&str, Vec<&ContentItem>> = BTreeMap::new();
    for item in items {
        let author = item
            .author
            .as_deref()
            .map(str::trim)
            .filter(|author| !author.is_empty())
            .unwrap_or(UNKNOWN_AUTHOR);
        grouped.entry(author).or_default().push(item);
    }

    let mut stats: Vec<CreatorStats> = grouped
        .into_iter()
        .filter_map(|(username, videos)| creator_stats(username, &videos))
        .collect();
    stats.sort_by(|a, b| {
        b.avg_engagement
            .total_cmp(&a.avg_engagement)
            .then_with(|| a.username.cmp(&b.username))
    });
    stats
}

fn creator_stats(username: &str, videos: &[&ContentItem]) -> Option<CreatorStats> {
    // First video with the most views.
    let best = videos.iter().copied().reduce(|best, item| {
        if item.latest_count(Metric::Views) > best.latest_count(Metric::Views) {
            item
        } else {
            best
        }
    })?;
    let count = videos.len() as f64;
    let total = |metric: Metric| -> u64 {
        videos
            .iter()
            .map(|item| item.latest_count(metric))
            .fold(0u64, u64::saturating_add)
    };
    let total_views = total(Metric::Views);
    let avg_views = total_views as f64 / count;
    let avg_engagement = videos.iter().map(|item| item_engagement_rate(item)).sum::<f64>() / count;

    Some(CreatorStats {
        username: username.to_string(),
        video_count: videos.len(),
        avg_views,
        avg_likes: total(Metric::Likes) as f64 / count,
        avg_comments: total(Metric::Comments) as f64 / count,
        avg_shares: total(Metric::Shares) as f64 / count,
        avg_engagement,
        total_views,
        best_video: BestVideo {
            content_id: best.content_id.clone(),
            caption_preview: best
                .caption
                .as_deref()
                .unwrap_or_default()
                .chars()
                .take(CAPTION_PREVIEW_CHARS)
                .collect(),
            views: best.latest_count(Metric::Views),
            engagement_rate: item_engagement_rate(best),
        },
        tier: CreatorTier::classify(avg_views, videos.len(), avg_engagement),
    })
}

/// Creators with high engagement but modest reach and at least two videos.
pub fn find_micro_influencers(
    stats: &[CreatorStats],
    min_engagement: f64,
    max_avg_views: f64,
) -> Vec<&CreatorStats> {
    stats
        .iter()
        .filter(|creator| {
            creator.avg_engagement >= min_engagement
                && creator.avg_views <= max_avg_views
                && creator.video_count >= 2
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SoundUsage {
    pub canonical_id: String,
    pub usage_count: usize,
    pub avg_engagement_rate: f64,
    pub aggregate_velocity: f64,
    pub is_trending: bool,
}

/// Per-sound usage over a scored batch. Trending sounds first, then by
/// aggregate velocity.
pub fn sound_usage(scored: &[ScoredItem], velocity_threshold: f64) -> Vec<SoundUsage> {
    let mut grouped: BTreeMap<&str, BTreeMap<&str, &ScoredItem>> = BTreeMap::new();
    for item in scored {
        if let Some(canonical_id) = item.canonical_sound.as_deref() {
            grouped
                .entry(canonical_id)
                .or_default()
                .insert(item.content_id.as_str(), item);
        }
    }

    let mut usage: Vec<SoundUsage> = grouped
        .into_iter()
        .map(|(canonical_id, members)| {
            let count = members.len();
            let aggregate_velocity: f64 = members.values().map(|item| item.velocity_signal).sum();
            let avg_engagement_rate =
                members.values().map(|item| item.engagement_rate()).sum::<f64>() / count as f64;
            SoundUsage {
                canonical_id: canonical_id.to_string(),
                usage_count: count,
                avg_engagement_rate,
                aggregate_velocity,
                is_trending: aggregate_velocity > velocity_threshold,
            }
        })
        .collect();
    usage.sort_by(|a, b| {
        b.is_trending
            .cmp(&a.is_trending)
            .then_with(|| b.aggregate_velocity.total_cmp(&a.aggregate_velocity))
            .then_with(|| a.canonical_id.cmp(&b.canonical_id))
    });
    usage
}
