use serde::Serialize;
use std::cmp::Ordering;

use crate::model::Metric;
use crate::scoring::ScoredItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RankMetric {
    Views,
    Comments,
    Shares,
    /// Sum of normalized likes, comments and shares.
    Engagement,
    /// `(likes + comments + shares) / views` as a percentage.
    EngagementRate,
    TrendScore,
}

impl RankMetric {
    pub const ALL: [RankMetric; 6] = [
        RankMetric::Views,
        RankMetric::Comments,
        RankMetric::Shares,
        RankMetric::Engagement,
        RankMetric::EngagementRate,
        RankMetric::TrendScore,
    ];

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().replace('_', "-").as_str() {
            "views" | "plays" => Some(RankMetric::Views),
            "comments" => Some(RankMetric::Comments),
            "shares" => Some(RankMetric::Shares),
            "engagement" => Some(RankMetric::Engagement),
            "engagement-rate" | "rate" => Some(RankMetric::EngagementRate),
            "trend-score" | "trend" | "score" => Some(RankMetric::TrendScore),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RankMetric::Views => "views",
            RankMetric::Comments => "comments",
            RankMetric::Shares => "shares",
            RankMetric::Engagement => "engagement",
            RankMetric::EngagementRate => "engagement-rate",
            RankMetric::TrendScore => "trend-score",
        }
    }

    pub fn value_of(self, item: &ScoredItem) -> f64 {
        match self {
            RankMetric::Views => item.latest_counts.get(Metric::Views),
            RankMetric::Comments => item.latest_counts.get(Metric::Comments),
            RankMetric::Shares => item.latest_counts.get(Metric::Shares),
            RankMetric::Engagement => {
                let normalized = &item.normalized_absolute;
                normalized.likes + normalized.comments + normalized.shares
            }
            RankMetric::EngagementRate => item.engagement_rate(),
            RankMetric::TrendScore => item.trend_score(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedEntry {
    pub rank: usize,
    pub content_id: String,
    pub metric_value: f64,
    pub trend_score: f64,
    pub velocity_signal: f64,
    /// Velocity is unmeasured rather than zero; `velocity_signal` then only
    /// reflects the windows that had enough history.
    pub insufficient_data: bool,
    pub canonical_sound: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Ranker;

impl Ranker {
    pub fn new() -> Self {
        Self
    }

    /// Orders items by `metric` descending.
    ///
    /// Ties fall back to velocity signal (desc), then `published_at`
    /// (earlier first), then `content_id`, so the order is total and the
    /// same for any input permutation. `limit <= 0` returns everything.
    pub fn rank(&self, items: &[ScoredItem], metric: RankMetric, limit: i64) -> Vec<RankedEntry> {
        self.rank_iter(items, metric, limit)
    }

    /// Same as `rank`, over any selection of scored items.
    pub fn rank_iter<'a>(
        &self,
        items: impl IntoIterator<Item = &'a ScoredItem>,
        metric: RankMetric,
        limit: i64,
    ) -> Vec<RankedEntry> {
        let mut keyed: Vec<(f64, &ScoredItem)> = items
            .into_iter()
            .map(|item| (metric.value_of(item), item))
            .collect();
        keyed.sort_by(|(a_value, a), (b_value, b)| {
            compare_desc(*a_value, *b_value)
                .then_with(|| compare_desc(a.velocity_signal, b.velocity_signal))
                .then_with(|| a.published_at.cmp(&b.published_at))
                .then_with(|| a.content_id.cmp(&b.content_id))
        });

        let take = if limit <= 0 {
            keyed.len()
        } else {
            usize::try_from(limit).unwrap_or(usize::MAX)
        };

        keyed
            .into_iter()
            .take(take)
            .enumerate()
            .map(|(position, (metric_value, item))| RankedEntry {
                rank: position + 1,
                content_id: item.content_id.clone(),
                metric_value,
                trend_score: item.trend_score(),
                velocity_signal: item.velocity_signal,
                insufficient_data: item.score.insufficient_data,
                canonical_sound: item.canonical_sound.clone(),
            })
            .collect()
    }

    pub fn rank_ids(&self, items: &[ScoredItem], metric: RankMetric, limit: i64) -> Vec<String> {
        self.rank(items, metric, limit)
            .into_iter()
            .map(|entry| entry.content_id)
            .collect()
    }
}

// NaN sorts last.
fn compare_desc(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.total_cmp(&a),
    }
}
