use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Platform {
    TikTok,
    Instagram,
    YouTube,
    Other(String),
}

impl Platform {
    pub fn from_str(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        let platform = match value.to_lowercase().as_str() {
            "tiktok" | "tt" => Platform::TikTok,
            "instagram" | "ig" | "reels" => Platform::Instagram,
            "youtube" | "yt" | "shorts" | "youtube_shorts" => Platform::YouTube,
            other => Platform::Other(other.to_string()),
        };
        Some(platform)
    }

    pub fn label(&self) -> &str {
        match self {
            Platform::TikTok => "tiktok",
            Platform::Instagram => "instagram",
            Platform::YouTube => "youtube",
            Platform::Other(name) => name,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<String> for Platform {
    fn from(value: String) -> Self {
        Platform::from_str(&value).unwrap_or_else(|| Platform::Other(value))
    }
}

impl From<Platform> for String {
    fn from(value: Platform) -> Self {
        value.label().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Views,
    Likes,
    Comments,
    Shares,
}

impl Metric {
    pub const ALL: [Metric; 4] = [Metric::Views, Metric::Likes, Metric::Comments, Metric::Shares];

    pub fn label(self) -> &'static str {
        match self {
            Metric::Views => "views",
            Metric::Likes => "likes",
            Metric::Comments => "comments",
            Metric::Shares => "shares",
        }
    }
}

/// One real value per engagement metric.
///
/// Used for weights, reference ceilings, normalized values and per-metric
/// score contributions alike. Iteration order is always `Metric::ALL`, which
/// keeps floating-point sums reproducible.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricSet {
    pub views: f64,
    pub likes: f64,
    pub comments: f64,
    pub shares: f64,
}

impl MetricSet {
    pub fn new(views: f64, likes: f64, comments: f64, shares: f64) -> Self {
        Self {
            views,
            likes,
            comments,
            shares,
        }
    }

    pub fn splat(value: f64) -> Self {
        Self::new(value, value, value, value)
    }

    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Views => self.views,
            Metric::Likes => self.likes,
            Metric::Comments => self.comments,
            Metric::Shares => self.shares,
        }
    }

    pub fn set(&mut self, metric: Metric, value: f64) {
        match metric {
            Metric::Views => self.views = value,
            Metric::Likes => self.likes = value,
            Metric::Comments => self.comments = value,
            Metric::Shares => self.shares = value,
        }
    }

    pub fn map(&self, mut f: impl FnMut(Metric, f64) -> f64) -> Self {
        let mut out = MetricSet::default();
        for metric in Metric::ALL {
            out.set(metric, f(metric, self.get(metric)));
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = (Metric, f64)> + '_ {
        Metric::ALL.into_iter().map(move |metric| (metric, self.get(metric)))
    }

    pub fn sum(&self) -> f64 {
        self.iter().map(|(_, value)| value).sum()
    }
}

/// A per-metric table where any metric may be left out.
///
/// Config sections deserialize through this so that a partial table only
/// replaces the metrics it names and keeps the section defaults for the rest.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub views: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub likes: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shares: Option<f64>,
}

impl MetricOverrides {
    pub fn get(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Views => self.views,
            Metric::Likes => self.likes,
            Metric::Comments => self.comments,
            Metric::Shares => self.shares,
        }
    }

    pub fn over(&self, base: &MetricSet) -> MetricSet {
        base.map(|metric, value| self.get(metric).unwrap_or(value))
    }
}

impl From<MetricSet> for MetricOverrides {
    fn from(set: MetricSet) -> Self {
        Self {
            views: Some(set.views),
            likes: Some(set.likes),
            comments: Some(set.comments),
            shares: Some(set.shares),
        }
    }
}

/// Data-quality observation attached to a result. Not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnomalyFlag {
    NegativeCountClamped { metric: Metric, reported: i64 },
    MetricDecreased { metric: Metric, from: u64, to: u64 },
    MissingMetric { metric: Metric },
    /// A count that was present but not a whole number; treated as missing.
    MalformedCount { metric: Metric, raw: String },
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementSnapshot {
    pub content_id: String,
    pub platform: Platform,
    pub captured_at: DateTime<Utc>,
    pub views: Option<u64>,
    pub likes: Option<u64>,
    pub comments: Option<u64>,
    pub shares: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub anomalies: Vec<AnomalyFlag>,
}

impl EngagementSnapshot {
    pub fn count(&self, metric: Metric) -> Option<u64> {
        match metric {
            Metric::Views => self.views,
            Metric::Likes => self.likes,
            Metric::Comments => self.comments,
            Metric::Shares => self.shares,
        }
    }

    /// Likes + comments + shares, treating missing metrics as zero.
    pub fn interactions(&self) -> u64 {
        [self.likes, self.comments, self.shares]
            .iter()
            .map(|count| count.unwrap_or(0))
            .fold(0u64, u64::saturating_add)
    }
}

/// A piece of short-video content and its append-only snapshot history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentItem {
    pub content_id: String,
    pub platform: Platform,
    pub published_at: DateTime<Utc>,
    pub audio_ref: Option<String>,
    pub author: Option<String>,
    pub caption: Option<String>,
    snapshots: Vec<EngagementSnapshot>,
}

impl ContentItem {
    pub fn new(
        content_id: impl Into<String>,
        platform: Platform,
        published_at: DateTime<Utc>,
        audio_ref: Option<String>,
    ) -> Self {
        Self {
            content_id: content_id.into(),
            platform,
            published_at,
            audio_ref,
            author: None,
            caption: None,
            snapshots: Vec::new(),
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Appends a snapshot, keeping the history append-only and ordered by `captured_at`.
    pub fn push_snapshot(&mut self, snapshot: EngagementSnapshot) -> Result<(), ValidationError> {
        if snapshot.content_id != self.content_id {
            return Err(ValidationError::ContentMismatch {
                expected: self.content_id.clone(),
                found: snapshot.content_id,
            });
        }
        if snapshot.platform != self.platform {
            return Err(ValidationError::PlatformMismatch {
                expected: self.platform.to_string(),
                found: snapshot.platform.to_string(),
            });
        }
        if let Some(last) = self.snapshots.last() {
            if snapshot.captured_at < last.captured_at {
                return Err(ValidationError::OutOfOrder {
                    content_id: self.content_id.clone(),
                });
            }
        }
        self.snapshots.push(snapshot);
        Ok(())
    }

    pub fn snapshots(&self) -> &[EngagementSnapshot] {
        &self.snapshots
    }

    pub fn latest(&self) -> Option<&EngagementSnapshot> {
        self.snapshots.last()
    }

    pub fn latest_count(&self, metric: Metric) -> u64 {
        self.latest()
            .and_then(|snapshot| snapshot.count(metric))
            .unwrap_or(0)
    }

    /// Age of the content in hours at `now`, floored at zero.
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        let seconds = (now - self.published_at).num_seconds();
        (seconds.max(0) as f64) / 3600.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot(id: &str, hour: u32, views: u64) -> EngagementSnapshot {
        EngagementSnapshot {
            content_id: id.to_string(),
            platform: Platform::TikTok,
            captured_at: Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap(),
            views: Some(views),
            likes: None,
            comments: None,
            shares: None,
            anomalies: Vec::new(),
        }
    }

    fn item() -> ContentItem {
        ContentItem::new(
            "v1",
            Platform::TikTok,
            Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
            None,
        )
    }

    #[test]
    fn push_rejects_out_of_order_snapshot() {
        let mut item = item();
        item.push_snapshot(snapshot("v1", 5, 10)).unwrap();
        let err = item.push_snapshot(snapshot("v1", 4, 20)).unwrap_err();
        assert!(matches!(err, ValidationError::OutOfOrder { .. }));
        assert_eq!(item.snapshots().len(), 1);
    }

    #[test]
    fn push_rejects_foreign_snapshot() {
        let mut item = item();
        let err = item.push_snapshot(snapshot("v2", 5, 10)).unwrap_err();
        assert!(matches!(err, ValidationError::ContentMismatch { .. }));
    }

    #[test]
    fn platform_parsing_accepts_aliases() {
        assert_eq!(Platform::from_str("TikTok"), Some(Platform::TikTok));
        assert_eq!(Platform::from_str("ig"), Some(Platform::Instagram));
        assert_eq!(Platform::from_str("  "), None);
        assert_eq!(
            Platform::from_str("snapchat"),
            Some(Platform::Other("snapchat".to_string()))
        );
    }

    #[test]
    fn overrides_only_replace_named_metrics() {
        let overrides: MetricOverrides = toml::from_str("likes = 9.0").unwrap();
        let merged = overrides.over(&MetricSet::new(1.0, 2.0, 3.0, 4.0));
        assert_eq!(merged, MetricSet::new(1.0, 9.0, 3.0, 4.0));
    }

    #[test]
    fn metric_set_sums_in_fixed_order() {
        let set = MetricSet::new(1.0, 2.0, 3.0, 4.0);
        assert!((set.sum() - 10.0).abs() < 1e-12);
        assert_eq!(set.get(Metric::Comments), 3.0);
    }
}
