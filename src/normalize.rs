use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::error::{ItemError, ValidationError};
use crate::model::{AnomalyFlag, ContentItem, EngagementSnapshot, Metric, Platform};

/// A timestamp as scrapers hand it over: unix seconds or a date string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Unix(i64),
    Text(String),
    /// Any other JSON value; always rejected as an invalid timestamp.
    Other(serde_json::Value),
}

impl RawTimestamp {
    fn describe(&self) -> String {
        match self {
            RawTimestamp::Unix(value) => value.to_string(),
            RawTimestamp::Text(value) => value.clone(),
            RawTimestamp::Other(value) => value.to_string(),
        }
    }
}

/// An engagement count as scrapers hand it over.
///
/// Integers are taken as-is. Digit strings and whole floats are accepted.
/// Anything else is kept so the record can be normalized with the count
/// flagged as malformed instead of failing the whole batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawCount {
    Count(i64),
    Text(String),
    Other(serde_json::Value),
}

impl RawCount {
    pub fn as_count(&self) -> Option<i64> {
        match self {
            RawCount::Count(value) => Some(*value),
            RawCount::Text(text) => text.trim().parse().ok(),
            RawCount::Other(value) => value
                .as_f64()
                .filter(|number| number.is_finite() && number.fract() == 0.0)
                .filter(|number| number.abs() < i64::MAX as f64)
                .map(|number| number as i64),
        }
    }

    fn describe(&self) -> String {
        match self {
            RawCount::Count(value) => value.to_string(),
            RawCount::Text(text) => text.clone(),
            RawCount::Other(value) => value.to_string(),
        }
    }
}

impl From<i64> for RawCount {
    fn from(value: i64) -> Self {
        RawCount::Count(value)
    }
}

/// Per-platform engagement record before normalization.
///
/// Field aliases cover the TikTok and Instagram scraper payloads as well as
/// the generic snapshot table layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEngagementRecord {
    #[serde(default, alias = "video_id", alias = "shortcode", alias = "id")]
    pub content_id: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default, alias = "snapshot_at", alias = "capturedAt")]
    pub captured_at: Option<RawTimestamp>,
    #[serde(
        default,
        alias = "playCount",
        alias = "videoViewCount",
        alias = "video_view_count",
        alias = "view_count"
    )]
    pub views: Option<RawCount>,
    #[serde(default, alias = "diggCount", alias = "likesCount", alias = "like_count")]
    pub likes: Option<RawCount>,
    #[serde(
        default,
        alias = "commentCount",
        alias = "commentsCount",
        alias = "comment_count"
    )]
    pub comments: Option<RawCount>,
    #[serde(default, alias = "shareCount", alias = "share_count")]
    pub shares: Option<RawCount>,
}

impl RawEngagementRecord {
    fn count(&self, metric: Metric) -> Option<&RawCount> {
        match metric {
            Metric::Views => self.views.as_ref(),
            Metric::Likes => self.likes.as_ref(),
            Metric::Comments => self.comments.as_ref(),
            Metric::Shares => self.shares.as_ref(),
        }
    }
}

/// A content record together with its raw snapshot history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawContentRecord {
    #[serde(default, alias = "video_id", alias = "shortcode")]
    pub content_id: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default, alias = "created_at")]
    pub published_at: Option<RawTimestamp>,
    #[serde(default, alias = "audio_id")]
    pub audio_ref: Option<String>,
    #[serde(default, alias = "author_username", alias = "owner_username")]
    pub author: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub snapshots: Vec<RawEngagementRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedItems {
    pub items: Vec<ContentItem>,
    pub errors: Vec<ItemError>,
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotNormalizer;

impl SnapshotNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Converts one raw record into an `EngagementSnapshot`.
    ///
    /// `platform` is the caller-supplied platform identity; the record's own
    /// `platform` field is used when it is absent. Negative counts are clamped
    /// to zero and flagged, missing counts stay `None`, and malformed counts
    /// become `None` with a `MalformedCount` flag.
    pub fn normalize(
        &self,
        platform: Option<&str>,
        record: &RawEngagementRecord,
    ) -> Result<EngagementSnapshot, ValidationError> {
        let content_id = record
            .content_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(ValidationError::MissingField("content_id"))?
            .to_string();

        let platform = platform
            .or(record.platform.as_deref())
            .and_then(Platform::from_str)
            .ok_or(ValidationError::MissingField("platform"))?;

        let captured_at = record
            .captured_at
            .as_ref()
            .ok_or(ValidationError::MissingField("captured_at"))
            .and_then(|raw| parse_timestamp("captured_at", raw))?;

        let mut anomalies = Vec::new();
        let mut counts = [None; 4];
        for (slot, metric) in counts.iter_mut().zip(Metric::ALL) {
            let Some(raw) = record.count(metric) else {
                continue;
            };
            let Some(value) = raw.as_count() else {
                warn!(
                    content_id = %content_id,
                    metric = metric.label(),
                    raw = %raw.describe(),
                    "malformed engagement count ignored"
                );
                anomalies.push(AnomalyFlag::MalformedCount {
                    metric,
                    raw: raw.describe(),
                });
                continue;
            };
            if value < 0 {
                warn!(
                    content_id = %content_id,
                    metric = metric.label(),
                    reported = value,
                    "negative engagement count clamped to zero"
                );
                anomalies.push(AnomalyFlag::NegativeCountClamped {
                    metric,
                    reported: value,
                });
            }
            *slot = Some(value.max(0) as u64);
        }
        let [views, likes, comments, shares] = counts;

        Ok(EngagementSnapshot {
            content_id,
            platform,
            captured_at,
            views,
            likes,
            comments,
            shares,
            anomalies,
        })
    }

    /// Builds a `ContentItem` from a content record, normalizing its snapshots.
    ///
    /// Snapshot records inherit the item's content id and platform when they
    /// omit them, and are ordered by `captured_at` before being appended.
    pub fn normalize_item(&self, record: &RawContentRecord) -> Result<ContentItem, ValidationError> {
        let content_id = record
            .content_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(ValidationError::MissingField("content_id"))?;
        let platform_label = record
            .platform
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .ok_or(ValidationError::MissingField("platform"))?;
        let platform =
            Platform::from_str(platform_label).ok_or(ValidationError::MissingField("platform"))?;
        let published_at = record
            .published_at
            .as_ref()
            .ok_or(ValidationError::MissingField("published_at"))
            .and_then(|raw| parse_timestamp("published_at", raw))?;

        let mut snapshots = record
            .snapshots
            .iter()
            .map(|raw| {
                let mut raw = raw.clone();
                if raw.content_id.is_none() {
                    raw.content_id = Some(content_id.to_string());
                }
                self.normalize(Some(raw.platform.as_deref().unwrap_or(platform_label)), &raw)
            })
            .collect::<Result<Vec<_>, _>>()?;
        snapshots.sort_by_key(|snapshot| snapshot.captured_at);

        let mut item = ContentItem::new(content_id, platform, published_at, clean(&record.audio_ref));
        item.author = clean(&record.author);
        item.caption = record.caption.clone();
        for snapshot in snapshots {
            item.push_snapshot(snapshot)?;
        }
        Ok(item)
    }

    /// Normalizes a batch of content records, collecting per-item errors
    /// instead of failing the whole batch. A repeated content id is rejected
    /// after its first occurrence.
    pub fn normalize_items(&self, records: &[RawContentRecord]) -> NormalizedItems {
        let mut out = NormalizedItems::default();
        let mut seen = HashSet::new();
        for (index, record) in records.iter().enumerate() {
            let result = self.normalize_item(record).and_then(|item| {
                if seen.insert(item.content_id.clone()) {
                    Ok(item)
                } else {
                    Err(ValidationError::DuplicateContent {
                        content_id: item.content_id,
                    })
                }
            });
            match result {
                Ok(item) => out.items.push(item),
                Err(error) => {
                    warn!(index, error = %error, "rejected content record");
                    out.errors
                        .push(ItemError::new(index, record.content_id.clone(), error));
                }
            }
        }
        debug!(
            accepted = out.items.len(),
            rejected = out.errors.len(),
            "normalized content records"
        );
        out
    }
}

fn clean(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Parses RFC 3339, naive ISO-8601 (as UTC), SQLite `CURRENT_TIMESTAMP`
/// layout, or unix seconds.
pub fn parse_timestamp(
    field: &'static str,
    raw: &RawTimestamp,
) -> Result<DateTime<Utc>, ValidationError> {
    let invalid = || ValidationError::InvalidTimestamp {
        field,
        value: raw.describe(),
    };

    match raw {
        RawTimestamp::Unix(seconds) => Utc.timestamp_opt(*seconds, 0).single().ok_or_else(invalid),
        RawTimestamp::Text(text) => {
            let text = text.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
                return Ok(dt.with_timezone(&Utc));
            }
            for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
                    return Ok(naive.and_utc());
                }
            }
            if let Ok(seconds) = text.parse::<i64>() {
                return Utc.timestamp_opt(seconds, 0).single().ok_or_else(invalid);
            }
            Err(invalid())
        }
        RawTimestamp::Other(_) => Err(invalid()),
    }
}
