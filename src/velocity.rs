//! Rate-of-change metrics over an ordered snapshot history.
//!
//! Rates are `(metric_t2 - metric_t1) / max(elapsed_hours, 1)`. A decrease
//! between two samples is floored to zero and flagged rather than producing
//! a negative rate.

use chrono::Duration;
use serde::Serialize;
use tracing::debug;

use crate::model::{AnomalyFlag, EngagementSnapshot, Metric, MetricSet};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VelocityVector {
    pub window_hours: f64,
    pub elapsed_hours: f64,
    pub delta_views: u64,
    pub delta_likes: u64,
    pub delta_comments: u64,
    pub delta_shares: u64,
    /// Per-hour rate for each metric. Never negative.
    pub rates: MetricSet,
    pub insufficient_data: bool,
    pub anomalies: Vec<AnomalyFlag>,
}

impl VelocityVector {
    /// Zero vector for histories with fewer than two samples.
    pub fn insufficient(window_hours: f64) -> Self {
        Self {
            window_hours,
            elapsed_hours: 0.0,
            delta_views: 0,
            delta_likes: 0,
            delta_comments: 0,
            delta_shares: 0,
            rates: MetricSet::default(),
            insufficient_data: true,
            anomalies: vec![AnomalyFlag::InsufficientData],
        }
    }

    pub fn delta(&self, metric: Metric) -> u64 {
        match metric {
            Metric::Views => self.delta_views,
            Metric::Likes => self.delta_likes,
            Metric::Comments => self.delta_comments,
            Metric::Shares => self.delta_shares,
        }
    }

    fn set_delta(&mut self, metric: Metric, value: u64) {
        match metric {
            Metric::Views => self.delta_views = value,
            Metric::Likes => self.delta_likes = value,
            Metric::Comments => self.delta_comments = value,
            Metric::Shares => self.delta_shares = value,
        }
    }

    pub fn rate(&self, metric: Metric) -> f64 {
        self.rates.get(metric)
    }
}

#[derive(Debug, Clone, Default)]
pub struct VelocityCalculator;

impl VelocityCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Velocity between every adjacent pair of snapshots.
    pub fn pairwise(&self, snapshots: &[EngagementSnapshot]) -> Vec<VelocityVector> {
        snapshots
            .windows(2)
            .map(|pair| {
                let elapsed = hours_between(&pair[0], &pair[1]);
                self.between(&pair[0], &pair[1], elapsed)
            })
            .collect()
    }

    /// Velocity over `window`, ending at the latest snapshot.
    ///
    /// The start sample is the one nearest to `latest - window`, with ties
    /// going to the later sample. It is always strictly before the latest.
    pub fn over_window(&self, snapshots: &[EngagementSnapshot], window: Duration) -> VelocityVector {
        let window_hours = window.num_seconds() as f64 / 3600.0;
        let Some((latest, earlier)) = snapshots.split_last() else {
            return VelocityVector::insufficient(window_hours);
        };
        if earlier.is_empty() {
            return VelocityVector::insufficient(window_hours);
        }

        let boundary = latest.captured_at - window;
        let mut start = &earlier[0];
        let mut best = (start.captured_at - boundary).num_seconds().abs();
        for candidate in &earlier[1..] {
            let distance = (candidate.captured_at - boundary).num_seconds().abs();
            if distance <= best {
                best = distance;
                start = candidate;
            }
        }

        let mut vector = self.between(start, latest, hours_between(start, latest));
        vector.window_hours = window_hours;
        debug!(
            content_id = %latest.content_id,
            window_hours,
            elapsed_hours = vector.elapsed_hours,
            "computed windowed velocity"
        );
        vector
    }

    /// One vector per configured window, in window order.
    pub fn over_windows(
        &self,
        snapshots: &[EngagementSnapshot],
        windows: &[Duration],
    ) -> Vec<VelocityVector> {
        windows
            .iter()
            .map(|window| self.over_window(snapshots, *window))
            .collect()
    }

    fn between(
        &self,
        from: &EngagementSnapshot,
        to: &EngagementSnapshot,
        elapsed_hours: f64,
    ) -> VelocityVector {
        let divisor = elapsed_hours.max(1.0);
        let mut vector = VelocityVector {
            window_hours: elapsed_hours,
            elapsed_hours,
            delta_views: 0,
            delta_likes: 0,
            delta_comments: 0,
            delta_shares: 0,
            rates: MetricSet::default(),
            insufficient_data: false,
            anomalies: Vec::new(),
        };

        for metric in Metric::ALL {
            let delta = match (from.count(metric), to.count(metric)) {
                (Some(before), Some(after)) if after >= before => after - before,
                (Some(before), Some(after)) => {
                    vector.anomalies.push(AnomalyFlag::MetricDecreased {
                        metric,
                        from: before,
                        to: after,
                    });
                    0
                }
                _ => {
                    vector.anomalies.push(AnomalyFlag::MissingMetric { metric });
                    0
                }
            };
            vector.set_delta(metric, delta);
            vector.rates.set(metric, delta as f64 / divisor);
        }

        vector
    }
}

fn hours_between(from: &EngagementSnapshot, to: &EngagementSnapshot) -> f64 {
    let seconds = (to.captured_at - from.captured_at).num_seconds().max(0);
    seconds as f64 / 3600.0
}
