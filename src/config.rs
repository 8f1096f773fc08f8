use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::model::{MetricOverrides, MetricSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "MetricWeightsTable")]
pub struct MetricWeights {
    pub absolute: MetricSet,
    pub velocity: MetricSet,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MetricWeightsTable {
    absolute: MetricOverrides,
    velocity: MetricOverrides,
}

impl From<MetricWeightsTable> for MetricWeights {
    fn from(table: MetricWeightsTable) -> Self {
        let defaults = MetricWeights::default();
        Self {
            absolute: table.absolute.over(&defaults.absolute),
            velocity: table.velocity.over(&defaults.velocity),
        }
    }
}

impl Default for MetricWeights {
    fn default() -> Self {
        Self {
            absolute: MetricSet::new(1.0, 0.8, 0.6, 1.0),
            velocity: MetricSet::new(1.5, 1.0, 0.8, 1.2),
        }
    }
}

impl MetricWeights {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut total = 0.0;
        for (group, set) in [("absolute", &self.absolute), ("velocity", &self.velocity)] {
            for (metric, weight) in set.iter() {
                if !weight.is_finite() || weight < 0.0 {
                    return Err(ConfigError::NegativeWeight {
                        name: format!("{}.{}", group, metric.label()),
                    });
                }
                total += weight;
            }
        }
        if total <= 0.0 {
            return Err(ConfigError::AllWeightsZero);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    /// Per-hour decay constant applied to the velocity component.
    pub lambda: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self { lambda: 0.02 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VelocityWindow {
    pub hours: u32,
    /// Per-hour rate ceilings for this window. Metrics left out fall back to
    /// `ceilings.rate`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ceilings: Option<MetricOverrides>,
}

impl VelocityWindow {
    pub fn hours(hours: u32) -> Self {
        Self {
            hours,
            ceilings: None,
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.hours))
    }

    pub fn rate_ceilings(&self, fallback: &MetricSet) -> MetricSet {
        match &self.ceilings {
            Some(overrides) => overrides.over(fallback),
            None => *fallback,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VelocityConfig {
    pub windows: Vec<VelocityWindow>,
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            windows: vec![VelocityWindow::hours(24), VelocityWindow::hours(168)],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "ReferenceCeilingsTable")]
pub struct ReferenceCeilings {
    pub absolute: MetricSet,
    /// Per-hour rates.
    pub rate: MetricSet,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReferenceCeilingsTable {
    absolute: MetricOverrides,
    rate: MetricOverrides,
}

impl From<ReferenceCeilingsTable> for ReferenceCeilings {
    fn from(table: ReferenceCeilingsTable) -> Self {
        let defaults = ReferenceCeilings::default();
        Self {
            absolute: table.absolute.over(&defaults.absolute),
            rate: table.rate.over(&defaults.rate),
        }
    }
}

impl Default for ReferenceCeilings {
    fn default() -> Self {
        Self {
            absolute: MetricSet::new(10_000_000.0, 1_000_000.0, 100_000.0, 200_000.0),
            rate: MetricSet::new(100_000.0, 10_000.0, 1_000.0, 2_000.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Fraction of the hash width under which two hashes count as similar.
    pub similarity_threshold: f64,
    pub duration_tolerance_pct: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.0625,
            duration_tolerance_pct: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundBoostConfig {
    pub cap: f64,
    pub velocity_threshold: f64,
}

impl Default for SoundBoostConfig {
    fn default() -> Self {
        Self {
            cap: 1.2,
            velocity_threshold: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub min_views: u64,
    pub min_interactions: u64,
}

impl QualityConfig {
    pub fn admits(&self, views: u64, interactions: u64) -> bool {
        views >= self.min_views && interactions >= self.min_interactions
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_views: 10_000,
            min_interactions: 500,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub weights: MetricWeights,
    pub decay: DecayConfig,
    pub velocity: VelocityConfig,
    pub ceilings: ReferenceCeilings,
    pub matching: MatchingConfig,
    pub boost: SoundBoostConfig,
    pub quality: QualityConfig,
}

impl EngineConfig {
    pub fn load(path: Option<PathBuf>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        let config_path = path.or_else(default_config_path);
        let mut config = match config_path.as_ref() {
            Some(path) if path.exists() => {
                let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                toml::from_str(&contents)?
            }
            _ => EngineConfig::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok((config, config_path))
    }

    pub fn write(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let payload = toml::to_string_pretty(self)?;
        std::fs::write(path, payload).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Checks every option against its allowed range and puts the velocity
    /// windows into ascending order.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        self.weights.validate()?;

        if !(self.decay.lambda.is_finite() && self.decay.lambda > 0.0) {
            return Err(invalid("decay.lambda", "must be greater than zero"));
        }

        if self.velocity.windows.is_empty() {
            return Err(invalid("velocity.windows", "at least one window is required"));
        }
        self.velocity.windows.sort_by_key(|window| window.hours);
        for pair in self.velocity.windows.windows(2) {
            if pair[0].hours == pair[1].hours {
                return Err(invalid(
                    "velocity.windows",
                    format!("duplicate {}h window", pair[0].hours),
                ));
            }
        }
        if self.velocity.windows.iter().any(|window| window.hours == 0) {
            return Err(invalid("velocity.windows", "window hours must be positive"));
        }
        check_ceilings("ceilings.absolute", &self.ceilings.absolute)?;
        check_ceilings("ceilings.rate", &self.ceilings.rate)?;
        for window in &self.velocity.windows {
            check_ceilings(
                "velocity.windows.ceilings",
                &window.rate_ceilings(&self.ceilings.rate),
            )?;
        }

        let threshold = self.matching.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(invalid("matching.similarity_threshold", "must be within [0, 1]"));
        }
        let tolerance = self.matching.duration_tolerance_pct;
        if !(0.0..100.0).contains(&tolerance) {
            return Err(invalid(
                "matching.duration_tolerance_pct",
                "must be within [0, 100)",
            ));
        }

        if !(1.0..=1.2).contains(&self.boost.cap) {
            return Err(invalid("boost.cap", "must be within [1.0, 1.2]"));
        }
        if !(self.boost.velocity_threshold.is_finite() && self.boost.velocity_threshold >= 0.0) {
            return Err(invalid("boost.velocity_threshold", "must be non-negative"));
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Some(value) = env_f64("TREND_DECAY_LAMBDA") {
            self.decay.lambda = value;
        }
        if let Some(value) = env_f64("TREND_SIMILARITY_THRESHOLD") {
            self.matching.similarity_threshold = value;
        }
        if let Some(value) = env_f64("TREND_DURATION_TOLERANCE_PCT") {
            self.matching.duration_tolerance_pct = value;
        }
        if let Some(value) = env_f64("TREND_BOOST_CAP") {
            self.boost.cap = value;
        }
        if let Some(value) = env_f64("TREND_BOOST_THRESHOLD") {
            self.boost.velocity_threshold = value;
        }
    }
}

fn check_ceilings(field: &'static str, ceilings: &MetricSet) -> Result<(), ConfigError> {
    for (metric, value) in ceilings.iter() {
        if !(value.is_finite() && value > 0.0) {
            return Err(invalid(
                field,
                format!("{} ceiling must be greater than zero", metric.label()),
            ));
        }
    }
    Ok(())
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

fn env_f64(key: &str) -> Option<f64> {
    env::var(key).ok().and_then(|value| value.trim().parse::<f64>().ok())
}

fn default_config_path() -> Option<PathBuf> {
    env::var("TREND_CONFIG_PATH")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
        .or_else(|| Some(PathBuf::from("config/engine.toml")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let mut config = EngineConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn all_zero_weights_are_rejected() {
        let mut config = EngineConfig::default();
        config.weights.absolute = MetricSet::splat(0.0);
        config.weights.velocity = MetricSet::splat(0.0);
        assert!(matches!(config.validate(), Err(ConfigError::AllWeightsZero)));
    }

    #[test]
    fn negative_weight_is_rejected() {
        let mut config = EngineConfig::default();
        config.weights.velocity.shares = -0.5;
        match config.validate() {
            Err(ConfigError::NegativeWeight { name }) => assert_eq!(name, "velocity.shares"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn windows_are_sorted_and_deduplicated() {
        let mut config = EngineConfig::default();
        config.velocity.windows = vec![VelocityWindow::hours(168), VelocityWindow::hours(6)];
        config.validate().unwrap();
        assert_eq!(config.velocity.windows[0].hours, 6);

        config.velocity.windows.push(VelocityWindow::hours(6));
        assert!(config.validate().is_err());
    }

    #[test]
    fn boost_cap_is_bounded() {
        let mut config = EngineConfig::default();
        config.boost.cap = 1.5;
        assert!(config.validate().is_err());
        config.boost.cap = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [decay]
            lambda = 0.1

            [weights.absolute]
            views = 2.0

            [[velocity.windows]]
            hours = 12
            "#,
        )
        .unwrap();
        assert!((config.decay.lambda - 0.1).abs() < 1e-12);
        assert!((config.weights.absolute.views - 2.0).abs() < 1e-12);
        assert!((config.weights.absolute.likes - 0.8).abs() < 1e-12);
        assert_eq!(config.weights.velocity, MetricWeights::default().velocity);
        assert_eq!(config.velocity.windows.len(), 1);
        assert!((config.matching.duration_tolerance_pct - 2.0).abs() < 1e-12);
    }

    #[test]
    fn partial_ceiling_tables_keep_defaults_and_validate() {
        let mut config: EngineConfig = toml::from_str(
            r#"
            [ceilings.absolute]
            views = 5000000.0

            [weights.velocity]
            views = 2.0

            [[velocity.windows]]
            hours = 6
            ceilings = { shares = 50.0 }
            "#,
        )
        .unwrap();
        config.validate().unwrap();

        let defaults = ReferenceCeilings::default();
        assert!((config.ceilings.absolute.views - 5_000_000.0).abs() < 1e-6);
        assert_eq!(config.ceilings.absolute.likes, defaults.absolute.likes);
        assert_eq!(config.ceilings.rate, defaults.rate);
        assert!((config.weights.velocity.likes - 1.0).abs() < 1e-12);

        let window = config.velocity.windows[0].rate_ceilings(&config.ceilings.rate);
        assert!((window.shares - 50.0).abs() < 1e-12);
        assert_eq!(window.views, defaults.rate.views);
    }

    #[test]
    fn written_config_loads_back_unchanged() {
        let config = EngineConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: EngineConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.weights, config.weights);
        assert_eq!(parsed.ceilings.rate, config.ceilings.rate);
    }
}
