use crate::config::DecayConfig;

#[derive(Debug, Clone)]
pub struct RecencyDecay {
    config: DecayConfig,
}

impl RecencyDecay {
    pub fn new(config: DecayConfig) -> Self {
        Self { config }
    }

    /// `exp(-λ · age_hours)`; negative ages count as fresh.
    pub fn multiplier(&self, age_hours: f64) -> f64 {
        (-self.config.lambda * age_hours.max(0.0)).exp()
    }
}
