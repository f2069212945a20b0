use std::collections::BTreeSet;
use std::env;

use serde::{Deserialize, Serialize};

use crate::elo::EloConfig;
use crate::error::ConfigError;
use crate::regressor::{FAMILY_PRIORITY, HyperparamSpace, ModelFamily};

/// Everything that shapes one pipeline run. Passed by reference through every stage;
/// two requests with different configs never share one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub model_families: BTreeSet<ModelFamily>,
    pub cv_folds: usize,
    pub accuracy_threshold: f64,
    pub low_sample_min_matches: usize,
    pub fallback_confidence_cap: f64,
    pub low_sample_penalty: f64,
    pub recency_half_life_days: f64,
    pub stability_horizon_days: f64,
    pub full_roster_size: usize,
    /// Event-name fragments that mark a match as tournament tier.
    pub tournament_event_markers: Vec<String>,
    pub elo: EloConfig,
    pub hyperparams: HyperparamSpace,
    pub seed: u64,
    // Losing any configured family to a training error forces the fallback ranking.
    // Clear it to predict with whichever families survived.
    pub fallback_on_partial_training_failure: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_families: FAMILY_PRIORITY.into_iter().collect(),
            cv_folds: 5,
            accuracy_threshold: 0.7,
            low_sample_min_matches: 5,
            fallback_confidence_cap: 0.35,
            low_sample_penalty: 0.6,
            recency_half_life_days: 45.0,
            stability_horizon_days: 365.0,
            full_roster_size: 5,
            tournament_event_markers: vec!["Game Changers".to_string()],
            elo: EloConfig::default(),
            hyperparams: HyperparamSpace::default(),
            seed: 42,
            fallback_on_partial_training_failure: true,
        }
    }
}

impl PipelineConfig {
    pub fn with_families<I>(mut self, families: I) -> Self
    where
        I: IntoIterator<Item = ModelFamily>,
    {
        self.model_families = families.into_iter().collect();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model_families.is_empty() {
            return Err(ConfigError::NoFamilies);
        }
        if self.cv_folds < 2 {
            return Err(ConfigError::Folds(self.cv_folds));
        }
        for (field, value) in [
            ("accuracy_threshold", self.accuracy_threshold),
            ("fallback_confidence_cap", self.fallback_confidence_cap),
            ("low_sample_penalty", self.low_sample_penalty),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfUnitRange { field, value });
            }
        }
        for (field, value) in [
            ("recency_half_life_days", self.recency_half_life_days),
            ("stability_horizon_days", self.stability_horizon_days),
            ("elo.k", self.elo.k),
        ] {
            if !(value > 0.0) {
                return Err(ConfigError::NotPositive { field, value });
            }
        }
        for family in &self.model_families {
            if self.hyperparams.grid(*family).is_empty() {
                return Err(ConfigError::EmptyGrid(*family));
            }
        }
        Ok(())
    }

    /// Defaults overridden by `FORECAST_*` environment variables. Unparseable values are
    /// ignored.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(raw) = env_str("FORECAST_MODEL_FAMILIES") {
            let families: BTreeSet<ModelFamily> =
                raw.split(',').filter_map(ModelFamily::parse).collect();
            if !families.is_empty() {
                cfg.model_families = families;
            }
        }
        if let Some(v) = env_parse::<usize>("FORECAST_CV_FOLDS") {
            cfg.cv_folds = v.max(2);
        }
        if let Some(v) = env_parse::<f64>("FORECAST_ACCURACY_THRESHOLD") {
            cfg.accuracy_threshold = v.clamp(0.0, 1.0);
        }
        if let Some(v) = env_parse::<usize>("FORECAST_LOW_SAMPLE_MIN_MATCHES") {
            cfg.low_sample_min_matches = v;
        }
        if let Some(v) = env_parse::<f64>("FORECAST_FALLBACK_CONFIDENCE_CAP") {
            cfg.fallback_confidence_cap = v.clamp(0.0, 1.0);
        }
        if let Some(v) = env_parse::<f64>("FORECAST_RECENCY_HALF_LIFE_DAYS") {
            cfg.recency_half_life_days = v.max(1.0);
        }
        if let Some(raw) = env_str("FORECAST_TOURNAMENT_EVENTS") {
            cfg.tournament_event_markers = raw
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect();
        }
        if let Some(v) = env_parse::<u64>("FORECAST_SEED") {
            cfg.seed = v;
        }
        cfg
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_str(key).and_then(|v| v.trim().parse::<T>().ok())
}
