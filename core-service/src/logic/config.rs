//! Pipeline Configuration
//!
//! One struct per stage, aggregated here. Defaults come from `constants`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::logic::broadcast::BroadcastConfig;
use crate::logic::confidence::{ConfidenceThresholds, ThresholdError};
use crate::logic::fallback::FallbackConfig;
use crate::logic::model::ModelConfig;
use crate::logic::stats::StatsConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub model: ModelConfig,
    pub thresholds: ConfidenceThresholds,
    pub fallback: FallbackConfig,
    pub stats: StatsConfig,
    pub broadcast: BroadcastConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {reason}")]
    Read { path: String, reason: String },

    #[error(transparent)]
    Thresholds(#[from] ThresholdError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl PipelineConfig {
    /// Defaults overridden by `FLOWSENSE_*` environment variables
    pub fn from_env() -> Self {
        let model = ModelConfig {
            model_path: constants::get_model_path(),
            workers: constants::get_inference_workers(),
            timeout_ms: constants::get_inference_timeout().as_millis() as u64,
            ..Default::default()
        };

        let fallback = FallbackConfig {
            asn_table_path: constants::get_asn_table(),
            ..Default::default()
        };

        Self {
            model,
            thresholds: ConfidenceThresholds::from_env(),
            fallback,
            stats: StatsConfig::from_env(),
            broadcast: BroadcastConfig::from_env(),
        }
    }

    /// JSON file; missing sections keep their defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds.validate()?;

        if self.model.packets == 0 || self.model.bytes == 0 {
            return Err(ConfigError::Invalid(format!(
                "sample shape {}x{} has no values",
                self.model.packets, self.model.bytes
            )));
        }
        if self.model.workers == 0 {
            return Err(ConfigError::Invalid("model.workers must be at least 1".into()));
        }
        if self.model.load_attempts == 0 {
            return Err(ConfigError::Invalid("model.load_attempts must be at least 1".into()));
        }
        if self.stats.window == 0 {
            return Err(ConfigError::Invalid("stats.window must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.model.packets, 20);
        assert_eq!(config.model.bytes, 256);
        assert_eq!(config.stats.window, 100);
    }

    #[test]
    fn test_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"thresholds": {{"high": 0.9}}, "stats": {{"window": 10}}}}"#).unwrap();

        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.thresholds.high, 0.9);
        assert_eq!(config.thresholds.low, constants::DEFAULT_LOW_THRESHOLD);
        assert_eq!(config.stats.window, 10);
        assert_eq!(config.model.timeout_ms, constants::DEFAULT_INFERENCE_TIMEOUT_MS);
    }

    #[test]
    fn test_invalid_file_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"thresholds": {{"high": 0.5, "low": 0.7}}}}"#).unwrap();
        assert!(matches!(
            PipelineConfig::from_file(file.path()),
            Err(ConfigError::Thresholds(_))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"model": {{"workers": 0}}}}"#).unwrap();
        assert!(matches!(PipelineConfig::from_file(file.path()), Err(ConfigError::Invalid(_))));
    }
}
