//! Confidence Threshold Configuration
//!
//! Tier boundaries for the confidence classifier.
//! High requires `top1 >= high`, anything under `low` is Uncertain, and a
//! top-1/top-2 gap under `margin` means MultipleCandidates.

use serde::{Deserialize, Serialize};

use crate::constants;

/// Threshold Configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceThresholds {
    /// Th: top-1 probability for High
    pub high: f32,

    /// Tl: top-1 probability floor for Low
    pub low: f32,

    /// M: minimum top-1/top-2 gap to avoid MultipleCandidates
    pub margin: f32,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ThresholdError {
    #[error("threshold {name} = {value} is outside [0, 1]")]
    OutOfRange { name: &'static str, value: f32 },

    #[error("high threshold {high} must be greater than low threshold {low}")]
    Inverted { high: f32, low: f32 },
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            high: constants::DEFAULT_HIGH_THRESHOLD,
            low: constants::DEFAULT_LOW_THRESHOLD,
            margin: constants::DEFAULT_CANDIDATE_MARGIN,
        }
    }
}

impl ConfidenceThresholds {
    pub fn new(high: f32, low: f32, margin: f32) -> Result<Self, ThresholdError> {
        let thresholds = Self { high, low, margin };
        thresholds.validate()?;
        Ok(thresholds)
    }

    /// Thresholds from environment, falling back to defaults when invalid
    pub fn from_env() -> Self {
        let (high, low, margin) = constants::get_thresholds();
        Self::new(high, low, margin).unwrap_or_else(|e| {
            log::warn!("Ignoring confidence thresholds from environment: {}", e);
            Self::default()
        })
    }

    pub fn validate(&self) -> Result<(), ThresholdError> {
        for (name, value) in [("high", self.high), ("low", self.low), ("margin", self.margin)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ThresholdError::OutOfRange { name, value });
            }
        }
        if self.high <= self.low {
            return Err(ThresholdError::Inverted {
                high: self.high,
                low: self.low,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let t = ConfidenceThresholds::default();
        assert!(t.validate().is_ok());
        assert!(t.high > t.low);
    }

    #[test]
    fn test_inverted_rejected() {
        assert_eq!(
            ConfidenceThresholds::new(0.5, 0.6, 0.1),
            Err(ThresholdError::Inverted { high: 0.5, low: 0.6 })
        );
        assert!(ConfidenceThresholds::new(0.6, 0.6, 0.1).is_err());
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert!(matches!(
            ConfidenceThresholds::new(1.5, 0.6, 0.1),
            Err(ThresholdError::OutOfRange { name: "high", .. })
        ));
        assert!(ConfidenceThresholds::new(0.9, 0.6, -0.1).is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let t: ConfidenceThresholds = serde_json::from_str(r#"{"high": 0.9}"#).unwrap();
        assert_eq!(t.high, 0.9);
        assert_eq!(t.low, constants::DEFAULT_LOW_THRESHOLD);
    }
}
