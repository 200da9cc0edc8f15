//! Confidence Types
//!
//! Core types for confidence tiering.
//! No logic here - data structures only.

use serde::{Deserialize, Serialize};

use crate::logic::features::TrafficLabel;

// ============================================================================
// CONFIDENCE TIER
// ============================================================================

/// How trustworthy a classification is. Exactly one per result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    High,
    Low,
    MultipleCandidates,
    Uncertain,
}

impl ConfidenceTier {
    pub const ALL: [ConfidenceTier; 4] = [
        ConfidenceTier::High,
        ConfidenceTier::Low,
        ConfidenceTier::MultipleCandidates,
        ConfidenceTier::Uncertain,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceTier::High => "high",
            ConfidenceTier::Low => "low",
            ConfidenceTier::MultipleCandidates => "multiple_candidates",
            ConfidenceTier::Uncertain => "uncertain",
        }
    }
}

impl std::fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// FALLBACK
// ============================================================================

/// Which heuristic, if any, supplied the final label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackKind {
    #[default]
    None,
    Dns,
    Asn,
}

impl FallbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackKind::None => "none",
            FallbackKind::Dns => "dns",
            FallbackKind::Asn => "asn",
        }
    }

    pub fn is_used(&self) -> bool {
        !matches!(self, FallbackKind::None)
    }
}

// ============================================================================
// RESULT
// ============================================================================

/// Final classification of one flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    /// Final label (the fallback's label when one was used)
    pub label: TrafficLabel,
    /// What the model itself said
    pub model_label: TrafficLabel,
    pub confidence_vector: Vec<f32>,
    pub elapsed_ms: f64,
    pub tier: ConfidenceTier,
    pub fallback_used: FallbackKind,
}

impl ClassificationResult {
    /// Top-1 score, 0.0 when the model produced nothing
    pub fn top_score(&self) -> f32 {
        self.confidence_vector
            .iter()
            .copied()
            .filter(|s| s.is_finite())
            .fold(0.0, f32::max)
    }
}
