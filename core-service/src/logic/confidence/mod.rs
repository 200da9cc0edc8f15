//! Confidence Module
//!
//! Buckets every classification into exactly one confidence tier.
//!
//! ## Structure
//! - `types`: ConfidenceTier, FallbackKind, ClassificationResult
//! - `threshold`: Th / Tl / M boundaries
//! - `classifier`: Tier assignment and the fallback hook

pub mod classifier;
pub mod threshold;
pub mod types;

pub use classifier::{assign_tier, top_two, ConfidenceClassifier};
pub use threshold::{ConfidenceThresholds, ThresholdError};
pub use types::{ClassificationResult, ConfidenceTier, FallbackKind};
