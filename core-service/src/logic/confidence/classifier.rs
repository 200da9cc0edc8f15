//! Confidence Classifier
//!
//! Maps a confidence vector to exactly one tier, then runs the DNS/ASN
//! fallback for Uncertain flows.
//! Input: Inference (or a failed one) + FlowContext
//! Output: ClassificationResult

use super::threshold::ConfidenceThresholds;
use super::types::{ClassificationResult, ConfidenceTier, FallbackKind};
use crate::logic::fallback::{FallbackChain, FlowContext};
use crate::logic::features::TrafficLabel;
use crate::logic::model::Inference;

// ============================================================================
// TIERING
// ============================================================================

/// Top-1 and top-2 finite scores; missing entries count as 0
pub fn top_two(scores: &[f32]) -> (f32, f32) {
    let mut first = f32::NEG_INFINITY;
    let mut second = f32::NEG_INFINITY;

    for &s in scores.iter().filter(|s| s.is_finite()) {
        if s > first {
            second = first;
            first = s;
        } else if s > second {
            second = s;
        }
    }

    let first = if first.is_finite() { first } else { 0.0 };
    let second = if second.is_finite() { second } else { 0.0 };
    (first, second)
}

/// Tier for one result.
///
/// Checked in order, first match wins:
/// 1. Uncertain - no scores, top-1 under `low`, or the Unknown label
/// 2. MultipleCandidates - top-1/top-2 gap under `margin`
/// 3. High - top-1 at or above `high`
/// 4. Low - everything else
pub fn assign_tier(scores: &[f32], label: TrafficLabel, thresholds: &ConfidenceThresholds) -> ConfidenceTier {
    if scores.iter().all(|s| !s.is_finite()) || label.is_unknown() {
        return ConfidenceTier::Uncertain;
    }

    let (top1, top2) = top_two(scores);

    if top1 < thresholds.low {
        ConfidenceTier::Uncertain
    } else if top1 - top2 < thresholds.margin {
        ConfidenceTier::MultipleCandidates
    } else if top1 >= thresholds.high {
        ConfidenceTier::High
    } else {
        ConfidenceTier::Low
    }
}

// ============================================================================
// CLASSIFIER
// ============================================================================

pub struct ConfidenceClassifier {
    thresholds: ConfidenceThresholds,
    fallback: Option<FallbackChain>,
}

impl ConfidenceClassifier {
    pub fn new(thresholds: ConfidenceThresholds) -> Self {
        Self {
            thresholds,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: FallbackChain) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn thresholds(&self) -> &ConfidenceThresholds {
        &self.thresholds
    }

    /// Classify a successful inference
    pub async fn classify(&self, inference: &Inference, ctx: &FlowContext) -> ClassificationResult {
        self.classify_scores(inference.confidence.clone(), inference.label, inference.elapsed_ms, ctx)
            .await
    }

    /// Classify a raw confidence vector and model label
    pub async fn classify_scores(
        &self,
        confidence_vector: Vec<f32>,
        model_label: TrafficLabel,
        elapsed_ms: f64,
        ctx: &FlowContext,
    ) -> ClassificationResult {
        let tier = assign_tier(&confidence_vector, model_label, &self.thresholds);

        let mut result = ClassificationResult {
            label: model_label,
            model_label,
            confidence_vector,
            elapsed_ms,
            tier,
            fallback_used: FallbackKind::None,
        };

        if tier == ConfidenceTier::Uncertain {
            self.apply_fallback(&mut result, ctx).await;
        }

        result
    }

    /// Result for an inference that failed or timed out: Unknown, no scores,
    /// Uncertain. The fallback still gets a chance to label it.
    pub async fn classify_failed(&self, elapsed_ms: f64, ctx: &FlowContext) -> ClassificationResult {
        let mut result = ClassificationResult {
            label: TrafficLabel::Unknown,
            model_label: TrafficLabel::Unknown,
            confidence_vector: Vec::new(),
            elapsed_ms,
            tier: ConfidenceTier::Uncertain,
            fallback_used: FallbackKind::None,
        };

        self.apply_fallback(&mut result, ctx).await;
        result
    }

    /// Relabel from the fallback chain; the tier stays Uncertain
    async fn apply_fallback(&self, result: &mut ClassificationResult, ctx: &FlowContext) {
        let Some(chain) = &self.fallback else {
            return;
        };

        if let Some((label, kind)) = chain.resolve(ctx).await {
            log::debug!("Fallback {} relabeled {} -> {}", kind.as_str(), result.model_label, label);
            result.label = label;
            result.fallback_used = kind;
        }
    }
}

impl Default for ConfidenceClassifier {
    fn default() -> Self {
        Self::new(ConfidenceThresholds::default())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::features::LABEL_COUNT;

    fn scores(values: &[(TrafficLabel, f32)]) -> Vec<f32> {
        let mut out = vec![0.0; LABEL_COUNT];
        for (label, value) in values {
            out[label.index()] = *value;
        }
        out
    }

    fn tier(values: &[(TrafficLabel, f32)], label: TrafficLabel) -> ConfidenceTier {
        assign_tier(&scores(values), label, &ConfidenceThresholds::default())
    }

    #[test]
    fn test_high() {
        assert_eq!(
            tier(&[(TrafficLabel::Gaming, 0.9), (TrafficLabel::Chat, 0.05)], TrafficLabel::Gaming),
            ConfidenceTier::High
        );
        // Boundary is inclusive
        assert_eq!(tier(&[(TrafficLabel::Gaming, 0.85)], TrafficLabel::Gaming), ConfidenceTier::High);
    }

    #[test]
    fn test_low() {
        assert_eq!(
            tier(&[(TrafficLabel::Voip, 0.7), (TrafficLabel::Chat, 0.2)], TrafficLabel::Voip),
            ConfidenceTier::Low
        );
        assert_eq!(tier(&[(TrafficLabel::Voip, 0.6)], TrafficLabel::Voip), ConfidenceTier::Low);
    }

    #[test]
    fn test_multiple_candidates_overrides_high_and_low() {
        // Only reachable for High when thresholds allow a small gap above Th
        let t = ConfidenceThresholds::new(0.5, 0.3, 0.1).unwrap();
        let close = scores(&[(TrafficLabel::Streaming, 0.52), (TrafficLabel::Browsing, 0.48)]);
        assert_eq!(assign_tier(&close, TrafficLabel::Streaming, &t), ConfidenceTier::MultipleCandidates);

        let close_low = scores(&[(TrafficLabel::Streaming, 0.65), (TrafficLabel::Browsing, 0.6)]);
        assert_eq!(
            assign_tier(&close_low, TrafficLabel::Streaming, &ConfidenceThresholds::default()),
            ConfidenceTier::MultipleCandidates
        );
    }

    #[test]
    fn test_uncertain() {
        assert_eq!(tier(&[(TrafficLabel::Chat, 0.4)], TrafficLabel::Chat), ConfidenceTier::Uncertain);
        assert_eq!(tier(&[(TrafficLabel::Unknown, 0.99)], TrafficLabel::Unknown), ConfidenceTier::Uncertain);
        assert_eq!(
            assign_tier(&[], TrafficLabel::Chat, &ConfidenceThresholds::default()),
            ConfidenceTier::Uncertain
        );
        assert_eq!(
            assign_tier(&[f32::NAN, f32::NAN], TrafficLabel::Chat, &ConfidenceThresholds::default()),
            ConfidenceTier::Uncertain
        );
    }

    #[test]
    fn test_single_entry_uses_zero_second() {
        assert_eq!(top_two(&[0.9]), (0.9, 0.0));
        assert_eq!(top_two(&[]), (0.0, 0.0));
        assert_eq!(top_two(&[0.2, f32::NAN, 0.7]), (0.7, 0.2));
    }

    #[test]
    fn test_tiering_is_total_and_exclusive() {
        let t = ConfidenceThresholds::default();
        let labels = [TrafficLabel::Gaming, TrafficLabel::Unknown];

        // Sweep the (top1, top2) grid; each point yields one tier, and it
        // matches exactly one of the four predicates
        for i in 0..=20 {
            for j in 0..=i {
                let top1 = i as f32 / 20.0;
                let top2 = j as f32 / 20.0;
                for label in labels {
                    let v = vec![top1, top2];
                    let got = assign_tier(&v, label, &t);

                    let uncertain = label.is_unknown() || top1 < t.low;
                    let multiple = !uncertain && top1 - top2 < t.margin;
                    let high = !uncertain && !multiple && top1 >= t.high;
                    let low = !uncertain && !multiple && !high;

                    let matches = [uncertain, multiple, high, low].iter().filter(|m| **m).count();
                    assert_eq!(matches, 1);

                    let expected = if uncertain {
                        ConfidenceTier::Uncertain
                    } else if multiple {
                        ConfidenceTier::MultipleCandidates
                    } else if high {
                        ConfidenceTier::High
                    } else {
                        ConfidenceTier::Low
                    };
                    assert_eq!(got, expected, "top1={} top2={} label={}", top1, top2, label);
                }
            }
        }
    }

    fn uncertain_inference() -> Inference {
        Inference {
            label: TrafficLabel::Browsing,
            confidence: scores(&[(TrafficLabel::Browsing, 0.3), (TrafficLabel::Chat, 0.25)]),
            elapsed_ms: 4.0,
        }
    }

    fn zoom_ctx() -> FlowContext {
        FlowContext {
            hostname: Some("us04web.zoom.us".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_fallback_relabels_but_keeps_tier() {
        let classifier = ConfidenceClassifier::default().with_fallback(FallbackChain::default());
        let result = classifier.classify(&uncertain_inference(), &zoom_ctx()).await;

        assert_eq!(result.tier, ConfidenceTier::Uncertain);
        assert_eq!(result.label, TrafficLabel::VideoConference);
        assert_eq!(result.model_label, TrafficLabel::Browsing);
        assert_eq!(result.fallback_used, FallbackKind::Dns);
    }

    #[tokio::test]
    async fn test_confident_flows_skip_fallback() {
        let classifier = ConfidenceClassifier::default().with_fallback(FallbackChain::default());
        let inference = Inference {
            label: TrafficLabel::Gaming,
            confidence: scores(&[(TrafficLabel::Gaming, 0.95)]),
            elapsed_ms: 1.0,
        };

        let result = classifier.classify(&inference, &zoom_ctx()).await;
        assert_eq!(result.tier, ConfidenceTier::High);
        assert_eq!(result.label, TrafficLabel::Gaming);
        assert_eq!(result.fallback_used, FallbackKind::None);
    }

    #[tokio::test]
    async fn test_without_fallback_label_is_kept() {
        let classifier = ConfidenceClassifier::default();
        let result = classifier.classify(&uncertain_inference(), &zoom_ctx()).await;
        assert_eq!(result.tier, ConfidenceTier::Uncertain);
        assert_eq!(result.label, TrafficLabel::Browsing);
        assert!(!result.fallback_used.is_used());
    }

    #[tokio::test]
    async fn test_failed_inference() {
        let classifier = ConfidenceClassifier::default().with_fallback(FallbackChain::default());

        let bare = classifier.classify_failed(2000.0, &FlowContext::default()).await;
        assert_eq!(bare.label, TrafficLabel::Unknown);
        assert_eq!(bare.tier, ConfidenceTier::Uncertain);
        assert!(bare.confidence_vector.is_empty());
        assert_eq!(bare.elapsed_ms, 2000.0);

        let rescued = classifier.classify_failed(2000.0, &zoom_ctx()).await;
        assert_eq!(rescued.tier, ConfidenceTier::Uncertain);
        assert_eq!(rescued.label, TrafficLabel::VideoConference);
        assert_eq!(rescued.fallback_used, FallbackKind::Dns);
    }
}
