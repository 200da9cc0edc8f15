//! Flow Pipeline - ingestion to broadcast
//!
//! infer → classify (+ fallback) → stats → broadcast.
//!
//! `submit` only validates the sample shape before acknowledging; the rest
//! runs on a spawned task. The ack means "accepted for processing", not
//! "processed". A flow is never retried once accepted, so it is counted
//! and published at most once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::logic::broadcast::{BroadcastMessage, BroadcastRouter, Broadcaster, BusError};
use crate::logic::config::{ConfigError, PipelineConfig};
use crate::logic::confidence::{ClassificationResult, ConfidenceClassifier};
use crate::logic::fallback::{DnsCache, FallbackChain, FallbackError, FlowContext};
use crate::logic::features::{FlowSample, SampleShape, ShapeError};
use crate::logic::model::{ClassificationEngine, EngineStatus, FlowModel, InferenceError};
use crate::logic::stats::{StatsAggregator, StatsError, StatsSnapshot};

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// One flow handed over by the ingestion side
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRequest {
    pub flow_id: String,
    pub sample: FlowSample,
    #[serde(default)]
    pub context: FlowContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestAck {
    pub accepted: bool,
    pub flow_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Shape(#[from] ShapeError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("engine setup failed: {0}")]
    Engine(#[from] InferenceError),

    #[error("stats setup failed: {0}")]
    Stats(#[from] StatsError),

    #[error("broadcast setup failed: {0}")]
    Bus(#[from] BusError),

    #[error("fallback setup failed: {0}")]
    Fallback(#[from] FallbackError),
}

// ============================================================================
// PIPELINE
// ============================================================================

struct Stages {
    engine: ClassificationEngine,
    classifier: ConfidenceClassifier,
    stats: StatsAggregator,
    broadcaster: Broadcaster,
    dns_cache: Arc<DnsCache>,
}

#[derive(Clone)]
pub struct FlowPipeline {
    stages: Arc<Stages>,
}

impl FlowPipeline {
    pub fn new(
        engine: ClassificationEngine,
        classifier: ConfidenceClassifier,
        stats: StatsAggregator,
        broadcaster: Broadcaster,
        dns_cache: Arc<DnsCache>,
    ) -> Self {
        Self {
            stages: Arc::new(Stages {
                engine,
                classifier,
                stats,
                broadcaster,
                dns_cache,
            }),
        }
    }

    /// Validate the config and wire every stage from it. Needs a tokio
    /// runtime when a shared broadcast bus is configured.
    pub fn from_config(models: Vec<Box<dyn FlowModel>>, config: &PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;

        let engine = ClassificationEngine::start(models, &config.model)?;

        let dns_cache = Arc::new(DnsCache::new(
            config.fallback.dns_cache_capacity,
            Duration::from_secs(config.fallback.dns_cache_ttl_secs),
        ));

        let mut classifier = ConfidenceClassifier::new(config.thresholds);
        if config.fallback.enabled {
            classifier = classifier.with_fallback(FallbackChain::from_config(&config.fallback, Some(dns_cache.clone()))?);
        } else {
            log::info!("DNS/ASN fallback disabled");
        }

        let stats = StatsAggregator::from_config(&config.stats)?;
        let broadcaster = Broadcaster::from_config(&config.broadcast, Arc::new(BroadcastRouter::new()))?;

        log::info!(
            "Flow pipeline ready: shape {}, stats {}, broadcast {}",
            engine.shape(),
            stats.backend_name(),
            if broadcaster.is_shared() { "shared bus" } else { "process-local" }
        );

        Ok(Self::new(engine, classifier, stats, broadcaster, dns_cache))
    }

    /// Validate and accept a flow; classification continues in the background
    pub fn submit(&self, request: FlowRequest) -> Result<IngestAck, PipelineError> {
        let tensor = self.prepare(&request)?;
        let ack = IngestAck {
            accepted: true,
            flow_id: request.flow_id.clone(),
        };

        let pipeline = self.clone();
        tokio::spawn(async move {
            pipeline.run(request.flow_id, tensor, request.context).await;
        });

        Ok(ack)
    }

    /// Same as `submit`, but waits for the result
    pub async fn process(&self, request: FlowRequest) -> Result<ClassificationResult, PipelineError> {
        let tensor = self.prepare(&request)?;
        Ok(self.run(request.flow_id, tensor, request.context).await)
    }

    fn prepare(&self, request: &FlowRequest) -> Result<Array3<f32>, ShapeError> {
        request.sample.to_tensor(self.stages.engine.shape()).map_err(|e| {
            log::warn!("Rejected flow {}: {}", request.flow_id, e);
            e
        })
    }

    async fn run(&self, flow_id: String, tensor: Array3<f32>, ctx: FlowContext) -> ClassificationResult {
        let stages = &self.stages;
        let started = Instant::now();

        let result = match stages.engine.infer_tensor(tensor).await {
            Ok(inference) => stages.classifier.classify(&inference, &ctx).await,
            Err(e) => {
                log::warn!("Inference for flow {} failed: {}", flow_id, e);
                let waited_ms = started.elapsed().as_secs_f64() * 1000.0;
                stages.classifier.classify_failed(waited_ms, &ctx).await
            }
        };

        log::debug!(
            "Flow {} -> {} ({}, fallback {}, {:.2} ms)",
            flow_id,
            result.label,
            result.tier,
            result.fallback_used.as_str(),
            result.elapsed_ms
        );

        stages.stats.record(&result).await;
        stages
            .broadcaster
            .publish(BroadcastMessage::from_result(&flow_id, &result))
            .await;

        result
    }

    pub fn shape(&self) -> SampleShape {
        self.stages.engine.shape()
    }

    pub fn router(&self) -> &Arc<BroadcastRouter> {
        self.stages.broadcaster.router()
    }

    pub fn dns_cache(&self) -> &Arc<DnsCache> {
        &self.stages.dns_cache
    }

    pub fn engine_status(&self) -> EngineStatus {
        self.stages.engine.status()
    }

    pub async fn stats_snapshot(&self) -> Result<StatsSnapshot, StatsError> {
        self.stages.stats.snapshot().await
    }
}
