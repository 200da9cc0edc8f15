//! FlowSense Core - Flow Classification Pipeline
//!
//! Real-time traffic classification for QoS decisions.
//!
//! ## Architecture
//! - `logic/features/` - Flow sample shape and label layout
//! - `logic/model/` - ONNX inference and the dedicated worker pool
//! - `logic/confidence/` - Confidence tiers and thresholds
//! - `logic/fallback/` - DNS and ASN heuristics for uncertain flows
//! - `logic/stats/` - Cross-process counters and latency window
//! - `logic/broadcast/` - Topic fan-out to live monitoring clients
//! - `logic/meter` - Meter ID translation for the QoS controller
//! - `logic/pipeline` - Wires everything together

pub mod constants;
pub mod logic;

pub use logic::broadcast::{BroadcastMessage, BroadcastRouter, ChannelSubscriber, Subscriber, FLOW_UPDATES_TOPIC};
pub use logic::confidence::{ClassificationResult, ConfidenceClassifier, ConfidenceTier, FallbackKind};
pub use logic::config::PipelineConfig;
pub use logic::fallback::{DnsCache, FlowContext};
pub use logic::features::{FlowSample, ShapeError, TrafficLabel};
pub use logic::meter::{decode_meter_id, encode_meter_id, FormatError};
pub use logic::model::{ClassificationEngine, EngineStatus, FlowModel, Inference, InferenceError};
pub use logic::pipeline::{FlowPipeline, FlowRequest, IngestAck, PipelineError};
pub use logic::stats::{StatsAggregator, StatsSnapshot};
