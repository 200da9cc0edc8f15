//! Model Module - Flow classification inference
//!
//! `inference.rs` loads replicas and defines the model capability,
//! `pool.rs` runs them on dedicated worker threads.

pub mod inference;
pub mod pool;

// Re-export common types
pub use inference::{arg_max, load_onnx_replicas, load_with_retry, FlowModel, InferenceError, ModelConfig, ModelMetadata, OnnxModel};
pub use pool::{ClassificationEngine, EngineStatus, Inference};
