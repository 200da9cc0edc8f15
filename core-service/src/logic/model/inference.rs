//! Inference - ONNX Runtime Integration
//!
//! Loads the flow classifier and runs it on prepared tensors.
//! The worker pool in `pool.rs` owns the loaded replicas.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ndarray::Array3;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::logic::features::layout::{self, SampleShape, TrafficLabel, LABEL_COUNT, LABEL_LAYOUT, LABEL_VERSION};
use crate::logic::features::ShapeError;

// ============================================================================
// CONFIG
// ============================================================================

/// Model and worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model_path: String,
    pub packets: usize,
    pub bytes: usize,
    /// Worker threads, one model replica each
    pub workers: usize,
    pub queue_depth: usize,
    pub timeout_ms: u64,
    pub load_attempts: u32,
    pub load_backoff_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_path: constants::DEFAULT_MODEL_PATH.to_string(),
            packets: constants::DEFAULT_PACKETS,
            bytes: constants::DEFAULT_BYTES,
            workers: constants::DEFAULT_INFERENCE_WORKERS,
            queue_depth: constants::DEFAULT_INFERENCE_QUEUE,
            timeout_ms: constants::DEFAULT_INFERENCE_TIMEOUT_MS,
            load_attempts: constants::DEFAULT_MODEL_LOAD_ATTEMPTS,
            load_backoff_ms: constants::DEFAULT_MODEL_LOAD_BACKOFF_MS,
        }
    }
}

impl ModelConfig {
    pub fn shape(&self) -> SampleShape {
        SampleShape::new(self.packets, self.bytes)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn load_backoff(&self) -> Duration {
        Duration::from_millis(self.load_backoff_ms)
    }
}

// ============================================================================
// ERROR HANDLING
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error(transparent)]
    Shape(#[from] ShapeError),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("model metadata mismatch: {0}")]
    Metadata(String),

    #[error("model produced {actual} scores, expected {expected}")]
    OutputShape { expected: usize, actual: usize },

    #[error("inference timed out after {0:?}")]
    Timeout(Duration),

    #[error("inference queue is full")]
    Saturated,

    #[error("inference workers are gone")]
    WorkerGone,
}

// ============================================================================
// MODEL CAPABILITY
// ============================================================================

/// One loaded model replica.
///
/// Replicas are not shared: every inference worker owns exactly one.
pub trait FlowModel: Send {
    /// Output distribution (one score per label) for a (1, packets, bytes) tensor
    fn run(&mut self, input: &Array3<f32>) -> Result<Vec<f32>, InferenceError>;

    /// Human readable model name for status reporting
    fn name(&self) -> &str {
        "flow-model"
    }
}

// ============================================================================
// MODEL METADATA (sidecar JSON)
// ============================================================================

/// Optional `<model>.json` written next to the model at export time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub labels: Vec<String>,
    #[serde(default)]
    pub label_version: Option<u8>,
    #[serde(default)]
    pub layout_hash: Option<u32>,
    #[serde(default)]
    pub packets: Option<usize>,
    #[serde(default)]
    pub bytes: Option<usize>,
}

impl ModelMetadata {
    /// Sidecar path for a model file
    pub fn sidecar_path(model_path: &Path) -> PathBuf {
        model_path.with_extension("json")
    }

    pub fn read(path: &Path) -> Result<Self, InferenceError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| InferenceError::Metadata(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&raw)
            .map_err(|e| InferenceError::Metadata(format!("{}: {}", path.display(), e)))
    }

    /// Check the sidecar against the compiled label layout and tensor shape
    pub fn validate(&self, shape: SampleShape) -> Result<(), InferenceError> {
        let expected: Vec<&str> = LABEL_LAYOUT.iter().map(TrafficLabel::as_str).collect();
        if self.labels.iter().map(String::as_str).ne(expected.iter().copied()) {
            return Err(InferenceError::Metadata(format!(
                "labels {:?} do not match layout {:?}",
                self.labels, expected
            )));
        }

        let version = self.label_version.unwrap_or(LABEL_VERSION);
        if let Some(hash) = self.layout_hash {
            let ours = layout::layout_hash_of(version, self.labels.iter().map(String::as_str));
            if version != LABEL_VERSION || hash != ours {
                return Err(InferenceError::Metadata(format!(
                    "layout hash {:#010x} (v{}) != {:#010x} (v{})",
                    hash,
                    version,
                    layout::layout_hash(),
                    LABEL_VERSION
                )));
            }
        }

        if self.packets.map_or(false, |p| p != shape.packets) || self.bytes.map_or(false, |b| b != shape.bytes) {
            return Err(InferenceError::Metadata(format!(
                "model expects {}x{}, engine configured for {}",
                self.packets.unwrap_or(shape.packets),
                self.bytes.unwrap_or(shape.bytes),
                shape
            )));
        }

        Ok(())
    }
}

// ============================================================================
// ONNX IMPLEMENTATION
// ============================================================================

/// ONNX Runtime replica
pub struct OnnxModel {
    session: Session,
    output_name: String,
    name: String,
}

impl OnnxModel {
    /// Load an ONNX model from file, checking its sidecar if present
    pub fn load(model_path: &str, shape: SampleShape) -> Result<Self, InferenceError> {
        let path = Path::new(model_path);
        if !path.exists() {
            return Err(InferenceError::ModelNotFound(model_path.to_string()));
        }

        let sidecar = ModelMetadata::sidecar_path(path);
        if sidecar.exists() {
            ModelMetadata::read(&sidecar)?.validate(shape)?;
        } else {
            log::warn!("No metadata sidecar for {}, label layout unchecked", model_path);
        }

        let session = Session::builder()
            .map_err(|e| InferenceError::Model(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| InferenceError::Model(format!("Failed to set optimization: {}", e)))?
            .with_intra_threads(1)
            .map_err(|e| InferenceError::Model(format!("Failed to set threads: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| InferenceError::Model(format!("Failed to load model: {}", e)))?;

        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| InferenceError::Model("No output defined".to_string()))?;

        Ok(Self {
            session,
            output_name,
            name: model_path.to_string(),
        })
    }
}

impl FlowModel for OnnxModel {
    fn run(&mut self, input: &Array3<f32>) -> Result<Vec<f32>, InferenceError> {
        let input_tensor = Value::from_array(input.clone())
            .map_err(|e| InferenceError::Model(format!("Tensor error: {}", e)))?;

        let outputs = self
            .session
            .run(ort::inputs![input_tensor])
            .map_err(|e| InferenceError::Model(format!("Inference failed: {}", e)))?;

        let output = outputs
            .get(&self.output_name)
            .ok_or_else(|| InferenceError::Model("No output".to_string()))?;

        let (_, scores) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::Model(format!("Extract error: {}", e)))?;

        if scores.len() != LABEL_COUNT {
            return Err(InferenceError::OutputShape {
                expected: LABEL_COUNT,
                actual: scores.len(),
            });
        }

        Ok(scores.to_vec())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// LOADING
// ============================================================================

/// Run `load` up to `attempts` times with a fixed `backoff` in between.
///
/// Blocks the calling thread; meant for process start only.
pub fn load_with_retry<T, F>(attempts: u32, backoff: Duration, mut load: F) -> Result<T, InferenceError>
where
    F: FnMut(u32) -> Result<T, InferenceError>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;

    loop {
        match load(attempt) {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                log::warn!("Model load attempt {}/{} failed: {} (retrying in {:?})", attempt, attempts, e, backoff);
                std::thread::sleep(backoff);
                attempt += 1;
            }
            Err(e) => {
                log::error!("Model load failed after {} attempts: {}", attempts, e);
                return Err(e);
            }
        }
    }
}

/// Load one ONNX replica per worker, with bounded retries
pub fn load_onnx_replicas(config: &ModelConfig) -> Result<Vec<Box<dyn FlowModel>>, InferenceError> {
    let shape = config.shape();
    let workers = config.workers.max(1);

    log::info!("Loading ONNX model from: {} ({} replicas, input {})", config.model_path, workers, shape);

    load_with_retry(config.load_attempts, config.load_backoff(), |attempt| {
        log::debug!("Model load attempt {}", attempt);
        (0..workers)
            .map(|_| OnnxModel::load(&config.model_path, shape).map(|m| Box::new(m) as Box<dyn FlowModel>))
            .collect()
    })
    .map(|replicas| {
        log::info!("ONNX model loaded successfully");
        replicas
    })
}

/// Index of the highest finite score; ties resolve to the lowest index
pub fn arg_max(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;

    for (i, &score) in scores.iter().enumerate() {
        if !score.is_finite() {
            continue;
        }
        if best.map_or(true, |(_, b)| score > b) {
            best = Some((i, score));
        }
    }

    best.map(|(i, _)| i)
}
