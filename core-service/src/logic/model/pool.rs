//! Classification Engine - dedicated inference worker pool
//!
//! Inference is CPU bound, so it never runs on the async runtime. Each
//! worker is a plain OS thread owning one model replica; jobs arrive over
//! a bounded MPMC queue and results return through a oneshot channel.
//!
//! A job that exceeds the timeout is not cancelled. The worker finishes it
//! and the late result is discarded.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::inference::{arg_max, FlowModel, InferenceError, ModelConfig};
use crate::logic::features::{FlowSample, SampleShape, TrafficLabel, LABEL_COUNT};

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// Raw engine output for one flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inference {
    pub label: TrafficLabel,
    pub confidence: Vec<f32>,
    pub elapsed_ms: f64,
}

/// Engine status for the status endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub model_name: String,
    pub input_shape: SampleShape,
    pub workers: usize,
    pub queued: usize,
    pub in_flight: usize,
    pub inference_count: u64,
    pub timeouts: u64,
    pub avg_latency_ms: f64,
}

struct Job {
    tensor: Array3<f32>,
    reply: oneshot::Sender<Result<Vec<f32>, InferenceError>>,
}

#[derive(Default)]
struct Counters {
    in_flight: AtomicUsize,
    inference_count: AtomicU64,
    latency_sum_us: AtomicU64,
    timeouts: AtomicU64,
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct ClassificationEngine {
    shape: SampleShape,
    timeout: Duration,
    workers: usize,
    model_name: String,
    jobs: Sender<Job>,
    counters: Arc<Counters>,
}

impl ClassificationEngine {
    /// Spawn one worker thread per replica
    pub fn start(models: Vec<Box<dyn FlowModel>>, config: &ModelConfig) -> Result<Self, InferenceError> {
        if models.is_empty() {
            return Err(InferenceError::Model("no model replicas supplied".to_string()));
        }

        let (jobs, queue) = crossbeam_channel::bounded::<Job>(config.queue_depth.max(1));
        let counters = Arc::new(Counters::default());
        let workers = models.len();
        let model_name = models[0].name().to_string();

        for (id, model) in models.into_iter().enumerate() {
            let queue = queue.clone();
            let counters = counters.clone();
            thread::Builder::new()
                .name(format!("inference-{}", id))
                .spawn(move || worker_loop(id, model, queue, counters))
                .map_err(|e| InferenceError::Model(format!("Failed to spawn worker: {}", e)))?;
        }

        log::info!(
            "Classification engine started: {} workers, queue {}, timeout {:?}",
            workers,
            config.queue_depth,
            config.timeout()
        );

        Ok(Self {
            shape: config.shape(),
            timeout: config.timeout(),
            workers,
            model_name,
            jobs,
            counters,
        })
    }

    pub fn shape(&self) -> SampleShape {
        self.shape
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Reshape and normalize a sample, without touching the model
    pub fn prepare(&self, sample: &FlowSample) -> Result<Array3<f32>, InferenceError> {
        Ok(sample.to_tensor(self.shape)?)
    }

    /// Classify one flow sample
    pub async fn infer(&self, sample: &FlowSample) -> Result<Inference, InferenceError> {
        let tensor = self.prepare(sample)?;
        self.infer_tensor(tensor).await
    }

    /// Run a prepared tensor on the worker pool, bounded by the engine timeout
    pub async fn infer_tensor(&self, tensor: Array3<f32>) -> Result<Inference, InferenceError> {
        let started = Instant::now();
        let (reply, result) = oneshot::channel();

        self.jobs.try_send(Job { tensor, reply }).map_err(|e| match e {
            TrySendError::Full(_) => InferenceError::Saturated,
            TrySendError::Disconnected(_) => InferenceError::WorkerGone,
        })?;

        let scores = match tokio::time::timeout(self.timeout, result).await {
            Err(_) => {
                self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                return Err(InferenceError::Timeout(self.timeout));
            }
            Ok(Err(_)) => return Err(InferenceError::WorkerGone),
            Ok(Ok(scores)) => scores?,
        };

        if scores.len() != LABEL_COUNT {
            return Err(InferenceError::OutputShape {
                expected: LABEL_COUNT,
                actual: scores.len(),
            });
        }

        let label = arg_max(&scores)
            .and_then(TrafficLabel::from_index)
            .ok_or_else(|| InferenceError::Model("no finite scores in output".to_string()))?;

        Ok(Inference {
            label,
            confidence: scores,
            elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }

    pub fn status(&self) -> EngineStatus {
        let count = self.counters.inference_count.load(Ordering::Relaxed);
        let sum = self.counters.latency_sum_us.load(Ordering::Relaxed);

        EngineStatus {
            model_name: self.model_name.clone(),
            input_shape: self.shape,
            workers: self.workers,
            queued: self.jobs.len(),
            in_flight: self.counters.in_flight.load(Ordering::Relaxed),
            inference_count: count,
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            avg_latency_ms: if count > 0 { (sum as f64 / count as f64) / 1000.0 } else { 0.0 },
        }
    }
}

fn worker_loop(id: usize, mut model: Box<dyn FlowModel>, queue: Receiver<Job>, counters: Arc<Counters>) {
    log::debug!("Inference worker {} started", id);

    // Ends once the engine (the only sender) is dropped
    for job in queue.iter() {
        if job.reply.is_closed() {
            continue;
        }

        counters.in_flight.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        let result = panic::catch_unwind(AssertUnwindSafe(|| model.run(&job.tensor)))
            .unwrap_or_else(|_| Err(InferenceError::Model(format!("worker {} panicked during inference", id))));

        counters.in_flight.fetch_sub(1, Ordering::Relaxed);
        if result.is_ok() {
            counters.inference_count.fetch_add(1, Ordering::Relaxed);
            counters
                .latency_sum_us
                .fetch_add(started.elapsed().as_micros() as u64, Ordering::Relaxed);
        }

        if job.reply.send(result).is_err() {
            log::debug!("Inference worker {}: caller gone, result discarded", id);
        }
    }

    log::debug!("Inference worker {} stopped", id);
}
