//! Central Configuration Constants
//!
//! Single source of truth for all pipeline defaults.
//! Every default can be overridden through the matching environment variable.

use std::time::Duration;

// ============================================
// Model
// ============================================

/// Default ONNX model location
pub const DEFAULT_MODEL_PATH: &str = "models/flow_classifier.onnx";

/// Packets per flow sample (tensor rows)
pub const DEFAULT_PACKETS: usize = 20;

/// Bytes per packet (tensor columns)
pub const DEFAULT_BYTES: usize = 256;

/// Inference worker threads (one model replica each)
pub const DEFAULT_INFERENCE_WORKERS: usize = 2;

/// Pending inference jobs before the pool reports saturation
pub const DEFAULT_INFERENCE_QUEUE: usize = 256;

/// Inference timeout (ms)
pub const DEFAULT_INFERENCE_TIMEOUT_MS: u64 = 2_000;

/// Model load attempts before startup is aborted
pub const DEFAULT_MODEL_LOAD_ATTEMPTS: u32 = 3;

/// Fixed backoff between model load attempts (ms)
pub const DEFAULT_MODEL_LOAD_BACKOFF_MS: u64 = 2_000;

// ============================================
// Confidence tiers
// ============================================

/// Top-1 probability at or above which a result is High
pub const DEFAULT_HIGH_THRESHOLD: f32 = 0.85;

/// Top-1 probability below which a result is Uncertain
pub const DEFAULT_LOW_THRESHOLD: f32 = 0.60;

/// Top-1/top-2 gap below which a result has MultipleCandidates
pub const DEFAULT_CANDIDATE_MARGIN: f32 = 0.10;

// ============================================
// Fallback
// ============================================

/// Timeout for each DNS / ASN lookup (ms)
pub const DEFAULT_FALLBACK_TIMEOUT_MS: u64 = 250;

/// Max entries in the observed DNS cache
pub const DEFAULT_DNS_CACHE_CAPACITY: usize = 65_536;

/// TTL of observed DNS answers (seconds)
pub const DEFAULT_DNS_CACHE_TTL_SECS: u64 = 600;

// ============================================
// Stats
// ============================================

/// Latency window size (K)
pub const DEFAULT_LATENCY_WINDOW: usize = 100;

/// Timeout for each stats store write (ms)
pub const DEFAULT_STATS_TIMEOUT_MS: u64 = 500;

/// SQLite busy timeout for shared stores (ms)
pub const SQLITE_BUSY_TIMEOUT_MS: u64 = 250;

// ============================================
// Broadcast
// ============================================

/// Per-subscriber buffered messages before deliveries start failing
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

/// Shared bus poll interval (ms)
pub const DEFAULT_BUS_POLL_MS: u64 = 100;

/// Outbox rows kept behind the newest one
pub const DEFAULT_BUS_RETENTION: i64 = 1_000;

/// Timeout for a single bus append (ms)
pub const DEFAULT_BUS_TIMEOUT_MS: u64 = 500;

// ============================================
// Helper functions to read from env with fallback
// ============================================

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Get model path from environment or use default
pub fn get_model_path() -> String {
    std::env::var("FLOWSENSE_MODEL_PATH")
        .unwrap_or_else(|_| DEFAULT_MODEL_PATH.to_string())
}

/// Get inference worker count from environment or use default
pub fn get_inference_workers() -> usize {
    env_parse("FLOWSENSE_INFERENCE_WORKERS", DEFAULT_INFERENCE_WORKERS).max(1)
}

/// Get inference timeout from environment or use default
pub fn get_inference_timeout() -> Duration {
    Duration::from_millis(env_parse("FLOWSENSE_INFERENCE_TIMEOUT_MS", DEFAULT_INFERENCE_TIMEOUT_MS))
}

/// Get latency window size from environment or use default
pub fn get_latency_window() -> usize {
    env_parse("FLOWSENSE_LATENCY_WINDOW", DEFAULT_LATENCY_WINDOW).max(1)
}

/// Get shared stats database path, if configured
pub fn get_stats_db() -> Option<String> {
    std::env::var("FLOWSENSE_STATS_DB").ok().filter(|s| !s.is_empty())
}

/// Get shared broadcast bus database path, if configured
pub fn get_bus_db() -> Option<String> {
    std::env::var("FLOWSENSE_BUS_DB").ok().filter(|s| !s.is_empty())
}

/// Get ASN prefix table path, if configured
pub fn get_asn_table() -> Option<String> {
    std::env::var("FLOWSENSE_ASN_TABLE").ok().filter(|s| !s.is_empty())
}

/// Get confidence thresholds (high, low, margin) from environment or use defaults
pub fn get_thresholds() -> (f32, f32, f32) {
    (
        env_parse("FLOWSENSE_HIGH_THRESHOLD", DEFAULT_HIGH_THRESHOLD),
        env_parse("FLOWSENSE_LOW_THRESHOLD", DEFAULT_LOW_THRESHOLD),
        env_parse("FLOWSENSE_CANDIDATE_MARGIN", DEFAULT_CANDIDATE_MARGIN),
    )
}
