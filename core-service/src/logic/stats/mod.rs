//! Stats Module - classification counters and latency window
//!
//! Counters and the latency window live in a store shared by every worker
//! process. `snapshot()` reads fields one at a time, so under concurrent
//! writers `total` may briefly differ from the sum of the tier counters.

pub mod sqlite;
pub mod store;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::logic::confidence::{ClassificationResult, ConfidenceTier, FallbackKind};

pub use sqlite::SqliteStore;
pub use store::{Counter, CounterValues, MemoryStore, StatsStore};

// ============================================================================
// ERRORS & CONFIG
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("stats store error: {0}")]
    Store(String),

    #[error("stats store timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub backend: StatsBackend,
    pub sqlite_path: Option<String>,
    /// K: latencies kept in the window
    pub window: usize,
    pub timeout_ms: u64,
    pub busy_timeout_ms: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            backend: StatsBackend::Memory,
            sqlite_path: None,
            window: constants::DEFAULT_LATENCY_WINDOW,
            timeout_ms: constants::DEFAULT_STATS_TIMEOUT_MS,
            busy_timeout_ms: constants::SQLITE_BUSY_TIMEOUT_MS,
        }
    }
}

impl StatsConfig {
    /// SQLite when `FLOWSENSE_STATS_DB` is set, in-process otherwise
    pub fn from_env() -> Self {
        let sqlite_path = constants::get_stats_db();
        Self {
            backend: if sqlite_path.is_some() {
                StatsBackend::Sqlite
            } else {
                StatsBackend::Memory
            },
            sqlite_path,
            window: constants::get_latency_window(),
            ..Default::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Open the configured backend
    pub fn open_store(&self) -> Result<Arc<dyn StatsStore>, StatsError> {
        match self.backend {
            StatsBackend::Memory => Ok(Arc::new(MemoryStore::new())),
            StatsBackend::Sqlite => {
                let path = self
                    .sqlite_path
                    .as_deref()
                    .ok_or_else(|| StatsError::Store("sqlite backend requires sqlite_path".to_string()))?;
                let store = SqliteStore::open(Path::new(path), Duration::from_millis(self.busy_timeout_ms))?;
                Ok(Arc::new(store))
            }
        }
    }
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Stats read model, serialized with the external key names
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub total: u64,
    pub high_confidence: u64,
    pub low_confidence: u64,
    pub multiple_candidates: u64,
    pub uncertain: u64,
    pub dns_detections: u64,
    pub asn_fallback: u64,
    /// Most recent latencies, oldest first
    pub prediction_latencies: Vec<f64>,
}

impl StatsSnapshot {
    fn from_parts(values: &CounterValues, latencies: Vec<f64>) -> Self {
        let get = |c: Counter| values.get(&c).copied().unwrap_or(0);
        Self {
            total: get(Counter::Total),
            high_confidence: get(Counter::High),
            low_confidence: get(Counter::Low),
            multiple_candidates: get(Counter::MultipleCandidates),
            uncertain: get(Counter::Uncertain),
            dns_detections: get(Counter::DnsDetections),
            asn_fallback: get(Counter::AsnFallback),
            prediction_latencies: latencies,
        }
    }

    pub fn tier_sum(&self) -> u64 {
        self.high_confidence + self.low_confidence + self.multiple_candidates + self.uncertain
    }
}

// ============================================================================
// AGGREGATOR
// ============================================================================

/// Front end over a [`StatsStore`]; every call is bounded by a timeout
pub struct StatsAggregator {
    store: Arc<dyn StatsStore>,
    window: usize,
    timeout: Duration,
}

impl StatsAggregator {
    pub fn new(store: Arc<dyn StatsStore>, window: usize, timeout: Duration) -> Self {
        Self {
            store,
            window: window.max(1),
            timeout,
        }
    }

    pub fn from_config(config: &StatsConfig) -> Result<Self, StatsError> {
        let store = config.open_store()?;
        log::info!("Stats aggregator using {} store (window {})", store.name(), config.window);
        Ok(Self::new(store, config.window, config.timeout()))
    }

    /// In-process store with default window and timeout
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryStore::new()),
            constants::DEFAULT_LATENCY_WINDOW,
            Duration::from_millis(constants::DEFAULT_STATS_TIMEOUT_MS),
        )
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn backend_name(&self) -> &str {
        self.store.name()
    }

    /// Count one classification: `total` and the tier counter, as two
    /// independent increments
    pub async fn increment(&self, tier: ConfidenceTier) -> Result<(), StatsError> {
        self.run(move |store| {
            store.increment(Counter::Total)?;
            store.increment(Counter::for_tier(tier))
        })
        .await
    }

    pub async fn record_fallback(&self, kind: FallbackKind) -> Result<(), StatsError> {
        let Some(counter) = Counter::for_fallback(kind) else {
            return Ok(());
        };
        self.run(move |store| store.increment(counter)).await
    }

    pub async fn record_latency(&self, ms: f64) -> Result<(), StatsError> {
        let window = self.window;
        self.run(move |store| store.push_latency(ms, window)).await
    }

    /// Best-effort accounting for one result. Failures are logged and dropped.
    pub async fn record(&self, result: &ClassificationResult) {
        if let Err(e) = self.increment(result.tier).await {
            log::error!("Stats increment dropped: {}", e);
        }
        if let Err(e) = self.record_fallback(result.fallback_used).await {
            log::error!("Stats fallback count dropped: {}", e);
        }
        if let Err(e) = self.record_latency(result.elapsed_ms).await {
            log::error!("Stats latency dropped: {}", e);
        }
    }

    pub async fn snapshot(&self) -> Result<StatsSnapshot, StatsError> {
        let window = self.window;
        self.run(move |store| {
            let values = store.counters()?;
            let latencies = store.latencies(window)?;
            Ok(StatsSnapshot::from_parts(&values, latencies))
        })
        .await
    }

    async fn run<T, F>(&self, op: F) -> Result<T, StatsError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn StatsStore) -> Result<T, StatsError> + Send + 'static,
    {
        let store = self.store.clone();
        let task = tokio::task::spawn_blocking(move || op(store.as_ref()));

        match tokio::time::timeout(self.timeout, task).await {
            Err(_) => Err(StatsError::Timeout(self.timeout)),
            Ok(Err(e)) => Err(StatsError::Store(format!("stats task failed: {}", e))),
            Ok(Ok(result)) => result,
        }
    }
}
