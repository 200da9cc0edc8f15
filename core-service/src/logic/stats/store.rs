//! Stats Store - counter / latency backends
//!
//! Every mutation is a single atomic operation of the backing store.
//! Nothing here does read-modify-write in application code.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::StatsError;
use crate::logic::confidence::{ConfidenceTier, FallbackKind};

// ============================================================================
// COUNTERS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    Total,
    High,
    Low,
    MultipleCandidates,
    Uncertain,
    DnsDetections,
    AsnFallback,
}

impl Counter {
    pub const ALL: [Counter; 7] = [
        Counter::Total,
        Counter::High,
        Counter::Low,
        Counter::MultipleCandidates,
        Counter::Uncertain,
        Counter::DnsDetections,
        Counter::AsnFallback,
    ];

    /// Key in the shared store
    pub fn key(&self) -> &'static str {
        match self {
            Counter::Total => "total",
            Counter::High => "high",
            Counter::Low => "low",
            Counter::MultipleCandidates => "multiple_candidates",
            Counter::Uncertain => "uncertain",
            Counter::DnsDetections => "dns_detections",
            Counter::AsnFallback => "asn_fallback",
        }
    }

    pub fn from_key(key: &str) -> Option<Counter> {
        Counter::ALL.into_iter().find(|c| c.key() == key)
    }

    pub fn for_tier(tier: ConfidenceTier) -> Counter {
        match tier {
            ConfidenceTier::High => Counter::High,
            ConfidenceTier::Low => Counter::Low,
            ConfidenceTier::MultipleCandidates => Counter::MultipleCandidates,
            ConfidenceTier::Uncertain => Counter::Uncertain,
        }
    }

    pub fn for_fallback(kind: FallbackKind) -> Option<Counter> {
        match kind {
            FallbackKind::None => None,
            FallbackKind::Dns => Some(Counter::DnsDetections),
            FallbackKind::Asn => Some(Counter::AsnFallback),
        }
    }

    fn slot(&self) -> usize {
        *self as usize
    }
}

/// Counter values as read from the store; missing keys read as 0
pub type CounterValues = HashMap<Counter, u64>;

// ============================================================================
// STORE CAPABILITY
// ============================================================================

/// Backend shared by every worker.
///
/// Blocking by contract; the aggregator calls it off the async runtime.
pub trait StatsStore: Send + Sync {
    /// Atomically add one to `counter`
    fn increment(&self, counter: Counter) -> Result<(), StatsError>;

    /// Append a latency and evict the oldest entries beyond `capacity`
    fn push_latency(&self, ms: f64, capacity: usize) -> Result<(), StatsError>;

    fn counters(&self) -> Result<CounterValues, StatsError>;

    /// At most `limit` latencies, oldest first
    fn latencies(&self, limit: usize) -> Result<Vec<f64>, StatsError>;

    fn name(&self) -> &str;
}

// ============================================================================
// IN-PROCESS STORE
// ============================================================================

/// Single-process store: atomics plus a locked ring buffer.
///
/// Only correct when one process serves all traffic.
#[derive(Default)]
pub struct MemoryStore {
    counters: [AtomicU64; 7],
    latencies: Mutex<VecDeque<f64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatsStore for MemoryStore {
    fn increment(&self, counter: Counter) -> Result<(), StatsError> {
        self.counters[counter.slot()].fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn push_latency(&self, ms: f64, capacity: usize) -> Result<(), StatsError> {
        let mut window = self.latencies.lock();
        window.push_back(ms);
        while window.len() > capacity {
            window.pop_front();
        }
        Ok(())
    }

    fn counters(&self) -> Result<CounterValues, StatsError> {
        Ok(Counter::ALL
            .into_iter()
            .map(|c| (c, self.counters[c.slot()].load(Ordering::Relaxed)))
            .collect())
    }

    fn latencies(&self, limit: usize) -> Result<Vec<f64>, StatsError> {
        let window = self.latencies.lock();
        let skip = window.len().saturating_sub(limit);
        Ok(window.iter().skip(skip).copied().collect())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
