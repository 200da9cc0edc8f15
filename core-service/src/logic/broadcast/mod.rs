//! Broadcast Module - live fan-out of classification results
//!
//! At-most-once, no backlog. A subscriber only sees what is published
//! while it is joined.
//!
//! ## Structure
//! - `subscriber`: Subscriber capability + bounded channel handle
//! - `router`: Process-local topic registry
//! - `bus`: SQLite outbox + relay for multi-process deployments

pub mod bus;
pub mod router;
pub mod subscriber;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::constants;
use crate::logic::confidence::{ClassificationResult, ConfidenceTier, FallbackKind};
use crate::logic::features::TrafficLabel;

pub use bus::{spawn_relay, BusError, OutboxBatch, SqliteBus};
pub use router::{BroadcastRouter, PublishReport};
pub use subscriber::{ChannelSubscriber, DeliveryError, Subscriber, SubscriberId};

/// The one topic classification results go to
pub const FLOW_UPDATES_TOPIC: &str = "flow updates";

// ============================================================================
// MESSAGE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastMessage {
    pub topic: String,
    pub label: TrafficLabel,
    pub flow_id: String,
    pub tier: ConfidenceTier,
    #[serde(default)]
    pub fallback_used: FallbackKind,
    pub timestamp: DateTime<Utc>,
}

impl BroadcastMessage {
    pub fn flow_update(flow_id: &str, label: TrafficLabel, tier: ConfidenceTier) -> Self {
        Self {
            topic: FLOW_UPDATES_TOPIC.to_string(),
            label,
            flow_id: flow_id.to_string(),
            tier,
            fallback_used: FallbackKind::None,
            timestamp: Utc::now(),
        }
    }

    pub fn from_result(flow_id: &str, result: &ClassificationResult) -> Self {
        Self {
            fallback_used: result.fallback_used,
            ..Self::flow_update(flow_id, result.label, result.tier)
        }
    }
}

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Messages buffered per subscriber before deliveries to it fail
    pub subscriber_buffer: usize,
    /// Shared bus file; process-local delivery when unset
    pub bus_path: Option<String>,
    pub poll_ms: u64,
    pub retention: i64,
    pub timeout_ms: u64,
    pub busy_timeout_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: constants::DEFAULT_SUBSCRIBER_BUFFER,
            bus_path: None,
            poll_ms: constants::DEFAULT_BUS_POLL_MS,
            retention: constants::DEFAULT_BUS_RETENTION,
            timeout_ms: constants::DEFAULT_BUS_TIMEOUT_MS,
            busy_timeout_ms: constants::SQLITE_BUSY_TIMEOUT_MS,
        }
    }
}

impl BroadcastConfig {
    pub fn from_env() -> Self {
        Self {
            bus_path: constants::get_bus_db(),
            ..Default::default()
        }
    }
}

// ============================================================================
// BROADCASTER
// ============================================================================

/// Publish side used by the pipeline.
///
/// With a bus, messages go through the outbox and every process (this one
/// included) delivers them from its relay. Without one, they go straight
/// to the local router.
pub struct Broadcaster {
    router: Arc<BroadcastRouter>,
    bus: Option<Arc<SqliteBus>>,
    relay: Option<JoinHandle<()>>,
    timeout: Duration,
}

impl Broadcaster {
    pub fn local(router: Arc<BroadcastRouter>) -> Self {
        Self {
            router,
            bus: None,
            relay: None,
            timeout: Duration::from_millis(constants::DEFAULT_BUS_TIMEOUT_MS),
        }
    }

    /// Must be called inside a tokio runtime when a bus is configured
    pub fn from_config(config: &BroadcastConfig, router: Arc<BroadcastRouter>) -> Result<Self, BusError> {
        let Some(path) = &config.bus_path else {
            return Ok(Self::local(router));
        };

        let bus = Arc::new(SqliteBus::open(
            Path::new(path),
            Duration::from_millis(config.busy_timeout_ms),
            config.retention,
        )?);
        let relay = spawn_relay(bus.clone(), router.clone(), Duration::from_millis(config.poll_ms))?;

        Ok(Self {
            router,
            bus: Some(bus),
            relay: Some(relay),
            timeout: Duration::from_millis(config.timeout_ms),
        })
    }

    pub fn router(&self) -> &Arc<BroadcastRouter> {
        &self.router
    }

    pub fn is_shared(&self) -> bool {
        self.bus.is_some()
    }

    /// Never fails.
    ///
    /// A rejected append is delivered locally instead. A timed out append
    /// may still land and reach every relay, so that message is not
    /// delivered locally; at worst it is lost.
    pub async fn publish(&self, message: BroadcastMessage) {
        let Some(bus) = &self.bus else {
            self.router.publish(&message.topic, &message);
            return;
        };

        let bus = bus.clone();
        let outgoing = message.clone();
        let append = tokio::task::spawn_blocking(move || bus.append(&outgoing));

        match tokio::time::timeout(self.timeout, append).await {
            Ok(Ok(Ok(_))) => {}
            Ok(Ok(Err(e))) => {
                log::error!("Broadcast bus append failed, delivering locally only: {}", e);
                self.router.publish(&message.topic, &message);
            }
            Ok(Err(e)) => {
                log::error!("Broadcast bus append for flow {} dropped: {}", message.flow_id, BusError::Task(e.to_string()));
            }
            Err(_) => {
                log::error!(
                    "Broadcast bus append for flow {} dropped: {}",
                    message.flow_id,
                    BusError::Timeout(self.timeout)
                );
            }
        }
    }
}

impl Drop for Broadcaster {
    fn drop(&mut self) {
        if let Some(relay) = self.relay.take() {
            relay.abort();
        }
    }
}
