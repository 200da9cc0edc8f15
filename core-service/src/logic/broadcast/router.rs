//! Broadcast Router - process-local topic registry
//!
//! Topic → subscribers. Publishing delivers to a snapshot of the current
//! members, so joins and leaves never wait on a slow delivery.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::subscriber::{Subscriber, SubscriberId};
use super::BroadcastMessage;

/// Outcome of one publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct BroadcastRouter {
    topics: RwLock<HashMap<String, HashMap<SubscriberId, Arc<dyn Subscriber>>>>,
}

impl BroadcastRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the subscriber was already a member
    pub fn join(&self, topic: &str, subscriber: Arc<dyn Subscriber>) -> bool {
        let id = subscriber.id();
        let mut topics = self.topics.write();
        let members = topics.entry(topic.to_string()).or_default();

        if members.contains_key(&id) {
            return false;
        }
        members.insert(id, subscriber);
        log::debug!("Subscriber {} joined {:?} ({} members)", id, topic, members.len());
        true
    }

    /// Returns false if the subscriber was not a member
    pub fn leave(&self, topic: &str, id: SubscriberId) -> bool {
        let mut topics = self.topics.write();
        let Some(members) = topics.get_mut(topic) else {
            return false;
        };

        let removed = members.remove(&id).is_some();
        if members.is_empty() {
            topics.remove(topic);
        }
        if removed {
            log::debug!("Subscriber {} left {:?}", id, topic);
        }
        removed
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.read().get(topic).map_or(0, |m| m.len())
    }

    pub fn is_member(&self, topic: &str, id: SubscriberId) -> bool {
        self.topics
            .read()
            .get(topic)
            .is_some_and(|m| m.contains_key(&id))
    }

    /// Deliver to every current member of `topic`.
    ///
    /// A failed delivery is logged and skipped; it never reaches the caller.
    /// Disconnected subscribers are pruned.
    pub fn publish(&self, topic: &str, message: &BroadcastMessage) -> PublishReport {
        let members: Vec<Arc<dyn Subscriber>> = match self.topics.read().get(topic) {
            Some(members) => members.values().cloned().collect(),
            None => return PublishReport::default(),
        };

        let mut report = PublishReport::default();
        let mut closed = Vec::new();

        for subscriber in members {
            match subscriber.deliver(message) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    log::warn!("Broadcast to {} on {:?} failed: {}", subscriber.id(), topic, e);
                    if e.is_closed() {
                        closed.push(subscriber.id());
                    }
                }
            }
        }

        for id in closed {
            self.leave(topic, id);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::broadcast::subscriber::{ChannelSubscriber, DeliveryError};
    use crate::logic::broadcast::FLOW_UPDATES_TOPIC;
    use crate::logic::confidence::ConfidenceTier;
    use crate::logic::features::TrafficLabel;

    struct FailingSubscriber(SubscriberId);

    impl Subscriber for FailingSubscriber {
        fn id(&self) -> SubscriberId {
            self.0
        }

        fn deliver(&self, _message: &BroadcastMessage) -> Result<(), DeliveryError> {
            Err(DeliveryError::Other("socket write failed".into()))
        }
    }

    fn message(label: TrafficLabel) -> BroadcastMessage {
        BroadcastMessage::flow_update("flow-1", label, ConfidenceTier::High)
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let router = BroadcastRouter::new();
        let report = router.publish(FLOW_UPDATES_TOPIC, &message(TrafficLabel::Chat));
        assert_eq!(report, PublishReport::default());
    }

    #[test]
    fn test_join_and_leave_idempotent() {
        let router = BroadcastRouter::new();
        let (sub, _rx) = ChannelSubscriber::new(4);
        let id = sub.id();

        assert!(router.join(FLOW_UPDATES_TOPIC, sub.clone()));
        assert!(!router.join(FLOW_UPDATES_TOPIC, sub));
        assert_eq!(router.subscriber_count(FLOW_UPDATES_TOPIC), 1);

        assert!(router.leave(FLOW_UPDATES_TOPIC, id));
        assert!(!router.leave(FLOW_UPDATES_TOPIC, id));
        assert!(!router.leave("other topic", id));
        assert_eq!(router.subscriber_count(FLOW_UPDATES_TOPIC), 0);
    }

    #[test]
    fn test_exactly_once_and_no_backlog() {
        let router = BroadcastRouter::new();
        let (early, mut early_rx) = ChannelSubscriber::new(8);
        router.join(FLOW_UPDATES_TOPIC, early.clone());
        // A repeated join must not double deliveries
        router.join(FLOW_UPDATES_TOPIC, early);

        router.publish(FLOW_UPDATES_TOPIC, &message(TrafficLabel::Gaming));

        let (late, mut late_rx) = ChannelSubscriber::new(8);
        router.join(FLOW_UPDATES_TOPIC, late);

        router.publish(FLOW_UPDATES_TOPIC, &message(TrafficLabel::Voip));

        assert_eq!(early_rx.try_recv().unwrap().label, TrafficLabel::Gaming);
        assert_eq!(early_rx.try_recv().unwrap().label, TrafficLabel::Voip);
        assert!(early_rx.try_recv().is_err());

        assert_eq!(late_rx.try_recv().unwrap().label, TrafficLabel::Voip);
        assert!(late_rx.try_recv().is_err());
    }

    #[test]
    fn test_failure_is_isolated() {
        let router = BroadcastRouter::new();
        router.join(FLOW_UPDATES_TOPIC, Arc::new(FailingSubscriber(uuid::Uuid::new_v4())));
        let (healthy, mut rx) = ChannelSubscriber::new(4);
        router.join(FLOW_UPDATES_TOPIC, healthy);

        let report = router.publish(FLOW_UPDATES_TOPIC, &message(TrafficLabel::Streaming));
        assert_eq!(report, PublishReport { delivered: 1, failed: 1 });
        assert_eq!(rx.try_recv().unwrap().label, TrafficLabel::Streaming);
        // Not disconnected, so not pruned
        assert_eq!(router.subscriber_count(FLOW_UPDATES_TOPIC), 2);
    }

    #[test]
    fn test_closed_subscriber_pruned() {
        let router = BroadcastRouter::new();
        let (gone, rx) = ChannelSubscriber::new(4);
        let gone_id = gone.id();
        router.join(FLOW_UPDATES_TOPIC, gone);
        drop(rx);

        let report = router.publish(FLOW_UPDATES_TOPIC, &message(TrafficLabel::Chat));
        assert_eq!(report.failed, 1);
        assert!(!router.is_member(FLOW_UPDATES_TOPIC, gone_id));
    }

    #[test]
    fn test_full_subscriber_kept() {
        let router = BroadcastRouter::new();
        let (slow, _rx) = ChannelSubscriber::new(1);
        let slow_id = slow.id();
        router.join(FLOW_UPDATES_TOPIC, slow);

        router.publish(FLOW_UPDATES_TOPIC, &message(TrafficLabel::Chat));
        let report = router.publish(FLOW_UPDATES_TOPIC, &message(TrafficLabel::Chat));
        assert_eq!(report.failed, 1);
        assert!(router.is_member(FLOW_UPDATES_TOPIC, slow_id));
    }
}
