//! A topic based publish/subscribe registry.
//!
//! Subscribers register an inbox under a topic name with [`TopicBroker::subscribe`] and receive
//! every message [published](TopicBroker::publish) to that topic while they are registered.
//! There is no buffering beyond the inbox itself, no durability and no replay: a message published
//! to a topic without subscribers is gone.
//!
//! # Delivery
//!
//! Every inbox is a channel with a single slot. [`TopicBroker::publish`] hands the message to all
//! current subscribers concurrently, and each hand-off gives up after the configured delivery
//! timeout. A subscriber that stopped reading its inbox can therefore never hold up delivery to
//! the other subscribers, and holds up the publisher for at most one delivery timeout.

use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures::future;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use uuid::Uuid;

/// Identifies a single subscription within its topic.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// The topic does not exist, or the id is not (or no longer) registered on it.
    #[error("subscription {id} not found on topic `{topic}`")]
    SubscriptionNotFound { topic: String, id: SubscriptionId },
}

/// A registered subscriber, returned from [`TopicBroker::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    pub topic: String,
    pub id: SubscriptionId,
    /// Receives published messages. Yields `None` once the subscription was removed.
    pub inbox: mpsc::Receiver<String>,
}

type Subscribers = HashMap<SubscriptionId, mpsc::Sender<String>>;

#[derive(Debug)]
pub struct TopicBroker {
    topics: RwLock<HashMap<String, Subscribers>>,
    delivery_timeout: Duration,
}

impl TopicBroker {
    pub fn new(delivery_timeout: Duration) -> Self {
        Self {
            topics: Default::default(),
            delivery_timeout,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Subscribers>> {
        self.topics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Subscribers>> {
        self.topics.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new subscriber on `topic`, creating the topic if needed.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let (sender, inbox) = mpsc::channel(1);
        let id = SubscriptionId::new();

        self.write()
            .entry(topic.to_owned())
            .or_default()
            .insert(id, sender);

        Subscription {
            topic: topic.to_owned(),
            id,
            inbox,
        }
    }

    /// Delivers `message` to every subscriber currently registered on `topic`.
    ///
    /// Returns the number of subscribers the message was handed to. Delivery order is
    /// unspecified. See the [module level docs](self) for the delivery guarantees.
    pub async fn publish(&self, topic: &str, message: &str) -> usize {
        let senders: Vec<_> = {
            let topics = self.read();
            match topics.get(topic) {
                Some(subscribers) => subscribers.values().cloned().collect(),
                None => Vec::new(),
            }
        };

        if senders.is_empty() {
            tracing::trace!(topic, "No subscribers, dropping message");
            return 0;
        }

        let deliveries = senders
            .iter()
            .map(|sender| sender.send_timeout(message.to_owned(), self.delivery_timeout));
        let results = future::join_all(deliveries).await;

        let mut delivered = 0;
        let mut timed_out: i64 = 0;
        for result in results {
            match result {
                Ok(()) => delivered += 1,
                Err(SendTimeoutError::Timeout(_)) => timed_out += 1,
                // the subscriber went away while we were publishing
                Err(SendTimeoutError::Closed(_)) => {}
            }
        }

        if timed_out > 0 {
            tracing::warn!(topic, timed_out, "Subscribers did not accept message in time");
            metric!(counter("broker.delivery_timeout") += timed_out);
        }
        metric!(counter("broker.delivered") += delivered as i64);

        delivered
    }

    /// Removes a subscriber, closing its inbox.
    pub fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> Result<(), BrokerError> {
        let not_found = || BrokerError::SubscriptionNotFound {
            topic: topic.to_owned(),
            id,
        };

        let mut topics = self.write();
        let subscribers = topics.get_mut(topic).ok_or_else(not_found)?;
        subscribers.remove(&id).ok_or_else(not_found)?;
        if subscribers.is_empty() {
            topics.remove(topic);
        }

        Ok(())
    }

    /// Removes all subscribers of `topic`, closing their inboxes.
    ///
    /// Returns the number of removed subscribers.
    pub fn close(&self, topic: &str) -> usize {
        self.write()
            .remove(topic)
            .map_or(0, |subscribers| subscribers.len())
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.read().get(topic).map_or(0, |subscribers| subscribers.len())
    }

    pub fn topic_count(&self) -> usize {
        self.read().len()
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;

    fn broker() -> TopicBroker {
        TopicBroker::new(Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_publish_to_all_subscribers() {
        let broker = broker();
        let mut first = broker.subscribe("k");
        let mut second = broker.subscribe("k");
        let mut other = broker.subscribe("other");
        assert_ne!(first.id, second.id);
        assert_eq!(broker.subscriber_count("k"), 2);

        assert_eq!(broker.publish("k", "v").await, 2);
        assert_eq!(first.inbox.recv().await.as_deref(), Some("v"));
        assert_eq!(second.inbox.recv().await.as_deref(), Some("v"));
        assert!(other.inbox.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_without_subscribers() {
        let broker = broker();
        let start = Instant::now();

        assert_eq!(broker.publish("nobody", "v").await, 0);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(broker.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let broker = broker();
        let mut subscription = broker.subscribe("k");

        broker.unsubscribe("k", subscription.id).unwrap();
        assert_eq!(subscription.inbox.recv().await, None);
        assert_eq!(broker.topic_count(), 0);

        let err = broker.unsubscribe("k", subscription.id).unwrap_err();
        assert_eq!(
            err,
            BrokerError::SubscriptionNotFound {
                topic: "k".into(),
                id: subscription.id,
            }
        );
    }

    #[tokio::test]
    async fn test_id_is_scoped_to_topic() {
        let broker = broker();
        let subscription = broker.subscribe("k");
        let _other = broker.subscribe("other");

        assert!(broker.unsubscribe("other", subscription.id).is_err());
        assert_eq!(broker.subscriber_count("k"), 1);
        assert_eq!(broker.subscriber_count("other"), 1);

        broker.unsubscribe("k", subscription.id).unwrap();
        assert_eq!(broker.topic_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_subscriber_does_not_block_others() {
        let broker = broker();
        let mut stuck = broker.subscribe("k");
        let mut responsive = broker.subscribe("k");

        // fill the stuck subscriber's single slot
        assert_eq!(broker.publish("k", "first").await, 2);
        assert_eq!(responsive.inbox.recv().await.as_deref(), Some("first"));

        let start = Instant::now();
        let (delivered, received) =
            tokio::join!(broker.publish("k", "second"), async {
                let message = responsive.inbox.recv().await;
                (message, start.elapsed())
            });

        let (message, waited) = received;
        assert_eq!(message.as_deref(), Some("second"));
        assert!(waited < Duration::from_secs(1));

        // publishing gave up on the stuck subscriber after the delivery timeout
        assert_eq!(delivered, 1);
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert_eq!(stuck.inbox.recv().await.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_close_wakes_subscribers() {
        let broker = broker();
        let mut first = broker.subscribe("k");
        let mut second = broker.subscribe("k");

        assert_eq!(broker.close("k"), 2);
        assert_eq!(first.inbox.recv().await, None);
        assert_eq!(second.inbox.recv().await, None);
        assert!(broker.unsubscribe("k", first.id).is_err());
        assert_eq!(broker.close("k"), 0);
    }
}
