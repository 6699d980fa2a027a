// Notification channel: durable in-process topic with independent fan-out
// to every registered subscriber.

pub mod subscriber;

pub use subscriber::{LogSubscriber, WebhookSubscriber};

use crate::errors::NotifyError;
use crate::models::NotificationMessage;
use crate::telemetry;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

/// A delivery endpoint registered on a channel
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Stable endpoint identifier (address, URL) used for subscribe and
    /// unsubscribe bookkeeping.
    fn endpoint(&self) -> &str;

    async fn deliver(&self, message: &NotificationMessage) -> Result<(), NotifyError>;
}

/// Publish side of the channel, the only surface the compute function sees
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Publish a message. Returns Ok once the message is durably accepted by
    /// the channel; subscriber delivery is independent and a failed delivery
    /// never surfaces here.
    async fn publish(&self, message: NotificationMessage) -> Result<(), NotifyError>;
}

/// In-process topic. Owns the subscriber set and an accepted-message log;
/// fan-out delivers to every subscriber independently.
pub struct TopicChannel {
    name: String,
    subscribers: RwLock<Vec<Arc<dyn Subscriber>>>,
    accepted: Mutex<Vec<NotificationMessage>>,
}

impl TopicChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subscribers: RwLock::new(Vec::new()),
            accepted: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a subscriber. Effective for messages published after this
    /// call completes; no ordering guarantee against in-flight publishes.
    pub async fn subscribe(&self, subscriber: Arc<dyn Subscriber>) {
        let mut subscribers = self.subscribers.write().await;
        info!(
            channel = %self.name,
            endpoint = %subscriber.endpoint(),
            "Subscriber registered"
        );
        subscribers.push(subscriber);
    }

    /// Remove every subscriber registered under the given endpoint.
    pub async fn unsubscribe(&self, endpoint: &str) -> bool {
        let mut subscribers = self.subscribers.write().await;
        let before = subscribers.len();
        subscribers.retain(|s| s.endpoint() != endpoint);
        let removed = subscribers.len() < before;
        if removed {
            info!(channel = %self.name, endpoint = %endpoint, "Subscriber removed");
        }
        removed
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Messages durably accepted by the channel, oldest first.
    pub async fn accepted_messages(&self) -> Vec<NotificationMessage> {
        self.accepted.lock().await.clone()
    }
}

#[async_trait]
impl NotificationChannel for TopicChannel {
    #[instrument(skip(self, message), fields(channel = %self.name, message_id = %message.id, subject = %message.subject))]
    async fn publish(&self, message: NotificationMessage) -> Result<(), NotifyError> {
        // Accept first: the publisher's success is independent of delivery.
        self.accepted.lock().await.push(message.clone());
        telemetry::record_notification_published(&self.name);

        let subscribers: Vec<Arc<dyn Subscriber>> =
            self.subscribers.read().await.iter().cloned().collect();

        debug!(
            subscriber_count = subscribers.len(),
            "Message accepted, fanning out"
        );

        let deliveries = subscribers.iter().map(|s| {
            let message = &message;
            async move { (s.endpoint().to_string(), s.deliver(message).await) }
        });

        for (endpoint, result) in join_all(deliveries).await {
            match result {
                Ok(()) => {
                    debug!(endpoint = %endpoint, "Delivered notification");
                }
                Err(e) => {
                    // One subscriber failing must not affect the others or
                    // the publisher.
                    telemetry::record_delivery_failure(&self.name, &endpoint);
                    warn!(endpoint = %endpoint, error = %e, "Notification delivery failed");
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingSubscriber {
        endpoint: String,
        delivered: AtomicUsize,
        fail: bool,
    }

    impl RecordingSubscriber {
        fn new(endpoint: &str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                endpoint: endpoint.to_string(),
                delivered: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl Subscriber for RecordingSubscriber {
        fn endpoint(&self) -> &str {
            &self.endpoint
        }

        async fn deliver(&self, _message: &NotificationMessage) -> Result<(), NotifyError> {
            self.delivered.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(NotifyError::DeliveryFailed {
                    endpoint: self.endpoint.clone(),
                    reason: "simulated outage".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let channel = TopicChannel::new("watch_notifications");
        let a = RecordingSubscriber::new("a@example.com", false);
        let b = RecordingSubscriber::new("b@example.com", false);
        channel.subscribe(a.clone()).await;
        channel.subscribe(b.clone()).await;

        channel
            .publish(NotificationMessage::new("subject", "body"))
            .await
            .unwrap();

        assert_eq!(a.delivered.load(Ordering::SeqCst), 1);
        assert_eq!(b.delivered.load(Ordering::SeqCst), 1);
        assert_eq!(channel.accepted_messages().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_delivery_does_not_affect_others_or_publisher() {
        let channel = TopicChannel::new("watch_notifications");
        let failing = RecordingSubscriber::new("down@example.com", true);
        let healthy = RecordingSubscriber::new("up@example.com", false);
        channel.subscribe(failing.clone()).await;
        channel.subscribe(healthy.clone()).await;

        let result = channel
            .publish(NotificationMessage::new("subject", "body"))
            .await;

        assert!(result.is_ok());
        assert_eq!(failing.delivered.load(Ordering::SeqCst), 1);
        assert_eq!(healthy.delivered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_future_deliveries() {
        let channel = TopicChannel::new("watch_notifications");
        let s = RecordingSubscriber::new("a@example.com", false);
        channel.subscribe(s.clone()).await;

        channel
            .publish(NotificationMessage::new("first", "body"))
            .await
            .unwrap();
        assert!(channel.unsubscribe("a@example.com").await);
        channel
            .publish(NotificationMessage::new("second", "body"))
            .await
            .unwrap();

        assert_eq!(s.delivered.load(Ordering::SeqCst), 1);
        assert_eq!(channel.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_endpoint_is_noop() {
        let channel = TopicChannel::new("watch_notifications");
        assert!(!channel.unsubscribe("nobody@example.com").await);
    }

    #[tokio::test]
    async fn test_publish_with_zero_subscribers_still_accepts() {
        let channel = TopicChannel::new("watch_notifications");
        channel
            .publish(NotificationMessage::new("subject", "body"))
            .await
            .unwrap();
        assert_eq!(channel.accepted_messages().await.len(), 1);
    }
}
