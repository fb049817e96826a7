use super::{Channel, EventType, Subscriber, Transport, TransportError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use uuid::Uuid;

/// Identifies one subscription so it can be removed precisely
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// One event as received by a subscriber
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub channel: String,
    pub event: EventType,
    pub payload: Value,
}

struct Listener {
    id: SubscriberId,
    sender: UnboundedSender<Delivery>,
}

/// In-process channel registry. Serves single-node deployments and tests.
#[derive(Default, Clone)]
pub struct LocalTransport {
    // channel name -> subscribers
    inner: Arc<RwLock<HashMap<String, Vec<Listener>>>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, channel: &Channel) -> (SubscriberId, UnboundedReceiver<Delivery>) {
        let (tx, rx) = unbounded_channel();
        let subscriber_id = SubscriberId::new();
        let name = channel.name();

        let mut guard = self.inner.write().await;
        let subscribers = guard.entry(name.clone()).or_default();
        subscribers.push(Listener {
            id: subscriber_id,
            sender: tx,
        });

        tracing::debug!(
            subscriber = ?subscriber_id,
            channel = %name,
            total = subscribers.len(),
            "subscribed"
        );

        (subscriber_id, rx)
    }

    /// Remove one subscriber; empty channel entries are dropped
    pub async fn unsubscribe(&self, channel: &Channel, subscriber_id: SubscriberId) {
        let name = channel.name();
        let mut guard = self.inner.write().await;

        if let Some(subscribers) = guard.get_mut(&name) {
            subscribers.retain(|s| s.id != subscriber_id);
            tracing::debug!(
                subscriber = ?subscriber_id,
                channel = %name,
                remaining = subscribers.len(),
                "unsubscribed"
            );
            if subscribers.is_empty() {
                guard.remove(&name);
            }
        }
    }

    pub async fn subscriber_count(&self, channel: &Channel) -> usize {
        self.inner
            .read()
            .await
            .get(&channel.name())
            .map(|v| v.len())
            .unwrap_or(0)
    }

    /// Deliver to every live subscriber of `delivery.channel`, pruning closed
    /// receivers. Returns the number of subscribers reached.
    pub async fn deliver(&self, delivery: Delivery) -> usize {
        let mut guard = self.inner.write().await;
        let Some(subscribers) = guard.get_mut(&delivery.channel) else {
            return 0;
        };

        let before = subscribers.len();
        subscribers.retain(|s| s.sender.send(delivery.clone()).is_ok());
        let after = subscribers.len();
        if before != after {
            tracing::debug!(
                channel = %delivery.channel,
                pruned = before - after,
                active = after,
                "dropped closed subscribers"
            );
        }
        if subscribers.is_empty() {
            guard.remove(&delivery.channel);
        }
        after
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn trigger(
        &self,
        channel: &Channel,
        event: EventType,
        payload: &Value,
    ) -> Result<(), TransportError> {
        // No subscribers is a successful publish: nobody is listening
        self.deliver(Delivery {
            channel: channel.name(),
            event,
            payload: payload.clone(),
        })
        .await;
        Ok(())
    }
}

#[async_trait]
impl Subscriber for LocalTransport {
    async fn subscribe(&self, channel: &Channel) -> (SubscriberId, UnboundedReceiver<Delivery>) {
        LocalTransport::subscribe(self, channel).await
    }

    async fn unsubscribe(&self, channel: &Channel, subscriber_id: SubscriberId) {
        LocalTransport::unsubscribe(self, channel, subscriber_id).await
    }
}
