//! Post-commit event fan-out.
//!
//! Publishing is best-effort: a failed or slow trigger is logged and counted, and
//! the committed write it describes stands regardless. A detached publisher runs
//! the publishes on their own task so the request never waits on the transport.

pub mod local;
pub mod redis;

pub use self::local::{Delivery, LocalTransport, SubscriberId};
pub use self::redis::{RedisRelay, RedisTransport};

use crate::metrics;
use crate::models::User;
use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    ConversationNew,
    ConversationUpdate,
    ConversationRemove,
    MessagesNew,
    MessageUpdate,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ConversationNew => "conversation:new",
            EventType::ConversationUpdate => "conversation:update",
            EventType::ConversationRemove => "conversation:remove",
            EventType::MessagesNew => "messages:new",
            EventType::MessageUpdate => "message:update",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conversation:new" => Ok(EventType::ConversationNew),
            "conversation:update" => Ok(EventType::ConversationUpdate),
            "conversation:remove" => Ok(EventType::ConversationRemove),
            "messages:new" => Ok(EventType::MessagesNew),
            "message:update" => Ok(EventType::MessageUpdate),
            other => Err(TransportError::UnknownEvent(other.to_string())),
        }
    }
}

/// Named fan-out channel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Per-user channel keyed by email
    Personal(String),
    /// Per-conversation channel keyed by conversation id
    Conversation(Uuid),
}

impl Channel {
    pub fn name(&self) -> String {
        match self {
            Channel::Personal(email) => email.clone(),
            Channel::Conversation(id) => id.to_string(),
        }
    }

    pub fn for_user(user: &User) -> Option<Self> {
        user.channel_key().map(|k| Channel::Personal(k.to_string()))
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("payload encoding failed: {0}")]
    Encode(String),

    #[error("unknown event type: {0}")]
    UnknownEvent(String),
}

impl From<::redis::RedisError> for TransportError {
    fn from(e: ::redis::RedisError) -> Self {
        TransportError::Unavailable(e.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        TransportError::Encode(e.to_string())
    }
}

/// Server-side half of the pub/sub primitive
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn trigger(
        &self,
        channel: &Channel,
        event: EventType,
        payload: &Value,
    ) -> Result<(), TransportError>;
}

/// Client-facing half: channel subscriptions yielding [`Delivery`] values.
/// Every `subscribe` must be paired with an `unsubscribe` of the returned id.
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn subscribe(&self, channel: &Channel) -> (SubscriberId, UnboundedReceiver<Delivery>);

    async fn unsubscribe(&self, channel: &Channel, subscriber_id: SubscriberId);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Delivered,
    Failed,
    TimedOut,
}

impl PublishOutcome {
    fn label(&self) -> &'static str {
        match self {
            PublishOutcome::Delivered => "delivered",
            PublishOutcome::Failed => "failed",
            PublishOutcome::TimedOut => "timeout",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: usize,
    pub failed: usize,
    /// Members with no personal channel
    pub skipped: usize,
}

#[derive(Clone)]
pub struct Publisher {
    transport: Arc<dyn Transport>,
    timeout: Duration,
    detached: bool,
}

impl Publisher {
    /// Inline publisher: `dispatch` awaits the publishes
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self {
            transport,
            timeout,
            detached: false,
        }
    }

    pub fn detached(mut self, detached: bool) -> Self {
        self.detached = detached;
        self
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    /// Run post-commit fan-out work. Detached work is spawned and the caller
    /// returns immediately; inline work completes before this returns.
    pub async fn dispatch<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.detached {
            tokio::spawn(work);
        } else {
            work.await;
        }
    }

    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        channel: &Channel,
        event: EventType,
        payload: &T,
    ) -> PublishOutcome {
        let payload = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(event = %event, channel = %channel, error = %e, "fan-out payload encoding failed");
                metrics::record_fanout(event.as_str(), PublishOutcome::Failed.label());
                return PublishOutcome::Failed;
            }
        };
        self.publish_value(channel, event, &payload).await
    }

    async fn publish_value(&self, channel: &Channel, event: EventType, payload: &Value) -> PublishOutcome {
        let outcome = match tokio::time::timeout(
            self.timeout,
            self.transport.trigger(channel, event, payload),
        )
        .await
        {
            Ok(Ok(())) => PublishOutcome::Delivered,
            Ok(Err(e)) => {
                tracing::warn!(event = %event, channel = %channel, error = %e, "fan-out trigger failed");
                PublishOutcome::Failed
            }
            Err(_) => {
                tracing::warn!(
                    event = %event,
                    channel = %channel,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "fan-out trigger timed out"
                );
                PublishOutcome::TimedOut
            }
        };
        metrics::record_fanout(event.as_str(), outcome.label());
        outcome
    }

    /// One independent publish per member's personal channel
    pub async fn publish_to_members<T: Serialize + ?Sized>(
        &self,
        users: &[User],
        event: EventType,
        payload: &T,
    ) -> FanoutReport {
        let mut report = FanoutReport::default();
        let payload = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(event = %event, error = %e, "fan-out payload encoding failed");
                report.failed = users.len();
                return report;
            }
        };

        let channels: Vec<Channel> = users.iter().filter_map(Channel::for_user).collect();
        report.skipped = users.len() - channels.len();

        let outcomes = join_all(
            channels
                .iter()
                .map(|channel| self.publish_value(channel, event, &payload)),
        )
        .await;

        for outcome in outcomes {
            match outcome {
                PublishOutcome::Delivered => report.delivered += 1,
                PublishOutcome::Failed | PublishOutcome::TimedOut => report.failed += 1,
            }
        }

        tracing::debug!(
            event = %event,
            delivered = report.delivered,
            failed = report.failed,
            skipped = report.skipped,
            "fan-out to members complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::*;

    fn user(email: &str) -> User {
        User::new(email, None)
    }

    #[test]
    fn event_names_round_trip() {
        for event in [
            EventType::ConversationNew,
            EventType::ConversationUpdate,
            EventType::ConversationRemove,
            EventType::MessagesNew,
            EventType::MessageUpdate,
        ] {
            assert_eq!(event.as_str().parse::<EventType>().unwrap(), event);
        }
        assert!("message:delete".parse::<EventType>().is_err());
    }

    #[tokio::test]
    async fn one_failing_recipient_does_not_block_the_rest() {
        let mut transport = MockTransport::new();
        transport
            .expect_trigger()
            .withf(|channel, _, _| channel.name() == "bad@example.com")
            .times(1)
            .returning(|_, _, _| Err(TransportError::Unavailable("reset".into())));
        transport
            .expect_trigger()
            .withf(|channel, _, _| channel.name() != "bad@example.com")
            .times(2)
            .returning(|_, _, _| Ok(()));

        let publisher = Publisher::new(Arc::new(transport), Duration::from_secs(1));
        let users = vec![
            user("ana@example.com"),
            user("bad@example.com"),
            user("bo@example.com"),
            user("   "),
        ];

        let report = publisher
            .publish_to_members(&users, EventType::ConversationNew, &serde_json::json!({}))
            .await;

        assert_eq!(
            report,
            FanoutReport {
                delivered: 2,
                failed: 1,
                skipped: 1
            }
        );
    }

    #[tokio::test]
    async fn publish_reports_failure_without_erroring() {
        let mut transport = MockTransport::new();
        transport
            .expect_trigger()
            .with(
                eq(Channel::Conversation(Uuid::nil())),
                eq(EventType::MessagesNew),
                always(),
            )
            .times(1)
            .returning(|_, _, _| Err(TransportError::Unavailable("down".into())));

        let publisher = Publisher::new(Arc::new(transport), Duration::from_secs(1));
        let outcome = publisher
            .publish(
                &Channel::Conversation(Uuid::nil()),
                EventType::MessagesNew,
                &serde_json::json!({"id": 1}),
            )
            .await;

        assert_eq!(outcome, PublishOutcome::Failed);
    }

    struct StalledTransport;

    #[async_trait]
    impl Transport for StalledTransport {
        async fn trigger(&self, _: &Channel, _: EventType, _: &Value) -> Result<(), TransportError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn detached_dispatch_does_not_wait_for_the_transport() {
        let publisher =
            Publisher::new(Arc::new(StalledTransport), Duration::from_secs(30)).detached(true);
        let worker = publisher.clone();

        let started = std::time::Instant::now();
        publisher
            .dispatch(async move {
                worker
                    .publish(
                        &Channel::Personal("ana@example.com".into()),
                        EventType::ConversationNew,
                        &serde_json::json!({}),
                    )
                    .await;
            })
            .await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn slow_transport_is_bounded_by_timeout() {
        let publisher = Publisher::new(Arc::new(StalledTransport), Duration::from_millis(50));
        let outcome = publisher
            .publish(
                &Channel::Personal("ana@example.com".into()),
                EventType::ConversationUpdate,
                &serde_json::json!({}),
            )
            .await;
        assert_eq!(outcome, PublishOutcome::TimedOut);
    }
}
