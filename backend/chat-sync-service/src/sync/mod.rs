//! Client-side synchronizer: keeps an inbox and the open conversation's message
//! list consistent with fan-out events.
//!
//! Each channel moves `Unsubscribed → Subscribed → Unsubscribed`. Switching
//! conversations, closing one, `shutdown` and drop all release the subscription
//! that was taken.

pub mod view;

pub use view::{InboxView, MessageListView};

use crate::error::AppResult;
use crate::fanout::{Channel, Delivery, EventType, Subscriber, SubscriberId};
use crate::models::{ConversationDetail, ConversationUpdate, MessageWithUsers, User};
use crate::services::MessageService;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribed(SubscriberId),
}

/// Decoded fan-out event
#[derive(Debug, Clone)]
pub enum SyncEvent {
    MessagesNew(MessageWithUsers),
    MessageUpdate(MessageWithUsers),
    ConversationNew(ConversationDetail),
    ConversationUpdate(ConversationUpdate),
    ConversationRemove(ConversationDetail),
}

impl SyncEvent {
    pub fn decode(delivery: &Delivery) -> Result<Self, serde_json::Error> {
        let payload = delivery.payload.clone();
        Ok(match delivery.event {
            EventType::MessagesNew => SyncEvent::MessagesNew(serde_json::from_value(payload)?),
            EventType::MessageUpdate => SyncEvent::MessageUpdate(serde_json::from_value(payload)?),
            EventType::ConversationNew => {
                SyncEvent::ConversationNew(serde_json::from_value(payload)?)
            }
            EventType::ConversationUpdate => {
                SyncEvent::ConversationUpdate(serde_json::from_value(payload)?)
            }
            EventType::ConversationRemove => {
                SyncEvent::ConversationRemove(serde_json::from_value(payload)?)
            }
        })
    }
}

/// Triggers "mark seen" for the open conversation
#[async_trait]
pub trait SeenAcknowledger: Send + Sync {
    async fn acknowledge(&self, conversation_id: Uuid) -> AppResult<()>;
}

/// Acknowledges through the message service as `viewer`
pub struct ServiceAcknowledger {
    messages: MessageService,
    viewer: User,
}

impl ServiceAcknowledger {
    pub fn new(messages: MessageService, viewer: User) -> Self {
        Self { messages, viewer }
    }
}

#[async_trait]
impl SeenAcknowledger for ServiceAcknowledger {
    async fn acknowledge(&self, conversation_id: Uuid) -> AppResult<()> {
        self.messages
            .mark_seen(conversation_id, &self.viewer)
            .await
            .map(|_| ())
    }
}

struct Subscription {
    channel: Channel,
    id: SubscriberId,
    rx: UnboundedReceiver<Delivery>,
}

struct OpenConversation {
    id: Uuid,
    subscription: Subscription,
    messages: MessageListView,
}

pub struct ClientSynchronizer {
    subscriber: Arc<dyn Subscriber>,
    user: User,
    acknowledger: Arc<dyn SeenAcknowledger>,
    personal: Option<Subscription>,
    open: Option<OpenConversation>,
    inbox: InboxView,
}

impl ClientSynchronizer {
    pub fn new(
        subscriber: Arc<dyn Subscriber>,
        user: User,
        acknowledger: Arc<dyn SeenAcknowledger>,
    ) -> Self {
        Self {
            subscriber,
            user,
            acknowledger,
            personal: None,
            open: None,
            inbox: InboxView::default(),
        }
    }

    /// Subscribe the personal channel and seed the inbox
    pub async fn connect(&mut self, inbox: Vec<ConversationDetail>) {
        self.inbox = InboxView::new(inbox);
        if self.personal.is_some() {
            return;
        }
        let Some(channel) = Channel::for_user(&self.user) else {
            tracing::warn!(user_id = %self.user.id, "user has no personal channel");
            return;
        };
        let (id, rx) = self.subscriber.subscribe(&channel).await;
        self.personal = Some(Subscription { channel, id, rx });
    }

    /// Switch to `conversation_id`, releasing the previously open channel first
    pub async fn open_conversation(
        &mut self,
        conversation_id: Uuid,
        initial: Vec<MessageWithUsers>,
    ) {
        if self.open.as_ref().is_some_and(|o| o.id == conversation_id) {
            return;
        }
        self.close_conversation().await;

        let channel = Channel::Conversation(conversation_id);
        let (id, rx) = self.subscriber.subscribe(&channel).await;
        self.open = Some(OpenConversation {
            id: conversation_id,
            subscription: Subscription { channel, id, rx },
            messages: MessageListView::new(initial),
        });
        self.acknowledge(conversation_id).await;
    }

    pub async fn close_conversation(&mut self) {
        if let Some(open) = self.open.take() {
            self.subscriber
                .unsubscribe(&open.subscription.channel, open.subscription.id)
                .await;
        }
    }

    /// Release every subscription
    pub async fn shutdown(&mut self) {
        self.close_conversation().await;
        if let Some(personal) = self.personal.take() {
            self.subscriber.unsubscribe(&personal.channel, personal.id).await;
        }
    }

    pub fn state(&self, channel: &Channel) -> SubscriptionState {
        let held = self
            .personal
            .iter()
            .chain(self.open.as_ref().map(|o| &o.subscription))
            .find(|s| &s.channel == channel);
        match held {
            Some(s) => SubscriptionState::Subscribed(s.id),
            None => SubscriptionState::Unsubscribed,
        }
    }

    pub fn inbox(&self) -> &InboxView {
        &self.inbox
    }

    pub fn open_conversation_id(&self) -> Option<Uuid> {
        self.open.as_ref().map(|o| o.id)
    }

    pub fn messages(&self) -> Option<&MessageListView> {
        self.open.as_ref().map(|o| &o.messages)
    }

    async fn acknowledge(&self, conversation_id: Uuid) {
        if let Err(e) = self.acknowledger.acknowledge(conversation_id).await {
            tracing::warn!(conversation_id = %conversation_id, error = %e, "seen acknowledgement failed");
        }
    }

    /// Apply one delivery. Events for channels no longer held are dropped.
    pub async fn handle(&mut self, delivery: Delivery) {
        let event = match SyncEvent::decode(&delivery) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(channel = %delivery.channel, event = %delivery.event, error = %e, "undecodable event");
                return;
            }
        };

        let on_personal = self
            .personal
            .as_ref()
            .is_some_and(|s| s.channel.name() == delivery.channel);
        let on_open = self
            .open
            .as_ref()
            .is_some_and(|o| o.subscription.channel.name() == delivery.channel);

        match event {
            SyncEvent::MessagesNew(message) if on_open => {
                let mut conversation_id = None;
                if let Some(open) = self.open.as_mut() {
                    open.messages.insert(message);
                    conversation_id = Some(open.id);
                }
                // Redeliveries also acknowledge; mark_seen is idempotent
                if let Some(id) = conversation_id {
                    self.acknowledge(id).await;
                }
            }
            SyncEvent::MessageUpdate(message) if on_open => {
                if let Some(open) = self.open.as_mut() {
                    open.messages.replace(message);
                }
            }
            SyncEvent::ConversationNew(conversation) if on_personal => {
                self.inbox.prepend(conversation);
            }
            SyncEvent::ConversationUpdate(update) if on_personal => {
                self.inbox.apply_update(update);
            }
            SyncEvent::ConversationRemove(conversation) if on_personal => {
                let id = conversation.id();
                self.inbox.remove(id);
                if self.open_conversation_id() == Some(id) {
                    tracing::debug!(conversation_id = %id, "open conversation removed");
                    self.close_conversation().await;
                }
            }
            _ => {
                tracing::debug!(channel = %delivery.channel, event = %delivery.event, "event ignored");
            }
        }
    }

    /// Handle everything already queued on held channels; returns how many were applied
    pub async fn drain(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let next = self
                .personal
                .as_mut()
                .and_then(|s| s.rx.try_recv().ok())
                .or_else(|| {
                    self.open
                        .as_mut()
                        .and_then(|o| o.subscription.rx.try_recv().ok())
                });
            match next {
                Some(delivery) => {
                    self.handle(delivery).await;
                    handled += 1;
                }
                None => return handled,
            }
        }
    }

    /// Wait for the next delivery on any held channel and apply it. `false` once
    /// nothing is subscribed.
    pub async fn next(&mut self) -> bool {
        let delivery = match (self.personal.as_mut(), self.open.as_mut()) {
            (None, None) => return false,
            (Some(p), None) => p.rx.recv().await,
            (None, Some(o)) => o.subscription.rx.recv().await,
            (Some(p), Some(o)) => tokio::select! {
                d = p.rx.recv() => d,
                d = o.subscription.rx.recv() => d,
            },
        };
        match delivery {
            Some(delivery) => {
                self.handle(delivery).await;
                true
            }
            None => false,
        }
    }
}

impl Drop for ClientSynchronizer {
    fn drop(&mut self) {
        let held: Vec<(Channel, SubscriberId)> = self
            .personal
            .take()
            .into_iter()
            .chain(self.open.take().map(|o| o.subscription))
            .map(|s| (s.channel, s.id))
            .collect();
        if held.is_empty() {
            return;
        }
        // Closed receivers are pruned on the next broadcast anyway
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let subscriber = self.subscriber.clone();
            handle.spawn(async move {
                for (channel, id) in held {
                    subscriber.unsubscribe(&channel, id).await;
                }
            });
        }
    }
}
