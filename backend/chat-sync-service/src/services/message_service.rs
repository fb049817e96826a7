use crate::error::{AppError, AppResult};
use crate::fanout::{Channel, EventType, Publisher};
use crate::models::{ConversationDetail, ConversationUpdate, Message, MessageWithUsers, User};
use crate::store::{ChatStore, NewMessage};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Result of acknowledging the latest message of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "data", rename_all = "snake_case")]
pub enum SeenOutcome {
    /// The viewer was added to the latest message's seen set
    Marked(MessageWithUsers),
    /// The viewer had already seen the latest message; nothing was persisted
    AlreadySeen(ConversationDetail),
    /// The conversation has no messages yet
    Empty(ConversationDetail),
}

#[derive(Clone)]
pub struct MessageService {
    store: Arc<dyn ChatStore>,
    publisher: Publisher,
}

impl MessageService {
    pub fn new(store: Arc<dyn ChatStore>, publisher: Publisher) -> Self {
        Self { store, publisher }
    }

    async fn hydrate_one(&self, message: Message) -> AppResult<MessageWithUsers> {
        self.store
            .hydrate_messages(vec![message])
            .await?
            .pop()
            .ok_or(AppError::Internal)
    }

    pub async fn append(
        &self,
        conversation_id: Uuid,
        sender: &User,
        content: &str,
        image: Option<String>,
    ) -> AppResult<MessageWithUsers> {
        let image = image.filter(|i| !i.trim().is_empty());
        if !Message::has_body(content, image.as_deref()) {
            return Err(AppError::Validation(
                "message needs content or an image".into(),
            ));
        }

        let (message, conversation) = self
            .store
            .append_message(NewMessage {
                conversation_id,
                sender_id: sender.id,
                content: content.to_string(),
                image,
            })
            .await?;

        // A fresh message is seen by its sender only
        let message = MessageWithUsers {
            message,
            sender: sender.clone(),
            seen: vec![sender.clone()],
        };
        tracing::debug!(
            conversation_id = %conversation_id,
            message_id = %message.id(),
            "message appended"
        );

        let publisher = self.publisher.clone();
        let store = self.store.clone();
        let published = message.clone();
        self.publisher
            .dispatch(async move {
                publisher
                    .publish(
                        &Channel::Conversation(conversation_id),
                        EventType::MessagesNew,
                        &published,
                    )
                    .await;

                let members = match store.find_users(&conversation.user_ids).await {
                    Ok(members) => members,
                    Err(e) => {
                        tracing::warn!(
                            conversation_id = %conversation_id,
                            error = %e,
                            "member lookup failed, inbox updates skipped"
                        );
                        return;
                    }
                };
                let update = ConversationUpdate {
                    id: conversation_id,
                    messages: vec![published],
                };
                publisher
                    .publish_to_members(&members, EventType::ConversationUpdate, &update)
                    .await;
            })
            .await;

        Ok(message)
    }

    /// Mark the latest message as seen by `viewer` ("read up to latest")
    pub async fn mark_seen(&self, conversation_id: Uuid, viewer: &User) -> AppResult<SeenOutcome> {
        let conversation = self
            .store
            .find_conversation(conversation_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let Some(latest) = self.store.latest_message(conversation_id).await? else {
            let detail = self.store.load_detail(conversation, true).await?;
            return Ok(SeenOutcome::Empty(detail));
        };
        let latest = self.hydrate_one(latest).await?;

        if latest.message.is_seen_by(viewer.id) {
            self.announce_seen(conversation_id, viewer, latest, false).await;
            let detail = self.store.load_detail(conversation, true).await?;
            return Ok(SeenOutcome::AlreadySeen(detail));
        }

        let updated = self.store.add_seen(latest.id(), viewer.id).await?;
        let message = match self.hydrate_one(updated.clone()).await {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %e,
                    "seen users reload failed, using loaded users"
                );
                let mut known = latest.seen;
                known.push(viewer.clone());
                let seen = updated
                    .seen_ids
                    .iter()
                    .filter_map(|id| known.iter().find(|u| u.id == *id).cloned())
                    .collect();
                MessageWithUsers {
                    message: updated,
                    sender: latest.sender,
                    seen,
                }
            }
        };
        tracing::debug!(
            conversation_id = %conversation_id,
            message_id = %message.id(),
            viewer = %viewer.id,
            "message marked seen"
        );

        self.announce_seen(conversation_id, viewer, message.clone(), true).await;
        Ok(SeenOutcome::Marked(message))
    }

    /// `conversation:update` to the viewer, plus `message:update` to the
    /// conversation when the seen set changed
    async fn announce_seen(
        &self,
        conversation_id: Uuid,
        viewer: &User,
        message: MessageWithUsers,
        changed: bool,
    ) {
        let publisher = self.publisher.clone();
        let viewer_channel = Channel::for_user(viewer);
        self.publisher
            .dispatch(async move {
                if let Some(channel) = &viewer_channel {
                    let update = ConversationUpdate {
                        id: conversation_id,
                        messages: vec![message.clone()],
                    };
                    publisher
                        .publish(channel, EventType::ConversationUpdate, &update)
                        .await;
                }
                if changed {
                    publisher
                        .publish(
                            &Channel::Conversation(conversation_id),
                            EventType::MessageUpdate,
                            &message,
                        )
                        .await;
                }
            })
            .await;
    }

    /// Full history, oldest first
    pub async fn list_messages(
        &self,
        conversation_id: Uuid,
        _requesting_user: &User,
    ) -> AppResult<Vec<MessageWithUsers>> {
        if self.store.find_conversation(conversation_id).await?.is_none() {
            return Err(AppError::NotFound);
        }
        let messages = self.store.list_messages(conversation_id).await?;
        Ok(self.store.hydrate_messages(messages).await?)
    }
}
