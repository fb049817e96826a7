use crate::error::{AppError, AppResult};
use crate::fanout::{EventType, Publisher};
use crate::models::{ConversationDetail, MemberPair, User};
use crate::store::{ChatStore, DirectConversation, NewGroup, StoreError};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct ConversationService {
    store: Arc<dyn ChatStore>,
    publisher: Publisher,
}

impl ConversationService {
    pub fn new(store: Arc<dyn ChatStore>, publisher: Publisher) -> Self {
        Self { store, publisher }
    }

    /// Fan `detail` out to its members' personal channels
    async fn announce(&self, event: EventType, detail: &ConversationDetail) {
        let publisher = self.publisher.clone();
        let detail = detail.clone();
        self.publisher
            .dispatch(async move {
                publisher
                    .publish_to_members(&detail.users, event, &detail)
                    .await;
            })
            .await;
    }

    /// Open the 1:1 conversation between `current` and `other_user_id`, creating it
    /// on first contact. Only a fresh record is announced.
    pub async fn find_or_create_direct(
        &self,
        current: &User,
        other_user_id: Uuid,
    ) -> AppResult<ConversationDetail> {
        let pair = MemberPair::new(current.id, other_user_id).ok_or_else(|| {
            AppError::Validation("cannot start a conversation with yourself".into())
        })?;

        let other = self
            .store
            .find_user(other_user_id)
            .await?
            .ok_or(AppError::NotFound)?;

        if let Some(existing) = self.store.find_direct_conversation(pair).await? {
            return Ok(self.store.load_detail(existing, true).await?);
        }

        match self.store.create_direct_conversation(pair).await? {
            DirectConversation::Existing(existing) => {
                tracing::debug!(conversation_id = %existing.id, "direct conversation resolved to concurrent insert");
                Ok(self.store.load_detail(existing, true).await?)
            }
            DirectConversation::Created(created) => {
                // No re-read after the commit: both members are already loaded
                let detail = ConversationDetail::fresh(created, &[current.clone(), other]);
                tracing::info!(
                    conversation_id = %detail.id(),
                    initiator = %current.id,
                    "direct conversation created"
                );
                self.announce(EventType::ConversationNew, &detail).await;
                Ok(detail)
            }
        }
    }

    pub async fn create_group(
        &self,
        current: &User,
        member_ids: &[Uuid],
        name: &str,
        image: Option<String>,
    ) -> AppResult<ConversationDetail> {
        if member_ids.is_empty() {
            return Err(AppError::Validation("a group needs members".into()));
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("a group needs a name".into()));
        }

        let mut members = vec![current.id];
        for id in member_ids {
            if !members.contains(id) {
                members.push(*id);
            }
        }

        let known = self.store.find_users(&members).await?;
        if known.len() != members.len() {
            return Err(AppError::Validation("unknown group member".into()));
        }

        let created = self
            .store
            .create_group_conversation(NewGroup {
                name: name.to_string(),
                image: image.filter(|i| !i.trim().is_empty()),
                member_ids: members,
            })
            .await
            .map_err(|e| match e {
                // A member vanished between the check and the insert
                StoreError::NotFound(_) => AppError::Validation("unknown group member".into()),
                other => other.into(),
            })?;

        let detail = ConversationDetail::fresh(created, &known);
        tracing::info!(
            conversation_id = %detail.id(),
            members = detail.users.len(),
            "group conversation created"
        );
        self.announce(EventType::ConversationNew, &detail).await;
        Ok(detail)
    }

    /// Conversation with its members. Membership of the requester is not checked.
    pub async fn get_by_id(
        &self,
        conversation_id: Uuid,
        _requesting_user: &User,
    ) -> AppResult<ConversationDetail> {
        let conversation = self
            .store
            .find_conversation(conversation_id)
            .await?
            .ok_or(AppError::NotFound)?;
        Ok(self.store.load_detail(conversation, false).await?)
    }

    /// Delete a conversation the requester belongs to. Returns the number of deleted
    /// conversations; `conversation:remove` goes out only when it is non-zero.
    pub async fn delete(&self, conversation_id: Uuid, requesting_user: &User) -> AppResult<u64> {
        let conversation = self
            .store
            .find_conversation(conversation_id)
            .await?
            .ok_or(AppError::NotFound)?;
        let snapshot = self.store.load_detail(conversation, false).await?;

        let deleted = self
            .store
            .delete_conversation(conversation_id, requesting_user.id)
            .await?;

        if deleted == 0 {
            tracing::info!(
                conversation_id = %conversation_id,
                user_id = %requesting_user.id,
                "delete by non-member ignored"
            );
            return Ok(0);
        }

        tracing::info!(conversation_id = %conversation_id, "conversation deleted");
        self.announce(EventType::ConversationRemove, &snapshot).await;
        Ok(deleted)
    }

    /// Inbox: every conversation of `user`, most recent activity first
    pub async fn list_for_user(&self, user: &User) -> AppResult<Vec<ConversationDetail>> {
        let conversations = self.store.list_conversations_for_user(user.id).await?;
        let mut details = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            details.push(self.store.load_detail(conversation, true).await?);
        }
        Ok(details)
    }
}
