//! Transactional persistence for users, conversations, messages and the seen relation.
//!
//! Services only talk to [`ChatStore`]; `MemoryStore` backs single-node and test
//! deployments, `PostgresStore` backs production.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use crate::models::{
    Conversation, ConversationDetail, MemberPair, Message, MessageWithUsers, User,
};
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    Conflict(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(e: tokio_postgres::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for StoreError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        StoreError::Backend(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of the guarded 1:1 insert
#[derive(Debug, Clone)]
pub enum DirectConversation {
    Created(Conversation),
    /// The pair already had a conversation, possibly inserted concurrently
    Existing(Conversation),
}

impl DirectConversation {
    pub fn into_inner(self) -> Conversation {
        match self {
            DirectConversation::Created(c) | DirectConversation::Existing(c) => c,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewGroup {
    pub name: String,
    pub image: Option<String>,
    /// Deduplicated, creator included
    pub member_ids: Vec<Uuid>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub image: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn insert_user(&self, user: User) -> StoreResult<User>;

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>>;

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    /// Users for `ids`; unknown ids are skipped
    async fn find_users(&self, ids: &[Uuid]) -> StoreResult<Vec<User>>;

    /// Every user except `user_id`, newest account first
    async fn list_users_except(&self, user_id: Uuid) -> StoreResult<Vec<User>>;

    async fn find_conversation(&self, id: Uuid) -> StoreResult<Option<Conversation>>;

    async fn find_direct_conversation(&self, pair: MemberPair)
        -> StoreResult<Option<Conversation>>;

    /// Check-then-insert guarded by the unique pair constraint, as one atomic unit
    async fn create_direct_conversation(&self, pair: MemberPair)
        -> StoreResult<DirectConversation>;

    async fn create_group_conversation(&self, group: NewGroup) -> StoreResult<Conversation>;

    /// Hard delete restricted to members. Returns the number of deleted conversations.
    async fn delete_conversation(&self, id: Uuid, member_id: Uuid) -> StoreResult<u64>;

    /// Conversations containing `user_id`, most recent activity first
    async fn list_conversations_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Conversation>>;

    /// Inserts the message with `seen = {sender}` and bumps `last_message_at` to its
    /// `created_at`, atomically.
    async fn append_message(&self, message: NewMessage) -> StoreResult<(Message, Conversation)>;

    /// Messages ordered by `created_at` ascending
    async fn list_messages(&self, conversation_id: Uuid) -> StoreResult<Vec<Message>>;

    async fn latest_message(&self, conversation_id: Uuid) -> StoreResult<Option<Message>>;

    /// Idempotent add to the seen set
    async fn add_seen(&self, message_id: Uuid, user_id: Uuid) -> StoreResult<Message>;

    /// Attach sender and seen users to each message
    async fn hydrate_messages(&self, messages: Vec<Message>) -> StoreResult<Vec<MessageWithUsers>> {
        let mut ids: Vec<Uuid> = Vec::new();
        for m in &messages {
            ids.push(m.sender_id);
            ids.extend(m.seen_ids.iter().copied());
        }
        ids.sort();
        ids.dedup();

        let users: HashMap<Uuid, User> = self
            .find_users(&ids)
            .await?
            .into_iter()
            .map(|u| (u.id, u))
            .collect();

        messages
            .into_iter()
            .map(|message| {
                let sender = users
                    .get(&message.sender_id)
                    .cloned()
                    .ok_or_else(|| StoreError::NotFound(format!("user {}", message.sender_id)))?;
                let seen = message
                    .seen_ids
                    .iter()
                    .filter_map(|id| users.get(id).cloned())
                    .collect();
                Ok(MessageWithUsers {
                    message,
                    sender,
                    seen,
                })
            })
            .collect()
    }

    /// Conversation with its users, and with its messages when `with_messages` is set
    async fn load_detail(
        &self,
        conversation: Conversation,
        with_messages: bool,
    ) -> StoreResult<ConversationDetail> {
        let users = self.find_users(&conversation.user_ids).await?;
        let messages = if with_messages {
            let rows = self.list_messages(conversation.id).await?;
            self.hydrate_messages(rows).await?
        } else {
            Vec::new()
        };
        Ok(ConversationDetail {
            conversation,
            users,
            messages,
        })
    }
}
