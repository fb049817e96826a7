//! In-process store. One `RwLock` guards every table, so each mutating call is a
//! single atomic unit; `direct_index` plays the role of the unique pair constraint.

use super::{ChatStore, DirectConversation, NewGroup, NewMessage, StoreError, StoreResult};
use crate::models::{Conversation, MemberPair, Message, User};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    conversations: HashMap<Uuid, Conversation>,
    direct_index: HashMap<MemberPair, Uuid>,
    messages: HashMap<Uuid, Message>,
    // conversation_id -> message ids in append order
    timeline: HashMap<Uuid, Vec<Uuid>>,
}

impl Tables {
    fn require_users(&self, ids: &[Uuid]) -> StoreResult<()> {
        match ids.iter().find(|id| !self.users.contains_key(id)) {
            Some(missing) => Err(StoreError::NotFound(format!("user {missing}"))),
            None => Ok(()),
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored conversations (for debugging/tests)
    pub async fn conversation_count(&self) -> usize {
        self.inner.read().await.conversations.len()
    }

    pub async fn message_count(&self, conversation_id: Uuid) -> usize {
        self.inner
            .read()
            .await
            .timeline
            .get(&conversation_id)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn insert_user(&self, user: User) -> StoreResult<User> {
        let mut guard = self.inner.write().await;
        if guard.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict(format!("email {} taken", user.email)));
        }
        guard.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let guard = self.inner.read().await;
        Ok(guard.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_users(&self, ids: &[Uuid]) -> StoreResult<Vec<User>> {
        let guard = self.inner.read().await;
        Ok(ids.iter().filter_map(|id| guard.users.get(id).cloned()).collect())
    }

    async fn list_users_except(&self, user_id: Uuid) -> StoreResult<Vec<User>> {
        let guard = self.inner.read().await;
        let mut users: Vec<User> = guard
            .users
            .values()
            .filter(|u| u.id != user_id)
            .cloned()
            .collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(users)
    }

    async fn find_conversation(&self, id: Uuid) -> StoreResult<Option<Conversation>> {
        Ok(self.inner.read().await.conversations.get(&id).cloned())
    }

    async fn find_direct_conversation(
        &self,
        pair: MemberPair,
    ) -> StoreResult<Option<Conversation>> {
        let guard = self.inner.read().await;
        Ok(guard
            .direct_index
            .get(&pair)
            .and_then(|id| guard.conversations.get(id))
            .cloned())
    }

    async fn create_direct_conversation(
        &self,
        pair: MemberPair,
    ) -> StoreResult<DirectConversation> {
        let mut guard = self.inner.write().await;
        if let Some(existing) = guard
            .direct_index
            .get(&pair)
            .and_then(|id| guard.conversations.get(id))
        {
            return Ok(DirectConversation::Existing(existing.clone()));
        }
        guard.require_users(&pair.members())?;

        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            is_group: false,
            name: None,
            image: None,
            last_message_at: now,
            created_at: now,
            user_ids: pair.members().to_vec(),
        };
        guard.direct_index.insert(pair, conversation.id);
        guard
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(DirectConversation::Created(conversation))
    }

    async fn create_group_conversation(&self, group: NewGroup) -> StoreResult<Conversation> {
        let mut guard = self.inner.write().await;
        guard.require_users(&group.member_ids)?;

        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            is_group: true,
            name: Some(group.name),
            image: group.image,
            last_message_at: now,
            created_at: now,
            user_ids: group.member_ids,
        };
        guard
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn delete_conversation(&self, id: Uuid, member_id: Uuid) -> StoreResult<u64> {
        let mut guard = self.inner.write().await;
        let is_member = guard
            .conversations
            .get(&id)
            .is_some_and(|c| c.has_member(member_id));
        if !is_member {
            return Ok(0);
        }

        if let Some(conversation) = guard.conversations.remove(&id) {
            if let Some(pair) = conversation.direct_pair() {
                guard.direct_index.remove(&pair);
            }
        }
        let message_ids = guard.timeline.remove(&id).unwrap_or_default();
        for message_id in message_ids {
            guard.messages.remove(&message_id);
        }
        Ok(1)
    }

    async fn list_conversations_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Conversation>> {
        let guard = self.inner.read().await;
        let mut conversations: Vec<Conversation> = guard
            .conversations
            .values()
            .filter(|c| c.has_member(user_id))
            .cloned()
            .collect();
        conversations.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        Ok(conversations)
    }

    async fn append_message(&self, new: NewMessage) -> StoreResult<(Message, Conversation)> {
        let mut guard = self.inner.write().await;
        guard.require_users(&[new.sender_id])?;
        let Some(mut conversation) = guard.conversations.get(&new.conversation_id).cloned() else {
            return Err(StoreError::NotFound(format!(
                "conversation {}",
                new.conversation_id
            )));
        };

        // Never move recency backwards, so append order and created_at order agree.
        let created_at = Utc::now().max(conversation.last_message_at);
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: new.conversation_id,
            sender_id: new.sender_id,
            content: new.content,
            image: new.image,
            created_at,
            seen_ids: vec![new.sender_id],
        };
        conversation.last_message_at = created_at;

        guard.messages.insert(message.id, message.clone());
        guard
            .timeline
            .entry(conversation.id)
            .or_default()
            .push(message.id);
        guard
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok((message, conversation))
    }

    async fn list_messages(&self, conversation_id: Uuid) -> StoreResult<Vec<Message>> {
        let guard = self.inner.read().await;
        Ok(guard
            .timeline
            .get(&conversation_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| guard.messages.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn latest_message(&self, conversation_id: Uuid) -> StoreResult<Option<Message>> {
        let guard = self.inner.read().await;
        Ok(guard
            .timeline
            .get(&conversation_id)
            .and_then(|ids| ids.last())
            .and_then(|id| guard.messages.get(id))
            .cloned())
    }

    async fn add_seen(&self, message_id: Uuid, user_id: Uuid) -> StoreResult<Message> {
        let mut guard = self.inner.write().await;
        guard.require_users(&[user_id])?;
        let message = guard
            .messages
            .get_mut(&message_id)
            .ok_or_else(|| StoreError::NotFound(format!("message {message_id}")))?;
        if !message.seen_ids.contains(&user_id) {
            message.seen_ids.push(user_id);
        }
        Ok(message.clone())
    }
}
