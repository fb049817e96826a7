//! Shared fixture: in-memory store, local fan-out, services wired as the binary does.

#![allow(dead_code)]

use async_trait::async_trait;
use chat_sync_service::{
    config::Config,
    fanout::{Channel, Delivery, LocalTransport},
    models::{Conversation, MemberPair, Message, User},
    state::AppState,
    store::{
        ChatStore, DirectConversation, MemoryStore, NewGroup, NewMessage, StoreError, StoreResult,
    },
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

pub struct TestEnv {
    pub store: Arc<MemoryStore>,
    pub transport: LocalTransport,
    pub state: AppState,
}

impl TestEnv {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::wired(store.clone(), store)
    }

    /// Services run over a [`FlakyStore`]; `store` still sees the same tables
    pub fn with_flaky_reads() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::wired(store.clone(), Arc::new(FlakyStore::new(store)))
    }

    fn wired(store: Arc<MemoryStore>, services_store: Arc<dyn ChatStore>) -> Self {
        let transport = LocalTransport::new();
        let state = AppState::new(
            Config::test_defaults(),
            services_store,
            Arc::new(transport.clone()),
            Arc::new(transport.clone()),
        );
        Self {
            store,
            transport,
            state,
        }
    }

    pub async fn user(&self, email: &str) -> User {
        self.store
            .insert_user(User::new(email, None))
            .await
            .expect("insert user")
    }

    pub async fn listen(&self, channel: Channel) -> UnboundedReceiver<Delivery> {
        let (_, rx) = self.transport.subscribe(&channel).await;
        rx
    }
}

/// Everything already queued on `rx`
pub fn drain(rx: &mut UnboundedReceiver<Delivery>) -> Vec<Delivery> {
    let mut out = Vec::new();
    while let Ok(delivery) = rx.try_recv() {
        out.push(delivery);
    }
    out
}

/// Delegates to a `MemoryStore`, but the first `find_users` after each
/// committed write fails
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    armed: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            armed: AtomicBool::new(false),
        }
    }

    fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChatStore for FlakyStore {
    async fn insert_user(&self, user: User) -> StoreResult<User> {
        self.inner.insert_user(user).await
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        self.inner.find_user(id).await
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.inner.find_user_by_email(email).await
    }

    async fn find_users(&self, ids: &[Uuid]) -> StoreResult<Vec<User>> {
        if self.armed.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Backend("blip".into()));
        }
        self.inner.find_users(ids).await
    }

    async fn list_users_except(&self, user_id: Uuid) -> StoreResult<Vec<User>> {
        self.inner.list_users_except(user_id).await
    }

    async fn find_conversation(&self, id: Uuid) -> StoreResult<Option<Conversation>> {
        self.inner.find_conversation(id).await
    }

    async fn find_direct_conversation(
        &self,
        pair: MemberPair,
    ) -> StoreResult<Option<Conversation>> {
        self.inner.find_direct_conversation(pair).await
    }

    async fn create_direct_conversation(
        &self,
        pair: MemberPair,
    ) -> StoreResult<DirectConversation> {
        let created = self.inner.create_direct_conversation(pair).await?;
        self.arm();
        Ok(created)
    }

    async fn create_group_conversation(&self, group: NewGroup) -> StoreResult<Conversation> {
        let created = self.inner.create_group_conversation(group).await?;
        self.arm();
        Ok(created)
    }

    async fn delete_conversation(&self, id: Uuid, member_id: Uuid) -> StoreResult<u64> {
        let deleted = self.inner.delete_conversation(id, member_id).await?;
        self.arm();
        Ok(deleted)
    }

    async fn list_conversations_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Conversation>> {
        self.inner.list_conversations_for_user(user_id).await
    }

    async fn append_message(&self, message: NewMessage) -> StoreResult<(Message, Conversation)> {
        let appended = self.inner.append_message(message).await?;
        self.arm();
        Ok(appended)
    }

    async fn list_messages(&self, conversation_id: Uuid) -> StoreResult<Vec<Message>> {
        self.inner.list_messages(conversation_id).await
    }

    async fn latest_message(&self, conversation_id: Uuid) -> StoreResult<Option<Message>> {
        self.inner.latest_message(conversation_id).await
    }

    async fn add_seen(&self, message_id: Uuid, user_id: Uuid) -> StoreResult<Message> {
        let updated = self.inner.add_seen(message_id, user_id).await?;
        self.arm();
        Ok(updated)
    }
}
