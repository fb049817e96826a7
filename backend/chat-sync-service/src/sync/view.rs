use crate::models::{ConversationDetail, ConversationUpdate, MessageWithUsers};
use uuid::Uuid;

/// Messages of the open conversation, kept in `created_at` order
#[derive(Debug, Default, Clone)]
pub struct MessageListView {
    items: Vec<MessageWithUsers>,
}

impl MessageListView {
    pub fn new(initial: Vec<MessageWithUsers>) -> Self {
        let mut view = Self::default();
        for message in initial {
            view.insert(message);
        }
        view
    }

    /// Returns false for a redelivered message
    pub fn insert(&mut self, message: MessageWithUsers) -> bool {
        if self.items.iter().any(|m| m.id() == message.id()) {
            return false;
        }
        let at = self
            .items
            .partition_point(|m| m.created_at() <= message.created_at());
        self.items.insert(at, message);
        true
    }

    pub fn replace(&mut self, message: MessageWithUsers) -> bool {
        match self.items.iter_mut().find(|m| m.id() == message.id()) {
            Some(slot) => {
                *slot = message;
                true
            }
            None => false,
        }
    }

    pub fn items(&self) -> &[MessageWithUsers] {
        &self.items
    }

    pub fn last(&self) -> Option<&MessageWithUsers> {
        self.items.last()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Conversation list of the signed-in user, newest first
#[derive(Debug, Default, Clone)]
pub struct InboxView {
    items: Vec<ConversationDetail>,
}

impl InboxView {
    pub fn new(initial: Vec<ConversationDetail>) -> Self {
        Self { items: initial }
    }

    fn position(&self, id: Uuid) -> Option<usize> {
        self.items.iter().position(|c| c.id() == id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.position(id).is_some()
    }

    pub fn prepend(&mut self, conversation: ConversationDetail) -> bool {
        if self.contains(conversation.id()) {
            return false;
        }
        self.items.insert(0, conversation);
        true
    }

    pub fn apply_update(&mut self, update: ConversationUpdate) -> bool {
        match self.position(update.id) {
            Some(i) => {
                self.items[i].messages = update.messages;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: Uuid) -> Option<ConversationDetail> {
        self.position(id).map(|i| self.items.remove(i))
    }

    pub fn items(&self) -> &[ConversationDetail] {
        &self.items
    }

    pub fn get(&self, id: Uuid) -> Option<&ConversationDetail> {
        self.position(id).map(|i| &self.items[i])
    }
}
