use super::User;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message row. Immutable once created except for `seen_ids`, which only grows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub seen_ids: Vec<Uuid>,
}

impl Message {
    /// A message needs text or an attached image
    pub fn has_body(content: &str, image: Option<&str>) -> bool {
        !content.trim().is_empty() || image.is_some_and(|i| !i.trim().is_empty())
    }

    pub fn is_seen_by(&self, user_id: Uuid) -> bool {
        self.seen_ids.contains(&user_id)
    }
}

/// Message with its sender and seen users eagerly loaded (the `messages:new` payload)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageWithUsers {
    #[serde(flatten)]
    pub message: Message,
    pub sender: User,
    pub seen: Vec<User>,
}

impl MessageWithUsers {
    pub fn id(&self) -> Uuid {
        self.message.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.message.created_at
    }

    pub fn is_seen_by_email(&self, email: &str) -> bool {
        self.seen.iter().any(|u| u.email == email)
    }

    /// Names of the users who saw the message, excluding the sender
    pub fn seen_list(&self) -> Vec<String> {
        self.seen
            .iter()
            .filter(|u| u.id != self.sender.id)
            .map(|u| u.name.clone().unwrap_or_else(|| u.email.clone()))
            .collect()
    }
}
