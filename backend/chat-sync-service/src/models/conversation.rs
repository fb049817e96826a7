use super::{MessageWithUsers, User};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub is_group: bool,
    pub name: Option<String>,
    pub image: Option<String>,
    pub last_message_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub user_ids: Vec<Uuid>,
}

impl Conversation {
    pub fn has_member(&self, user_id: Uuid) -> bool {
        self.user_ids.contains(&user_id)
    }

    /// Canonical member pair of a 1:1 conversation
    pub fn direct_pair(&self) -> Option<MemberPair> {
        match (self.is_group, self.user_ids.as_slice()) {
            (false, [a, b]) => MemberPair::new(*a, *b),
            _ => None,
        }
    }
}

/// Unordered pair of distinct users, stored low/high so that `{A,B}` and `{B,A}`
/// produce the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberPair {
    low: Uuid,
    high: Uuid,
}

impl MemberPair {
    /// Returns `None` for a self-pair; a direct conversation has exactly two members.
    pub fn new(a: Uuid, b: Uuid) -> Option<Self> {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Some(Self { low: a, high: b }),
            std::cmp::Ordering::Greater => Some(Self { low: b, high: a }),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn low(&self) -> Uuid {
        self.low
    }

    pub fn high(&self) -> Uuid {
        self.high
    }

    pub fn members(&self) -> [Uuid; 2] {
        [self.low, self.high]
    }
}

/// Conversation with members and messages eagerly loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationDetail {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub users: Vec<User>,
    #[serde(default)]
    pub messages: Vec<MessageWithUsers>,
}

impl ConversationDetail {
    /// A just-created conversation: members taken from `known` in `user_ids`
    /// order, no messages
    pub fn fresh(conversation: Conversation, known: &[User]) -> Self {
        let users = conversation
            .user_ids
            .iter()
            .filter_map(|id| known.iter().find(|u| u.id == *id).cloned())
            .collect();
        Self {
            conversation,
            users,
            messages: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.conversation.id
    }

    pub fn last_message(&self) -> Option<&MessageWithUsers> {
        self.messages.last()
    }

    /// The member that is not `viewer`; the display partner of a 1:1 conversation
    pub fn other_user(&self, viewer: Uuid) -> Option<&User> {
        self.users.iter().find(|u| u.id != viewer)
    }

    /// Inbox row summary as seen by `viewer`
    pub fn preview_for(&self, viewer: &User) -> ConversationPreview {
        let last = self.last_message();
        let text = match last {
            Some(m) if m.message.image.is_some() => "Sent an image".to_string(),
            Some(m) if !m.message.content.is_empty() => m.message.content.clone(),
            _ => "Started a conversation".to_string(),
        };
        ConversationPreview {
            conversation_id: self.id(),
            text,
            last_message_at: last.map(|m| m.created_at()),
            has_seen: last.is_some_and(|m| m.is_seen_by_email(&viewer.email)),
        }
    }
}

/// Payload of `conversation:update`: the conversation id and its single newest message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationUpdate {
    pub id: Uuid,
    pub messages: Vec<MessageWithUsers>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationPreview {
    pub conversation_id: Uuid,
    pub text: String,
    pub last_message_at: Option<DateTime<Utc>>,
    pub has_seen: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Message;

    #[test]
    fn member_pair_is_order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(MemberPair::new(a, b), MemberPair::new(b, a));
        assert!(MemberPair::new(a, a).is_none());

        let pair = MemberPair::new(a, b).unwrap();
        assert!(pair.low() < pair.high());
    }

    #[test]
    fn preview_reports_text_and_seen_state() {
        let ana = User::new("ana@example.com", None);
        let bo = User::new("bo@example.com", None);
        let now = Utc::now();
        let mut detail = ConversationDetail {
            conversation: Conversation {
                id: Uuid::new_v4(),
                is_group: false,
                name: None,
                image: None,
                last_message_at: now,
                created_at: now,
                user_ids: vec![ana.id, bo.id],
            },
            users: vec![ana.clone(), bo.clone()],
            messages: vec![],
        };

        let preview = detail.preview_for(&bo);
        assert_eq!(preview.text, "Started a conversation");
        assert!(!preview.has_seen);

        detail.messages.push(MessageWithUsers {
            message: Message {
                id: Uuid::new_v4(),
                conversation_id: detail.id(),
                sender_id: ana.id,
                content: String::new(),
                image: Some("https://cdn.example/a.png".into()),
                created_at: now,
                seen_ids: vec![ana.id],
            },
            sender: ana.clone(),
            seen: vec![ana.clone()],
        });

        assert_eq!(detail.preview_for(&bo).text, "Sent an image");
        assert!(!detail.preview_for(&bo).has_seen);
        assert!(detail.preview_for(&ana).has_seen);
        assert_eq!(detail.other_user(bo.id).map(|u| u.id), Some(ana.id));
    }
}
