use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Chat participant. `email` is the stable identity used as the personal channel key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            name,
            image: None,
            created_at: Utc::now(),
        }
    }

    /// Personal fan-out channel, `None` when the account has no usable email
    pub fn channel_key(&self) -> Option<&str> {
        let email = self.email.trim();
        if email.is_empty() {
            None
        } else {
            Some(email)
        }
    }
}
