use crate::error::AppResult;
use crate::models::User;
use crate::store::ChatStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn ChatStore>,
}

impl UserService {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// People `current` can start a conversation with, newest account first
    pub async fn list_contacts(&self, current: &User) -> AppResult<Vec<User>> {
        Ok(self.store.list_users_except(current.id).await?)
    }
}
