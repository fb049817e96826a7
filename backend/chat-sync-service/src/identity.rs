//! Session token → acting user.
//!
//! Tokens are HS256 JWTs whose `sub` is the user's email. Anything that does not
//! resolve to a stored user is treated as anonymous. A failed user lookup is an
//! error, not an anonymous caller.

use crate::error::AppResult;
use crate::models::User;
use crate::store::ChatStore;
use async_trait::async_trait;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// User email
    pub sub: String,
    pub exp: i64,
}

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// `Ok(None)` means unauthenticated; callers fail closed
    async fn resolve(&self, token: &str) -> AppResult<Option<User>>;
}

pub struct JwtIdentityResolver {
    store: Arc<dyn ChatStore>,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityResolver {
    pub fn new(store: Arc<dyn ChatStore>, secret: &str) -> Self {
        Self {
            store,
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

#[async_trait]
impl IdentityResolver for JwtIdentityResolver {
    async fn resolve(&self, token: &str) -> AppResult<Option<User>> {
        let claims = match decode::<SessionClaims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => data.claims,
            Err(e) => {
                tracing::debug!(error = %e, "rejected session token");
                return Ok(None);
            }
        };

        if claims.sub.trim().is_empty() {
            return Ok(None);
        }

        self.store.find_user_by_email(&claims.sub).await.map_err(|e| {
            tracing::warn!(error = %e, "identity lookup failed");
            e.into()
        })
    }
}

/// Issue a session token for `email`, valid for `ttl`
pub fn encode_session_token(
    email: &str,
    secret: &str,
    ttl: chrono::Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = SessionClaims {
        sub: email.to_string(),
        exp: (chrono::Utc::now() + ttl).timestamp(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::store::{MemoryStore, MockChatStore, StoreError};

    const SECRET: &str = "test-session-secret";

    #[tokio::test]
    async fn resolves_known_user_from_valid_token() {
        let store = Arc::new(MemoryStore::new());
        let ana = store
            .insert_user(User::new("ana@example.com", Some("Ana".into())))
            .await
            .unwrap();
        let resolver = JwtIdentityResolver::new(store, SECRET);

        let token = encode_session_token(&ana.email, SECRET, chrono::Duration::hours(1)).unwrap();
        let resolved = resolver.resolve(&token).await.unwrap();
        assert_eq!(resolved.map(|u| u.id), Some(ana.id));
    }

    #[tokio::test]
    async fn fails_closed_on_bad_tokens() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_user(User::new("ana@example.com", None))
            .await
            .unwrap();
        let resolver = JwtIdentityResolver::new(store, SECRET);

        let wrong_secret =
            encode_session_token("ana@example.com", "other", chrono::Duration::hours(1)).unwrap();
        assert!(resolver.resolve(&wrong_secret).await.unwrap().is_none());

        let expired =
            encode_session_token("ana@example.com", SECRET, chrono::Duration::hours(-2)).unwrap();
        assert!(resolver.resolve(&expired).await.unwrap().is_none());

        let unknown =
            encode_session_token("ghost@example.com", SECRET, chrono::Duration::hours(1)).unwrap();
        assert!(resolver.resolve(&unknown).await.unwrap().is_none());

        assert!(resolver.resolve("not-a-jwt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn store_failure_is_an_error_not_an_anonymous_caller() {
        let mut store = MockChatStore::new();
        store
            .expect_find_user_by_email()
            .times(1)
            .returning(|_| Err(StoreError::Backend("connection reset".into())));
        let resolver = JwtIdentityResolver::new(Arc::new(store), SECRET);

        let token =
            encode_session_token("ana@example.com", SECRET, chrono::Duration::hours(1)).unwrap();
        let err = resolver.resolve(&token).await.unwrap_err();
        assert!(matches!(err, AppError::Database(_)));
    }
}
