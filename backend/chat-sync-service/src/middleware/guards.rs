//! Request guards. Handlers that take [`CurrentUser`] cannot run for an
//! unauthenticated caller.

use crate::error::AppError;
use crate::models::User;
use crate::state::AppState;
use actix_web::{http::header, web, Error, FromRequest, HttpRequest};
use std::future::Future;
use std::ops::Deref;
use std::pin::Pin;

/// The user resolved from the request's Bearer session token
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl Deref for CurrentUser {
    type Target = User;

    fn deref(&self) -> &User {
        &self.0
    }
}

fn bearer_token(req: &HttpRequest) -> Option<String> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

impl FromRequest for CurrentUser {
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        let token = bearer_token(req);
        let state = req.app_data::<web::Data<AppState>>().cloned();

        Box::pin(async move {
            let token = token.ok_or(AppError::Unauthorized)?;
            let state = state.ok_or(AppError::Internal)?;
            // A failed lookup surfaces as a server error, not as a 401
            let user = state
                .identity
                .resolve(&token)
                .await?
                .ok_or(AppError::Unauthorized)?;
            Ok(CurrentUser(user))
        })
    }
}
