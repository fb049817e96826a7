use crate::{error::AppError, middleware::CurrentUser, state::AppState};
use actix_web::{get, post, web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: String,
    pub image: Option<String>,
}

#[get("/conversations/{id}/messages")]
pub async fn get_messages(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let messages = state
        .messages
        .list_messages(path.into_inner(), &user)
        .await?;
    Ok(HttpResponse::Ok().json(messages))
}

#[post("/conversations/{id}/messages")]
pub async fn send_message(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<Uuid>,
    body: web::Json<SendMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let message = state
        .messages
        .append(path.into_inner(), &user, &body.content, body.image)
        .await?;
    Ok(HttpResponse::Created().json(message))
}

#[post("/conversations/{id}/seen")]
pub async fn mark_seen(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let outcome = state.messages.mark_seen(path.into_inner(), &user).await?;
    Ok(HttpResponse::Ok().json(outcome))
}
