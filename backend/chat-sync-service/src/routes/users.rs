use crate::{error::AppError, middleware::CurrentUser, state::AppState};
use actix_web::{get, web, HttpResponse};

#[get("/users")]
pub async fn list_users(
    state: web::Data<AppState>,
    user: CurrentUser,
) -> Result<HttpResponse, AppError> {
    let contacts = state.users.list_contacts(&user).await?;
    Ok(HttpResponse::Ok().json(contacts))
}
