pub mod conversations;
pub mod events;
pub mod messages;
pub mod users;

use actix_web::{get, web, HttpResponse};

#[get("/health")]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

/// Register every route; shared by the binary and the HTTP tests
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .route("/metrics", web::get().to(crate::metrics::metrics_handler))
        .service(users::list_users)
        .service(conversations::get_conversations)
        .service(conversations::create_conversation)
        .service(conversations::get_conversation)
        .service(conversations::delete_conversation)
        .service(messages::get_messages)
        .service(messages::send_message)
        .service(messages::mark_seen)
        .service(events::stream_events);
}
