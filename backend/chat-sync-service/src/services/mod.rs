pub mod conversation_service;
pub mod message_service;
pub mod user_service;

pub use conversation_service::ConversationService;
pub use message_service::{MessageService, SeenOutcome};
pub use user_service::UserService;
