pub mod conversation;
pub mod message;
pub mod user;

pub use conversation::{
    Conversation, ConversationDetail, ConversationPreview, ConversationUpdate, MemberPair,
};
pub use message::{Message, MessageWithUsers};
pub use user::User;
