pub mod chat;
pub mod gateway;
pub mod message;
pub mod user;

/// Stable identifier for a registered user, authoritative in the user store.
pub type UserId = i64;
/// Identifier for a chat room, authoritative in the chat store.
pub type ChatId = i64;
/// Identifier for a persisted message.
pub type MessageId = i64;

pub use chat::Chat;
pub use gateway::{ClientEvent, ServerEvent};
pub use message::Message;
pub use user::User;
