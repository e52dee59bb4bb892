use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ChatId, MessageId, UserId};

/// A persisted chat message. Immutable once created: the core never edits
/// or deletes messages, it only appends and fans out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
}
