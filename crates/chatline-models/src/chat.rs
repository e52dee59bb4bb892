use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ChatId, UserId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    /// None for one-on-one chats; the client renders the other party's name.
    pub name: Option<String>,
    pub is_group: bool,
    pub creator_id: UserId,
    pub participant_ids: Vec<UserId>,
    pub created_at: DateTime<Utc>,
}
