use chatline_core::ConnectionId;
use chatline_models::UserId;
use uuid::Uuid;

/// Per-socket state after the connect handshake succeeded.
pub struct Session {
    pub user_id: UserId,
    pub connection_id: ConnectionId,
}

impl Session {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            connection_id: Uuid::new_v4(),
        }
    }
}
