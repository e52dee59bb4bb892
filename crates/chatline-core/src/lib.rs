//! Realtime delivery core: auth, presence, room membership, and the
//! message dispatch pipeline shared by the REST API and the gateway.

pub mod auth;
pub mod dispatch;
pub mod error;
pub mod presence;
pub mod rooms;
pub mod snowflake;

pub use dispatch::{ChatStore, Dispatcher, Ephemeral};
pub use error::{CoreError, DispatchError};
pub use presence::{ConnectionId, EventSender, PresenceRegistry};
pub use rooms::RoomRegistry;

use chatline_db::DbPool;
use std::sync::Arc;

/// Runtime settings shared across request handlers.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub token_expiry_secs: u64,
    pub node_id: u16,
}

/// Shared application state, cloned per connection and per request.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Arc<AppConfig>,
    pub dispatcher: Arc<Dispatcher<DbPool>>,
}

impl AppState {
    pub fn new(db: DbPool, config: AppConfig, rooms: RoomRegistry) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(db.clone(), rooms, config.node_id));
        Self {
            db,
            config: Arc::new(config),
            dispatcher,
        }
    }
}
