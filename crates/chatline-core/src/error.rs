use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found")]
    NotFound,
    #[error("forbidden")]
    Forbidden,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(#[from] chatline_db::DbError),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Terminal outcomes of `dispatch`/`publish`. Per-connection delivery
/// failures are deliberately absent: they are absorbed at the fan-out edge
/// and never surfaced to the caller.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("sender is not a participant of this chat")]
    NotAParticipant,
    #[error("failed to persist message: {0}")]
    Persistence(#[source] chatline_db::DbError),
}
