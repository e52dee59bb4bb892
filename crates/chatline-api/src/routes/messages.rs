use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chatline_core::AppState;
use chatline_models::{ChatId, MessageId};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::middleware::AuthUser;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 100;
const MAX_MESSAGE_LEN: usize = 4000;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub before: Option<MessageId>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub body: String,
}

pub async fn list_messages(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(chat_id): Path<ChatId>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, ApiError> {
    if !chatline_db::chats::is_participant(&state.db, chat_id, auth.user_id).await? {
        return Err(ApiError::Forbidden);
    }

    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let rows = chatline_db::messages::list_for_chat(&state.db, chat_id, query.before, limit).await?;
    let messages: Vec<_> = rows.into_iter().map(|row| row.into_message()).collect();
    Ok(Json(json!(messages)))
}

pub async fn send_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(chat_id): Path<ChatId>,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let text = body.body.trim();
    if text.is_empty() || text.len() > MAX_MESSAGE_LEN {
        return Err(ApiError::BadRequest("Invalid message body".into()));
    }

    // No originating connection on this path; every live connection of the
    // sender gets the broadcast, and the response body carries the message.
    let message = state
        .dispatcher
        .dispatch(chat_id, auth.user_id, None, text)
        .await?;
    Ok((StatusCode::CREATED, Json(json!(message))))
}
