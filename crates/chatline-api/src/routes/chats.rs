use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chatline_core::{snowflake, AppState};
use chatline_models::{Chat, ChatId, UserId};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;

use crate::error::ApiError;
use crate::middleware::AuthUser;

const MAX_CHAT_NAME_LEN: usize = 128;

#[derive(Debug, Deserialize)]
pub struct CreateDirectChatRequest {
    pub recipient_id: UserId,
}

#[derive(Debug, Deserialize)]
pub struct CreateGroupChatRequest {
    pub name: String,
    pub participant_ids: Vec<UserId>,
}

async fn load_chat(state: &AppState, chat_id: ChatId) -> Result<Chat, ApiError> {
    let row = chatline_db::chats::get_chat(&state.db, chat_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    let participants = chatline_db::chats::get_participants(&state.db, chat_id).await?;
    Ok(row.into_chat(participants))
}

/// Re-read the committed participant list and push it through the notifier,
/// so live connections observe the change before the HTTP response goes out.
///
/// Callers must hold the chat's membership lock from before the database
/// mutation until this returns; the re-read is only authoritative while no
/// other mutation can commit between it and the install.
async fn notify_membership(state: &AppState, chat_id: ChatId) -> Result<(), ApiError> {
    let members: HashSet<UserId> = chatline_db::chats::get_participants(&state.db, chat_id)
        .await?
        .into_iter()
        .collect();
    state.dispatcher.membership_changed(chat_id, members);
    Ok(())
}

pub async fn list_chats(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Value>, ApiError> {
    let rows = chatline_db::chats::list_chats_for_user(&state.db, auth.user_id).await?;
    let mut chats = Vec::with_capacity(rows.len());
    for row in rows {
        let participants = chatline_db::chats::get_participants(&state.db, row.id).await?;
        chats.push(row.into_chat(participants));
    }
    Ok(Json(json!(chats)))
}

pub async fn create_direct_chat(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateDirectChatRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if body.recipient_id == auth.user_id {
        return Err(ApiError::BadRequest(
            "Cannot create a chat with yourself".into(),
        ));
    }
    chatline_db::users::get_user_by_id(&state.db, body.recipient_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    if let Some(existing) =
        chatline_db::chats::find_direct_chat(&state.db, auth.user_id, body.recipient_id).await?
    {
        let chat = load_chat(&state, existing.id).await?;
        return Ok((StatusCode::OK, Json(json!(chat))));
    }

    let chat_id = snowflake::generate(state.config.node_id);
    let _guard = state.dispatcher.membership_lock(chat_id).lock_owned().await;
    let row = chatline_db::chats::create_chat(
        &state.db,
        chat_id,
        None,
        false,
        auth.user_id,
        &[auth.user_id, body.recipient_id],
    )
    .await?;
    notify_membership(&state, chat_id).await?;

    let chat = row.into_chat(vec![auth.user_id, body.recipient_id]);
    tracing::info!(chat_id, creator_id = auth.user_id, "direct chat created");
    Ok((StatusCode::CREATED, Json(json!(chat))))
}

pub async fn create_group_chat(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateGroupChatRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let name = body.name.trim();
    if name.is_empty() || name.len() > MAX_CHAT_NAME_LEN {
        return Err(ApiError::BadRequest("Invalid chat name".into()));
    }

    // Creator is always a member, whether or not the request listed them.
    let mut participant_ids: Vec<UserId> = Vec::new();
    let mut seen = HashSet::new();
    for user_id in std::iter::once(auth.user_id).chain(body.participant_ids.iter().copied()) {
        if seen.insert(user_id) {
            participant_ids.push(user_id);
        }
    }
    for user_id in &participant_ids {
        if chatline_db::users::get_user_by_id(&state.db, *user_id)
            .await?
            .is_none()
        {
            return Err(ApiError::BadRequest(format!("Unknown user {user_id}")));
        }
    }

    let chat_id = snowflake::generate(state.config.node_id);
    let _guard = state.dispatcher.membership_lock(chat_id).lock_owned().await;
    let row = chatline_db::chats::create_chat(
        &state.db,
        chat_id,
        Some(name),
        true,
        auth.user_id,
        &participant_ids,
    )
    .await?;
    notify_membership(&state, chat_id).await?;

    let chat = row.into_chat(participant_ids);
    tracing::info!(chat_id, creator_id = auth.user_id, "group chat created");
    Ok((StatusCode::CREATED, Json(json!(chat))))
}

pub async fn delete_chat(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(chat_id): Path<ChatId>,
) -> Result<StatusCode, ApiError> {
    let chat = load_chat(&state, chat_id).await?;
    if chat.creator_id != auth.user_id {
        return Err(ApiError::Forbidden);
    }

    let _guard = state.dispatcher.membership_lock(chat_id).lock_owned().await;
    chatline_db::chats::delete_chat(&state.db, chat_id).await?;
    state.dispatcher.room_deleted(chat_id);
    tracing::info!(chat_id, "chat deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_participant(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((chat_id, user_id)): Path<(ChatId, UserId)>,
) -> Result<StatusCode, ApiError> {
    let chat = load_chat(&state, chat_id).await?;
    if !chat.is_group {
        return Err(ApiError::BadRequest(
            "Cannot add participants to a direct chat".into(),
        ));
    }
    if chat.creator_id != auth.user_id {
        return Err(ApiError::Forbidden);
    }
    chatline_db::users::get_user_by_id(&state.db, user_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let _guard = state.dispatcher.membership_lock(chat_id).lock_owned().await;
    chatline_db::chats::add_participant(&state.db, chat_id, user_id).await?;
    notify_membership(&state, chat_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_participant(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((chat_id, user_id)): Path<(ChatId, UserId)>,
) -> Result<StatusCode, ApiError> {
    let chat = load_chat(&state, chat_id).await?;
    if !chat.is_group {
        return Err(ApiError::BadRequest(
            "Cannot remove participants from a direct chat".into(),
        ));
    }
    if chat.creator_id != auth.user_id {
        return Err(ApiError::Forbidden);
    }
    if user_id == chat.creator_id {
        return Err(ApiError::BadRequest(
            "Creator cannot be removed; delete the chat instead".into(),
        ));
    }

    let _guard = state.dispatcher.membership_lock(chat_id).lock_owned().await;
    chatline_db::chats::remove_participant(&state.db, chat_id, user_id).await?;
    notify_membership(&state, chat_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn leave_chat(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(chat_id): Path<ChatId>,
) -> Result<StatusCode, ApiError> {
    let chat = load_chat(&state, chat_id).await?;
    if !chat.is_group {
        return Err(ApiError::BadRequest("Cannot leave a direct chat".into()));
    }
    if !chat.participant_ids.contains(&auth.user_id) {
        return Err(ApiError::Forbidden);
    }
    if chat.creator_id == auth.user_id {
        return Err(ApiError::BadRequest(
            "Creator cannot leave; delete the chat instead".into(),
        ));
    }

    let _guard = state.dispatcher.membership_lock(chat_id).lock_owned().await;
    chatline_db::chats::remove_participant(&state.db, chat_id, auth.user_id).await?;
    notify_membership(&state, chat_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
