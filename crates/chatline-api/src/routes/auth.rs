use axum::{extract::State, http::StatusCode, Json};
use chatline_core::{auth, snowflake, AppState};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::middleware::AuthUser;

const MAX_USERNAME_LEN: usize = 32;
const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let username = body.username.trim();
    let email = body.email.trim();
    if username.is_empty() || username.len() > MAX_USERNAME_LEN {
        return Err(ApiError::BadRequest("Invalid username".into()));
    }
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::BadRequest("Invalid email".into()));
    }
    if body.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest("Password too short".into()));
    }

    if chatline_db::users::username_or_email_taken(&state.db, username, email).await? {
        return Err(ApiError::Conflict("Username or email already in use".into()));
    }

    let password_hash = auth::hash_password(&body.password)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!(e.to_string())))?;
    let user_id = snowflake::generate(state.config.node_id);
    let user = chatline_db::users::create_user(&state.db, user_id, username, email, &password_hash)
        .await?
        .into_user();

    let token = auth::create_token(user.id, &state.config.jwt_secret, state.config.token_expiry_secs)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!(e.to_string())))?;

    tracing::info!(user_id = user.id, username, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "user": user, "token": token })),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<Value>, ApiError> {
    let row = chatline_db::users::get_user_by_email(&state.db, body.email.trim())
        .await?
        .ok_or(ApiError::Unauthorized)?;

    let valid = auth::verify_password(&body.password, &row.password_hash)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!(e.to_string())))?;
    if !valid {
        return Err(ApiError::Unauthorized);
    }

    let user = row.into_user();
    let token = auth::create_token(user.id, &state.config.jwt_secret, state.config.token_expiry_secs)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!(e.to_string())))?;

    Ok(Json(json!({ "user": user, "token": token })))
}

pub async fn get_me(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Value>, ApiError> {
    let user = chatline_db::users::get_user_by_id(&state.db, auth.user_id)
        .await?
        .ok_or(ApiError::NotFound)?
        .into_user();
    Ok(Json(json!(user)))
}
