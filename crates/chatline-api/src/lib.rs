use axum::{
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use chatline_core::AppState;
use serde_json::json;

pub mod error;
pub mod middleware;
pub mod routes;

pub fn build_router() -> Router<AppState> {
    let cors = build_cors_layer();
    Router::new()
        // Health
        .route("/health", get(health))
        .route("/api/v1/health", get(health))
        // Auth
        .route("/api/v1/users/register", post(routes::auth::register))
        .route("/api/v1/users/login", post(routes::auth::login))
        .route("/api/v1/users/me", get(routes::auth::get_me))
        // Chats
        .route(
            "/api/v1/chats",
            get(routes::chats::list_chats).post(routes::chats::create_direct_chat),
        )
        .route("/api/v1/chats/group", post(routes::chats::create_group_chat))
        .route(
            "/api/v1/chats/{chat_id}",
            delete(routes::chats::delete_chat),
        )
        .route(
            "/api/v1/chats/{chat_id}/participants/@me",
            delete(routes::chats::leave_chat),
        )
        .route(
            "/api/v1/chats/{chat_id}/participants/{user_id}",
            post(routes::chats::add_participant).delete(routes::chats::remove_participant),
        )
        // Messages
        .route(
            "/api/v1/chats/{chat_id}/messages",
            get(routes::messages::list_messages).post(routes::messages::send_message),
        )
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn build_cors_layer() -> tower_http::cors::CorsLayer {
    tower_http::cors::CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
}

async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "service": "chatline" })),
    )
}
