use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::server::handlers::{chat, health, sessions};
use crate::state::AppState;

/// Creates the application router.
///
/// The chat surface uses GET routes with the parameter names existing
/// frontends already send; per-request behavior toggles travel in the
/// optional `func_control` parameter.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/chat", get(chat::chat))
        .route("/load_history", get(sessions::load_history))
        .route("/load_specific_session", get(sessions::load_specific_session))
        .route("/create_user", get(sessions::create_user))
        .route("/create_new_chat", get(sessions::create_new_chat))
        .route("/chat/delete_session", get(sessions::delete_session))
        .route("/chat/save_usermsg", get(sessions::save_usermsg))
        .route("/upload_audio", post(chat::upload_audio))
        .fallback(not_found)
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "resource not found"})),
    )
}
