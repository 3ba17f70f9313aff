use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::chat::prompts;
use crate::core::errors::ApiError;
use crate::llm::ChatRequest;
use crate::session::ChatTurn;
use crate::state::AppState;

const DEFAULT_ABSTRACT: &str = "conversation history";

#[derive(Debug, Deserialize)]
pub struct UserParams {
    pub userid: String,
}

#[derive(Debug, Deserialize)]
pub struct SessionParams {
    pub userid: String,
    pub sessionid: String,
}

pub async fn load_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UserParams>,
) -> Result<impl IntoResponse, ApiError> {
    let entries = state.db.list_history(&params.userid).await?;

    if entries.is_empty() {
        // placeholder row the frontend expects for a user with no history
        return Ok(Json(json!({
            "msg": [{
                "session_id": "10001",
                "abstract": "10001",
                "update_time": "1999/01/01 12:00:00"
            }]
        })));
    }

    let formatted: Vec<Value> = entries
        .iter()
        .map(|entry| {
            json!({
                "session_id": entry.session_id,
                "abstract": entry.abstract_text,
                "update_time": entry.update_time.format("%Y/%m/%d %H:%M:%S").to_string(),
            })
        })
        .collect();

    Ok(Json(json!({ "msg": formatted })))
}

/// Loads one persisted session and installs it as the live in-memory
/// session, replacing whatever was there.
pub async fn load_specific_session(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SessionParams>,
) -> Result<impl IntoResponse, ApiError> {
    let history_json = state
        .db
        .load_session(&params.userid, &params.sessionid)
        .await?;

    let Some(history_json) = history_json else {
        return Ok(Json(json!({ "msg": [] })));
    };

    let turns: Vec<ChatTurn> = serde_json::from_str(&history_json)
        .map_err(|e| ApiError::Internal(format!("stored history is corrupt: {e}")))?;

    state
        .sessions
        .replace(&params.userid, &params.sessionid, turns.clone())
        .await;

    Ok(Json(json!({
        "msg": [{
            "user_id": params.userid,
            "session_id": params.sessionid,
            "history": turns,
        }]
    })))
}

pub async fn create_user(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = state.sessions.create_user().await;
    Ok(Json(json!({ "user_id": user_id })))
}

pub async fn create_new_chat(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UserParams>,
) -> Result<impl IntoResponse, ApiError> {
    let session_id = state.sessions.create_session(&params.userid).await;
    state
        .db
        .insert_session_row(&params.userid, &session_id)
        .await?;

    Ok(Json(json!({
        "user_id": params.userid,
        "session_id": session_id,
    })))
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SessionParams>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .sessions
        .delete(&params.userid, &params.sessionid)
        .await?;
    Ok(Json(json!({ "msg": "session deleted" })))
}

/// Persists every live session of the user: the turn history as JSON plus
/// a short model-generated abstract. An abstract failure falls back to a
/// default string so the save itself still happens.
pub async fn save_usermsg(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UserParams>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.sessions.contains_user(&params.userid).await {
        return Ok(Json(json!({ "msg": "no active sessions for user" })));
    }

    let sessions = state.sessions.user_sessions(&params.userid).await;
    let mut saved = 0usize;

    for (session_id, turns) in sessions {
        if turns.is_empty() {
            continue;
        }

        let history_json = serde_json::to_string(&turns).map_err(ApiError::internal)?;
        let abstract_text = generate_abstract(&state, &turns).await;
        state
            .db
            .save_session(&params.userid, &session_id, &history_json, &abstract_text)
            .await?;
        saved += 1;
    }

    Ok(Json(json!({ "msg": format!("saved {saved} sessions") })))
}

async fn generate_abstract(state: &AppState, turns: &[ChatTurn]) -> String {
    let rendered = prompts::render_history(turns);
    let prompt = prompts::session_abstract(&rendered);
    match state
        .llm
        .chat(ChatRequest::prompt(prompt), &state.settings.chat_model)
        .await
    {
        Ok(abstract_text) => abstract_text.trim().to_string(),
        Err(err) => {
            tracing::warn!("Abstract generation failed: {}", err);
            DEFAULT_ABSTRACT.to_string()
        }
    }
}
