use std::sync::Arc;

use axum::extract::{Multipart, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::chat::ChatOptions;
use crate::core::errors::ApiError;
use crate::speech;
use crate::state::AppState;

/// Canned reply when the model is unreachable on the audio path; the
/// text route surfaces the error instead.
const APOLOGY: &str = "I'm sorry, I cannot reply right now. Please try again later.";

#[derive(Debug, Deserialize)]
pub struct ChatParams {
    pub userid: String,
    pub sessionid: String,
    pub user_msg: String,
    #[serde(default)]
    pub story_type: Option<String>,
    /// JSON-encoded `ChatOptions`, e.g. `{"vector_search": false}`.
    #[serde(default)]
    pub func_control: Option<String>,
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ChatParams>,
) -> Result<impl IntoResponse, ApiError> {
    let options = parse_func_control(params.func_control.as_deref())?;
    if let Some(story_type) = &params.story_type {
        tracing::debug!("chat request with story_type={}", story_type);
    }

    let reply = state
        .chat
        .process_turn(&params.userid, &params.sessionid, &params.user_msg, &options)
        .await?;

    let mut body = json!({
        "sessionid": params.sessionid,
        "system_msg": reply,
    });

    if options.synthesize_speech {
        if let Some(audio) = synthesize_reply(&state, &reply).await {
            body["audio_data"] = json!(audio.audio_base64);
            body["audio_duration"] = json!(audio.duration_secs);
        }
    }

    Ok(Json(body))
}

fn parse_func_control(raw: Option<&str>) -> Result<ChatOptions, ApiError> {
    match raw {
        None => Ok(ChatOptions::default()),
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| ApiError::BadRequest(format!("invalid func_control: {e}"))),
    }
}

async fn synthesize_reply(state: &AppState, reply: &str) -> Option<speech::SynthesizedAudio> {
    let client = state.speech.as_ref()?;
    match client.synthesize(reply, None).await {
        Ok(audio) => Some(audio),
        Err(err) => {
            tracing::warn!("Speech synthesis failed: {}", err);
            None
        }
    }
}

/// Voice round trip: store the uploaded audio, recognize it, run a chat
/// turn on the transcript, and synthesize the reply. Each stage degrades
/// on failure so the client always gets the fields it understands.
pub async fn upload_audio(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut audio: Option<(String, Vec<u8>)> = None;
    let mut user_id: Option<String> = None;
    let mut session_id: Option<String> = None;
    let mut story_type: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "audio" => {
                let filename = field.file_name().unwrap_or("audio.webm").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
                audio = Some((filename, bytes.to_vec()));
            }
            "user_id" => user_id = Some(read_text(field).await?),
            "session_id" => session_id = Some(read_text(field).await?),
            "story_type" => story_type = Some(read_text(field).await?),
            other => {
                tracing::debug!("Ignoring unknown multipart field '{}'", other);
            }
        }
    }

    let (original_name, bytes) =
        audio.ok_or_else(|| ApiError::BadRequest("missing audio field".to_string()))?;
    let user_id =
        user_id.ok_or_else(|| ApiError::BadRequest("missing user_id field".to_string()))?;
    let session_id =
        session_id.ok_or_else(|| ApiError::BadRequest("missing session_id field".to_string()))?;
    if let Some(story_type) = &story_type {
        tracing::debug!("audio upload with story_type={}", story_type);
    }

    let extension = original_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
        .unwrap_or("webm");
    let filename = speech::audio_filename(&user_id, &session_id, extension);
    let path = state.paths.audio_dir.join(&filename);
    let size = bytes.len();
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(ApiError::internal)?;
    tracing::info!("Stored uploaded audio {} ({} bytes)", filename, size);

    let recognized_text = match &state.speech {
        Some(client) => match client.recognize(&path).await {
            Ok(text) => Some(text),
            Err(err) => {
                tracing::warn!("Speech recognition failed: {}", err);
                None
            }
        },
        None => None,
    };

    let ai_response = match &recognized_text {
        Some(text) => Some(
            match state
                .chat
                .process_turn(&user_id, &session_id, text, &ChatOptions::default())
                .await
            {
                Ok(reply) => reply,
                Err(err) => {
                    tracing::warn!("Chat turn on transcript failed: {}", err);
                    APOLOGY.to_string()
                }
            },
        ),
        None => None,
    };

    let synthesized = match &ai_response {
        Some(reply) if reply.as_str() != APOLOGY => synthesize_reply(&state, reply).await,
        _ => None,
    };

    Ok(Json(json!({
        "msg": if recognized_text.is_some() {
            "audio processed"
        } else {
            "speech recognition unavailable"
        },
        "filename": filename,
        "path": path.to_string_lossy(),
        "size": size,
        "user_id": user_id,
        "session_id": session_id,
        "recognized_text": recognized_text,
        "ai_response": ai_response,
        "ai_audio_data": synthesized.as_ref().map(|a| a.audio_base64.clone()),
        "ai_audio_duration": synthesized.as_ref().map(|a| a.duration_secs),
    })))
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn func_control_defaults_when_absent() {
        let options = parse_func_control(None).unwrap();
        assert!(options.keyword_matching);
        assert!(options.vector_search);
        assert!(!options.synthesize_speech);
    }

    #[test]
    fn func_control_overrides_selected_flags() {
        let options =
            parse_func_control(Some(r#"{"vector_search": false, "synthesize_speech": true}"#))
                .unwrap();
        assert!(options.keyword_matching);
        assert!(!options.vector_search);
        assert!(options.synthesize_speech);
    }

    #[test]
    fn malformed_func_control_is_a_bad_request() {
        let err = parse_func_control(Some("not json")).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
