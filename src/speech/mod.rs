//! Speech recognition and synthesis over a cloud HTTP API.
//!
//! Both directions are thin wrappers: upload the audio for recognition,
//! post the text for synthesis. The synthesized audio comes back as raw
//! bytes and is handed to clients base64-encoded, together with an
//! estimated playback duration (the synthesis endpoint does not report
//! one).

use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Local;
use reqwest::multipart;
use reqwest::Client;
use serde_json::{json, Value};

use crate::core::errors::ApiError;

/// Synthesis input longer than this is truncated (provider limit).
const MAX_TTS_CHARS: usize = 2000;

#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub audio_base64: String,
    pub duration_secs: f32,
}

#[derive(Clone)]
pub struct SpeechClient {
    base_url: String,
    api_key: String,
    voice: String,
    client: Client,
}

impl SpeechClient {
    pub fn new(base_url: String, api_key: String, voice: String, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            voice,
            client,
        }
    }

    /// Uploads an audio file for recognition and returns the transcript.
    pub async fn recognize(&self, audio_path: &Path) -> Result<String, ApiError> {
        let bytes = tokio::fs::read(audio_path).await.map_err(ApiError::internal)?;
        let filename = audio_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio")
            .to_string();

        let part = multipart::Part::bytes(bytes).file_name(filename);
        let form = multipart::Form::new().part("file", part);

        let url = format!("{}/asr/recognize", self.base_url);
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(ApiError::upstream)?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "speech recognition failed ({status}): {text}"
            )));
        }

        let payload: Value = res.json().await.map_err(ApiError::upstream)?;
        let text = payload["text"]
            .as_str()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ApiError::Upstream("speech recognition returned no text".to_string())
            })?;
        Ok(text)
    }

    /// Synthesizes speech for the text and returns base64 audio plus an
    /// estimated duration.
    pub async fn synthesize(
        &self,
        text: &str,
        voice: Option<&str>,
    ) -> Result<SynthesizedAudio, ApiError> {
        let text = truncate_chars(text, MAX_TTS_CHARS);
        let voice = voice.unwrap_or(&self.voice);

        let url = format!("{}/tts/synthesize", self.base_url);
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({ "text": text, "voice": voice }))
            .send()
            .await
            .map_err(ApiError::upstream)?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "speech synthesis failed ({status}): {body}"
            )));
        }

        let bytes = res.bytes().await.map_err(ApiError::upstream)?;
        if bytes.is_empty() {
            return Err(ApiError::Upstream(
                "speech synthesis returned no audio".to_string(),
            ));
        }

        Ok(SynthesizedAudio {
            audio_base64: BASE64.encode(&bytes),
            duration_secs: estimate_duration(&text),
        })
    }
}

/// Filename for an uploaded audio blob: `{user}_{session}_{timestamp}.{ext}`.
pub fn audio_filename(user_id: &str, session_id: &str, extension: &str) -> String {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    format!("{user_id}_{session_id}_{timestamp}.{extension}")
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    tracing::warn!(
        "Synthesis text exceeds {} characters, truncating ({} given)",
        max_chars,
        text.chars().count()
    );
    text.chars().take(max_chars).collect()
}

/// Rough playback length: CJK characters are spoken one by one, latin text
/// word by word.
pub fn estimate_duration(text: &str) -> f32 {
    let cjk_chars = text
        .chars()
        .filter(|c| ('\u{4e00}'..='\u{9fff}').contains(c))
        .count();
    let latin_words = text
        .split_whitespace()
        .filter(|w| w.chars().all(|c| c.is_ascii_alphabetic()))
        .count();
    let other_chars = text
        .chars()
        .filter(|c| {
            !('\u{4e00}'..='\u{9fff}').contains(c) && !c.is_whitespace() && !c.is_ascii_alphabetic()
        })
        .count();

    let secs = cjk_chars as f32 * 0.25 + latin_words as f32 * 0.4 + other_chars as f32 * 0.02;
    secs.max(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_grows_with_text() {
        let short = estimate_duration("hello there");
        let long = estimate_duration(&"hello there ".repeat(50));
        assert!(long > short);
    }

    #[test]
    fn duration_has_a_floor() {
        assert_eq!(estimate_duration(""), 1.0);
    }

    #[test]
    fn cjk_counts_per_character() {
        let latin = estimate_duration("ab cd");
        let cjk = estimate_duration("韬奋周刊评论");
        assert!(cjk > latin);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "韬".repeat(3000);
        let truncated = truncate_chars(&text, MAX_TTS_CHARS);
        assert_eq!(truncated.chars().count(), MAX_TTS_CHARS);
    }

    #[test]
    fn audio_filename_embeds_ids_and_extension() {
        let name = audio_filename("u1", "s1", "webm");
        assert!(name.starts_with("u1_s1_"));
        assert!(name.ends_with(".webm"));
    }
}
