use crate::capture::{RecordedAudio, Transcriber};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

/// Client for an OpenAI-compatible `/audio/transcriptions` endpoint.
pub struct WhisperTranscriber {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl WhisperTranscriber {
    pub fn new(base_url: &str, api_key: String, model: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build transcription HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        })
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio: &RecordedAudio) -> Result<String> {
        if audio.is_empty() {
            return Ok(String::new());
        }

        let wav = audio.to_wav()?;
        tracing::debug!(
            "Uploading {:.1}s of audio ({} bytes) for transcription",
            audio.duration_secs(),
            wav.len()
        );

        let part = Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .context("Invalid MIME type for audio upload")?;
        let form = Form::new()
            .part("file", part)
            .text("model", self.model.clone());

        let url = format!("{}/audio/transcriptions", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .context("Transcription request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Transcription API error {status}: {body}"));
        }

        let body = resp
            .json::<TranscriptionResponse>()
            .await
            .context("Failed to parse transcription response")?;
        Ok(body.text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_audio_skips_the_request() {
        // Port 9 is never contacted: empty audio short-circuits.
        let transcriber =
            WhisperTranscriber::new("http://127.0.0.1:9/", "key".into(), "whisper-1".into())
                .unwrap();
        let text = transcriber
            .transcribe(&RecordedAudio::new(Vec::new(), 16_000))
            .await
            .unwrap();
        assert!(text.is_empty());
    }

    #[tokio::test]
    async fn unreachable_service_is_an_error() {
        let transcriber =
            WhisperTranscriber::new("http://127.0.0.1:9", "key".into(), "whisper-1".into())
                .unwrap();
        let audio = RecordedAudio::new(vec![0.2; 1600], 16_000);
        assert!(transcriber.transcribe(&audio).await.is_err());
    }
}
