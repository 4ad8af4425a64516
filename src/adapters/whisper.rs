//! Faster-whisper HTTP transcription backend.
//!
//! Endpoint: POST {url}/inference (multipart `audio_file` + `model`)
//! Response: `{"text": ...}`, `{"segments": [{"text": ...}]}`, or plain text

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::debug;

use super::TranscriptionEngine;
use crate::config::WhisperConfig;

/// Faster-whisper REST client
pub struct WhisperHttpEngine {
    /// Base URL without trailing slash
    base_url: String,
    /// Model name forwarded with every request
    model: String,
    client: reqwest::Client,
}

/// Inference response shape; every field optional
#[derive(Debug, Default, Deserialize)]
struct InferenceResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    segments: Option<Vec<InferenceSegment>>,
}

#[derive(Debug, Deserialize)]
struct InferenceSegment {
    #[serde(default)]
    text: String,
}

impl WhisperHttpEngine {
    /// Create a new engine
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build whisper HTTP client")?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client,
        })
    }

    /// Create from config
    pub fn from_config(config: &WhisperConfig) -> Result<Self> {
        let timeout = if config.timeout_secs > 0 {
            Duration::from_secs(config.timeout_secs)
        } else {
            Duration::from_secs(60)
        };
        Self::new(config.url.clone(), config.model.clone(), timeout)
    }

    /// Reachability check; the server answers 200 or 404 on its root page
    pub async fn health(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/", self.base_url))
            .send()
            .await
            .context("Whisper server unreachable")?;

        let status = response.status();
        if status.as_u16() < 500 {
            Ok(())
        } else {
            anyhow::bail!("Whisper health failed: status={}", status)
        }
    }
}

/// Pull transcript text out of an inference response body
fn parse_transcript(body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<InferenceResponse>(body) {
        if let Some(text) = parsed.text.filter(|t| !t.is_empty()) {
            return text;
        }
        if let Some(segments) = parsed.segments {
            return segments
                .iter()
                .map(|s| s.text.as_str())
                .collect::<Vec<_>>()
                .join(" ")
                .trim()
                .to_string();
        }
    }
    body.trim().to_string()
}

#[async_trait]
impl TranscriptionEngine for WhisperHttpEngine {
    fn name(&self) -> &str {
        "whisper-http"
    }

    async fn transcribe_file(&self, path: &Path) -> Result<String> {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read audio file: {}", path.display()))?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio.wav".to_string());

        let part = Part::bytes(data)
            .file_name(file_name)
            .mime_str("audio/wav")
            .context("Failed to create multipart part")?;

        let form = Form::new()
            .part("audio_file", part)
            .text("model", self.model.clone());

        let response = self
            .client
            .post(format!("{}/inference", self.base_url))
            .multipart(form)
            .send()
            .await
            .context("Failed to send audio to whisper")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read whisper response")?;

        if !status.is_success() {
            anyhow::bail!("Whisper error ({}): {}", status, body);
        }

        let text = parse_transcript(&body);
        debug!(path = %path.display(), chars = text.len(), "transcribed");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_field() {
        assert_eq!(parse_transcript(r#"{"text":"hello world"}"#), "hello world");
    }

    #[test]
    fn test_parse_segments() {
        let body = r#"{"text":"","segments":[{"text":" hello"},{"text":"world "}]}"#;
        assert_eq!(parse_transcript(body), "hello world");
    }

    #[test]
    fn test_parse_plain_body() {
        assert_eq!(parse_transcript("  just text\n"), "just text");
        assert_eq!(parse_transcript(r#"{"other":1}"#), r#"{"other":1}"#);
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let engine =
            WhisperHttpEngine::new("http://whisper:9000/", "base", Duration::from_secs(5)).unwrap();
        assert_eq!(engine.base_url, "http://whisper:9000");
        assert_eq!(engine.name(), "whisper-http");
    }
}
