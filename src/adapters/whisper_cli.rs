//! Local whisper transcription backend.
//!
//! Shells out to a whisper binary and reads back its JSON output.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use super::TranscriptionEngine;
use crate::config::WhisperConfig;

/// Whisper CLI engine
pub struct WhisperCliEngine {
    binary_path: PathBuf,
    model: String,
    language: String,
}

/// Whisper output JSON structure
#[derive(Debug, Deserialize)]
struct WhisperOutput {
    text: String,
}

impl WhisperCliEngine {
    /// Create an engine using `whisper` from PATH
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            binary_path: PathBuf::from("whisper"),
            model: model.into(),
            language: "en".to_string(),
        }
    }

    /// Create from config
    pub fn from_config(config: &WhisperConfig) -> Self {
        Self::new(config.model.clone())
            .with_binary_path(&config.cli_path)
            .with_language(&config.language)
    }

    /// Set a custom binary path
    pub fn with_binary_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary_path = path.into();
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }
}

#[async_trait]
impl TranscriptionEngine for WhisperCliEngine {
    fn name(&self) -> &str {
        "whisper-cli"
    }

    async fn transcribe_file(&self, path: &Path) -> Result<String> {
        // Whisper writes <stem>.json into the output dir
        let temp_dir = tempfile::tempdir().context("Failed to create temp dir")?;

        let output = Command::new(&self.binary_path)
            .arg(path)
            .arg("--model")
            .arg(&self.model)
            .arg("--output_dir")
            .arg(temp_dir.path())
            .arg("--output_format")
            .arg("json")
            .arg("--language")
            .arg(&self.language)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.binary_path.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Whisper failed: {}", stderr.trim());
        }

        let stem = path.file_stem().unwrap_or_default().to_string_lossy();
        let json_path = temp_dir.path().join(format!("{}.json", stem));

        let json_content = tokio::fs::read_to_string(&json_path)
            .await
            .context("Failed to read whisper output")?;

        let whisper: WhisperOutput =
            serde_json::from_str(&json_content).context("Failed to parse whisper JSON")?;

        Ok(whisper.text.trim().to_string())
    }
}
