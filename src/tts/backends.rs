use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::{Result, VideoError};

use super::{SynthesizedAudio, TtsBackend, TtsRequest};

/// Primary TTS backend driving the `edge-tts` CLI
///
/// The CLI speaks the neural-voice service directly; we hand it the text and
/// voice, let it write an mp3 into the working directory, and measure the
/// result with ffprobe.
pub struct EdgeTtsBackend {
    cli_path: String,
    scratch_dir: std::path::PathBuf,
}

impl EdgeTtsBackend {
    pub fn new(scratch_dir: &Path) -> Self {
        Self {
            cli_path: "edge-tts".to_string(),
            scratch_dir: scratch_dir.to_path_buf(),
        }
    }

    /// Check if the edge-tts CLI is available
    pub async fn check_availability(&self) -> bool {
        Command::new(&self.cli_path)
            .arg("--version")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }
}

#[async_trait]
impl TtsBackend for EdgeTtsBackend {
    async fn synthesize(&self, request: &TtsRequest) -> Result<SynthesizedAudio> {
        let output_path = self
            .scratch_dir
            .join(format!("tts_{}.mp3", &uuid::Uuid::new_v4().to_string()[..8]));

        let output = Command::new(&self.cli_path)
            .args([
                "--voice",
                &request.voice,
                "--text",
                &request.text,
                "--write-media",
                &output_path.to_string_lossy(),
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| VideoError::BackendUnavailable {
                backend: self.backend_name().to_string(),
                message: format!("failed to launch edge-tts: {e}"),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // The CLI surfaces service throttling as a 429 in its error text
            if stderr.contains("429") {
                return Err(VideoError::RateLimited {
                    backend: self.backend_name().to_string(),
                    message: stderr.to_string(),
                });
            }
            return Err(VideoError::Synthesis(format!("edge-tts failed: {stderr}")));
        }

        let audio = fs_err::read(&output_path).map_err(|e| {
            VideoError::Synthesis(format!("edge-tts produced no audio file: {e}"))
        })?;
        let duration = probe_duration(&output_path).await.ok();
        let _ = fs_err::remove_file(&output_path);

        Ok(SynthesizedAudio {
            audio,
            duration_secs: duration,
        })
    }

    fn backend_name(&self) -> &'static str {
        "edge-tts"
    }
}

/// Fallback TTS backend speaking the Gemini audio-generation API
pub struct GeminiTtsBackend {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiTtsBackend {
    pub fn new(api_key: &str) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(VideoError::Configuration(
                "Gemini API key not found. Set providers.gemini_api_key in the config file"
                    .to_string(),
            ));
        }

        Ok(Self {
            client: Client::new(),
            api_key: api_key.trim().to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta/models".to_string(),
        })
    }
}

#[async_trait]
impl TtsBackend for GeminiTtsBackend {
    async fn synthesize(&self, request: &TtsRequest) -> Result<SynthesizedAudio> {
        let url = format!("{}/gemini-2.5-flash:generateContent", self.base_url);

        // Best-effort voice mapping: the service takes a style name rather
        // than a neural voice id
        let style = if request.voice.contains("Expressive") || request.voice.contains("Aria") {
            "expressive"
        } else {
            "natural"
        };

        let body = json!({
            "contents": [{
                "parts": [{ "text": format!("Generate speech for the following text: {}", request.text) }]
            }],
            "generationConfig": {
                "response_modalities": ["AUDIO"],
                "speech_config": {
                    "voice_config": {
                        "prebuilt_voice_config": { "voice_name": style }
                    }
                }
            }
        });

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| VideoError::from_request(self.backend_name(), e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(VideoError::from_status(self.backend_name(), status, &text));
        }

        let result: Value = response
            .json()
            .await
            .map_err(|e| VideoError::from_request(self.backend_name(), e))?;

        let encoded = result["candidates"][0]["content"]["parts"][0]["audio_data"]
            .as_str()
            .ok_or_else(|| VideoError::Validation {
                backend: self.backend_name().to_string(),
                message: "response carries no audio data".to_string(),
            })?;

        let audio = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| VideoError::Validation {
                backend: self.backend_name().to_string(),
                message: format!("audio payload is not valid base64: {e}"),
            })?;

        // The API reports no duration; the synthesizer estimates from the
        // narration rate
        Ok(SynthesizedAudio {
            audio,
            duration_secs: None,
        })
    }

    fn backend_name(&self) -> &'static str {
        "gemini-tts"
    }
}

/// Query audio duration via ffprobe. Returns seconds.
pub async fn probe_duration(path: &Path) -> Result<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "csv=p=0",
        ])
        .arg(path.as_os_str())
        .output()
        .await
        .map_err(|e| VideoError::Synthesis(format!("failed to run ffprobe: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(VideoError::Synthesis(format!("ffprobe failed: {stderr}")));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .trim()
        .parse::<f64>()
        .map_err(|e| VideoError::Synthesis(format!("failed to parse ffprobe duration: {e}")))
}
